//! Bin coordinates and the geometry descriptor shared by all
//! projection-data objects.

use std::sync::Arc;

/// Full coordinate of one measured value in projection (sinogram) space.
///
/// `timing_pos_num` is 0 for non-TOF data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Bin {
    pub segment_num: i32,
    pub view_num: i32,
    pub axial_pos_num: i32,
    pub tangential_pos_num: i32,
    pub timing_pos_num: i32,
}

impl Bin {
    pub fn new(
        segment_num: i32,
        view_num: i32,
        axial_pos_num: i32,
        tangential_pos_num: i32,
        timing_pos_num: i32,
    ) -> Self {
        Self { segment_num, view_num, axial_pos_num, tangential_pos_num, timing_pos_num }
    }
}

/// Extents of projection space: how many segments, views, axial and
/// tangential positions (and TOF bins) the data covers.
///
/// Segments are numbered `min_segment_num ..= max_segment_num`
/// (conventionally symmetric around 0, with segment 0 the direct planes) and
/// each has its own axial-position count. Views and axial positions are
/// numbered from 0; tangential and timing positions are numbered symmetric
/// around 0.
///
/// In-memory viewgrams/sinograms/segments must always agree with this
/// descriptor; a mismatch is a programming error, not a recoverable
/// condition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProjDataInfo {
    min_segment_num: i32,
    axial_counts: Vec<usize>,
    num_views: usize,
    num_tangential_poss: usize,
    num_tof_poss: usize,
}

impl ProjDataInfo {
    /// `axial_counts[i]` is the axial-position count of segment
    /// `min_segment_num + i`. `num_tof_poss` is 1 for non-TOF data.
    pub fn new(
        min_segment_num: i32,
        axial_counts: Vec<usize>,
        num_views: usize,
        num_tangential_poss: usize,
        num_tof_poss: usize,
    ) -> Self {
        if axial_counts.is_empty() {
            panic!("ProjDataInfo: need at least one segment");
        }
        if axial_counts.iter().any(|&n| n == 0) || num_views == 0 || num_tangential_poss == 0 {
            panic!("ProjDataInfo: all axis extents must be non-zero");
        }
        if num_tof_poss == 0 {
            panic!("ProjDataInfo: num_tof_poss must be >= 1 (1 means non-TOF)");
        }
        Self { min_segment_num, axial_counts, num_views, num_tangential_poss, num_tof_poss }
    }

    /// Non-TOF geometry with a single (direct) segment.
    pub fn single_segment(num_axial_poss: usize, num_views: usize, num_tangential_poss: usize) -> Self {
        Self::new(0, vec![num_axial_poss], num_views, num_tangential_poss, 1)
    }

    pub fn num_segments(&self) -> usize { self.axial_counts.len() }
    pub fn min_segment_num(&self) -> i32 { self.min_segment_num }
    pub fn max_segment_num(&self) -> i32 {
        self.min_segment_num + self.axial_counts.len() as i32 - 1
    }
    pub fn segment_nums(&self) -> impl Iterator<Item = i32> + Clone {
        self.min_segment_num()..=self.max_segment_num()
    }

    pub fn num_views(&self) -> usize { self.num_views }
    pub fn min_view_num(&self) -> i32 { 0 }
    pub fn max_view_num(&self) -> i32 { self.num_views as i32 - 1 }
    pub fn view_nums(&self) -> impl Iterator<Item = i32> + Clone {
        self.min_view_num()..=self.max_view_num()
    }

    pub fn num_tangential_poss(&self) -> usize { self.num_tangential_poss }
    pub fn min_tangential_pos_num(&self) -> i32 { -(self.num_tangential_poss as i32 / 2) }
    pub fn max_tangential_pos_num(&self) -> i32 {
        self.min_tangential_pos_num() + self.num_tangential_poss as i32 - 1
    }
    pub fn tangential_pos_nums(&self) -> impl Iterator<Item = i32> + Clone {
        self.min_tangential_pos_num()..=self.max_tangential_pos_num()
    }

    pub fn num_axial_poss(&self, segment_num: i32) -> usize {
        if segment_num < self.min_segment_num() || segment_num > self.max_segment_num() {
            panic!("ProjDataInfo::num_axial_poss: segment_num out of range: {segment_num}");
        }
        self.axial_counts[(segment_num - self.min_segment_num) as usize]
    }
    pub fn min_axial_pos_num(&self, _segment_num: i32) -> i32 { 0 }
    pub fn max_axial_pos_num(&self, segment_num: i32) -> i32 {
        self.num_axial_poss(segment_num) as i32 - 1
    }
    pub fn axial_pos_nums(&self, segment_num: i32) -> impl Iterator<Item = i32> + Clone {
        self.min_axial_pos_num(segment_num)..=self.max_axial_pos_num(segment_num)
    }

    pub fn num_tof_poss(&self) -> usize { self.num_tof_poss }
    pub fn is_tof(&self) -> bool { self.num_tof_poss > 1 }
    pub fn min_tof_pos_num(&self) -> i32 { -(self.num_tof_poss as i32 / 2) }
    pub fn max_tof_pos_num(&self) -> i32 {
        self.min_tof_pos_num() + self.num_tof_poss as i32 - 1
    }
    pub fn tof_pos_nums(&self) -> impl Iterator<Item = i32> + Clone {
        self.min_tof_pos_num()..=self.max_tof_pos_num()
    }

    /// Number of bins in one full (non-TOF) 3D sinogram volume.
    pub fn size_of_volume(&self) -> usize {
        let per_segment: usize = self.axial_counts.iter().sum();
        per_segment * self.num_views * self.num_tangential_poss
    }

    pub fn total_num_bins(&self) -> usize {
        self.size_of_volume() * self.num_tof_poss
    }
}

/// Geometry descriptors are shared between the accessor and every extracted
/// array, so they live behind an `Arc`.
pub type SharedProjDataInfo = Arc<ProjDataInfo>;

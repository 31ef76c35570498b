//! Dense in-memory views of projection data: 2D viewgrams and sinograms, and
//! the two 3D segment layouts.
//!
//! Shapes are fixed by the `ProjDataInfo` at construction; all axes are
//! indexed from the respective `min_*` coordinate.

use ndarray::{s, Array2, Array3};

use super::info::{ProjDataInfo, SharedProjDataInfo};

fn check_view(info: &ProjDataInfo, view_num: i32) {
    if view_num < info.min_view_num() || view_num > info.max_view_num() {
        panic!("view_num out of range: {view_num}");
    }
}

fn check_segment(info: &ProjDataInfo, segment_num: i32) {
    if segment_num < info.min_segment_num() || segment_num > info.max_segment_num() {
        panic!("segment_num out of range: {segment_num}");
    }
}

fn check_axial(info: &ProjDataInfo, segment_num: i32, axial_pos_num: i32) {
    if axial_pos_num < info.min_axial_pos_num(segment_num)
        || axial_pos_num > info.max_axial_pos_num(segment_num)
    {
        panic!("axial_pos_num out of range: {axial_pos_num} (segment {segment_num})");
    }
}

fn check_timing(info: &ProjDataInfo, timing_pos_num: i32) {
    if timing_pos_num < info.min_tof_pos_num() || timing_pos_num > info.max_tof_pos_num() {
        panic!("timing_pos_num out of range: {timing_pos_num}");
    }
}

/// 2D (axial × tangential) slice at fixed view and segment.
#[derive(Clone, Debug, PartialEq)]
pub struct Viewgram {
    info: SharedProjDataInfo,
    view_num: i32,
    segment_num: i32,
    timing_pos_num: i32,
    pub data: Array2<f32>,
}

impl Viewgram {
    pub fn empty(
        info: SharedProjDataInfo,
        view_num: i32,
        segment_num: i32,
        timing_pos_num: i32,
    ) -> Self {
        check_view(&info, view_num);
        check_segment(&info, segment_num);
        check_timing(&info, timing_pos_num);
        let shape = (info.num_axial_poss(segment_num), info.num_tangential_poss());
        Self { data: Array2::zeros(shape), info, view_num, segment_num, timing_pos_num }
    }

    pub fn info(&self) -> &ProjDataInfo { &self.info }
    pub fn view_num(&self) -> i32 { self.view_num }
    pub fn segment_num(&self) -> i32 { self.segment_num }
    pub fn timing_pos_num(&self) -> i32 { self.timing_pos_num }
    pub fn num_axial_poss(&self) -> usize { self.data.nrows() }
    pub fn num_tangential_poss(&self) -> usize { self.data.ncols() }

    /// Append one zero-filled tangential column. Used by the accessor when
    /// callers ask for an odd tangential count on an even-count geometry.
    pub fn grow_tangential_by_one(&mut self) {
        self.data = grow_columns(&self.data);
    }
}

/// 2D (view × tangential) slice at fixed axial position and segment.
#[derive(Clone, Debug, PartialEq)]
pub struct Sinogram {
    info: SharedProjDataInfo,
    axial_pos_num: i32,
    segment_num: i32,
    timing_pos_num: i32,
    pub data: Array2<f32>,
}

impl Sinogram {
    pub fn empty(
        info: SharedProjDataInfo,
        axial_pos_num: i32,
        segment_num: i32,
        timing_pos_num: i32,
    ) -> Self {
        check_segment(&info, segment_num);
        check_axial(&info, segment_num, axial_pos_num);
        check_timing(&info, timing_pos_num);
        let shape = (info.num_views(), info.num_tangential_poss());
        Self { data: Array2::zeros(shape), info, axial_pos_num, segment_num, timing_pos_num }
    }

    pub fn info(&self) -> &ProjDataInfo { &self.info }
    pub fn axial_pos_num(&self) -> i32 { self.axial_pos_num }
    pub fn segment_num(&self) -> i32 { self.segment_num }
    pub fn timing_pos_num(&self) -> i32 { self.timing_pos_num }
    pub fn num_views(&self) -> usize { self.data.nrows() }
    pub fn num_tangential_poss(&self) -> usize { self.data.ncols() }

    pub fn grow_tangential_by_one(&mut self) {
        self.data = grow_columns(&self.data);
    }
}

/// Whole segment laid out view-major: (view × axial × tangential).
#[derive(Clone, Debug, PartialEq)]
pub struct SegmentByView {
    info: SharedProjDataInfo,
    segment_num: i32,
    timing_pos_num: i32,
    pub data: Array3<f32>,
}

impl SegmentByView {
    pub fn empty(info: SharedProjDataInfo, segment_num: i32, timing_pos_num: i32) -> Self {
        check_segment(&info, segment_num);
        check_timing(&info, timing_pos_num);
        let shape = (
            info.num_views(),
            info.num_axial_poss(segment_num),
            info.num_tangential_poss(),
        );
        Self { data: Array3::zeros(shape), info, segment_num, timing_pos_num }
    }

    pub fn info(&self) -> &ProjDataInfo { &self.info }
    pub fn segment_num(&self) -> i32 { self.segment_num }
    pub fn timing_pos_num(&self) -> i32 { self.timing_pos_num }
    pub fn num_views(&self) -> usize { self.data.dim().0 }
    pub fn num_axial_poss(&self) -> usize { self.data.dim().1 }
    pub fn num_tangential_poss(&self) -> usize { self.data.dim().2 }

    pub fn viewgram(&self, view_num: i32) -> Viewgram {
        check_view(&self.info, view_num);
        let mut v = Viewgram::empty(
            self.info.clone(),
            view_num,
            self.segment_num,
            self.timing_pos_num,
        );
        v.data.assign(&self.data.slice(s![view_num as usize, .., ..]));
        v
    }
}

/// Whole segment laid out sinogram-major: (axial × view × tangential).
#[derive(Clone, Debug, PartialEq)]
pub struct SegmentBySinogram {
    info: SharedProjDataInfo,
    segment_num: i32,
    timing_pos_num: i32,
    pub data: Array3<f32>,
}

impl SegmentBySinogram {
    pub fn empty(info: SharedProjDataInfo, segment_num: i32, timing_pos_num: i32) -> Self {
        check_segment(&info, segment_num);
        check_timing(&info, timing_pos_num);
        let shape = (
            info.num_axial_poss(segment_num),
            info.num_views(),
            info.num_tangential_poss(),
        );
        Self { data: Array3::zeros(shape), info, segment_num, timing_pos_num }
    }

    pub fn info(&self) -> &ProjDataInfo { &self.info }
    pub fn segment_num(&self) -> i32 { self.segment_num }
    pub fn timing_pos_num(&self) -> i32 { self.timing_pos_num }
    pub fn num_axial_poss(&self) -> usize { self.data.dim().0 }
    pub fn num_views(&self) -> usize { self.data.dim().1 }
    pub fn num_tangential_poss(&self) -> usize { self.data.dim().2 }

    pub fn sinogram(&self, axial_pos_num: i32) -> Sinogram {
        check_axial(&self.info, self.segment_num, axial_pos_num);
        let mut s_ = Sinogram::empty(
            self.info.clone(),
            axial_pos_num,
            self.segment_num,
            self.timing_pos_num,
        );
        s_.data.assign(&self.data.slice(s![axial_pos_num as usize, .., ..]));
        s_
    }
}

impl From<&SegmentByView> for SegmentBySinogram {
    fn from(seg: &SegmentByView) -> Self {
        // (view, axial, tang) -> (axial, view, tang)
        let data = seg.data.view().permuted_axes([1, 0, 2]).as_standard_layout().into_owned();
        Self {
            info: seg.info.clone(),
            segment_num: seg.segment_num,
            timing_pos_num: seg.timing_pos_num,
            data,
        }
    }
}

impl From<&SegmentBySinogram> for SegmentByView {
    fn from(seg: &SegmentBySinogram) -> Self {
        let data = seg.data.view().permuted_axes([1, 0, 2]).as_standard_layout().into_owned();
        Self {
            info: seg.info.clone(),
            segment_num: seg.segment_num,
            timing_pos_num: seg.timing_pos_num,
            data,
        }
    }
}

fn grow_columns(data: &Array2<f32>) -> Array2<f32> {
    let (rows, cols) = data.dim();
    let mut grown = Array2::zeros((rows, cols + 1));
    grown.slice_mut(s![.., ..cols]).assign(data);
    grown
}

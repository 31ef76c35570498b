//! Random access to projection data held in a seekable binary stream.
//!
//! `ProjDataFromStream` owns the addressing arithmetic (bin → byte offset)
//! and the translation between the on-disk representation (numeric type,
//! byte order, one uniform scale factor) and in-memory `f32` arrays, at four
//! granularities: single bin, viewgram, sinogram, whole segment.
//!
//! The stream is shared behind a mutex and every operation holds the lock
//! for its complete seek + read/write sequence: interleaved seeks from two
//! threads would silently corrupt the data. Single-bin access takes the same
//! lock, so mixing bin-level and block-level access across threads is safe.
//!
//! Failure semantics: geometry mismatches when writing are reported as
//! `ProjDataError` and leave the stream untouched; any stream error after a
//! seek is fatal, because a corrupted stream position invalidates all
//! further addressing. Writes are flushed before returning; callers may not
//! assume durability earlier.

use std::fmt;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::{Arc, Mutex};

use super::arrays::{SegmentBySinogram, SegmentByView, Sinogram, Viewgram};
use super::codec::{read_data, write_data};
use super::info::{Bin, SharedProjDataInfo};
use super::storage::{AxisOrder, ByteOrder, NumericType, StorageOrder};

/// The minimal stream interface the accessor needs: seek, read, write, flush.
///
/// Blanket-implemented for anything `Read + Write + Seek + Send`, so plain
/// `File`s and in-memory `Cursor`s both qualify.
pub trait ProjDataStream: Send {
    fn seek_to(&mut self, offset: u64) -> io::Result<()>;
    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<()>;
    fn write_bytes(&mut self, buf: &[u8]) -> io::Result<()>;
    fn flush(&mut self) -> io::Result<()>;
}

impl<T: Read + Write + Seek + Send> ProjDataStream for T {
    fn seek_to(&mut self, offset: u64) -> io::Result<()> {
        self.seek(SeekFrom::Start(offset)).map(|_| ())
    }
    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.read_exact(buf)
    }
    fn write_bytes(&mut self, buf: &[u8]) -> io::Result<()> {
        self.write_all(buf)
    }
    fn flush(&mut self) -> io::Result<()> {
        Write::flush(self)
    }
}

/// Reference-counted handle to a stream; may be shared by several accessors
/// (e.g. subset wrappers over the same file).
pub type SharedStream = Arc<Mutex<dyn ProjDataStream>>;

pub fn shared_stream(stream: impl ProjDataStream + 'static) -> SharedStream {
    Arc::new(Mutex::new(stream))
}

/// Geometry mismatch detected before a write; the stream was not touched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProjDataError {
    TangentialCountMismatch { expected: usize, actual: usize },
    AxialCountMismatch { segment_num: i32, expected: usize, actual: usize },
    ViewCountMismatch { expected: usize, actual: usize },
    InfoMismatch,
}

impl fmt::Display for ProjDataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProjDataError::TangentialCountMismatch { expected, actual } => {
                write!(f, "number of tangential positions is not correct: expected {expected}, got {actual}")
            }
            ProjDataError::AxialCountMismatch { segment_num, expected, actual } => {
                write!(f, "number of axial positions in segment {segment_num} is not correct: expected {expected}, got {actual}")
            }
            ProjDataError::ViewCountMismatch { expected, actual } => {
                write!(f, "number of views is not correct: expected {expected}, got {actual}")
            }
            ProjDataError::InfoMismatch => {
                write!(f, "object has an incompatible ProjDataInfo")
            }
        }
    }
}

impl std::error::Error for ProjDataError {}

pub struct ProjDataFromStream {
    info: SharedProjDataInfo,
    stream: SharedStream,
    offset: u64,
    segment_sequence: Vec<i32>,
    timing_poss_sequence: Vec<i32>,
    storage_order: StorageOrder,
    on_disk_data_type: NumericType,
    on_disk_byte_order: ByteOrder,
    scale_factor: f32,
    /// Bytes of one full 3D volume; stride between TOF blocks.
    volume_bytes: u64,
}

impl ProjDataFromStream {
    /// Construct with an explicit segment sequence (the order in which
    /// segments are physically interleaved in the stream).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        info: SharedProjDataInfo,
        stream: SharedStream,
        offset: u64,
        segment_sequence: Vec<i32>,
        axis_order: AxisOrder,
        data_type: NumericType,
        byte_order: ByteOrder,
        scale_factor: f32,
    ) -> Self {
        if segment_sequence.len() != info.num_segments() {
            panic!(
                "ProjDataFromStream: segment sequence has {} entries but geometry has {} segments",
                segment_sequence.len(),
                info.num_segments()
            );
        }
        for segment_num in info.segment_nums() {
            if !segment_sequence.contains(&segment_num) {
                panic!("ProjDataFromStream: segment {segment_num} missing from segment sequence");
            }
        }
        let storage_order = StorageOrder::for_info(axis_order, &info);
        let volume_bytes = (info.size_of_volume() * data_type.size_in_bytes()) as u64;
        let timing_poss_sequence = info.tof_pos_nums().collect();
        Self {
            info,
            stream,
            offset,
            segment_sequence,
            timing_poss_sequence,
            storage_order,
            on_disk_data_type: data_type,
            on_disk_byte_order: byte_order,
            scale_factor,
            volume_bytes,
        }
    }

    /// Construct with the default ascending segment sequence
    /// `min_segment_num ..= max_segment_num`.
    pub fn with_ascending_segments(
        info: SharedProjDataInfo,
        stream: SharedStream,
        offset: u64,
        axis_order: AxisOrder,
        data_type: NumericType,
        byte_order: ByteOrder,
        scale_factor: f32,
    ) -> Self {
        let segment_sequence = info.segment_nums().collect();
        Self::new(info, stream, offset, segment_sequence, axis_order, data_type, byte_order, scale_factor)
    }

    /// Override the order in which TOF blocks are interleaved in the stream.
    pub fn set_timing_poss_sequence(&mut self, sequence: Vec<i32>) {
        if sequence.len() != self.info.num_tof_poss() {
            panic!(
                "ProjDataFromStream: timing sequence has {} entries but geometry has {} timing positions",
                sequence.len(),
                self.info.num_tof_poss()
            );
        }
        self.timing_poss_sequence = sequence;
    }

    pub fn info(&self) -> &SharedProjDataInfo { &self.info }
    pub fn storage_order(&self) -> StorageOrder { self.storage_order }
    pub fn segment_sequence(&self) -> &[i32] { &self.segment_sequence }
    pub fn scale_factor(&self) -> f32 { self.scale_factor }
    pub fn on_disk_data_type(&self) -> NumericType { self.on_disk_data_type }
    pub fn stream(&self) -> SharedStream { self.stream.clone() }

    /// Byte offset of `bin` in the stream.
    ///
    /// Out-of-range coordinates indicate a geometry mismatch between caller
    /// and accessor and are fatal.
    pub fn get_offset(&self, bin: &Bin) -> u64 {
        let info = &self.info;
        if bin.segment_num < info.min_segment_num() || bin.segment_num > info.max_segment_num() {
            panic!("ProjDataFromStream::get_offset: segment_num out of range: {}", bin.segment_num);
        }
        if bin.axial_pos_num < info.min_axial_pos_num(bin.segment_num)
            || bin.axial_pos_num > info.max_axial_pos_num(bin.segment_num)
        {
            panic!("ProjDataFromStream::get_offset: axial_pos_num out of range: {}", bin.axial_pos_num);
        }
        if bin.timing_pos_num < info.min_tof_pos_num() || bin.timing_pos_num > info.max_tof_pos_num() {
            panic!("ProjDataFromStream::get_offset: timing_pos_num out of range: {}", bin.timing_pos_num);
        }

        let elem = self.on_disk_data_type.size_in_bytes() as u64;
        let num_tang = info.num_tangential_poss() as u64;
        let num_views = info.num_views() as u64;

        let index = self
            .segment_sequence
            .iter()
            .position(|&s| s == bin.segment_num)
            .unwrap_or_else(|| {
                panic!(
                    "ProjDataFromStream::get_offset: segment {} not in segment sequence",
                    bin.segment_num
                )
            });
        let preceding_axial: u64 = self.segment_sequence[..index]
            .iter()
            .map(|&s| info.num_axial_poss(s) as u64)
            .sum();
        let mut segment_offset = self.offset + preceding_axial * num_views * num_tang * elem;

        if self.storage_order.is_tof() {
            let timing_index = self
                .timing_poss_sequence
                .iter()
                .position(|&t| t == bin.timing_pos_num)
                .unwrap_or_else(|| {
                    panic!(
                        "ProjDataFromStream::get_offset: timing position {} not in timing sequence",
                        bin.timing_pos_num
                    )
                });
            segment_offset += timing_index as u64 * self.volume_bytes;
        }

        let tang_offset =
            (bin.tangential_pos_num - info.min_tangential_pos_num()) as u64 * elem;

        match self.storage_order.axis_order() {
            AxisOrder::AxialPosMajor => {
                let ax_pos_offset = (bin.axial_pos_num - info.min_axial_pos_num(bin.segment_num))
                    as u64
                    * num_views
                    * num_tang
                    * elem;
                let view_offset = (bin.view_num - info.min_view_num()) as u64 * num_tang * elem;
                segment_offset + ax_pos_offset + view_offset + tang_offset
            }
            AxisOrder::ViewMajor => {
                let view_offset = (bin.view_num - info.min_view_num()) as u64
                    * info.num_axial_poss(bin.segment_num) as u64
                    * num_tang
                    * elem;
                let ax_pos_offset = (bin.axial_pos_num - info.min_axial_pos_num(bin.segment_num))
                    as u64
                    * num_tang
                    * elem;
                segment_offset + view_offset + ax_pos_offset + tang_offset
            }
        }
    }

    pub fn get_bin_value(&self, bin: &Bin) -> f32 {
        let offset = self.get_offset(bin);
        let mut value = [0.0f32];
        {
            let mut stream = self.stream.lock().unwrap();
            checked_seek("get_bin_value", &mut *stream, offset);
            read_block("get_bin_value", &mut *stream, &mut value, self.on_disk_data_type, self.on_disk_byte_order);
        }
        value[0] * self.scale_factor
    }

    pub fn set_bin_value(&self, bin: &Bin, value: f32) {
        let offset = self.get_offset(bin);
        let mut stream = self.stream.lock().unwrap();
        checked_seek("set_bin_value", &mut *stream, offset);
        match write_data(&mut *stream, &[value], self.on_disk_data_type, self.on_disk_byte_order, self.scale_factor) {
            Ok(scale) if scale == self.scale_factor => {}
            Ok(_) => panic!("ProjDataFromStream::set_bin_value: scale factor returned by write_data should be {}", self.scale_factor),
            Err(e) => panic!("ProjDataFromStream::set_bin_value: error writing data: {e}"),
        }
    }

    /// Extract the viewgram at (`view_num`, `segment_num`, `timing_pos_num`).
    ///
    /// With `make_num_tangential_poss_odd`, an even tangential count is grown
    /// by one zero column after the read; nothing is written back.
    pub fn get_viewgram(
        &self,
        view_num: i32,
        segment_num: i32,
        timing_pos_num: i32,
        make_num_tangential_poss_odd: bool,
    ) -> Viewgram {
        let mut viewgram = Viewgram::empty(self.info.clone(), view_num, segment_num, timing_pos_num);
        let num_tang = self.info.num_tangential_poss();
        {
            let mut stream = self.stream.lock().unwrap();
            let data = viewgram.data.as_slice_mut().expect("viewgram storage is contiguous");
            match self.storage_order.axis_order() {
                AxisOrder::AxialPosMajor => {
                    // one seek + read per axial position: the viewgram rows
                    // are scattered across the sinogram blocks
                    for (row, axial_pos_num) in self.info.axial_pos_nums(segment_num).enumerate() {
                        let bin = Bin::new(segment_num, view_num, axial_pos_num, self.info.min_tangential_pos_num(), timing_pos_num);
                        checked_seek("get_viewgram", &mut *stream, self.get_offset(&bin));
                        read_block("get_viewgram", &mut *stream, &mut data[row * num_tang..(row + 1) * num_tang], self.on_disk_data_type, self.on_disk_byte_order);
                    }
                }
                AxisOrder::ViewMajor => {
                    // whole viewgram is contiguous: read in one go (skipping
                    // the extra seeks)
                    let bin = Bin::new(segment_num, view_num, self.info.min_axial_pos_num(segment_num), self.info.min_tangential_pos_num(), timing_pos_num);
                    checked_seek("get_viewgram", &mut *stream, self.get_offset(&bin));
                    read_block("get_viewgram", &mut *stream, data, self.on_disk_data_type, self.on_disk_byte_order);
                }
            }
        }
        viewgram.data *= self.scale_factor;

        if make_num_tangential_poss_odd && num_tang % 2 == 0 {
            viewgram.grow_tangential_by_one();
        }
        viewgram
    }

    pub fn set_viewgram(&self, v: &Viewgram) -> Result<(), ProjDataError> {
        if !self.on_disk_data_type.is_float() {
            eprintln!(
                "ProjDataFromStream::set_viewgram: non-float output uses original scale factor {} \
                 which might not be appropriate for the current data",
                self.scale_factor
            );
        }
        if self.info.num_tangential_poss() != v.num_tangential_poss() {
            return Err(ProjDataError::TangentialCountMismatch {
                expected: self.info.num_tangential_poss(),
                actual: v.num_tangential_poss(),
            });
        }
        if self.info.num_axial_poss(v.segment_num()) != v.num_axial_poss() {
            return Err(ProjDataError::AxialCountMismatch {
                segment_num: v.segment_num(),
                expected: self.info.num_axial_poss(v.segment_num()),
                actual: v.num_axial_poss(),
            });
        }
        if **self.info() != *v.info() {
            return Err(ProjDataError::InfoMismatch);
        }

        let (segment_num, view_num, timing_pos_num) = (v.segment_num(), v.view_num(), v.timing_pos_num());
        let num_tang = self.info.num_tangential_poss();
        let data = v.data.as_slice().expect("viewgram storage is contiguous");
        let fail = || {
            panic!(
                "ProjDataFromStream::set_viewgram: viewgram (view={view_num}, segment={segment_num}, \
                 timing_pos={timing_pos_num}) corrupted due to problems with writing or the scale factor \
                 (out of disk space?)"
            )
        };

        let mut stream = self.stream.lock().unwrap();
        match self.storage_order.axis_order() {
            AxisOrder::AxialPosMajor => {
                for (row, axial_pos_num) in self.info.axial_pos_nums(segment_num).enumerate() {
                    let bin = Bin::new(segment_num, view_num, axial_pos_num, self.info.min_tangential_pos_num(), timing_pos_num);
                    checked_seek("set_viewgram", &mut *stream, self.get_offset(&bin));
                    match write_data(&mut *stream, &data[row * num_tang..(row + 1) * num_tang], self.on_disk_data_type, self.on_disk_byte_order, self.scale_factor) {
                        Ok(scale) if scale == self.scale_factor => {}
                        _ => fail(),
                    }
                }
            }
            AxisOrder::ViewMajor => {
                let bin = Bin::new(segment_num, view_num, self.info.min_axial_pos_num(segment_num), self.info.min_tangential_pos_num(), timing_pos_num);
                checked_seek("set_viewgram", &mut *stream, self.get_offset(&bin));
                match write_data(&mut *stream, data, self.on_disk_data_type, self.on_disk_byte_order, self.scale_factor) {
                    Ok(scale) if scale == self.scale_factor => {}
                    _ => fail(),
                }
            }
        }
        // durability point: callers may rely on the data being on disk once
        // we return
        if stream.flush().is_err() {
            fail();
        }
        Ok(())
    }

    pub fn get_sinogram(
        &self,
        axial_pos_num: i32,
        segment_num: i32,
        timing_pos_num: i32,
        make_num_tangential_poss_odd: bool,
    ) -> Sinogram {
        let mut sinogram = Sinogram::empty(self.info.clone(), axial_pos_num, segment_num, timing_pos_num);
        let num_tang = self.info.num_tangential_poss();
        {
            let mut stream = self.stream.lock().unwrap();
            let data = sinogram.data.as_slice_mut().expect("sinogram storage is contiguous");
            match self.storage_order.axis_order() {
                AxisOrder::AxialPosMajor => {
                    let bin = Bin::new(segment_num, self.info.min_view_num(), axial_pos_num, self.info.min_tangential_pos_num(), timing_pos_num);
                    checked_seek("get_sinogram", &mut *stream, self.get_offset(&bin));
                    read_block("get_sinogram", &mut *stream, data, self.on_disk_data_type, self.on_disk_byte_order);
                }
                AxisOrder::ViewMajor => {
                    for (row, view_num) in self.info.view_nums().enumerate() {
                        let bin = Bin::new(segment_num, view_num, axial_pos_num, self.info.min_tangential_pos_num(), timing_pos_num);
                        checked_seek("get_sinogram", &mut *stream, self.get_offset(&bin));
                        read_block("get_sinogram", &mut *stream, &mut data[row * num_tang..(row + 1) * num_tang], self.on_disk_data_type, self.on_disk_byte_order);
                    }
                }
            }
        }
        sinogram.data *= self.scale_factor;

        if make_num_tangential_poss_odd && num_tang % 2 == 0 {
            sinogram.grow_tangential_by_one();
        }
        sinogram
    }

    pub fn set_sinogram(&self, s: &Sinogram) -> Result<(), ProjDataError> {
        if !self.on_disk_data_type.is_float() {
            eprintln!(
                "ProjDataFromStream::set_sinogram: non-float output uses original scale factor {} \
                 which might not be appropriate for the current data",
                self.scale_factor
            );
        }
        if **self.info() != *s.info() {
            return Err(ProjDataError::InfoMismatch);
        }

        let (segment_num, axial_pos_num, timing_pos_num) = (s.segment_num(), s.axial_pos_num(), s.timing_pos_num());
        let num_tang = self.info.num_tangential_poss();
        let data = s.data.as_slice().expect("sinogram storage is contiguous");
        let fail = || {
            panic!(
                "ProjDataFromStream::set_sinogram: sinogram (ax_pos={axial_pos_num}, segment={segment_num}, \
                 timing_pos={timing_pos_num}) corrupted due to problems with writing or the scale factor"
            )
        };

        let mut stream = self.stream.lock().unwrap();
        match self.storage_order.axis_order() {
            AxisOrder::AxialPosMajor => {
                let bin = Bin::new(segment_num, self.info.min_view_num(), axial_pos_num, self.info.min_tangential_pos_num(), timing_pos_num);
                checked_seek("set_sinogram", &mut *stream, self.get_offset(&bin));
                match write_data(&mut *stream, data, self.on_disk_data_type, self.on_disk_byte_order, self.scale_factor) {
                    Ok(scale) if scale == self.scale_factor => {}
                    _ => fail(),
                }
            }
            AxisOrder::ViewMajor => {
                for (row, view_num) in self.info.view_nums().enumerate() {
                    let bin = Bin::new(segment_num, view_num, axial_pos_num, self.info.min_tangential_pos_num(), timing_pos_num);
                    checked_seek("set_sinogram", &mut *stream, self.get_offset(&bin));
                    match write_data(&mut *stream, &data[row * num_tang..(row + 1) * num_tang], self.on_disk_data_type, self.on_disk_byte_order, self.scale_factor) {
                        Ok(scale) if scale == self.scale_factor => {}
                        _ => fail(),
                    }
                }
            }
        }
        if stream.flush().is_err() {
            fail();
        }
        Ok(())
    }

    /// Whole segment in sinogram-major layout. When the storage order is
    /// view-major this falls back to reading the other layout and
    /// transposing, which costs one extra copy.
    pub fn get_segment_by_sinogram(&self, segment_num: i32, timing_pos_num: i32) -> SegmentBySinogram {
        match self.storage_order.axis_order() {
            AxisOrder::AxialPosMajor => {
                let mut segment = SegmentBySinogram::empty(self.info.clone(), segment_num, timing_pos_num);
                {
                    let mut stream = self.stream.lock().unwrap();
                    let data = segment.data.as_slice_mut().expect("segment storage is contiguous");
                    let bin = segment_start_bin(&self.info, segment_num, timing_pos_num);
                    checked_seek("get_segment_by_sinogram", &mut *stream, self.get_offset(&bin));
                    read_block("get_segment_by_sinogram", &mut *stream, data, self.on_disk_data_type, self.on_disk_byte_order);
                }
                segment.data *= self.scale_factor;
                segment
            }
            AxisOrder::ViewMajor => {
                SegmentBySinogram::from(&self.get_segment_by_view(segment_num, timing_pos_num))
            }
        }
    }

    pub fn get_segment_by_view(&self, segment_num: i32, timing_pos_num: i32) -> SegmentByView {
        match self.storage_order.axis_order() {
            AxisOrder::ViewMajor => {
                let mut segment = SegmentByView::empty(self.info.clone(), segment_num, timing_pos_num);
                {
                    let mut stream = self.stream.lock().unwrap();
                    let data = segment.data.as_slice_mut().expect("segment storage is contiguous");
                    let bin = segment_start_bin(&self.info, segment_num, timing_pos_num);
                    checked_seek("get_segment_by_view", &mut *stream, self.get_offset(&bin));
                    read_block("get_segment_by_view", &mut *stream, data, self.on_disk_data_type, self.on_disk_byte_order);
                }
                segment.data *= self.scale_factor;
                segment
            }
            AxisOrder::AxialPosMajor => {
                SegmentByView::from(&self.get_segment_by_sinogram(segment_num, timing_pos_num))
            }
        }
    }

    pub fn set_segment_by_sinogram(&self, segment: &SegmentBySinogram) -> Result<(), ProjDataError> {
        if self.info.num_tangential_poss() != segment.num_tangential_poss() {
            return Err(ProjDataError::TangentialCountMismatch {
                expected: self.info.num_tangential_poss(),
                actual: segment.num_tangential_poss(),
            });
        }
        if self.info.num_views() != segment.num_views() {
            return Err(ProjDataError::ViewCountMismatch {
                expected: self.info.num_views(),
                actual: segment.num_views(),
            });
        }
        match self.storage_order.axis_order() {
            AxisOrder::AxialPosMajor => {
                self.write_whole_segment(
                    "set_segment_by_sinogram",
                    segment.data.as_slice().expect("segment storage is contiguous"),
                    segment.segment_num(),
                    segment.timing_pos_num(),
                )
            }
            AxisOrder::ViewMajor => self.set_segment_by_view(&SegmentByView::from(segment)),
        }
    }

    pub fn set_segment_by_view(&self, segment: &SegmentByView) -> Result<(), ProjDataError> {
        if self.info.num_tangential_poss() != segment.num_tangential_poss() {
            return Err(ProjDataError::TangentialCountMismatch {
                expected: self.info.num_tangential_poss(),
                actual: segment.num_tangential_poss(),
            });
        }
        if self.info.num_views() != segment.num_views() {
            return Err(ProjDataError::ViewCountMismatch {
                expected: self.info.num_views(),
                actual: segment.num_views(),
            });
        }
        match self.storage_order.axis_order() {
            AxisOrder::ViewMajor => {
                self.write_whole_segment(
                    "set_segment_by_view",
                    segment.data.as_slice().expect("segment storage is contiguous"),
                    segment.segment_num(),
                    segment.timing_pos_num(),
                )
            }
            AxisOrder::AxialPosMajor => self.set_segment_by_sinogram(&SegmentBySinogram::from(segment)),
        }
    }

    fn write_whole_segment(
        &self,
        fname: &str,
        data: &[f32],
        segment_num: i32,
        timing_pos_num: i32,
    ) -> Result<(), ProjDataError> {
        if !self.on_disk_data_type.is_float() {
            eprintln!(
                "ProjDataFromStream::{fname}: non-float output uses original scale factor {} \
                 which might not be appropriate for the current data",
                self.scale_factor
            );
        }
        let fail = || {
            panic!(
                "ProjDataFromStream::{fname}: segment {segment_num} (timing_pos {timing_pos_num}) \
                 corrupted due to problems with writing or the scale factor"
            )
        };
        let mut stream = self.stream.lock().unwrap();
        let bin = segment_start_bin(&self.info, segment_num, timing_pos_num);
        checked_seek(fname, &mut *stream, self.get_offset(&bin));
        match write_data(&mut *stream, data, self.on_disk_data_type, self.on_disk_byte_order, self.scale_factor) {
            Ok(scale) if scale == self.scale_factor => {}
            _ => fail(),
        }
        if stream.flush().is_err() {
            fail();
        }
        Ok(())
    }
}

fn segment_start_bin(info: &super::info::ProjDataInfo, segment_num: i32, timing_pos_num: i32) -> Bin {
    Bin::new(
        segment_num,
        info.min_view_num(),
        info.min_axial_pos_num(segment_num),
        info.min_tangential_pos_num(),
        timing_pos_num,
    )
}

fn checked_seek(fname: &str, stream: &mut dyn ProjDataStream, offset: u64) {
    if let Err(e) = stream.seek_to(offset) {
        panic!("ProjDataFromStream::{fname}: error after seek to offset {offset}: {e}");
    }
}

fn read_block(
    fname: &str,
    stream: &mut dyn ProjDataStream,
    out: &mut [f32],
    ty: NumericType,
    order: ByteOrder,
) {
    match read_data(stream, out, ty, order) {
        Ok(scale) if scale == 1.0 => {}
        Ok(_) => panic!("ProjDataFromStream::{fname}: scale factor returned by read_data should be 1"),
        Err(e) => panic!("ProjDataFromStream::{fname}: error reading data (file truncated?): {e}"),
    }
}

// ------------------------------ TESTS ------------------------------

#[cfg(test)]
mod test_stream {
    use super::*;
    use crate::projdata::info::ProjDataInfo;
    use rstest::rstest;
    use std::collections::HashSet;
    use std::io::Cursor;

    fn tof_info() -> SharedProjDataInfo {
        Arc::new(ProjDataInfo::new(-1, vec![2, 3, 2], 4, 4, 3))
    }

    fn non_tof_info() -> SharedProjDataInfo {
        Arc::new(ProjDataInfo::new(-1, vec![2, 3, 2], 4, 4, 1))
    }

    fn in_memory(
        info: SharedProjDataInfo,
        axis_order: AxisOrder,
        data_type: NumericType,
        scale_factor: f32,
    ) -> ProjDataFromStream {
        let total_bytes = info.total_num_bins() * data_type.size_in_bytes();
        let stream = shared_stream(Cursor::new(vec![0u8; total_bytes]));
        // deliberately non-sorted sequence, as found in interleaved files
        let sequence = vec![0, 1, -1];
        ProjDataFromStream::new(
            info,
            stream,
            0,
            sequence,
            axis_order,
            data_type,
            ByteOrder::Little,
            scale_factor,
        )
    }

    /// Fill every (segment, timing) block with recognisable per-bin values.
    fn bin_fingerprint(bin: &Bin) -> f32 {
        ((bin.segment_num + 2) * 100_000
            + bin.timing_pos_num.rem_euclid(8) * 10_000
            + bin.view_num * 1_000
            + bin.axial_pos_num * 100
            + (bin.tangential_pos_num + 8)) as f32
    }

    fn all_bins(info: &ProjDataInfo) -> Vec<Bin> {
        let mut bins = vec![];
        for timing_pos_num in info.tof_pos_nums() {
            for segment_num in info.segment_nums() {
                for view_num in info.view_nums() {
                    for axial_pos_num in info.axial_pos_nums(segment_num) {
                        for tangential_pos_num in info.tangential_pos_nums() {
                            bins.push(Bin::new(segment_num, view_num, axial_pos_num, tangential_pos_num, timing_pos_num));
                        }
                    }
                }
            }
        }
        bins
    }

    // ---------------- offset arithmetic ----------------

    #[rstest(/**/ axis_order, tof,
             case(AxisOrder::AxialPosMajor, false),
             case(AxisOrder::AxialPosMajor, true),
             case(AxisOrder::ViewMajor, false),
             case(AxisOrder::ViewMajor, true),
    )]
    fn offsets_are_a_bijection_onto_disjoint_element_ranges(axis_order: AxisOrder, tof: bool) {
        let info = if tof { tof_info() } else { non_tof_info() };
        let pd = in_memory(info.clone(), axis_order, NumericType::Float32, 1.0);
        let elem = NumericType::Float32.size_in_bytes() as u64;

        let offsets: Vec<u64> = all_bins(&info).iter().map(|b| pd.get_offset(b)).collect();
        let distinct: HashSet<u64> = offsets.iter().copied().collect();
        assert_eq!(distinct.len(), info.total_num_bins());

        // element-aligned and within the file
        let total_bytes = info.total_num_bins() as u64 * elem;
        for &o in &offsets {
            assert_eq!(o % elem, 0);
            assert!(o + elem <= total_bytes);
        }
    }

    #[test]
    fn orders_agree_when_there_is_only_one_view() {
        // with a single view, axial-major and view-major collapse to the
        // same layout
        let info = Arc::new(ProjDataInfo::new(0, vec![3], 1, 4, 1));
        let stream = shared_stream(Cursor::new(vec![0u8; 3 * 4 * 4]));
        let a = ProjDataFromStream::with_ascending_segments(
            info.clone(), stream.clone(), 0, AxisOrder::AxialPosMajor, NumericType::Float32, ByteOrder::Little, 1.0);
        let b = ProjDataFromStream::with_ascending_segments(
            info.clone(), stream, 0, AxisOrder::ViewMajor, NumericType::Float32, ByteOrder::Little, 1.0);
        for bin in all_bins(&info) {
            assert_eq!(a.get_offset(&bin), b.get_offset(&bin));
        }
    }

    #[rstest(/**/ bin,
             case(Bin::new( 9, 0, 0, 0, 0)),   // no such segment
             case(Bin::new( 0, 0, 5, 0, 0)),   // axial beyond segment 0
             case(Bin::new(-1, 0, 2, 0, 0)),   // axial valid for segment 0 but not -1
             case(Bin::new( 0, 0, 0, 0, 7)),   // no such timing position
    )]
    #[should_panic]
    fn out_of_range_bins_are_fatal(bin: Bin) {
        let pd = in_memory(tof_info(), AxisOrder::ViewMajor, NumericType::Float32, 1.0);
        pd.get_offset(&bin);
    }

    #[test]
    fn base_offset_shifts_everything() {
        let info = non_tof_info();
        let stream = shared_stream(Cursor::new(vec![0u8; 4096]));
        let shifted = ProjDataFromStream::new(
            info.clone(), stream, 512, vec![0, 1, -1],
            AxisOrder::ViewMajor, NumericType::Float32, ByteOrder::Little, 1.0);
        let unshifted = in_memory(info.clone(), AxisOrder::ViewMajor, NumericType::Float32, 1.0);
        for bin in all_bins(&info) {
            assert_eq!(shifted.get_offset(&bin), unshifted.get_offset(&bin) + 512);
        }
    }

    // ---------------- bin-level round trips ----------------

    #[test]
    fn write_then_read_one_bin_view_major() {
        // 4 tangential bins, 4 views, one axial position, view-major
        let info = Arc::new(ProjDataInfo::single_segment(1, 4, 4));
        let stream = shared_stream(Cursor::new(vec![0u8; 4 * 4 * 4]));
        let pd = ProjDataFromStream::with_ascending_segments(
            info, stream, 0, AxisOrder::ViewMajor, NumericType::Float32, ByteOrder::Little, 1.0);
        let bin = Bin::new(0, 0, 0, 0, 0);
        pd.set_bin_value(&bin, 3.25);
        assert_eq!(pd.get_bin_value(&bin), 3.25);
    }

    #[test]
    fn scale_factor_is_applied_on_both_paths() {
        let info = Arc::new(ProjDataInfo::single_segment(1, 4, 4));
        let stream = shared_stream(Cursor::new(vec![0u8; 4 * 4 * 4]));
        let pd = ProjDataFromStream::with_ascending_segments(
            info, stream.clone(), 0, AxisOrder::ViewMajor, NumericType::Float32, ByteOrder::Little, 0.5);
        let bin = Bin::new(0, 0, 0, -2, 0);
        pd.set_bin_value(&bin, 3.0);
        assert_eq!(pd.get_bin_value(&bin), 3.0);
        // on disk: 3.0 / 0.5
        let offset = pd.get_offset(&bin);
        let mut raw = [0.0f32];
        let mut guard = stream.lock().unwrap();
        guard.seek_to(offset).unwrap();
        read_data(&mut *guard, &mut raw, NumericType::Float32, ByteOrder::Little).unwrap();
        assert_eq!(raw[0], 6.0);
    }

    // ---------------- block-level round trips ----------------

    #[rstest(/**/ axis_order, tof,
             case(AxisOrder::AxialPosMajor, false),
             case(AxisOrder::AxialPosMajor, true),
             case(AxisOrder::ViewMajor, false),
             case(AxisOrder::ViewMajor, true),
    )]
    fn viewgram_roundtrip(axis_order: AxisOrder, tof: bool) {
        let info = if tof { tof_info() } else { non_tof_info() };
        let pd = in_memory(info.clone(), axis_order, NumericType::Float32, 1.0);

        // write every viewgram, with per-bin fingerprints
        for timing_pos_num in info.tof_pos_nums() {
            for segment_num in info.segment_nums() {
                for view_num in info.view_nums() {
                    let mut v = Viewgram::empty(info.clone(), view_num, segment_num, timing_pos_num);
                    for (row, axial_pos_num) in info.axial_pos_nums(segment_num).enumerate() {
                        for (col, tangential_pos_num) in info.tangential_pos_nums().enumerate() {
                            v.data[[row, col]] = bin_fingerprint(&Bin::new(segment_num, view_num, axial_pos_num, tangential_pos_num, timing_pos_num));
                        }
                    }
                    pd.set_viewgram(&v).unwrap();
                }
            }
        }

        // read back, both as viewgrams and as single bins
        for bin in all_bins(&info) {
            assert_eq!(pd.get_bin_value(&bin), bin_fingerprint(&bin), "bin {bin:?}");
        }
        for timing_pos_num in info.tof_pos_nums() {
            for segment_num in info.segment_nums() {
                for view_num in info.view_nums() {
                    let v = pd.get_viewgram(view_num, segment_num, timing_pos_num, false);
                    for (row, axial_pos_num) in info.axial_pos_nums(segment_num).enumerate() {
                        for (col, tangential_pos_num) in info.tangential_pos_nums().enumerate() {
                            let expected = bin_fingerprint(&Bin::new(segment_num, view_num, axial_pos_num, tangential_pos_num, timing_pos_num));
                            assert_eq!(v.data[[row, col]], expected);
                        }
                    }
                }
            }
        }
    }

    #[rstest(/**/ axis_order, case(AxisOrder::AxialPosMajor), case(AxisOrder::ViewMajor))]
    fn sinogram_roundtrip(axis_order: AxisOrder) {
        let info = non_tof_info();
        let pd = in_memory(info.clone(), axis_order, NumericType::Float32, 1.0);

        for segment_num in info.segment_nums() {
            for axial_pos_num in info.axial_pos_nums(segment_num) {
                let mut s = Sinogram::empty(info.clone(), axial_pos_num, segment_num, 0);
                for (row, view_num) in info.view_nums().enumerate() {
                    for (col, tangential_pos_num) in info.tangential_pos_nums().enumerate() {
                        s.data[[row, col]] = bin_fingerprint(&Bin::new(segment_num, view_num, axial_pos_num, tangential_pos_num, 0));
                    }
                }
                pd.set_sinogram(&s).unwrap();
            }
        }
        for bin in all_bins(&info) {
            assert_eq!(pd.get_bin_value(&bin), bin_fingerprint(&bin), "bin {bin:?}");
        }
        // and back out through the sinogram getter
        let s = pd.get_sinogram(1, 0, 0, false);
        for (row, view_num) in info.view_nums().enumerate() {
            for (col, tangential_pos_num) in info.tangential_pos_nums().enumerate() {
                assert_eq!(s.data[[row, col]], bin_fingerprint(&Bin::new(0, view_num, 1, tangential_pos_num, 0)));
            }
        }
    }

    #[rstest(/**/ axis_order, case(AxisOrder::AxialPosMajor), case(AxisOrder::ViewMajor))]
    fn segment_roundtrip_through_both_granularities(axis_order: AxisOrder) {
        let info = non_tof_info();
        let pd = in_memory(info.clone(), axis_order, NumericType::Float32, 1.0);

        let mut segment = SegmentByView::empty(info.clone(), 1, 0);
        for (vi, view_num) in info.view_nums().enumerate() {
            for (ai, axial_pos_num) in info.axial_pos_nums(1).enumerate() {
                for (ti, tangential_pos_num) in info.tangential_pos_nums().enumerate() {
                    segment.data[[vi, ai, ti]] = bin_fingerprint(&Bin::new(1, view_num, axial_pos_num, tangential_pos_num, 0));
                }
            }
        }
        pd.set_segment_by_view(&segment).unwrap();

        // whichever granularity we ask for, the same values come back
        let by_view = pd.get_segment_by_view(1, 0);
        assert_eq!(by_view.data, segment.data);
        let by_sino = pd.get_segment_by_sinogram(1, 0);
        assert_eq!(SegmentByView::from(&by_sino).data, segment.data);

        // and the viewgram extractor agrees with the accessor
        for view_num in info.view_nums() {
            assert_eq!(pd.get_viewgram(view_num, 1, 0, false), by_view.viewgram(view_num));
        }
    }

    #[test]
    fn non_float_disk_type_quantizes_but_preserves_integers() {
        let info = Arc::new(ProjDataInfo::single_segment(2, 4, 4));
        let total = info.total_num_bins() * NumericType::Int16.size_in_bytes();
        let stream = shared_stream(Cursor::new(vec![0u8; total]));
        let pd = ProjDataFromStream::with_ascending_segments(
            info.clone(), stream, 0, AxisOrder::AxialPosMajor, NumericType::Int16, ByteOrder::Big, 1.0);
        let mut v = Viewgram::empty(info, 2, 0, 0);
        v.data[[0, 0]] = 17.0;
        v.data[[1, 3]] = -40.0;
        pd.set_viewgram(&v).unwrap();
        assert_eq!(pd.get_viewgram(2, 0, 0, false), v);
    }

    // ---------------- options and failure reporting ----------------

    #[test]
    fn make_num_tangential_poss_odd_grows_by_one_column() {
        let info = non_tof_info(); // 4 tangential positions: even
        let pd = in_memory(info.clone(), AxisOrder::ViewMajor, NumericType::Float32, 1.0);
        let v = pd.get_viewgram(0, 0, 0, true);
        assert_eq!(v.num_tangential_poss(), 5);
        let s = pd.get_sinogram(0, 0, 0, true);
        assert_eq!(s.num_tangential_poss(), 5);
        // reshape is post-read only: the stream geometry is unchanged
        assert_eq!(pd.get_viewgram(0, 0, 0, false).num_tangential_poss(), 4);
    }

    #[test]
    fn mismatched_viewgram_is_rejected_without_touching_the_stream() {
        let info = non_tof_info();
        let pd = in_memory(info, AxisOrder::ViewMajor, NumericType::Float32, 1.0);
        let other = Arc::new(ProjDataInfo::new(-1, vec![2, 4, 2], 4, 4, 1)); // different axial count
        let v = Viewgram::empty(other, 0, 0, 0);
        let before: Vec<u8> = {
            // peek at the raw bytes through the shared handle
            let stream = pd.stream();
            let mut guard = stream.lock().unwrap();
            let mut buf = vec![0u8; 64];
            guard.seek_to(0).unwrap();
            guard.read_bytes(&mut buf).unwrap();
            buf
        };
        let err = pd.set_viewgram(&v).unwrap_err();
        assert!(matches!(err, ProjDataError::AxialCountMismatch { .. }));
        let after: Vec<u8> = {
            let stream = pd.stream();
            let mut guard = stream.lock().unwrap();
            let mut buf = vec![0u8; 64];
            guard.seek_to(0).unwrap();
            guard.read_bytes(&mut buf).unwrap();
            buf
        };
        assert_eq!(before, after);
    }

    #[test]
    fn mismatched_segment_is_rejected() {
        let info = non_tof_info();
        let pd = in_memory(info, AxisOrder::ViewMajor, NumericType::Float32, 1.0);
        let narrow = Arc::new(ProjDataInfo::new(-1, vec![2, 3, 2], 4, 2, 1));
        let segment = SegmentByView::empty(narrow, 0, 0);
        assert_eq!(
            pd.set_segment_by_view(&segment),
            Err(ProjDataError::TangentialCountMismatch { expected: 4, actual: 2 })
        );
    }

    #[test]
    #[should_panic]
    fn truncated_stream_is_fatal_on_read() {
        let info = non_tof_info();
        let stream = shared_stream(Cursor::new(vec![0u8; 8])); // far too short
        let pd = ProjDataFromStream::new(
            info, stream, 0, vec![0, 1, -1],
            AxisOrder::ViewMajor, NumericType::Float32, ByteOrder::Little, 1.0);
        pd.get_viewgram(0, 0, 0, false);
    }

    // ---------------- TOF sequencing ----------------

    #[test]
    fn timing_sequence_reorders_tof_blocks() {
        let info = tof_info();
        let mut pd = in_memory(info.clone(), AxisOrder::ViewMajor, NumericType::Float32, 1.0);
        let volume_bytes = (info.size_of_volume() * 4) as u64;

        let first = Bin::new(-1, 0, 0, info.min_tangential_pos_num(), -1);
        assert_eq!(pd.get_offset(&Bin { timing_pos_num: 0, ..first }) - pd.get_offset(&first), volume_bytes);

        // reverse the physical interleaving of the TOF blocks
        pd.set_timing_poss_sequence(vec![1, 0, -1]);
        assert_eq!(pd.get_offset(&Bin { timing_pos_num: 1, ..first }), pd.get_offset(&Bin { timing_pos_num: -1, ..first }) - 2 * volume_bytes);
    }
}

//! Projection-space data model: bin coordinates, the stream-geometry
//! descriptor, physical storage orders, and the random-access binary accessor.

pub mod info;
pub mod storage;
pub mod codec;
pub mod arrays;
pub mod stream;

pub use info::{Bin, ProjDataInfo, SharedProjDataInfo};
pub use storage::{AxisOrder, ByteOrder, NumericType, StorageOrder};
pub use arrays::{SegmentBySinogram, SegmentByView, Sinogram, Viewgram};
pub use stream::{shared_stream, ProjDataError, ProjDataFromStream, ProjDataStream, SharedStream};

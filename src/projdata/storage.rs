//! Physical layout of a projection-data stream: which axis varies slowest,
//! whether a TOF axis is present, and how each element is represented on disk.

use std::str::FromStr;

use super::info::ProjDataInfo;

/// The two canonical intra-volume axis orders.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AxisOrder {
    /// Segment → AxialPos → View → TangPos: each axial position holds one
    /// contiguous view × tangential sinogram block.
    AxialPosMajor,
    /// Segment → View → AxialPos → TangPos: each view holds one contiguous
    /// axial × tangential viewgram block.
    ViewMajor,
}

/// Storage order of a stream, decided once at construction and never mutated.
///
/// TOF streams carry a timing-position axis in front of the segment axis
/// (one full 3D volume per timing position); non-TOF streams never do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageOrder {
    NonTof(AxisOrder),
    Tof(AxisOrder),
}

impl StorageOrder {
    /// The TOF-ness of the order follows the geometry descriptor.
    pub fn for_info(order: AxisOrder, info: &ProjDataInfo) -> Self {
        if info.is_tof() {
            StorageOrder::Tof(order)
        } else {
            StorageOrder::NonTof(order)
        }
    }

    pub fn axis_order(self) -> AxisOrder {
        match self {
            StorageOrder::NonTof(order) | StorageOrder::Tof(order) => order,
        }
    }

    pub fn is_tof(self) -> bool {
        matches!(self, StorageOrder::Tof(_))
    }
}

impl FromStr for AxisOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "axial-major" => Ok(AxisOrder::AxialPosMajor),
            "view-major" => Ok(AxisOrder::ViewMajor),
            other => Err(format!(
                "storage order should be 'axial-major' or 'view-major', while it is '{other}'"
            )),
        }
    }
}

/// On-disk numeric representation of one element.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NumericType {
    Float32,
    Int32,
    Int16,
    Uint16,
    Uint8,
}

impl NumericType {
    pub fn size_in_bytes(self) -> usize {
        match self {
            NumericType::Float32 | NumericType::Int32 => 4,
            NumericType::Int16 | NumericType::Uint16 => 2,
            NumericType::Uint8 => 1,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, NumericType::Float32)
    }
}

impl FromStr for NumericType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "float32" => Ok(NumericType::Float32),
            "int32" => Ok(NumericType::Int32),
            "int16" => Ok(NumericType::Int16),
            "uint16" => Ok(NumericType::Uint16),
            "uint8" => Ok(NumericType::Uint8),
            other => Err(format!("unknown on-disk data type '{other}'")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    pub fn native() -> Self {
        if cfg!(target_endian = "big") {
            ByteOrder::Big
        } else {
            ByteOrder::Little
        }
    }
}

impl FromStr for ByteOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "little" => Ok(ByteOrder::Little),
            "big" => Ok(ByteOrder::Big),
            "native" => Ok(ByteOrder::native()),
            other => Err(format!("byte order should be 'little', 'big' or 'native', not '{other}'")),
        }
    }
}

#[cfg(test)]
mod test_storage {
    use super::*;

    #[test]
    fn tofness_follows_info() {
        let non_tof = ProjDataInfo::single_segment(4, 8, 16);
        let tof = ProjDataInfo::new(0, vec![4], 8, 16, 5);
        assert_eq!(
            StorageOrder::for_info(AxisOrder::ViewMajor, &non_tof),
            StorageOrder::NonTof(AxisOrder::ViewMajor)
        );
        assert_eq!(
            StorageOrder::for_info(AxisOrder::ViewMajor, &tof),
            StorageOrder::Tof(AxisOrder::ViewMajor)
        );
        assert!(StorageOrder::for_info(AxisOrder::AxialPosMajor, &tof).is_tof());
    }

    #[test]
    fn parse_axis_order() {
        assert_eq!("axial-major".parse(), Ok(AxisOrder::AxialPosMajor));
        assert_eq!("view-major".parse(), Ok(AxisOrder::ViewMajor));
        assert!("sinogram-major".parse::<AxisOrder>().is_err());
    }

    #[test]
    fn element_sizes() {
        assert_eq!(NumericType::Float32.size_in_bytes(), 4);
        assert_eq!(NumericType::Int16.size_in_bytes(), 2);
        assert_eq!(NumericType::Uint8.size_in_bytes(), 1);
    }
}

//! Element-level conversion between the on-disk representation (numeric type
//! + byte order) and the in-memory `f32` arrays.
//!
//! Both functions return the scale factor they applied, so that callers can
//! verify the scale invariant: this codec never rescales on read (returns 1),
//! and on write divides by exactly the scale it was given (returns it back).
//! A different value coming back would mean the data on the stream no longer
//! matches the caller's idea of it.

use std::io;

use super::storage::{ByteOrder, NumericType};
use super::stream::ProjDataStream;

/// Read `out.len()` on-disk elements and decode them, unscaled.
pub fn read_data(
    stream: &mut dyn ProjDataStream,
    out: &mut [f32],
    ty: NumericType,
    order: ByteOrder,
) -> io::Result<f32> {
    let elem = ty.size_in_bytes();
    let mut raw = vec![0u8; out.len() * elem];
    stream.read_bytes(&mut raw)?;
    for (chunk, value) in raw.chunks_exact(elem).zip(out.iter_mut()) {
        *value = decode(chunk, ty, order);
    }
    Ok(1.0)
}

/// Encode and write `data`, dividing each value by `scale` on the way out.
pub fn write_data(
    stream: &mut dyn ProjDataStream,
    data: &[f32],
    ty: NumericType,
    order: ByteOrder,
    scale: f32,
) -> io::Result<f32> {
    let mut raw = Vec::with_capacity(data.len() * ty.size_in_bytes());
    for &value in data {
        encode(value / scale, ty, order, &mut raw);
    }
    stream.write_bytes(&raw)?;
    Ok(scale)
}

fn decode(bytes: &[u8], ty: NumericType, order: ByteOrder) -> f32 {
    match ty {
        NumericType::Float32 => {
            let b: [u8; 4] = bytes.try_into().unwrap();
            match order {
                ByteOrder::Little => f32::from_le_bytes(b),
                ByteOrder::Big => f32::from_be_bytes(b),
            }
        }
        NumericType::Int32 => {
            let b: [u8; 4] = bytes.try_into().unwrap();
            (match order {
                ByteOrder::Little => i32::from_le_bytes(b),
                ByteOrder::Big => i32::from_be_bytes(b),
            }) as f32
        }
        NumericType::Int16 => {
            let b: [u8; 2] = bytes.try_into().unwrap();
            (match order {
                ByteOrder::Little => i16::from_le_bytes(b),
                ByteOrder::Big => i16::from_be_bytes(b),
            }) as f32
        }
        NumericType::Uint16 => {
            let b: [u8; 2] = bytes.try_into().unwrap();
            (match order {
                ByteOrder::Little => u16::from_le_bytes(b),
                ByteOrder::Big => u16::from_be_bytes(b),
            }) as f32
        }
        NumericType::Uint8 => bytes[0] as f32,
    }
}

fn encode(value: f32, ty: NumericType, order: ByteOrder, out: &mut Vec<u8>) {
    match ty {
        NumericType::Float32 => match order {
            ByteOrder::Little => out.extend_from_slice(&value.to_le_bytes()),
            ByteOrder::Big => out.extend_from_slice(&value.to_be_bytes()),
        },
        NumericType::Int32 => {
            // `as` saturates at the type limits, which is what we want for
            // out-of-range values
            let q = value.round() as i32;
            match order {
                ByteOrder::Little => out.extend_from_slice(&q.to_le_bytes()),
                ByteOrder::Big => out.extend_from_slice(&q.to_be_bytes()),
            }
        }
        NumericType::Int16 => {
            let q = value.round() as i16;
            match order {
                ByteOrder::Little => out.extend_from_slice(&q.to_le_bytes()),
                ByteOrder::Big => out.extend_from_slice(&q.to_be_bytes()),
            }
        }
        NumericType::Uint16 => {
            let q = value.round() as u16;
            match order {
                ByteOrder::Little => out.extend_from_slice(&q.to_le_bytes()),
                ByteOrder::Big => out.extend_from_slice(&q.to_be_bytes()),
            }
        }
        NumericType::Uint8 => out.push(value.round() as u8),
    }
}

#[cfg(test)]
mod test_codec {
    use super::*;
    use rstest::rstest;
    use std::io::Cursor;

    fn roundtrip(data: &[f32], ty: NumericType, order: ByteOrder, scale: f32) -> Vec<f32> {
        let mut stream = Cursor::new(Vec::new());
        let written_scale = write_data(&mut stream, data, ty, order, scale).unwrap();
        assert_eq!(written_scale, scale);

        stream.set_position(0);
        let mut out = vec![0.0; data.len()];
        let read_scale = read_data(&mut stream, &mut out, ty, order).unwrap();
        assert_eq!(read_scale, 1.0);
        // what get_viewgram etc. do after the raw read
        for v in out.iter_mut() {
            *v *= scale;
        }
        out
    }

    #[rstest(/**/ order, case(ByteOrder::Little), case(ByteOrder::Big))]
    fn float_is_bit_exact(order: ByteOrder) {
        let data = [0.0, 1.25, -3.5, 6.022e23, f32::MIN_POSITIVE];
        assert_eq!(roundtrip(&data, NumericType::Float32, order, 1.0), data);
    }

    #[test]
    fn float_with_power_of_two_scale_is_exact() {
        let data = [2.0, -8.0, 0.5];
        assert_eq!(roundtrip(&data, NumericType::Float32, ByteOrder::Little, 0.5), data);
    }

    #[rstest(/**/ ty,
             case(NumericType::Int32),
             case(NumericType::Int16),
             case(NumericType::Uint16),
             case(NumericType::Uint8),
    )]
    fn integral_values_survive_integer_types(ty: NumericType) {
        let data = [0.0, 1.0, 17.0, 200.0];
        assert_eq!(roundtrip(&data, ty, ByteOrder::Little, 1.0), data);
    }

    #[test]
    fn int16_saturates_instead_of_wrapping() {
        let out = roundtrip(&[1.0e6], NumericType::Int16, ByteOrder::Big, 1.0);
        assert_eq!(out, vec![i16::MAX as f32]);
    }

    #[test]
    fn byte_order_actually_changes_the_bytes() {
        let mut little = Cursor::new(Vec::new());
        let mut big = Cursor::new(Vec::new());
        write_data(&mut little, &[1.0], NumericType::Float32, ByteOrder::Little, 1.0).unwrap();
        write_data(&mut big, &[1.0], NumericType::Float32, ByteOrder::Big, 1.0).unwrap();
        let mut le = little.into_inner();
        le.reverse();
        assert_eq!(le, big.into_inner());
    }
}

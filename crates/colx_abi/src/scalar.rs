use std::fmt;

use crate::datatype::DataType;

/// A single primitive value read out of an array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarValue {
    Null,
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
}

impl ScalarValue {
    /// Widen to u64, reinterpreting signed values.
    pub const fn as_u64(&self) -> Option<u64> {
        Some(match self {
            Self::Null => return None,
            Self::Int8(v) => *v as u64,
            Self::Int16(v) => *v as u64,
            Self::Int32(v) => *v as u64,
            Self::Int64(v) => *v as u64,
            Self::UInt8(v) => *v as u64,
            Self::UInt16(v) => *v as u64,
            Self::UInt32(v) => *v as u64,
            Self::UInt64(v) => *v,
        })
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Int8(v) => write!(f, "{v}"),
            Self::Int16(v) => write!(f, "{v}"),
            Self::Int32(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::UInt8(v) => write!(f, "{v}"),
            Self::UInt16(v) => write!(f, "{v}"),
            Self::UInt32(v) => write!(f, "{v}"),
            Self::UInt64(v) => write!(f, "{v}"),
        }
    }
}

/// Native types that can back a fixed width primitive array.
pub trait PrimitiveNative: Copy + fmt::Debug + Sized + 'static {
    /// Truncating conversion, matching `as` semantics.
    fn from_u64_wrapping(v: u64) -> Self;

    /// Decode from little endian bytes. `bytes` must be exactly the width
    /// of the type.
    fn from_le_slice(bytes: &[u8]) -> Self;

    fn write_le(self, out: &mut [u8]);

    fn into_scalar(self) -> ScalarValue;
}

macro_rules! impl_primitive_native {
    ($native:ty, $variant:ident) => {
        impl PrimitiveNative for $native {
            fn from_u64_wrapping(v: u64) -> Self {
                v as $native
            }

            fn from_le_slice(bytes: &[u8]) -> Self {
                let mut buf = [0; std::mem::size_of::<$native>()];
                buf.copy_from_slice(bytes);
                <$native>::from_le_bytes(buf)
            }

            fn write_le(self, out: &mut [u8]) {
                out.copy_from_slice(&self.to_le_bytes());
            }

            fn into_scalar(self) -> ScalarValue {
                ScalarValue::$variant(self)
            }
        }
    };
}

impl_primitive_native!(i8, Int8);
impl_primitive_native!(i16, Int16);
impl_primitive_native!(i32, Int32);
impl_primitive_native!(i64, Int64);
impl_primitive_native!(u8, UInt8);
impl_primitive_native!(u16, UInt16);
impl_primitive_native!(u32, UInt32);
impl_primitive_native!(u64, UInt64);

/// Decode a single value of `datatype` from little endian bytes.
///
/// Returns None for non-primitive types or if the slice has the wrong length.
pub fn decode_primitive(datatype: &DataType, bytes: &[u8]) -> Option<ScalarValue> {
    if datatype.byte_width() != Some(bytes.len()) {
        return None;
    }
    Some(match datatype {
        DataType::Int8 => i8::from_le_slice(bytes).into_scalar(),
        DataType::Int16 => i16::from_le_slice(bytes).into_scalar(),
        DataType::Int32 => i32::from_le_slice(bytes).into_scalar(),
        DataType::Int64 => i64::from_le_slice(bytes).into_scalar(),
        DataType::UInt8 => u8::from_le_slice(bytes).into_scalar(),
        DataType::UInt16 => u16::from_le_slice(bytes).into_scalar(),
        DataType::UInt32 => u32::from_le_slice(bytes).into_scalar(),
        DataType::UInt64 => u64::from_le_slice(bytes).into_scalar(),
        DataType::Struct(_) => return None,
    })
}

/// Encode `v` as `datatype` with wrapping, writing little endian bytes into
/// `out`.
pub fn encode_wrapping(datatype: &DataType, v: u64, out: &mut [u8]) -> Option<()> {
    if datatype.byte_width() != Some(out.len()) {
        return None;
    }
    match datatype {
        DataType::Int8 => i8::from_u64_wrapping(v).write_le(out),
        DataType::Int16 => i16::from_u64_wrapping(v).write_le(out),
        DataType::Int32 => i32::from_u64_wrapping(v).write_le(out),
        DataType::Int64 => i64::from_u64_wrapping(v).write_le(out),
        DataType::UInt8 => u8::from_u64_wrapping(v).write_le(out),
        DataType::UInt16 => u16::from_u64_wrapping(v).write_le(out),
        DataType::UInt32 => u32::from_u64_wrapping(v).write_le(out),
        DataType::UInt64 => u64::from_u64_wrapping(v).write_le(out),
        DataType::Struct(_) => return None,
    }
    Some(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_u32() {
        let mut buf = [0; 4];
        encode_wrapping(&DataType::UInt32, 10_000, &mut buf).unwrap();
        assert_eq!(
            Some(ScalarValue::UInt32(10_000)),
            decode_primitive(&DataType::UInt32, &buf)
        );
    }

    #[test]
    fn encode_wraps_narrow_types() {
        let mut buf = [0; 1];
        encode_wrapping(&DataType::UInt8, 10_001, &mut buf).unwrap();
        assert_eq!(
            Some(ScalarValue::UInt8((10_001 % 256) as u8)),
            decode_primitive(&DataType::UInt8, &buf)
        );
    }

    #[test]
    fn wrong_width_rejected() {
        let mut buf = [0; 3];
        assert!(encode_wrapping(&DataType::UInt32, 1, &mut buf).is_none());
        assert!(decode_primitive(&DataType::UInt32, &buf).is_none());
        assert!(decode_primitive(&DataType::new_struct([]), &buf).is_none());
    }

    #[test]
    fn display() {
        assert_eq!("null", ScalarValue::Null.to_string());
        assert_eq!("-3", ScalarValue::Int16(-3).to_string());
    }
}

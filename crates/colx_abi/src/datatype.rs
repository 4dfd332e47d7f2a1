use std::fmt;

use colx_error::{not_implemented, ColxError, Result};

use crate::field::Field;

/// Metadata associated with structs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StructTypeMeta {
    pub fields: Vec<Field>,
}

/// Supported data types.
///
/// Only fixed width integers and structs can cross the boundary right now.
/// The format tag leaves room for everything else the Arrow layout defines.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DataType {
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    /// A struct of named children, each independently typed and null
    /// tracked.
    Struct(StructTypeMeta),
}

impl DataType {
    pub fn new_struct(fields: impl IntoIterator<Item = Field>) -> Self {
        DataType::Struct(StructTypeMeta {
            fields: fields.into_iter().collect(),
        })
    }

    pub const fn is_primitive(&self) -> bool {
        !matches!(self, DataType::Struct(_))
    }

    /// Bit width and signedness for fixed width primitives.
    pub const fn fixed_width(&self) -> Option<(usize, bool)> {
        Some(match self {
            Self::Int8 => (8, true),
            Self::Int16 => (16, true),
            Self::Int32 => (32, true),
            Self::Int64 => (64, true),
            Self::UInt8 => (8, false),
            Self::UInt16 => (16, false),
            Self::UInt32 => (32, false),
            Self::UInt64 => (64, false),
            Self::Struct(_) => return None,
        })
    }

    /// Width in bytes of a single value.
    pub const fn byte_width(&self) -> Option<usize> {
        match self.fixed_width() {
            Some((bits, _)) => Some(bits / 8),
            None => None,
        }
    }

    /// Number of buffers an array of this type carries.
    pub const fn buffer_count(&self) -> usize {
        match self {
            // Validity only. Children track their own nulls.
            Self::Struct(_) => 1,
            // Validity and values.
            _ => 2,
        }
    }

    pub fn struct_fields(&self) -> Option<&[Field]> {
        match self {
            Self::Struct(meta) => Some(&meta.fields),
            _ => None,
        }
    }

    /// Format string written into the type descriptor.
    pub const fn format(&self) -> &'static str {
        match self {
            Self::Int8 => "c",
            Self::UInt8 => "C",
            Self::Int16 => "s",
            Self::UInt16 => "S",
            Self::Int32 => "i",
            Self::UInt32 => "I",
            Self::Int64 => "l",
            Self::UInt64 => "L",
            Self::Struct(_) => "+s",
        }
    }

    /// Parse a primitive format string.
    ///
    /// Struct formats need their children to produce a data type, so "+s" is
    /// handled by the schema import instead.
    pub fn try_from_primitive_format(format: &str) -> Result<Self> {
        Ok(match format {
            "c" => Self::Int8,
            "C" => Self::UInt8,
            "s" => Self::Int16,
            "S" => Self::UInt16,
            "i" => Self::Int32,
            "I" => Self::UInt32,
            "l" => Self::Int64,
            "L" => Self::UInt64,
            "+s" => {
                return Err(ColxError::new(
                    "Struct format requires children to build a data type",
                ))
            }
            "n" | "b" | "e" | "f" | "g" | "z" | "Z" | "u" | "U" | "vz" | "vu" => {
                not_implemented!("format '{format}'")
            }
            other if other.starts_with('+') || other.starts_with('d') || other.starts_with('t') => {
                not_implemented!("format '{other}'")
            }
            other => return Err(ColxError::new(format!("Invalid format string '{other}'"))),
        })
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int8 => write!(f, "Int8"),
            Self::Int16 => write!(f, "Int16"),
            Self::Int32 => write!(f, "Int32"),
            Self::Int64 => write!(f, "Int64"),
            Self::UInt8 => write!(f, "UInt8"),
            Self::UInt16 => write!(f, "UInt16"),
            Self::UInt32 => write!(f, "UInt32"),
            Self::UInt64 => write!(f, "UInt64"),
            Self::Struct(meta) => {
                write!(
                    f,
                    "Struct {{{}}}",
                    meta.fields
                        .iter()
                        .map(|field| format!("{}: {}", field.name, field.datatype))
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_format_roundtrip() {
        let types = [
            DataType::Int8,
            DataType::Int16,
            DataType::Int32,
            DataType::Int64,
            DataType::UInt8,
            DataType::UInt16,
            DataType::UInt32,
            DataType::UInt64,
        ];

        for datatype in types {
            let got = DataType::try_from_primitive_format(datatype.format()).unwrap();
            assert_eq!(datatype, got);
        }
    }

    #[test]
    fn reserved_formats_not_implemented() {
        let err = DataType::try_from_primitive_format("u").unwrap_err();
        assert!(err.get_msg().contains("Not yet implemented"));

        let err = DataType::try_from_primitive_format("+l").unwrap_err();
        assert!(err.get_msg().contains("Not yet implemented"));

        let err = DataType::try_from_primitive_format("?").unwrap_err();
        assert!(err.get_msg().contains("Invalid format"));
    }

    #[test]
    fn widths() {
        assert_eq!(Some((32, false)), DataType::UInt32.fixed_width());
        assert_eq!(Some(8), DataType::Int64.byte_width());
        assert_eq!(None, DataType::new_struct([]).byte_width());
        assert_eq!(1, DataType::new_struct([]).buffer_count());
        assert_eq!(2, DataType::UInt8.buffer_count());
    }

    #[test]
    fn display_struct() {
        let datatype = DataType::new_struct([
            Field::new("a", DataType::UInt32, true),
            Field::new("b", DataType::Int8, false),
        ]);
        assert_eq!("Struct {a: UInt32, b: Int8}", datatype.to_string());
    }
}

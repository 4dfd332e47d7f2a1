use crate::datatype::DataType;

/// A named field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Field {
    pub name: String,
    pub datatype: DataType,
    pub nullable: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, datatype: DataType, nullable: bool) -> Self {
        Field {
            name: name.into(),
            datatype,
            nullable,
        }
    }

    /// An unnamed field, used for top-level descriptors.
    pub fn anonymous(datatype: DataType, nullable: bool) -> Self {
        Self::new("", datatype, nullable)
    }

    /// Child fields if this is a struct, empty otherwise.
    pub fn children(&self) -> &[Field] {
        self.datatype.struct_fields().unwrap_or(&[])
    }
}

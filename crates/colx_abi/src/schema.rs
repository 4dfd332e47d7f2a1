//! Owned type descriptors.
//!
//! A `TypeDescriptor` owns one live `FfiSchema` and releases it when
//! dropped. Descriptors built on this side attach `release_exported_schema`,
//! descriptors received from elsewhere carry whatever release callback their
//! producer bound at construction.
use std::ffi::{c_void, CStr, CString};
use std::fmt;
use std::mem::ManuallyDrop;
use std::ptr;

use colx_error::{not_implemented, ColxError, OptionExt, Result};
use tracing::{trace, warn};

use crate::datatype::DataType;
use crate::ffi::{FfiSchema, FLAG_NULLABLE};
use crate::field::Field;

/// Memory owned by an exported schema.
///
/// The strings and child pointer list live here so the `FfiSchema` record
/// itself can be moved freely.
struct SchemaPrivate {
    format: CString,
    name: CString,
    children: Box<[*mut FfiSchema]>,
}

/// Release callback for schemas built by `TypeDescriptor::try_from_field`.
unsafe extern "C" fn release_exported_schema(schema: *mut FfiSchema) {
    if schema.is_null() {
        return;
    }
    // SAFETY: Caller passes a pointer to a schema it owns.
    let schema = unsafe { &mut *schema };
    if schema.release.is_none() || schema.private_data.is_null() {
        warn!("release called on an already released schema");
        return;
    }

    // SAFETY: Set in `try_from_field`, only ever reclaimed here.
    let private = unsafe { Box::from_raw(schema.private_data as *mut SchemaPrivate) };
    for &child in private.children.iter() {
        // SAFETY: Children were leaked from boxes during export and are
        // exclusively owned by this parent.
        let mut child = unsafe { Box::from_raw(child) };
        if let Some(release) = child.release {
            unsafe { release(child.as_mut()) };
        }
        // Child record freed when the box drops.
    }
    std::mem::drop(private);

    schema.format = ptr::null();
    schema.name = ptr::null();
    schema.children = ptr::null_mut();
    schema.n_children = 0;
    schema.private_data = ptr::null_mut();
    schema.release = None;
}

/// An owned, live type descriptor.
pub struct TypeDescriptor {
    raw: FfiSchema,
}

impl TypeDescriptor {
    /// Build a descriptor tree for a field.
    ///
    /// Children are built first. If any child fails, children that were
    /// already built are released before the error is returned.
    pub fn try_from_field(field: &Field) -> Result<Self> {
        let children = field
            .children()
            .iter()
            .map(TypeDescriptor::try_from_field)
            .collect::<Result<Vec<_>>>()?;

        let format = CString::new(field.datatype.format())?;
        let name = CString::new(field.name.as_str())?;

        let mut children: Box<[*mut FfiSchema]> = children
            .into_iter()
            .map(|child| Box::into_raw(Box::new(child.into_raw())))
            .collect();

        let mut raw = FfiSchema {
            format: format.as_ptr(),
            name: name.as_ptr(),
            metadata: ptr::null(),
            flags: if field.nullable { FLAG_NULLABLE } else { 0 },
            n_children: children.len() as i64,
            children: if children.is_empty() {
                ptr::null_mut()
            } else {
                children.as_mut_ptr()
            },
            dictionary: ptr::null_mut(),
            release: Some(release_exported_schema),
            private_data: ptr::null_mut(),
        };

        let private = Box::new(SchemaPrivate {
            format,
            name,
            children,
        });

        raw.private_data = Box::into_raw(private) as *mut c_void;

        trace!(name = %field.name, datatype = %field.datatype, "exported type descriptor");

        Ok(TypeDescriptor { raw })
    }

    /// Take ownership of a raw schema.
    ///
    /// # Safety
    ///
    /// `raw` must have been produced according to the interchange protocol:
    /// valid nul terminated strings, `n_children` valid child pointers, and a
    /// release callback that frees everything it owns.
    pub unsafe fn try_from_raw(raw: FfiSchema) -> Result<Self> {
        if raw.is_released() {
            return Err(ColxError::new("Cannot import a released type descriptor"));
        }
        if raw.n_children < 0 || (raw.n_children > 0 && raw.children.is_null()) {
            let desc = TypeDescriptor { raw };
            return Err(ColxError::new(format!(
                "Invalid child list on type descriptor, n_children: {}",
                desc.raw.n_children
            )));
        }
        Ok(TypeDescriptor { raw })
    }

    /// Take ownership of the schema behind `ptr`, leaving an empty released
    /// schema in its place.
    ///
    /// # Safety
    ///
    /// Same requirements as `try_from_raw`, and `ptr` must be valid for
    /// reads and writes.
    pub unsafe fn try_take(ptr: *mut FfiSchema) -> Result<Self> {
        if ptr.is_null() {
            return Err(ColxError::new("Null type descriptor pointer"));
        }
        let raw = unsafe { ptr::replace(ptr, FfiSchema::empty()) };
        unsafe { Self::try_from_raw(raw) }
    }

    /// Give up ownership, returning the raw record.
    ///
    /// The caller becomes responsible for calling its release callback.
    pub fn into_raw(self) -> FfiSchema {
        let mut this = ManuallyDrop::new(self);
        std::mem::replace(&mut this.raw, FfiSchema::empty())
    }

    pub fn view(&self) -> SchemaView<'_> {
        SchemaView { raw: &self.raw }
    }

    pub fn datatype(&self) -> Result<DataType> {
        self.view().datatype()
    }

    pub fn to_field(&self) -> Result<Field> {
        self.view().to_field()
    }

    /// Release the descriptor and all of its children.
    pub fn release(self) {
        std::mem::drop(self)
    }
}

impl Drop for TypeDescriptor {
    fn drop(&mut self) {
        if let Some(release) = self.raw.release {
            // SAFETY: We own the record and it's live.
            unsafe { release(&mut self.raw) };
            debug_assert!(
                self.raw.is_released(),
                "release callback did not mark schema released"
            );
        }
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_field() {
            Ok(field) => f.debug_tuple("TypeDescriptor").field(&field).finish(),
            Err(_) => f.debug_tuple("TypeDescriptor").field(&self.raw).finish(),
        }
    }
}

/// Borrowed view of a live schema, either a top-level descriptor or one of
/// its (transitive) children.
#[derive(Debug, Clone, Copy)]
pub struct SchemaView<'a> {
    raw: &'a FfiSchema,
}

impl<'a> SchemaView<'a> {
    pub fn format(&self) -> Result<&'a str> {
        if self.raw.format.is_null() {
            return Err(ColxError::new("Type descriptor missing format string"));
        }
        // SAFETY: Non-null, owned by the live descriptor this view borrows.
        let s = unsafe { CStr::from_ptr(self.raw.format) };
        Ok(s.to_str()?)
    }

    /// Field name, empty for anonymous descriptors.
    pub fn name(&self) -> Result<&'a str> {
        if self.raw.name.is_null() {
            return Ok("");
        }
        // SAFETY: See `format`.
        let s = unsafe { CStr::from_ptr(self.raw.name) };
        Ok(s.to_str()?)
    }

    pub fn nullable(&self) -> bool {
        self.raw.flags & FLAG_NULLABLE != 0
    }

    pub fn num_children(&self) -> usize {
        self.raw.n_children.max(0) as usize
    }

    pub fn child(&self, idx: usize) -> Result<SchemaView<'a>> {
        if idx >= self.num_children() {
            return Err(ColxError::new(format!(
                "Child index {idx} out of bounds, descriptor has {} children",
                self.num_children()
            )));
        }
        // SAFETY: Checked bounds, children list length is n_children.
        let child = unsafe { *self.raw.children.add(idx) };
        // SAFETY: Children are owned by the parent and live as long as it.
        let child = unsafe { child.as_ref() }.required("Null child type descriptor")?;
        Ok(SchemaView { raw: child })
    }

    pub fn children(&self) -> impl Iterator<Item = Result<SchemaView<'a>>> + '_ {
        (0..self.num_children()).map(|idx| self.child(idx))
    }

    /// Interpret the format string, recursing into struct children.
    pub fn datatype(&self) -> Result<DataType> {
        if !self.raw.dictionary.is_null() {
            not_implemented!("dictionary encoded type descriptors")
        }

        let format = self.format()?;
        if format == "+s" {
            let fields = self
                .children()
                .map(|child| child?.to_field())
                .collect::<Result<Vec<_>>>()?;
            return Ok(DataType::new_struct(fields));
        }

        if self.num_children() != 0 {
            return Err(ColxError::new(format!(
                "Primitive format '{format}' must not have children, got {}",
                self.num_children()
            )));
        }

        DataType::try_from_primitive_format(format)
    }

    pub fn to_field(&self) -> Result<Field> {
        Ok(Field::new(self.name()?, self.datatype()?, self.nullable()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nested_field() -> Field {
        Field::anonymous(
            DataType::new_struct([
                Field::new("col1", DataType::UInt32, true),
                Field::new("col2", DataType::Int64, false),
            ]),
            false,
        )
    }

    #[test]
    fn export_roundtrip_nested() {
        let field = nested_field();
        let desc = TypeDescriptor::try_from_field(&field).unwrap();

        let view = desc.view();
        assert_eq!("+s", view.format().unwrap());
        assert_eq!("", view.name().unwrap());
        assert_eq!(2, view.num_children());
        assert_eq!("col1", view.child(0).unwrap().name().unwrap());
        assert!(view.child(0).unwrap().nullable());
        assert!(!view.child(1).unwrap().nullable());
        view.child(2).unwrap_err();

        assert_eq!(field, desc.to_field().unwrap());
    }

    #[test]
    fn raw_release_marks_released() {
        let desc = TypeDescriptor::try_from_field(&nested_field()).unwrap();
        let mut raw = desc.into_raw();
        assert!(!raw.is_released());

        let release = raw.release.unwrap();
        unsafe { release(&mut raw) };

        assert!(raw.is_released());
        assert!(raw.private_data.is_null());
        assert!(raw.children.is_null());

        // Second call through a stale function pointer is a detectable no-op.
        unsafe { release(&mut raw) };
        assert!(raw.is_released());
    }

    #[test]
    fn import_released_errors() {
        let err = unsafe { TypeDescriptor::try_from_raw(FfiSchema::empty()) }.unwrap_err();
        assert!(err.get_msg().contains("released"));
    }

    #[test]
    fn take_leaves_empty() {
        let desc = TypeDescriptor::try_from_field(&nested_field()).unwrap();
        let mut raw = desc.into_raw();

        let desc = unsafe { TypeDescriptor::try_take(&mut raw) }.unwrap();
        assert!(raw.is_released());
        assert_eq!(2, desc.view().num_children());
    }

    #[test]
    fn name_with_nul_fails() {
        let field = Field::new("bad\0name", DataType::UInt8, true);
        TypeDescriptor::try_from_field(&field).unwrap_err();
    }

    #[test]
    fn primitive_with_children_rejected() {
        let mut raw = TypeDescriptor::try_from_field(&nested_field())
            .unwrap()
            .into_raw();
        // Point the format at a primitive while keeping the children. The
        // release callback never reads the format.
        raw.format = c"I".as_ptr();

        let desc = unsafe { TypeDescriptor::try_from_raw(raw) }.unwrap();
        let err = desc.datatype().unwrap_err();
        assert!(err.get_msg().contains("must not have children"));
    }
}

//! Owned array chunks.
//!
//! Mirrors `schema`: `ArrayChunk` owns one live `FfiArray` and releases it
//! on drop, `ArrayView` borrows into it (or into one of its children) for
//! decoding.
//!
//! A chunk is bound to the `DataType` it was built or imported with, and all
//! decoding goes through that type.
use std::ffi::c_void;
use std::fmt;
use std::ptr;

use colx_error::{not_implemented, ColxError, Result};
use tracing::{trace, warn};

use crate::bitmap::{bit_is_set, Bitmap};
use crate::buffer::AlignedBuffer;
use crate::datatype::DataType;
use crate::ffi::{FfiArray, NULL_COUNT_UNKNOWN};
use crate::scalar::{decode_primitive, ScalarValue};

/// Number of nulls in an array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullCount {
    Known(usize),
    /// Needs to be computed from the validity bitmap.
    Unknown,
}

impl NullCount {
    pub const fn to_raw(self) -> i64 {
        match self {
            Self::Known(n) => n as i64,
            Self::Unknown => NULL_COUNT_UNKNOWN,
        }
    }

    pub fn try_from_raw(raw: i64) -> Result<Self> {
        match raw {
            NULL_COUNT_UNKNOWN => Ok(Self::Unknown),
            n if n >= 0 => Ok(Self::Known(n as usize)),
            other => Err(ColxError::new(format!("Invalid null count: {other}"))),
        }
    }
}

/// Result of pulling from a producer.
#[derive(Debug)]
pub enum ChunkResult {
    Chunk(ArrayChunk),
    EndOfStream,
}

impl ChunkResult {
    /// Interpret a raw array received from a producer.
    ///
    /// A zero length array is the end of data sentinel and nothing else in
    /// it is read or released.
    ///
    /// # Safety
    ///
    /// See `ArrayChunk::try_from_raw`.
    pub unsafe fn try_from_raw(raw: FfiArray, datatype: &DataType) -> Result<Self> {
        if raw.is_end_sentinel() {
            return Ok(ChunkResult::EndOfStream);
        }
        Ok(ChunkResult::Chunk(unsafe {
            ArrayChunk::try_from_raw(raw, datatype.clone())
        }?))
    }

    pub fn into_chunk(self) -> Option<ArrayChunk> {
        match self {
            Self::Chunk(chunk) => Some(chunk),
            Self::EndOfStream => None,
        }
    }

    pub const fn is_end(&self) -> bool {
        matches!(self, ChunkResult::EndOfStream)
    }

    /// Convert back to the boundary representation. End of stream becomes
    /// the zero length sentinel.
    pub fn into_raw(self) -> FfiArray {
        match self {
            Self::Chunk(chunk) => chunk.into_raw(),
            Self::EndOfStream => FfiArray::empty(),
        }
    }
}

/// Memory owned by an exported array.
struct ArrayPrivate {
    /// Buffers backing `buffer_ptrs`. None for omitted buffers.
    _buffers: Vec<Option<AlignedBuffer>>,
    buffer_ptrs: Box<[*const c_void]>,
    children: Box<[*mut FfiArray]>,
}

/// Release callback for arrays built by `ArrayChunk::try_new`.
///
/// Children are released and freed first, then our buffers, then the array
/// is marked released.
unsafe extern "C" fn release_exported_array(array: *mut FfiArray) {
    if array.is_null() {
        return;
    }
    // SAFETY: Caller passes a pointer to an array it owns.
    let array = unsafe { &mut *array };
    if array.release.is_none() || array.private_data.is_null() {
        warn!("release called on an already released array");
        return;
    }

    // SAFETY: Set in `try_new`, only ever reclaimed here.
    let private = unsafe { Box::from_raw(array.private_data as *mut ArrayPrivate) };
    for &child in private.children.iter() {
        // SAFETY: Leaked from a box during export, exclusively owned by this
        // parent.
        let mut child = unsafe { Box::from_raw(child) };
        if let Some(release) = child.release {
            unsafe { release(child.as_mut()) };
        }
    }
    std::mem::drop(private);

    array.buffers = ptr::null_mut();
    array.children = ptr::null_mut();
    array.n_buffers = 0;
    array.n_children = 0;
    array.private_data = ptr::null_mut();
    array.release = None;
}

/// An owned, live array chunk.
pub struct ArrayChunk {
    raw: FfiArray,
    datatype: DataType,
}

impl ArrayChunk {
    /// Build an array chunk of `datatype` from owned buffers and children.
    ///
    /// A `None` buffer is exported as a null pointer, which for validity
    /// buffers means every row is valid. Buffers must be large enough for
    /// `len` rows of `datatype`, and children must match the struct fields.
    pub fn try_new(
        datatype: DataType,
        len: usize,
        null_count: NullCount,
        buffers: Vec<Option<AlignedBuffer>>,
        children: Vec<ArrayChunk>,
    ) -> Result<Self> {
        check_layout(&datatype, len, &buffers, &children)?;

        let mut buffer_ptrs: Box<[*const c_void]> = buffers
            .iter()
            .map(|buf| match buf {
                Some(buf) => buf.as_ptr() as *const c_void,
                None => ptr::null(),
            })
            .collect();

        let mut child_ptrs: Box<[*mut FfiArray]> = children
            .into_iter()
            .map(|child| Box::into_raw(Box::new(child.into_raw())))
            .collect();

        let mut raw = FfiArray {
            length: len as i64,
            null_count: null_count.to_raw(),
            offset: 0,
            n_buffers: buffer_ptrs.len() as i64,
            n_children: child_ptrs.len() as i64,
            buffers: if buffer_ptrs.is_empty() {
                ptr::null_mut()
            } else {
                buffer_ptrs.as_mut_ptr()
            },
            children: if child_ptrs.is_empty() {
                ptr::null_mut()
            } else {
                child_ptrs.as_mut_ptr()
            },
            dictionary: ptr::null_mut(),
            release: Some(release_exported_array),
            private_data: ptr::null_mut(),
        };

        let private = Box::new(ArrayPrivate {
            _buffers: buffers,
            buffer_ptrs,
            children: child_ptrs,
        });
        raw.private_data = Box::into_raw(private) as *mut c_void;

        trace!(len, n_buffers = raw.n_buffers, n_children = raw.n_children, "exported array chunk");

        Ok(ArrayChunk { raw, datatype })
    }

    /// Take ownership of a raw, non-sentinel array of `datatype`.
    ///
    /// The buffer and child lists are checked against `datatype`. Buffer
    /// contents can't be checked and are trusted.
    ///
    /// # Safety
    ///
    /// `raw` must have been produced according to the interchange protocol
    /// for `datatype`: `n_buffers` buffer pointers each large enough for
    /// `offset + length` rows of that type, `n_children` valid child
    /// pointers, and a release callback that frees everything it owns.
    pub unsafe fn try_from_raw(raw: FfiArray, datatype: DataType) -> Result<Self> {
        if raw.is_end_sentinel() {
            return Err(ColxError::new(
                "End of data sentinel is not an array chunk",
            ));
        }
        if raw.is_released() {
            return Err(ColxError::new("Cannot import a released array chunk"));
        }
        let chunk = ArrayChunk { raw, datatype };
        if chunk.raw.length < 0 || chunk.raw.offset < 0 {
            return Err(ColxError::new(format!(
                "Invalid array chunk, length: {}, offset: {}",
                chunk.raw.length, chunk.raw.offset
            )));
        }
        if chunk.raw.n_buffers < 0 || (chunk.raw.n_buffers > 0 && chunk.raw.buffers.is_null()) {
            return Err(ColxError::new("Invalid buffer list on array chunk"));
        }
        if chunk.raw.n_children < 0 || (chunk.raw.n_children > 0 && chunk.raw.children.is_null())
        {
            return Err(ColxError::new("Invalid child list on array chunk"));
        }
        chunk.view().validate()?;
        Ok(chunk)
    }

    /// Give up ownership, returning the raw record.
    pub fn into_raw(mut self) -> FfiArray {
        // Drop sees an already released record.
        std::mem::replace(&mut self.raw, FfiArray::empty())
    }

    pub fn datatype(&self) -> &DataType {
        &self.datatype
    }

    pub fn view(&self) -> ArrayView<'_> {
        ArrayView {
            raw: &self.raw,
            datatype: &self.datatype,
        }
    }

    pub fn len(&self) -> usize {
        self.view().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Release the chunk, its buffers and all of its children.
    pub fn release(self) {
        std::mem::drop(self)
    }
}

/// Check owned buffers and children can back `len` rows of `datatype`.
fn check_layout(
    datatype: &DataType,
    len: usize,
    buffers: &[Option<AlignedBuffer>],
    children: &[ArrayChunk],
) -> Result<()> {
    if len == 0 {
        return Err(ColxError::new(
            "Zero length array chunks are reserved for end of data",
        ));
    }
    if buffers.len() != datatype.buffer_count() {
        return Err(ColxError::new(format!(
            "Expected {} buffers for {datatype}, got {}",
            datatype.buffer_count(),
            buffers.len()
        )));
    }
    if let Some(Some(validity)) = buffers.first() {
        let need = len.div_ceil(8);
        if validity.len() < need {
            return Err(ColxError::new(format!(
                "Validity buffer of {} bytes too short for {len} rows, need {need}",
                validity.len()
            )));
        }
    }

    match datatype {
        DataType::Struct(meta) => {
            if children.len() != meta.fields.len() {
                return Err(ColxError::new(format!(
                    "Expected {} children for struct, got {}",
                    meta.fields.len(),
                    children.len()
                )));
            }
            for (idx, (child, field)) in children.iter().zip(meta.fields.iter()).enumerate() {
                if child.datatype() != &field.datatype {
                    return Err(ColxError::new(format!(
                        "Child {idx} is {}, field '{}' is {}",
                        child.datatype(),
                        field.name,
                        field.datatype
                    )));
                }
                if child.len() != len {
                    return Err(ColxError::new(format!(
                        "Child {idx} has length {}, expected {len}",
                        child.len()
                    )));
                }
            }
        }
        _ => {
            if !children.is_empty() {
                return Err(ColxError::new(format!(
                    "Primitive array of {datatype} must not have children"
                )));
            }
            let width = datatype.byte_width().unwrap_or(0);
            let need = len.checked_mul(width).ok_or_else(|| {
                ColxError::new(format!("Values for {len} rows of {datatype} overflow"))
            })?;
            match buffers.get(1) {
                Some(Some(values)) if values.len() >= need => (),
                Some(Some(values)) => {
                    return Err(ColxError::new(format!(
                        "Values buffer of {} bytes too short for {len} rows of {datatype}, need {need}",
                        values.len()
                    )))
                }
                _ => return Err(ColxError::new("Primitive array missing values buffer")),
            }
        }
    }

    Ok(())
}

impl Drop for ArrayChunk {
    fn drop(&mut self) {
        if let Some(release) = self.raw.release {
            // SAFETY: We own the record and it's live.
            unsafe { release(&mut self.raw) };
            debug_assert!(
                self.raw.is_released(),
                "release callback did not mark array released"
            );
        }
    }
}

impl fmt::Debug for ArrayChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrayChunk")
            .field("datatype", &self.datatype)
            .field("len", &self.raw.length)
            .field("null_count", &self.raw.null_count)
            .field("n_buffers", &self.raw.n_buffers)
            .field("n_children", &self.raw.n_children)
            .finish()
    }
}

/// Borrowed view of a live array chunk or one of its children.
#[derive(Debug, Clone, Copy)]
pub struct ArrayView<'a> {
    raw: &'a FfiArray,
    datatype: &'a DataType,
}

impl<'a> ArrayView<'a> {
    pub fn datatype(&self) -> &'a DataType {
        self.datatype
    }

    pub fn len(&self) -> usize {
        self.raw.length.max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn offset(&self) -> usize {
        self.raw.offset.max(0) as usize
    }

    pub fn null_count(&self) -> Result<NullCount> {
        NullCount::try_from_raw(self.raw.null_count)
    }

    pub fn num_buffers(&self) -> usize {
        self.raw.n_buffers.max(0) as usize
    }

    pub fn num_children(&self) -> usize {
        self.raw.n_children.max(0) as usize
    }

    /// Raw buffer pointer, may be null.
    pub fn buffer(&self, idx: usize) -> Result<*const u8> {
        if idx >= self.num_buffers() {
            return Err(ColxError::new(format!(
                "Buffer index {idx} out of bounds, array has {} buffers",
                self.num_buffers()
            )));
        }
        // SAFETY: Bounds checked, list holds n_buffers entries.
        Ok(unsafe { *self.raw.buffers.add(idx) } as *const u8)
    }

    pub fn child(&self, idx: usize) -> Result<ArrayView<'a>> {
        let datatype: &'a DataType = self.datatype;
        let field = match datatype.struct_fields().and_then(|fields| fields.get(idx)) {
            Some(field) => field,
            None => return Err(ColxError::new(format!("{datatype} has no child {idx}"))),
        };
        if idx >= self.num_children() {
            return Err(ColxError::new(format!(
                "Child index {idx} out of bounds, array has {} children",
                self.num_children()
            )));
        }
        // SAFETY: Bounds checked, list holds n_children entries.
        let child = unsafe { *self.raw.children.add(idx) };
        // SAFETY: Children live as long as the parent.
        match unsafe { child.as_ref() } {
            Some(child) => Ok(ArrayView {
                raw: child,
                datatype: &field.datatype,
            }),
            None => Err(ColxError::new("Null child array")),
        }
    }

    /// Validity bytes covering `offset + len` bits, None if the bitmap was
    /// omitted (all rows valid).
    pub fn validity_bytes(&self) -> Result<Option<&'a [u8]>> {
        let ptr = self.buffer(0)?;
        if ptr.is_null() {
            return Ok(None);
        }
        let byte_len = (self.offset() + self.len()).div_ceil(8);
        // SAFETY: Sized on construction, or the producer guarantees the
        // bitmap covers offset + length bits.
        Ok(Some(unsafe { std::slice::from_raw_parts(ptr, byte_len) }))
    }

    /// Copy out the validity bitmap for the logical rows of this array.
    pub fn validity(&self) -> Result<Option<Bitmap>> {
        match self.validity_bytes()? {
            Some(bytes) => Ok(Some(Bitmap::try_from_raw(bytes, self.offset(), self.len())?)),
            None => Ok(None),
        }
    }

    /// Check if a logical row is valid.
    pub fn is_valid(&self, row: usize) -> Result<bool> {
        self.check_row(row)?;
        Ok(match self.validity_bytes()? {
            Some(bytes) => bit_is_set(bytes, self.offset() + row),
            None => true,
        })
    }

    /// Null count, computing it from the bitmap if the producer left it
    /// unknown.
    pub fn compute_null_count(&self) -> Result<usize> {
        if let NullCount::Known(n) = self.null_count()? {
            return Ok(n);
        }
        Ok(match self.validity()? {
            Some(bitmap) => bitmap.len() - bitmap.popcnt(),
            None => 0,
        })
    }

    /// Raw little endian values for a primitive array, covering
    /// `offset + len` rows.
    pub fn values_bytes(&self) -> Result<&'a [u8]> {
        let datatype = self.datatype;
        let width = match datatype.byte_width() {
            Some(width) => width,
            None => {
                return Err(ColxError::new(format!(
                    "Cannot read values for non-primitive type {datatype}"
                )))
            }
        };
        let ptr = self.buffer(1)?;
        if ptr.is_null() {
            return Err(ColxError::new("Primitive array missing values buffer"));
        }
        let byte_len = (self.offset() + self.len())
            .checked_mul(width)
            .ok_or_else(|| ColxError::new("Values buffer length overflows"))?;
        // SAFETY: Sized on construction, or the producer guarantees the values buffer covers offset + length
        // values of this type.
        Ok(unsafe { std::slice::from_raw_parts(ptr, byte_len) })
    }

    /// Read the value at a logical row, Null if the validity bit is unset.
    pub fn value(&self, row: usize) -> Result<ScalarValue> {
        if !self.is_valid(row)? {
            return Ok(ScalarValue::Null);
        }
        let datatype = self.datatype;
        let width = datatype.byte_width().unwrap_or(0);
        let values = self.values_bytes()?;
        let start = (self.offset() + row) * width;
        match decode_primitive(datatype, &values[start..start + width]) {
            Some(v) => Ok(v),
            None => Err(ColxError::new(format!("Failed to decode {datatype} value"))),
        }
    }

    /// Check this array has the structure its type requires.
    ///
    /// Recurses into struct children, checking each child is as long as the
    /// parent.
    fn validate(&self) -> Result<()> {
        let datatype = self.datatype;
        if !self.raw.dictionary.is_null() {
            not_implemented!("dictionary encoded arrays")
        }
        if self.num_buffers() != datatype.buffer_count() {
            return Err(ColxError::new(format!(
                "Expected {} buffers for {datatype}, got {}",
                datatype.buffer_count(),
                self.num_buffers()
            )));
        }

        match datatype {
            DataType::Struct(meta) => {
                if self.num_children() != meta.fields.len() {
                    return Err(ColxError::new(format!(
                        "Expected {} children for struct, got {}",
                        meta.fields.len(),
                        self.num_children()
                    )));
                }
                for (idx, field) in meta.fields.iter().enumerate() {
                    let child = self.child(idx)?;
                    if child.len() != self.len() {
                        return Err(ColxError::new(format!(
                            "Child '{}' has length {}, parent has {}",
                            field.name,
                            child.len(),
                            self.len()
                        )));
                    }
                    child.validate()?;
                }
            }
            _ => {
                if self.num_children() != 0 {
                    return Err(ColxError::new(format!(
                        "Primitive array of {datatype} must not have children"
                    )));
                }
                if self.buffer(1)?.is_null() {
                    return Err(ColxError::new("Primitive array missing values buffer"));
                }
            }
        }

        Ok(())
    }

    fn check_row(&self, row: usize) -> Result<()> {
        if row >= self.len() {
            return Err(ColxError::new(format!(
                "Row {row} out of bounds, array has {} rows",
                self.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::MemoryTracker;
    use crate::field::Field;
    use crate::scalar::encode_wrapping;

    fn primitive_chunk(tracker: &MemoryTracker, values: &[u32], validity: u8) -> ArrayChunk {
        let bitmap = Bitmap::repeated_byte(values.len(), validity);
        let validity_buf = bitmap.try_to_aligned_buffer(64, tracker).unwrap();

        let mut values_buf = AlignedBuffer::try_new_zeroed(values.len() * 4, 64, tracker).unwrap();
        for (idx, v) in values.iter().enumerate() {
            encode_wrapping(
                &DataType::UInt32,
                *v as u64,
                &mut values_buf.as_mut_slice()[idx * 4..idx * 4 + 4],
            )
            .unwrap();
        }

        ArrayChunk::try_new(
            DataType::UInt32,
            values.len(),
            NullCount::Known(bitmap.len() - bitmap.popcnt()),
            vec![Some(validity_buf), Some(values_buf)],
            Vec::new(),
        )
        .unwrap()
    }

    fn two_u32_fields() -> DataType {
        DataType::new_struct([
            Field::new("a", DataType::UInt32, true),
            Field::new("b", DataType::UInt32, true),
        ])
    }

    #[test]
    fn primitive_values_and_nulls() {
        let tracker = MemoryTracker::new();
        let chunk = primitive_chunk(&tracker, &[1, 2, 3, 4], 0x55);

        let view = chunk.view();
        assert_eq!(&DataType::UInt32, view.datatype());
        assert_eq!(4, view.len());
        assert_eq!(NullCount::Known(2), view.null_count().unwrap());

        let got: Vec<_> = (0..4).map(|row| view.value(row).unwrap()).collect();
        assert_eq!(
            vec![
                ScalarValue::UInt32(1),
                ScalarValue::Null,
                ScalarValue::UInt32(3),
                ScalarValue::Null
            ],
            got
        );

        view.value(4).unwrap_err();
    }

    #[test]
    fn release_frees_all_buffers() {
        let tracker = MemoryTracker::new();
        let children = vec![
            primitive_chunk(&tracker, &[1, 2], 0xFF),
            primitive_chunk(&tracker, &[3, 4], 0xAA),
        ];
        assert_eq!(4, tracker.live_buffers());

        let parent =
            ArrayChunk::try_new(two_u32_fields(), 2, NullCount::Known(0), vec![None], children)
                .unwrap();
        assert_eq!(4, tracker.live_buffers());

        parent.release();
        assert_eq!(0, tracker.live_buffers());
        assert_eq!(0, tracker.live_bytes());
    }

    #[test]
    fn raw_release_is_detectable() {
        let tracker = MemoryTracker::new();
        let mut raw = primitive_chunk(&tracker, &[7], 0xFF).into_raw();
        let release = raw.release.unwrap();

        unsafe { release(&mut raw) };
        assert!(raw.is_released());
        assert_eq!(0, tracker.live_buffers());

        // Stale callback is a no-op rather than a double free.
        unsafe { release(&mut raw) };
        assert_eq!(0, tracker.live_buffers());
    }

    #[test]
    fn struct_children_checked() {
        let tracker = MemoryTracker::new();

        let err = ArrayChunk::try_new(
            two_u32_fields(),
            2,
            NullCount::Known(0),
            vec![None],
            vec![primitive_chunk(&tracker, &[1, 2], 0xFF)],
        )
        .unwrap_err();
        assert!(err.get_msg().contains("Expected 2 children"));

        let two_children = ArrayChunk::try_new(
            two_u32_fields(),
            2,
            NullCount::Known(0),
            vec![None],
            vec![
                primitive_chunk(&tracker, &[1, 2], 0xFF),
                primitive_chunk(&tracker, &[3, 4], 0xFF),
            ],
        )
        .unwrap();

        let child = two_children.view().child(1).unwrap();
        assert_eq!(&DataType::UInt32, child.datatype());
        assert_eq!(ScalarValue::UInt32(4), child.value(1).unwrap());
        two_children.view().child(2).unwrap_err();
    }

    #[test]
    fn child_type_must_match_field() {
        let tracker = MemoryTracker::new();
        let datatype = DataType::new_struct([Field::new("a", DataType::UInt64, true)]);
        let err = ArrayChunk::try_new(
            datatype,
            2,
            NullCount::Known(0),
            vec![None],
            vec![primitive_chunk(&tracker, &[1, 2], 0xFF)],
        )
        .unwrap_err();
        assert!(err.get_msg().contains("field 'a'"), "{}", err.get_msg());
        assert_eq!(0, tracker.live_buffers());
    }

    #[test]
    fn mismatched_child_length_rejected() {
        let tracker = MemoryTracker::new();
        let datatype = DataType::new_struct([Field::new("a", DataType::UInt32, true)]);
        let err = ArrayChunk::try_new(
            datatype,
            3,
            NullCount::Known(0),
            vec![None],
            vec![primitive_chunk(&tracker, &[1, 2], 0xFF)],
        )
        .unwrap_err();
        assert!(err.get_msg().contains("Child 0"));
        // The child passed in was released along with the error.
        assert_eq!(0, tracker.live_buffers());
    }

    #[test]
    fn short_values_buffer_rejected() {
        let tracker = MemoryTracker::new();
        // One 64 byte block, far too small for this many rows.
        let values = AlignedBuffer::try_new_zeroed(64, 64, &tracker).unwrap();
        let err = ArrayChunk::try_new(
            DataType::UInt32,
            100_000_000,
            NullCount::Known(0),
            vec![None, Some(values)],
            Vec::new(),
        )
        .unwrap_err();
        assert!(err.get_msg().contains("too short"), "{}", err.get_msg());
        assert_eq!(0, tracker.live_buffers());

        // Enough bytes for 16 UInt32 rows, not 16 UInt64 rows.
        let values = AlignedBuffer::try_new_zeroed(64, 64, &tracker).unwrap();
        ArrayChunk::try_new(
            DataType::UInt64,
            16,
            NullCount::Known(0),
            vec![None, Some(values)],
            Vec::new(),
        )
        .unwrap_err();
    }

    #[test]
    fn short_validity_buffer_rejected() {
        let tracker = MemoryTracker::new();
        let validity = AlignedBuffer::try_new_zeroed(64, 64, &tracker).unwrap();
        let values = AlignedBuffer::try_new_zeroed(1024, 64, &tracker).unwrap();
        // 1024 rows need 128 validity bytes.
        let err = ArrayChunk::try_new(
            DataType::UInt8,
            1024,
            NullCount::Unknown,
            vec![Some(validity), Some(values)],
            Vec::new(),
        )
        .unwrap_err();
        assert!(err.get_msg().contains("Validity buffer"), "{}", err.get_msg());
    }

    #[test]
    fn missing_values_buffer_rejected() {
        let err = ArrayChunk::try_new(
            DataType::Int16,
            4,
            NullCount::Known(0),
            vec![None, None],
            Vec::new(),
        )
        .unwrap_err();
        assert!(err.get_msg().contains("missing values buffer"));

        ArrayChunk::try_new(DataType::Int16, 4, NullCount::Known(0), vec![None], Vec::new())
            .unwrap_err();
    }

    #[test]
    fn zero_length_reserved() {
        ArrayChunk::try_new(
            DataType::new_struct([]),
            0,
            NullCount::Known(0),
            vec![None],
            Vec::new(),
        )
        .unwrap_err();
    }

    #[test]
    fn unknown_null_count_computed() {
        let tracker = MemoryTracker::new();
        let validity = Bitmap::repeated_byte(8, 0xAA)
            .try_to_aligned_buffer(64, &tracker)
            .unwrap();
        let values = AlignedBuffer::try_new_zeroed(8, 64, &tracker).unwrap();
        let chunk = ArrayChunk::try_new(
            DataType::UInt8,
            8,
            NullCount::Unknown,
            vec![Some(validity), Some(values)],
            Vec::new(),
        )
        .unwrap();

        assert_eq!(NullCount::Unknown, chunk.view().null_count().unwrap());
        assert_eq!(4, chunk.view().compute_null_count().unwrap());
    }

    #[test]
    fn sentinel_is_end_of_stream() {
        let res = unsafe { ChunkResult::try_from_raw(FfiArray::empty(), &DataType::UInt8) }.unwrap();
        assert!(res.is_end());

        let err = unsafe { ArrayChunk::try_from_raw(FfiArray::empty(), DataType::UInt8) }.unwrap_err();
        assert!(err.get_msg().contains("sentinel"));
    }

    #[test]
    fn import_checks_structure_against_type() {
        let tracker = MemoryTracker::new();
        let raw = primitive_chunk(&tracker, &[1, 2], 0xFF).into_raw();
        let err = unsafe { ArrayChunk::try_from_raw(raw, two_u32_fields()) }.unwrap_err();
        assert!(err.get_msg().contains("Expected 1 buffers"), "{}", err.get_msg());
        // Rejected imports are still released.
        assert_eq!(0, tracker.live_buffers());
    }

    #[test]
    fn offset_respected() {
        let tracker = MemoryTracker::new();
        let mut raw = primitive_chunk(&tracker, &[10, 11, 12, 13], 0xFF).into_raw();
        raw.offset = 2;
        raw.length = 2;

        let chunk = unsafe { ArrayChunk::try_from_raw(raw, DataType::UInt32) }.unwrap();
        let view = chunk.view();
        assert_eq!(ScalarValue::UInt32(12), view.value(0).unwrap());
        assert_eq!(ScalarValue::UInt32(13), view.value(1).unwrap());
    }
}

//! Chunk sources over both producer flavors.
use std::ffi::c_void;

use colx_abi::array::{ArrayChunk, ArrayView, ChunkResult};
use colx_abi::datatype::DataType;
use colx_abi::ffi::{BatchPullFn, FfiArray, FfiColumn, Status};
use colx_abi::field::Field;
use colx_abi::schema::TypeDescriptor;
use colx_abi::stream::{StatusError, StreamReader};
use colx_error::{not_implemented, ColxError, OptionExt, Result};
use tracing::{debug, trace};

/// A single column of a chunk, borrowed for the duration of a callback.
#[derive(Debug, Clone, Copy)]
pub struct ColumnRef<'a> {
    pub name: &'a str,
    pub datatype: &'a DataType,
    pub array: ArrayView<'a>,
}

impl<'a> ColumnRef<'a> {
    pub fn len(&self) -> usize {
        self.array.len()
    }

    pub fn is_empty(&self) -> bool {
        self.array.is_empty()
    }
}

/// Something chunks of columns can be pulled from.
///
/// Chunk memory is only valid inside the callback and is released before
/// `next_chunk` returns.
pub trait ChunkSource {
    /// Pull the next chunk and pass its columns to `f`.
    ///
    /// Returns false once the end of data was reached, in which case `f` is
    /// not called.
    fn next_chunk(&mut self, f: &mut dyn FnMut(&[ColumnRef<'_>]) -> Result<()>) -> Result<bool>;
}

/// Source pulling N top-level columns at a time through a batch entry point.
#[derive(Debug)]
pub struct BatchPullSource {
    pull: BatchPullFn,
    producer: *mut c_void,
    slots: Vec<FfiColumn>,
    finished: bool,
}

impl BatchPullSource {
    /// Create a source over a producer handle.
    ///
    /// # Safety
    ///
    /// `producer` must be a handle `pull` accepts, and must stay live for as
    /// long as this source exists. The source does not free it.
    pub unsafe fn new(pull: BatchPullFn, producer: *mut c_void, column_count: usize) -> Self {
        BatchPullSource {
            pull,
            producer,
            slots: (0..column_count).map(|_| FfiColumn::empty()).collect(),
            finished: false,
        }
    }

    pub fn column_count(&self) -> usize {
        self.slots.len()
    }

    /// Take ownership of everything the producer wrote into the slots.
    ///
    /// Every slot is emptied even if importing an earlier one failed, so
    /// nothing is left unreleased.
    fn take_slots(&mut self) -> Result<Vec<(TypeDescriptor, ArrayChunk)>> {
        let imported: Vec<Result<(TypeDescriptor, ArrayChunk)>> = self
            .slots
            .iter_mut()
            .map(|slot| {
                let array = std::mem::replace(&mut slot.array, FfiArray::empty());
                // SAFETY: Written by the producer following the protocol.
                let typed = unsafe { TypeDescriptor::try_take(&mut slot.schema) }
                    .and_then(|desc| Ok((desc.datatype()?, desc)));
                let (datatype, desc) = match typed {
                    Ok(typed) => typed,
                    Err(e) => {
                        release_raw_array(array);
                        return Err(e);
                    }
                };
                // SAFETY: Array was produced for the type its descriptor
                // describes.
                let chunk = unsafe { ArrayChunk::try_from_raw(array, datatype) }?;
                Ok((desc, chunk))
            })
            .collect();
        imported.into_iter().collect()
    }
}

/// Release an array whose type couldn't be determined.
fn release_raw_array(mut array: FfiArray) {
    if let Some(release) = array.release {
        // SAFETY: Written by the producer and owned by us.
        unsafe { release(&mut array) };
    }
}

impl ChunkSource for BatchPullSource {
    fn next_chunk(&mut self, f: &mut dyn FnMut(&[ColumnRef<'_>]) -> Result<()>) -> Result<bool> {
        if self.finished {
            return Ok(false);
        }

        for slot in self.slots.iter_mut() {
            *slot = FfiColumn::empty();
        }

        // SAFETY: Producer handle live per `new`, slots sized to the column
        // count.
        let code = unsafe {
            (self.pull)(
                self.producer,
                self.slots.as_mut_ptr(),
                self.slots.len() as i64,
            )
        };
        if code != Status::Ok.code() {
            return Err(ColxError::with_source(
                "Failed to pull batch",
                Box::new(StatusError {
                    code,
                    message: None,
                }),
            ));
        }

        let first = self.slots.first().required("at least one column slot")?;
        if first.array.is_end_sentinel() {
            debug!("batch source reached end of data");
            self.finished = true;
            return Ok(false);
        }

        let columns = self.take_slots()?;
        let len = columns.first().map(|(_, chunk)| chunk.len()).unwrap_or(0);
        if let Some((_, chunk)) = columns.iter().find(|(_, chunk)| chunk.len() != len) {
            return Err(ColxError::new(format!(
                "Column lengths differ within a batch, {} vs {len}",
                chunk.len()
            )));
        }

        let refs = columns
            .iter()
            .map(|(desc, chunk)| {
                Ok(ColumnRef {
                    name: desc.view().name()?,
                    datatype: chunk.datatype(),
                    array: chunk.view(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        f(&refs)?;
        trace!(columns = columns.len(), "releasing batch");

        Ok(true)
    }
}

/// Source reading struct-of-columns chunks from a stream.
///
/// Holds the stream's schema for its whole lifetime. Both are released when
/// the source is dropped, whether or not the end of data was reached.
#[derive(Debug)]
pub struct StreamSource {
    reader: StreamReader,
    schema: TypeDescriptor,
    datatype: DataType,
    finished: bool,
}

impl StreamSource {
    pub fn try_new(mut reader: StreamReader) -> Result<Self> {
        let schema = reader.schema()?;
        let datatype = schema.datatype()?;
        if datatype.struct_fields().is_none() {
            return Err(ColxError::new(format!(
                "Stream schema must be a struct, got {datatype}"
            )));
        }
        Ok(StreamSource {
            reader,
            schema,
            datatype,
            finished: false,
        })
    }

    pub fn schema(&self) -> &TypeDescriptor {
        &self.schema
    }

    pub fn fields(&self) -> &[Field] {
        self.datatype.struct_fields().unwrap_or(&[])
    }

    /// Release the stream and its schema now.
    pub fn release(self) {
        std::mem::drop(self)
    }
}

impl ChunkSource for StreamSource {
    fn next_chunk(&mut self, f: &mut dyn FnMut(&[ColumnRef<'_>]) -> Result<()>) -> Result<bool> {
        if self.finished {
            return Ok(false);
        }

        let chunk = match self.reader.next_chunk()? {
            ChunkResult::Chunk(chunk) => chunk,
            ChunkResult::EndOfStream => {
                debug!("stream source reached end of data");
                self.finished = true;
                return Ok(false);
            }
        };

        let view = chunk.view();
        if view.offset() != 0 {
            not_implemented!("struct chunks with a non-zero offset")
        }
        if view.validity_bytes()?.is_some() {
            not_implemented!("struct chunks with top-level nulls")
        }

        let refs = self
            .fields()
            .iter()
            .enumerate()
            .map(|(idx, field)| {
                Ok(ColumnRef {
                    name: &field.name,
                    datatype: &field.datatype,
                    array: view.child(idx)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        f(&refs)?;
        trace!(len = view.len(), "releasing stream chunk");

        Ok(true)
    }
}

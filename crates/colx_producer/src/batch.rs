//! Batch producer, N independent top-level columns per pull.
use std::ffi::{c_int, c_void};
use std::ptr;

use colx_abi::array::ArrayChunk;
use colx_abi::buffer::MemoryTracker;
use colx_abi::ffi::{FfiColumn, Status};
use colx_abi::schema::TypeDescriptor;
use colx_error::{ColxError, Result};
use tracing::{debug, trace, warn};

use crate::config::ProducerConfig;
use crate::payload::{NullCountMode, Payload};

/// One column of a pulled batch.
#[derive(Debug)]
pub struct BatchColumn {
    pub schema: TypeDescriptor,
    pub array: ArrayChunk,
}

#[derive(Debug)]
pub struct BatchProducer {
    payload: Payload,
}

impl BatchProducer {
    pub fn try_new(config: ProducerConfig, tracker: MemoryTracker) -> Result<Self> {
        Ok(BatchProducer {
            payload: Payload::try_new(config, tracker)?,
        })
    }

    pub fn column_count(&self) -> usize {
        self.payload.config().column_count
    }

    pub fn tracker(&self) -> &MemoryTracker {
        self.payload.tracker()
    }

    /// Produce the next set of columns, None once every row was emitted.
    ///
    /// Progress only advances if every column was built.
    pub fn next_columns(&mut self) -> Result<Option<Vec<BatchColumn>>> {
        if self.payload.is_exhausted() {
            trace!("batch producer exhausted");
            return Ok(None);
        }

        let arrays = self.payload.build_columns(NullCountMode::Known)?;
        let columns = arrays
            .into_iter()
            .enumerate()
            .map(|(idx, array)| {
                let schema = TypeDescriptor::try_from_field(&self.payload.column_field(idx))?;
                Ok(BatchColumn { schema, array })
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(
            rows_emitted = self.payload.rows_emitted(),
            len = self.payload.next_chunk_len(),
            "produced batch"
        );
        self.payload.advance();

        Ok(Some(columns))
    }

    /// Fill caller provided column slots.
    ///
    /// When there's nothing left, only the first slot's array length is
    /// written (as zero). Nothing is written on error.
    ///
    /// # Safety
    ///
    /// `columns` must point to at least `column_count` writable slots.
    pub unsafe fn fill(&mut self, columns: *mut FfiColumn, column_count: usize) -> Result<()> {
        if columns.is_null() {
            return Err(ColxError::new("Null column slots"));
        }
        if column_count != self.column_count() {
            return Err(ColxError::new(format!(
                "Expected {} column slots, got {column_count}",
                self.column_count()
            )));
        }

        match self.next_columns()? {
            Some(batch) => {
                for (idx, column) in batch.into_iter().enumerate() {
                    // SAFETY: Caller guarantees `column_count` slots.
                    unsafe {
                        ptr::write(
                            columns.add(idx),
                            FfiColumn {
                                schema: column.schema.into_raw(),
                                array: column.array.into_raw(),
                            },
                        )
                    };
                }
            }
            None => {
                // SAFETY: At least one slot. Only the sentinel field is
                // touched, the rest may be uninitialized.
                unsafe { ptr::addr_of_mut!((*columns).array.length).write(0) };
            }
        }

        Ok(())
    }

    /// Leak into an opaque handle for `colx_batch_pull`.
    pub fn into_raw(self) -> *mut c_void {
        Box::into_raw(Box::new(self)) as *mut c_void
    }

    /// Reclaim a handle created with `into_raw`.
    ///
    /// # Safety
    ///
    /// `handle` must come from `into_raw` and not have been reclaimed.
    pub unsafe fn from_raw(handle: *mut c_void) -> Box<Self> {
        unsafe { Box::from_raw(handle as *mut BatchProducer) }
    }
}

/// Create a batch producer with the default configuration.
///
/// Returns null on failure.
#[no_mangle]
pub extern "C" fn colx_batch_producer_new() -> *mut c_void {
    match BatchProducer::try_new(ProducerConfig::default(), MemoryTracker::new()) {
        Ok(producer) => producer.into_raw(),
        Err(e) => {
            warn!(%e, "failed to create batch producer");
            ptr::null_mut()
        }
    }
}

/// Free a batch producer. Safe to call whether or not it was exhausted.
///
/// # Safety
///
/// `producer` must come from `colx_batch_producer_new` (or
/// `BatchProducer::into_raw`) and not already be freed.
#[no_mangle]
pub unsafe extern "C" fn colx_batch_producer_free(producer: *mut c_void) {
    if producer.is_null() {
        return;
    }
    std::mem::drop(unsafe { BatchProducer::from_raw(producer) });
}

/// Batch pull entry point.
///
/// # Safety
///
/// `producer` must be a live batch producer handle and `columns` must point
/// to `column_count` writable slots.
#[no_mangle]
pub unsafe extern "C" fn colx_batch_pull(
    producer: *mut c_void,
    columns: *mut FfiColumn,
    column_count: i64,
) -> c_int {
    if producer.is_null() || columns.is_null() {
        warn!("batch pull called with a null producer or null column slots");
        return Status::Invalid.code();
    }
    // SAFETY: Caller guarantees a live handle.
    let producer = unsafe { &mut *(producer as *mut BatchProducer) };
    if column_count != producer.column_count() as i64 {
        warn!(
            expected = producer.column_count(),
            got = column_count,
            "batch pull called with wrong column count"
        );
        return Status::Invalid.code();
    }

    match unsafe { producer.fill(columns, column_count as usize) } {
        Ok(()) => Status::Ok.code(),
        Err(e) => {
            debug!(%e, "batch pull failed");
            Status::for_error(&e).code()
        }
    }
}

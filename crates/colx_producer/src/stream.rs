//! Stream producer, one struct-of-columns chunk per pull.
use std::ffi::c_int;
use std::ptr;

use colx_abi::array::{ArrayChunk, ChunkResult, NullCount};
use colx_abi::buffer::MemoryTracker;
use colx_abi::ffi::{FfiArrayStream, Status};
use colx_abi::field::Field;
use colx_abi::schema::TypeDescriptor;
use colx_abi::stream::{export_stream, ChunkStream};
use colx_error::Result;
use tracing::{debug, trace, warn};

use crate::config::ProducerConfig;
use crate::payload::{NullCountMode, Payload};

/// Where a stream is in its lifetime.
///
/// Released isn't represented, a released stream's state is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Unstarted,
    Streaming,
    Exhausted,
}

#[derive(Debug)]
pub struct SyntheticStream {
    payload: Payload,
    state: StreamState,
}

impl SyntheticStream {
    pub fn try_new(config: ProducerConfig, tracker: MemoryTracker) -> Result<Self> {
        Ok(SyntheticStream {
            payload: Payload::try_new(config, tracker)?,
            state: StreamState::Unstarted,
        })
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Top-level field describing every chunk.
    pub fn field(&self) -> Field {
        Field::anonymous(self.payload.struct_datatype(), false)
    }

    fn transition(&mut self, next: StreamState) {
        if self.state != next {
            trace!(from = ?self.state, to = ?next, "stream state transition");
            self.state = next;
        }
    }
}

impl ChunkStream for SyntheticStream {
    fn schema(&mut self) -> Result<TypeDescriptor> {
        TypeDescriptor::try_from_field(&self.field())
    }

    fn next_chunk(&mut self) -> Result<ChunkResult> {
        if self.payload.is_exhausted() {
            self.transition(StreamState::Exhausted);
            return Ok(ChunkResult::EndOfStream);
        }

        // Children leave their null count for the consumer to compute.
        let children = self.payload.build_columns(NullCountMode::Unknown)?;
        let len = self.payload.next_chunk_len();
        // Struct validity omitted, no top-level nulls.
        let chunk = ArrayChunk::try_new(
            self.payload.struct_datatype(),
            len,
            NullCount::Known(0),
            vec![None],
            children,
        )?;

        debug!(rows_emitted = self.payload.rows_emitted(), len, "produced stream chunk");
        self.payload.advance();
        self.transition(StreamState::Streaming);

        Ok(ChunkResult::Chunk(chunk))
    }
}

/// Create a stream over the synthetic payload.
pub fn try_new_stream(config: ProducerConfig, tracker: MemoryTracker) -> Result<FfiArrayStream> {
    let stream = SyntheticStream::try_new(config, tracker)?;
    Ok(export_stream(Box::new(stream)))
}

/// Initialize `out` with a stream over the synthetic payload.
///
/// # Safety
///
/// `out` must be valid for writes. Whatever it held before is overwritten
/// without being released.
pub unsafe fn init_stream_with(
    out: *mut FfiArrayStream,
    config: ProducerConfig,
    tracker: MemoryTracker,
) -> c_int {
    if out.is_null() {
        warn!("stream init called with a null output");
        return Status::Invalid.code();
    }
    match try_new_stream(config, tracker) {
        Ok(stream) => {
            // SAFETY: Non-null, caller guarantees writable.
            unsafe { ptr::write(out, stream) };
            Status::Ok.code()
        }
        Err(e) => {
            warn!(%e, "failed to initialize stream");
            Status::for_error(&e).code()
        }
    }
}

/// Stream factory entry point using the default configuration.
///
/// # Safety
///
/// See `init_stream_with`.
#[no_mangle]
pub unsafe extern "C" fn colx_stream_init(out: *mut FfiArrayStream) -> c_int {
    unsafe { init_stream_with(out, ProducerConfig::default(), MemoryTracker::new()) }
}

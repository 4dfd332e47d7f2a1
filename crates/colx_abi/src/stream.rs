//! Pull based array streams.
//!
//! `export_stream` wraps any `ChunkStream` in an `FfiArrayStream` whose
//! callbacks trampoline into it. `StreamReader` is the consuming side,
//! owning a raw stream received from a producer and releasing it on drop.
use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::fmt;
use std::ptr;

use colx_error::{ColxError, Result};
use tracing::{debug, trace, warn};

use crate::array::ChunkResult;
use crate::datatype::DataType;
use crate::ffi::{FfiArray, FfiArrayStream, FfiSchema, Status};
use crate::schema::TypeDescriptor;

/// A stream of array chunks that all share one schema.
pub trait ChunkStream {
    /// Build a fresh descriptor for the stream's schema.
    ///
    /// Must return an equivalent descriptor every time it's called.
    fn schema(&mut self) -> Result<TypeDescriptor>;

    /// Produce the next chunk, or `EndOfStream` once there's nothing left.
    ///
    /// Keeps returning `EndOfStream` after the first one.
    fn next_chunk(&mut self) -> Result<ChunkResult>;
}

/// Error carrying a non-zero status code returned across the boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusError {
    pub code: c_int,
    pub message: Option<String>,
}

impl StatusError {
    pub fn status(&self) -> Option<Status> {
        Status::from_code(self.code)
    }
}

impl fmt::Display for StatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "status code {}", self.code)?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

impl std::error::Error for StatusError {}

struct StreamPrivate {
    stream: Box<dyn ChunkStream>,
    last_error: Option<CString>,
}

impl StreamPrivate {
    fn set_error(&mut self, err: &ColxError) -> c_int {
        let status = Status::for_error(err);
        debug!(%err, ?status, "stream operation failed");
        // Interior nuls would only come from a foreign message, replace them
        // rather than lose the whole message.
        let msg = err.to_string().replace('\0', " ");
        self.last_error = CString::new(msg).ok();
        status.code()
    }
}

/// Get the stream's private state, None if the stream was released.
unsafe fn stream_private<'a>(stream: *mut FfiArrayStream) -> Option<&'a mut StreamPrivate> {
    if stream.is_null() {
        return None;
    }
    // SAFETY: Caller passes a stream pointer it owns.
    let stream = unsafe { &mut *stream };
    if stream.private_data.is_null() {
        return None;
    }
    // SAFETY: Only ever set to a leaked `StreamPrivate`.
    Some(unsafe { &mut *(stream.private_data as *mut StreamPrivate) })
}

unsafe extern "C" fn get_schema_trampoline(
    stream: *mut FfiArrayStream,
    out: *mut FfiSchema,
) -> c_int {
    let private = match unsafe { stream_private(stream) } {
        Some(private) if !out.is_null() => private,
        _ => {
            warn!("get_schema called on a released stream or with a null output");
            return Status::Invalid.code();
        }
    };

    match private.stream.schema() {
        Ok(desc) => {
            // SAFETY: Non-null, caller provided storage.
            unsafe { ptr::write(out, desc.into_raw()) };
            Status::Ok.code()
        }
        Err(e) => private.set_error(&e),
    }
}

unsafe extern "C" fn get_next_trampoline(stream: *mut FfiArrayStream, out: *mut FfiArray) -> c_int {
    let private = match unsafe { stream_private(stream) } {
        Some(private) if !out.is_null() => private,
        _ => {
            warn!("get_next called on a released stream or with a null output");
            return Status::Invalid.code();
        }
    };

    match private.stream.next_chunk() {
        Ok(result) => {
            // SAFETY: Non-null, caller provided storage.
            unsafe { ptr::write(out, result.into_raw()) };
            Status::Ok.code()
        }
        Err(e) => private.set_error(&e),
    }
}

unsafe extern "C" fn get_last_error_trampoline(stream: *mut FfiArrayStream) -> *const c_char {
    match unsafe { stream_private(stream) } {
        Some(private) => match &private.last_error {
            Some(msg) => msg.as_ptr(),
            None => ptr::null(),
        },
        None => ptr::null(),
    }
}

unsafe extern "C" fn release_trampoline(stream: *mut FfiArrayStream) {
    if stream.is_null() {
        return;
    }
    // SAFETY: Caller passes a stream pointer it owns.
    let stream = unsafe { &mut *stream };
    if stream.release.is_none() || stream.private_data.is_null() {
        warn!("release called on an already released stream");
        return;
    }

    // SAFETY: Leaked in `export_stream`, only reclaimed here.
    let private = unsafe { Box::from_raw(stream.private_data as *mut StreamPrivate) };
    std::mem::drop(private);

    stream.private_data = ptr::null_mut();
    stream.release = None;
    trace!("released exported stream");
}

/// Export a chunk stream across the boundary.
pub fn export_stream(stream: Box<dyn ChunkStream>) -> FfiArrayStream {
    let private = Box::new(StreamPrivate {
        stream,
        last_error: None,
    });

    FfiArrayStream {
        get_schema: Some(get_schema_trampoline),
        get_next: Some(get_next_trampoline),
        get_last_error: Some(get_last_error_trampoline),
        release: Some(release_trampoline),
        private_data: Box::into_raw(private) as *mut c_void,
    }
}

/// Consumer side of a stream.
///
/// Releases the stream when dropped, whether or not the end of the stream
/// was reached.
pub struct StreamReader {
    raw: FfiArrayStream,
    /// Type of every chunk, known after the first schema fetch.
    datatype: Option<DataType>,
}

impl StreamReader {
    /// Take ownership of a raw stream.
    ///
    /// # Safety
    ///
    /// `raw` must have been initialized by a producer following the stream
    /// protocol.
    pub unsafe fn try_from_raw(raw: FfiArrayStream) -> Result<Self> {
        if raw.is_released() {
            return Err(ColxError::new("Cannot read from a released stream"));
        }
        let reader = StreamReader {
            raw,
            datatype: None,
        };
        if reader.raw.get_schema.is_none() || reader.raw.get_next.is_none() {
            return Err(ColxError::new("Stream missing get_schema or get_next"));
        }
        Ok(reader)
    }

    /// Fetch the stream's schema.
    pub fn schema(&mut self) -> Result<TypeDescriptor> {
        let get_schema = self.raw.get_schema.ok_or_else(released_err)?;
        let mut out = FfiSchema::empty();
        // SAFETY: Stream is live, `out` is valid storage.
        let code = unsafe { get_schema(&mut self.raw, &mut out) };
        if code != 0 {
            return Err(self.status_err("Failed to get stream schema", code));
        }
        // SAFETY: Producer filled `out` following the protocol.
        let desc = unsafe { TypeDescriptor::try_from_raw(out) }?;
        self.datatype = Some(desc.datatype()?);
        Ok(desc)
    }

    /// Fetch the next chunk.
    ///
    /// Chunks are imported as the stream's schema type, fetching the schema
    /// first if it hasn't been yet.
    pub fn next_chunk(&mut self) -> Result<ChunkResult> {
        let datatype = match self.datatype.take() {
            Some(datatype) => datatype,
            None => self.schema()?.datatype()?,
        };
        let result = self.next_chunk_of(&datatype);
        self.datatype = Some(datatype);
        result
    }

    fn next_chunk_of(&mut self, datatype: &DataType) -> Result<ChunkResult> {
        let get_next = self.raw.get_next.ok_or_else(released_err)?;
        let mut out = FfiArray::empty();
        // SAFETY: Stream is live, `out` is valid storage.
        let code = unsafe { get_next(&mut self.raw, &mut out) };
        if code != 0 {
            return Err(self.status_err("Failed to get next stream chunk", code));
        }
        // SAFETY: Producer filled `out` following the protocol for the
        // stream's schema type.
        unsafe { ChunkResult::try_from_raw(out, datatype) }
    }

    /// Message for the last failed operation, if the producer provides one.
    pub fn last_error(&mut self) -> Option<String> {
        let get_last_error = self.raw.get_last_error?;
        // SAFETY: Stream is live.
        let ptr = unsafe { get_last_error(&mut self.raw) };
        if ptr.is_null() {
            return None;
        }
        // SAFETY: Producer returns a nul terminated string valid until the
        // next call on the stream.
        let msg = unsafe { CStr::from_ptr(ptr) };
        Some(msg.to_string_lossy().into_owned())
    }

    /// Release the stream.
    pub fn release(self) {
        std::mem::drop(self)
    }

    fn status_err(&mut self, msg: &str, code: c_int) -> ColxError {
        ColxError::with_source(
            msg,
            Box::new(StatusError {
                code,
                message: self.last_error(),
            }),
        )
    }
}

fn released_err() -> ColxError {
    ColxError::new("Stream already released")
}

impl Drop for StreamReader {
    fn drop(&mut self) {
        if let Some(release) = self.raw.release {
            // SAFETY: We own the stream and it's live.
            unsafe { release(&mut self.raw) };
            debug_assert!(
                self.raw.is_released(),
                "release callback did not mark stream released"
            );
        }
    }
}

impl fmt::Debug for StreamReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamReader")
            .field("released", &self.raw.is_released())
            .field("datatype", &self.datatype)
            .finish()
    }
}

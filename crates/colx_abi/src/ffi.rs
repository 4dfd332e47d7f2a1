//! Raw `#[repr(C)]` records exchanged across the boundary.
//!
//! Layouts follow the Arrow C data and C stream interfaces field for field so
//! that either side can be compiled independently. Nothing in this module
//! dereferences pointers, see `schema`, `array` and `stream` for the owned
//! wrappers.
use std::ffi::{c_char, c_int, c_void};
use std::ptr;

/// Field is nullable.
pub const FLAG_NULLABLE: i64 = 2;
/// Dictionary indices are ordered. Reserved, no dictionary encoding yet.
pub const FLAG_DICTIONARY_ORDERED: i64 = 1;
/// Map keys are sorted. Reserved, no map encoding yet.
pub const FLAG_MAP_KEYS_SORTED: i64 = 4;

/// Null count indicating the consumer needs to compute it from the validity
/// bitmap.
pub const NULL_COUNT_UNKNOWN: i64 = -1;

/// Type descriptor record.
#[repr(C)]
#[derive(Debug)]
pub struct FfiSchema {
    pub format: *const c_char,
    pub name: *const c_char,
    pub metadata: *const c_char,
    pub flags: i64,
    pub n_children: i64,
    pub children: *mut *mut FfiSchema,
    pub dictionary: *mut FfiSchema,
    pub release: Option<unsafe extern "C" fn(schema: *mut FfiSchema)>,
    pub private_data: *mut c_void,
}

impl FfiSchema {
    /// An already released schema, suitable as an out parameter.
    pub const fn empty() -> Self {
        FfiSchema {
            format: ptr::null(),
            name: ptr::null(),
            metadata: ptr::null(),
            flags: 0,
            n_children: 0,
            children: ptr::null_mut(),
            dictionary: ptr::null_mut(),
            release: None,
            private_data: ptr::null_mut(),
        }
    }

    pub const fn is_released(&self) -> bool {
        self.release.is_none()
    }
}

/// Array chunk record.
#[repr(C)]
#[derive(Debug)]
pub struct FfiArray {
    pub length: i64,
    pub null_count: i64,
    pub offset: i64,
    pub n_buffers: i64,
    pub n_children: i64,
    pub buffers: *mut *const c_void,
    pub children: *mut *mut FfiArray,
    pub dictionary: *mut FfiArray,
    pub release: Option<unsafe extern "C" fn(array: *mut FfiArray)>,
    pub private_data: *mut c_void,
}

impl FfiArray {
    /// An already released array with zero length.
    ///
    /// This doubles as the end of data sentinel.
    pub const fn empty() -> Self {
        FfiArray {
            length: 0,
            null_count: 0,
            offset: 0,
            n_buffers: 0,
            n_children: 0,
            buffers: ptr::null_mut(),
            children: ptr::null_mut(),
            dictionary: ptr::null_mut(),
            release: None,
            private_data: ptr::null_mut(),
        }
    }

    pub const fn is_released(&self) -> bool {
        self.release.is_none()
    }

    /// If this array is the end of data sentinel.
    pub const fn is_end_sentinel(&self) -> bool {
        self.length == 0
    }
}

/// Pull based stream of arrays all sharing one schema.
#[repr(C)]
#[derive(Debug)]
pub struct FfiArrayStream {
    pub get_schema:
        Option<unsafe extern "C" fn(stream: *mut FfiArrayStream, out: *mut FfiSchema) -> c_int>,
    pub get_next:
        Option<unsafe extern "C" fn(stream: *mut FfiArrayStream, out: *mut FfiArray) -> c_int>,
    pub get_last_error: Option<unsafe extern "C" fn(stream: *mut FfiArrayStream) -> *const c_char>,
    pub release: Option<unsafe extern "C" fn(stream: *mut FfiArrayStream)>,
    pub private_data: *mut c_void,
}

impl FfiArrayStream {
    pub const fn empty() -> Self {
        FfiArrayStream {
            get_schema: None,
            get_next: None,
            get_last_error: None,
            release: None,
            private_data: ptr::null_mut(),
        }
    }

    pub const fn is_released(&self) -> bool {
        self.release.is_none()
    }
}

/// One column slot for the batch pull entry point.
#[repr(C)]
#[derive(Debug)]
pub struct FfiColumn {
    pub schema: FfiSchema,
    pub array: FfiArray,
}

impl FfiColumn {
    pub const fn empty() -> Self {
        FfiColumn {
            schema: FfiSchema::empty(),
            array: FfiArray::empty(),
        }
    }
}

/// Status codes returned out of band from the data.
///
/// Values are errno codes so C callers can use `strerror`.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok = 0,
    Io = 5,
    NoMemory = 12,
    Invalid = 22,
}

impl Status {
    pub const fn code(self) -> c_int {
        self as c_int
    }

    pub fn from_code(code: c_int) -> Option<Status> {
        Some(match code {
            0 => Status::Ok,
            5 => Status::Io,
            12 => Status::NoMemory,
            22 => Status::Invalid,
            _ => return None,
        })
    }

    /// Pick the status best describing an error.
    pub fn for_error(err: &colx_error::ColxError) -> Status {
        // Pass through statuses from further upstream.
        if let Some(status) = err
            .downcast_source::<crate::stream::StatusError>()
            .and_then(|e| e.status())
        {
            return status;
        }
        if err.downcast_source::<crate::buffer::AllocationError>().is_some() {
            Status::NoMemory
        } else {
            Status::Io
        }
    }
}

/// Signature of the batch pull entry point.
///
/// Fills `column_count` slots starting at `columns`. A zero length array in
/// the first slot signals there's no more data, and all other slots are left
/// untouched.
pub type BatchPullFn =
    unsafe extern "C" fn(producer: *mut c_void, columns: *mut FfiColumn, column_count: i64) -> c_int;

/// Signature of the stream factory entry point.
pub type StreamInitFn = unsafe extern "C" fn(stream: *mut FfiArrayStream) -> c_int;

//! Aligned raw buffers handed across the boundary.
use std::alloc::{self, Layout};
use std::error::Error;
use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use colx_error::{ColxError, Result};

/// Default alignment for buffers, suitable for vectorized reads.
pub const DEFAULT_ALIGNMENT: usize = 64;

/// Allocating a buffer failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationError {
    pub size: usize,
    pub alignment: usize,
    pub reason: &'static str,
}

impl fmt::Display for AllocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failed to allocate {} bytes with alignment {}: {}",
            self.size, self.alignment, self.reason
        )
    }
}

impl Error for AllocationError {}

/// Tracks live buffer allocations.
///
/// Every buffer holds a handle to the tracker it was allocated against, so
/// counts stay accurate no matter which side of the boundary frees it.
#[derive(Debug, Clone, Default)]
pub struct MemoryTracker {
    inner: Arc<TrackerState>,
}

#[derive(Debug, Default)]
struct TrackerState {
    /// Max number of live bytes, unlimited if None.
    limit: Option<usize>,
    live_bytes: AtomicUsize,
    live_buffers: AtomicUsize,
    total_allocations: AtomicUsize,
}

impl MemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a tracker that refuses allocations once `limit` live bytes are
    /// reached.
    pub fn with_limit(limit: usize) -> Self {
        MemoryTracker {
            inner: Arc::new(TrackerState {
                limit: Some(limit),
                ..Default::default()
            }),
        }
    }

    pub fn live_bytes(&self) -> usize {
        self.inner.live_bytes.load(Ordering::Relaxed)
    }

    pub fn live_buffers(&self) -> usize {
        self.inner.live_buffers.load(Ordering::Relaxed)
    }

    pub fn total_allocations(&self) -> usize {
        self.inner.total_allocations.load(Ordering::Relaxed)
    }

    fn reserve(&self, size: usize) -> bool {
        let limit = self.inner.limit;
        let reserved =
            self.inner
                .live_bytes
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |curr| {
                    let next = curr.checked_add(size)?;
                    match limit {
                        Some(limit) if next > limit => None,
                        _ => Some(next),
                    }
                });
        if reserved.is_err() {
            return false;
        }

        self.inner.live_buffers.fetch_add(1, Ordering::Relaxed);
        self.inner.total_allocations.fetch_add(1, Ordering::Relaxed);
        true
    }

    fn unreserve(&self, size: usize) {
        self.inner.live_bytes.fetch_sub(size, Ordering::Relaxed);
        self.inner.live_buffers.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Round `len` up to a non-zero multiple of `alignment`.
pub const fn padded_len(len: usize, alignment: usize) -> usize {
    if len == 0 {
        return alignment;
    }
    len.div_ceil(alignment) * alignment
}

/// A zero initialized, aligned, heap allocated byte buffer.
#[derive(Debug)]
pub struct AlignedBuffer {
    ptr: NonNull<u8>,
    layout: Layout,
    tracker: MemoryTracker,
}

impl AlignedBuffer {
    /// Allocate a zeroed buffer of at least `len` bytes.
    ///
    /// The allocation is padded to a multiple of `alignment`.
    pub fn try_new_zeroed(len: usize, alignment: usize, tracker: &MemoryTracker) -> Result<Self> {
        if !alignment.is_power_of_two() {
            return Err(ColxError::new(format!(
                "Invalid buffer layout, alignment {alignment} is not a power of two"
            )));
        }
        let size = padded_len(len, alignment);
        let layout = Layout::from_size_align(size, alignment).map_err(|e| {
            ColxError::with_source(
                format!("Invalid buffer layout, size: {size}, alignment: {alignment}"),
                Box::new(e),
            )
        })?;

        if !tracker.reserve(size) {
            return Err(ColxError::with_source(
                "Buffer allocation refused",
                Box::new(AllocationError {
                    size,
                    alignment,
                    reason: "memory limit reached",
                }),
            ));
        }

        // SAFETY: Layout size is non-zero.
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = match NonNull::new(ptr) {
            Some(ptr) => ptr,
            None => {
                tracker.unreserve(size);
                return Err(ColxError::with_source(
                    "Buffer allocation failed",
                    Box::new(AllocationError {
                        size,
                        alignment,
                        reason: "allocator returned null",
                    }),
                ));
            }
        };

        Ok(AlignedBuffer {
            ptr,
            layout,
            tracker: tracker.clone(),
        })
    }

    /// Allocated size in bytes, including padding.
    pub fn len(&self) -> usize {
        self.layout.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn alignment(&self) -> usize {
        self.layout.align()
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: We own `len` initialized bytes.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len()) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: We own `len` initialized bytes, and have a unique borrow.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len()) }
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        // SAFETY: Allocated in `try_new_zeroed` with this exact layout.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
        self.tracker.unreserve(self.layout.size());
    }
}

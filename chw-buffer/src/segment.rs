//! # Segments and Segment Pool
//!
//! Purpose: Provide the fixed-capacity byte blocks a `StagingBuffer` chains
//! together, and a shared free list that recycles them across buffers.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Drained segments go back to a bounded free list.
//! 2. **Minimal Locking**: The mutex guards only the push/pop of the free list.
//! 3. **Size Classes of One**: Only standard-size segments are cached;
//!    oversized segments requested by large size hints are freed on release.
//! 4. **Accumulator Stats**: Atomic counters track allocations and reuse.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

/// Default segment size in bytes.
pub const DEFAULT_SEGMENT_SIZE: usize = 4096;

/// Default number of free segments a pool keeps around.
pub const DEFAULT_MAX_CACHED_SEGMENTS: usize = 64;

/// Fixed-capacity contiguous byte block.
///
/// Bytes `0..len` have been produced; `len..capacity` is spare room.
pub struct Segment {
    pub(crate) data: Box<[u8]>,
    pub(crate) len: usize,
}

impl Segment {
    fn with_capacity(capacity: usize) -> Self {
        Segment {
            data: vec![0u8; capacity].into_boxed_slice(),
            len: 0,
        }
    }

    /// Total capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of produced bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true when no bytes have been produced.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Spare room after the produced bytes.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.len
    }

    #[inline]
    pub(crate) fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.len..]
    }
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// Snapshot of segment pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SegmentPoolStats {
    /// Segments freshly allocated from the heap.
    pub allocated: u64,
    /// Segments served from the free list.
    pub reused: u64,
    /// Segments handed back to the pool (cached or freed).
    pub released: u64,
    /// Segments currently sitting in the free list.
    pub cached: usize,
}

struct SegmentPoolInner {
    segment_size: usize,
    max_cached: usize,
    free: Mutex<Vec<Segment>>,
    allocated: AtomicU64,
    reused: AtomicU64,
    released: AtomicU64,
}

/// Shared free list of standard-size segments.
///
/// Cloning the handle shares the same free list, so many connection buffers
/// can recycle through one pool.
#[derive(Clone)]
pub struct SegmentPool {
    inner: Arc<SegmentPoolInner>,
}

impl SegmentPool {
    /// Creates a pool of `segment_size` blocks keeping at most `max_cached`
    /// free segments. A zero segment size is bumped to one byte.
    pub fn new(segment_size: usize, max_cached: usize) -> Self {
        SegmentPool {
            inner: Arc::new(SegmentPoolInner {
                segment_size: segment_size.max(1),
                max_cached,
                free: Mutex::new(Vec::with_capacity(max_cached.min(64))),
                allocated: AtomicU64::new(0),
                reused: AtomicU64::new(0),
                released: AtomicU64::new(0),
            }),
        }
    }

    /// Standard segment size of this pool.
    #[inline]
    pub fn segment_size(&self) -> usize {
        self.inner.segment_size
    }

    /// Hands out an empty segment with at least `min_capacity` bytes.
    pub fn acquire(&self, min_capacity: usize) -> Segment {
        let size = self.inner.segment_size;
        if min_capacity > size {
            self.inner.allocated.fetch_add(1, Ordering::Relaxed);
            trace!(capacity = min_capacity, "buffer.segment.oversized");
            return Segment::with_capacity(min_capacity);
        }

        let cached = self.inner.free.lock().pop();
        match cached {
            Some(segment) => {
                self.inner.reused.fetch_add(1, Ordering::Relaxed);
                segment
            }
            None => {
                self.inner.allocated.fetch_add(1, Ordering::Relaxed);
                trace!(capacity = size, "buffer.segment.alloc");
                Segment::with_capacity(size)
            }
        }
    }

    /// Takes a segment back; it is cached when it has the standard size and
    /// the free list has room, otherwise freed.
    pub fn release(&self, mut segment: Segment) {
        self.inner.released.fetch_add(1, Ordering::Relaxed);
        if segment.capacity() != self.inner.segment_size {
            return;
        }
        segment.len = 0;
        let mut free = self.inner.free.lock();
        if free.len() < self.inner.max_cached {
            free.push(segment);
        }
    }

    /// Returns the current counters.
    pub fn stats(&self) -> SegmentPoolStats {
        SegmentPoolStats {
            allocated: self.inner.allocated.load(Ordering::Relaxed),
            reused: self.inner.reused.load(Ordering::Relaxed),
            released: self.inner.released.load(Ordering::Relaxed),
            cached: self.inner.free.lock().len(),
        }
    }
}

impl Default for SegmentPool {
    fn default() -> Self {
        SegmentPool::new(DEFAULT_SEGMENT_SIZE, DEFAULT_MAX_CACHED_SEGMENTS)
    }
}

impl fmt::Debug for SegmentPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentPool")
            .field("segment_size", &self.inner.segment_size)
            .field("max_cached", &self.inner.max_cached)
            .finish()
    }
}

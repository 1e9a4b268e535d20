//! # Staging Buffer
//!
//! Purpose: A write-then-confirm, read-then-confirm byte channel built from a
//! chain of fixed-size segments. Producers stage protocol frames and either
//! commit them with `flush` or roll them back with `discard`; consumers only
//! ever see committed bytes.
//!
//! ## Design Principles
//! 1. **Three Cursors**: produced (write end), committed (flush boundary) and
//!    consumed (read start) move independently, with
//!    `read <= committed <= written <= allocated`.
//! 2. **Chain, Never Copy**: Growth appends segments; existing bytes are never
//!    moved, so copy cost tracks bytes written rather than buffer size.
//! 3. **Recycling**: Segments drained by reads or dropped by `discard` return
//!    to the `SegmentPool`.
//! 4. **Fail Fast**: Over-confirming a region is a usage error with no effect.
//!
//! ## Structure Overview
//!
//! ```text
//!  segments[0]            segments[1]            segments[2]
//! +------------------+   +------------------+   +-----------+------+
//! |....RRRRRRRRRRRRRR|   |RRRRRRRRRPPPPPPPPP|   |PPPPPPPPPPP|      |
//! +------------------+   +------------------+   +-----------+------+
//!      ^ read_offset               ^ commit                 ^ write end
//!
//! R = committed, unread     P = produced, not yet committed
//! ```
//!
//! A segment other than the last is sealed: its `len` is final and equals its
//! capacity. A new segment is chained only once the last one is full, so a
//! size hint larger than the spare room of a partly written segment gets
//! that spare room back, and the producer loops.
//!
//! The buffer is single-producer/single-consumer and not internally
//! synchronised; callers serialise access per role.

use std::collections::VecDeque;
use std::fmt;

use bytes::Buf;
use tracing::trace;

use chw_common::{ChwError, ChwResult};

use crate::segment::{Segment, SegmentPool, DEFAULT_SEGMENT_SIZE};

/// Free segments kept by a buffer that owns a private pool.
const PRIVATE_POOL_CACHE: usize = 2;

/// Position inside the segment chain, relative to the front segment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct ChainPos {
    segment: usize,
    offset: usize,
}

/// Segmented read/write staging buffer.
pub struct StagingBuffer {
    pool: SegmentPool,
    segments: VecDeque<Segment>,
    /// Consumed bytes of the front segment.
    read_offset: usize,
    /// Commit boundary.
    commit: ChainPos,
    /// Committed, unread bytes.
    readable: usize,
    /// Produced, uncommitted bytes.
    pending: usize,
    /// Unconfirmed bytes of the last writable region.
    write_window: usize,
    /// Unconfirmed bytes of the last readable span.
    read_window: usize,
}

impl StagingBuffer {
    /// Creates a buffer with its own small segment pool.
    pub fn new(segment_size: usize) -> Self {
        Self::with_pool(SegmentPool::new(segment_size, PRIVATE_POOL_CACHE))
    }

    /// Creates a buffer that draws segments from a shared pool.
    pub fn with_pool(pool: SegmentPool) -> Self {
        StagingBuffer {
            pool,
            segments: VecDeque::new(),
            read_offset: 0,
            commit: ChainPos::default(),
            readable: 0,
            pending: 0,
            write_window: 0,
            read_window: 0,
        }
    }

    /// Standard segment size.
    #[inline]
    pub fn segment_size(&self) -> usize {
        self.pool.segment_size()
    }

    /// Committed bytes not yet consumed.
    #[inline]
    pub fn readable_len(&self) -> usize {
        self.readable
    }

    /// Produced bytes not yet committed.
    #[inline]
    pub fn pending_len(&self) -> usize {
        self.pending
    }

    /// Returns true when there is nothing to read and nothing pending.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.readable == 0 && self.pending == 0
    }

    /// Bytes of capacity currently held by the chain.
    pub fn allocated_len(&self) -> usize {
        self.segments.iter().map(Segment::capacity).sum()
    }

    /// Number of segments in the chain.
    #[inline]
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Returns a contiguous, non-empty writable region.
    ///
    /// The region holds at least `size_hint` bytes unless the last segment is
    /// partly written and has less room than that; the rest of that segment is
    /// returned instead and the caller loops. A full segment is followed by a
    /// new one of at least `max(segment_size, size_hint)` bytes. A hint of
    /// zero asks for any non-empty region.
    ///
    /// The region stays valid until the next call that mutates the write
    /// side; confirm the bytes actually produced with `confirm_write`.
    pub fn get_writable_region(&mut self, size_hint: usize) -> &mut [u8] {
        let need = size_hint.max(1);
        self.rewind_if_drained();

        let (fits, partial, untouched) = match self.segments.back() {
            Some(last) => (
                last.remaining() >= need,
                !last.is_empty() && last.remaining() > 0,
                last.is_empty(),
            ),
            None => (false, false, false),
        };
        if !fits && !partial {
            // An untouched tail segment is swapped for one that fits the hint.
            if untouched {
                if let Some(segment) = self.segments.pop_back() {
                    self.pool.release(segment);
                }
            }
            let segment = self.pool.acquire(need);
            self.segments.push_back(segment);
        }

        let last = self.segments.len() - 1;
        self.write_window = self.segments[last].remaining();
        self.segments[last].spare_mut()
    }

    /// Marks `count` bytes of the last writable region as produced.
    ///
    /// The bytes are not readable until `flush`.
    ///
    /// # Errors
    /// Returns `ChwError::WriteOverrun` if `count` exceeds what is left of the
    /// last region; nothing is recorded in that case.
    pub fn confirm_write(&mut self, count: usize) -> ChwResult<()> {
        if count > self.write_window {
            return Err(ChwError::WriteOverrun {
                requested: count,
                available: self.write_window,
            });
        }
        self.advance_write(count);
        Ok(())
    }

    /// Commits every produced byte, making it readable.
    ///
    /// No-op when nothing is pending.
    pub fn flush(&mut self) {
        if self.pending == 0 {
            return;
        }
        let last = self.segments.len() - 1;
        self.commit = ChainPos {
            segment: last,
            offset: self.segments[last].len,
        };
        self.readable += self.pending;
        self.pending = 0;
    }

    /// Rolls back every byte produced since the last `flush`.
    ///
    /// Segments holding only discarded bytes go back to the pool. Committed
    /// data is untouched. No-op when nothing is pending.
    pub fn discard(&mut self) {
        if self.pending == 0 {
            return;
        }
        trace!(dropped = self.pending, "buffer.discard");

        let keep = (self.commit.segment + 1).min(self.segments.len());
        while self.segments.len() > keep {
            if let Some(segment) = self.segments.pop_back() {
                self.pool.release(segment);
            }
        }
        if let Some(segment) = self.segments.get_mut(self.commit.segment) {
            segment.len = self.commit.offset;
        }
        self.pending = 0;
        self.write_window = 0;
    }

    /// Returns the longest contiguous committed span at the read cursor.
    ///
    /// The span never crosses a segment boundary; loop with `confirm_read`
    /// to drain more. Empty when everything committed has been read.
    pub fn read(&mut self) -> &[u8] {
        let (start, end) = self.front_bounds();
        self.read_window = end - start;
        match self.segments.front() {
            Some(segment) => &segment.data[start..end],
            None => &[],
        }
    }

    /// Marks `count` bytes of the last readable span as consumed.
    ///
    /// Fully drained segments are returned to the pool.
    ///
    /// # Errors
    /// Returns `ChwError::ReadOverrun` if `count` exceeds what is left of the
    /// last span; nothing is consumed in that case.
    pub fn confirm_read(&mut self, count: usize) -> ChwResult<()> {
        if count > self.read_window {
            return Err(ChwError::ReadOverrun {
                requested: count,
                available: self.read_window,
            });
        }
        self.read_window -= count;
        self.consume(count);
        Ok(())
    }

    /// Produces and confirms all of `data`, crossing segments as needed.
    ///
    /// The bytes are pending until `flush`.
    pub fn write_slice(&mut self, data: &[u8]) {
        let mut rest = data;
        while !rest.is_empty() {
            let region = self.get_writable_region(0);
            let count = region.len().min(rest.len());
            region[..count].copy_from_slice(&rest[..count]);
            self.advance_write(count);
            rest = &rest[count..];
        }
    }

    /// Copies committed bytes into `out`, consuming them.
    ///
    /// Returns the number of bytes copied, which is less than `out.len()`
    /// only when fewer bytes were readable.
    pub fn read_into(&mut self, out: &mut [u8]) -> usize {
        let mut copied = 0;
        while copied < out.len() {
            let span = self.front_span();
            if span.is_empty() {
                break;
            }
            let count = span.len().min(out.len() - copied);
            out[copied..copied + count].copy_from_slice(&span[..count]);
            self.consume(count);
            copied += count;
        }
        self.read_window = 0;
        copied
    }

    fn advance_write(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        if let Some(last) = self.segments.back_mut() {
            last.len += count;
            self.write_window -= count;
            self.pending += count;
        }
    }

    /// Start and end of the committed, unread bytes in the front segment.
    fn front_bounds(&self) -> (usize, usize) {
        match self.segments.front() {
            Some(front) => {
                let end = if self.commit.segment == 0 {
                    self.commit.offset
                } else {
                    front.len
                };
                (self.read_offset, end)
            }
            None => (0, 0),
        }
    }

    fn front_span(&self) -> &[u8] {
        let (start, end) = self.front_bounds();
        match self.segments.front() {
            Some(segment) => &segment.data[start..end],
            None => &[],
        }
    }

    /// Advances the read cursor within the front span and reclaims drained
    /// segments.
    fn consume(&mut self, count: usize) {
        self.read_offset += count;
        self.readable -= count;

        // Only sealed segments can be released; the last one is still the
        // write target.
        while self.segments.len() > 1 && self.read_offset >= self.segments[0].len {
            if let Some(segment) = self.segments.pop_front() {
                self.pool.release(segment);
            }
            self.read_offset = 0;
            if self.commit.segment == 0 {
                self.commit.offset = 0;
            } else {
                self.commit.segment -= 1;
            }
        }
    }

    /// Reuses a lone segment from the start once every byte in it is consumed.
    fn rewind_if_drained(&mut self) {
        if self.segments.len() != 1 || self.pending != 0 {
            return;
        }
        let segment = &mut self.segments[0];
        if segment.len != 0 && self.read_offset == segment.len {
            segment.len = 0;
            self.read_offset = 0;
            self.commit = ChainPos::default();
            self.read_window = 0;
        }
    }
}

impl Default for StagingBuffer {
    fn default() -> Self {
        StagingBuffer::new(DEFAULT_SEGMENT_SIZE)
    }
}

impl Drop for StagingBuffer {
    fn drop(&mut self) {
        for segment in self.segments.drain(..) {
            self.pool.release(segment);
        }
    }
}

impl fmt::Debug for StagingBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StagingBuffer")
            .field("segment_size", &self.segment_size())
            .field("segments", &self.segments.len())
            .field("readable", &self.readable)
            .field("pending", &self.pending)
            .finish()
    }
}

/// Reads committed bytes, so decoders can use `get_u32_le`, `copy_to_bytes`
/// and friends directly on the buffer.
impl Buf for StagingBuffer {
    fn remaining(&self) -> usize {
        self.readable
    }

    fn chunk(&self) -> &[u8] {
        self.front_span()
    }

    fn advance(&mut self, mut cnt: usize) {
        assert!(
            cnt <= self.readable,
            "cannot advance past the committed bytes: {} > {}",
            cnt,
            self.readable
        );
        self.read_window = 0;
        while cnt > 0 {
            let available = self.front_span().len();
            if available == 0 {
                break;
            }
            let step = available.min(cnt);
            self.consume(step);
            cnt -= step;
        }
    }
}

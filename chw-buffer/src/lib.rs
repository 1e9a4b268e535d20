//! # chwire Staging Buffers
//!
//! Purpose: Stage outgoing protocol frames and incoming socket bytes in a
//! chain of fixed-size segments, separating produced, committed and consumed
//! bytes so partially written frames can be rolled back.
//!
//! ## Design Principles
//! 1. **Write-Ahead Staging**: Frames become visible only after `flush`.
//! 2. **Segment Chaining**: Growth never copies existing bytes.
//! 3. **Object Pool Pattern**: Segments recycle through a shared pool.
//! 4. **Runtime-Agnostic Core**: Only the `io` pumps touch tokio.

mod io;
mod segment;
mod staging;

pub use segment::{
    Segment, SegmentPool, SegmentPoolStats, DEFAULT_MAX_CACHED_SEGMENTS, DEFAULT_SEGMENT_SIZE,
};
pub use staging::StagingBuffer;

//! # Staging Buffer Benchmark
//!
//! Purpose: Measure stage/commit/drain throughput of `StagingBuffer` for a
//! given chunk size and segment size, so segment sizing can be compared.
//!
//! ## Design Principles
//! 1. **Deterministic Workload**: Chunk contents come from a fixed PRNG seed.
//! 2. **Steady State**: A warm-up pass fills the segment pool before timing.
//! 3. **Both Paths**: Region-based staging and slice copies are timed separately.
//!
//! Usage: `bench_buffer [total_bytes] [chunk_size] [segment_size]`

use std::env;
use std::hint::black_box;
use std::time::{Duration, Instant};

use anyhow::{ensure, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use chw_buffer::{SegmentPool, StagingBuffer, DEFAULT_MAX_CACHED_SEGMENTS, DEFAULT_SEGMENT_SIZE};

const DEFAULT_TOTAL_BYTES: usize = 256 << 20;
const DEFAULT_CHUNK_SIZE: usize = 1500;

/// Chunks staged before each flush/drain cycle.
const FRAMES_PER_FLUSH: usize = 32;

struct BenchConfig {
    total_bytes: usize,
    chunk_size: usize,
    segment_size: usize,
}

impl BenchConfig {
    fn from_args() -> Self {
        let mut args = env::args().skip(1);
        BenchConfig {
            total_bytes: parse_usize(args.next(), DEFAULT_TOTAL_BYTES),
            chunk_size: parse_usize(args.next(), DEFAULT_CHUNK_SIZE).max(1),
            segment_size: parse_usize(args.next(), DEFAULT_SEGMENT_SIZE).max(1),
        }
    }

    fn chunk_count(&self) -> usize {
        (self.total_bytes / self.chunk_size).max(1)
    }
}

fn parse_usize(value: Option<String>, fallback: usize) -> usize {
    value.and_then(|raw| raw.parse().ok()).unwrap_or(fallback)
}

struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    fn fill(&mut self, buffer: &mut [u8]) {
        for chunk in buffer.chunks_mut(8) {
            let bytes = self.next_u64().to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }
}

fn report(label: &str, bytes: usize, elapsed: Duration) {
    let secs = elapsed.as_secs_f64();
    let mib_per_sec = (bytes as f64) / (1024.0 * 1024.0) / secs;
    println!("{label}: {bytes} bytes in {secs:.3}s ({mib_per_sec:.1} MiB/s)");
}

/// Reads every committed byte and returns how many were seen.
fn drain(buffer: &mut StagingBuffer) -> Result<usize> {
    let mut seen = 0;
    loop {
        let span = buffer.read();
        if span.is_empty() {
            return Ok(seen);
        }
        let len = span.len();
        black_box(span);
        buffer.confirm_read(len)?;
        seen += len;
    }
}

fn stage_regions(buffer: &mut StagingBuffer, chunk: &[u8], count: usize) -> Result<usize> {
    let mut drained = 0;
    for frame in 0..count {
        let mut rest = chunk;
        while !rest.is_empty() {
            let region = buffer.get_writable_region(rest.len());
            let step = region.len().min(rest.len());
            region[..step].copy_from_slice(&rest[..step]);
            buffer.confirm_write(step)?;
            rest = &rest[step..];
        }
        if frame % FRAMES_PER_FLUSH == FRAMES_PER_FLUSH - 1 {
            buffer.flush();
            drained += drain(buffer)?;
        }
    }
    buffer.flush();
    drained += drain(buffer)?;
    Ok(drained)
}

fn stage_slices(buffer: &mut StagingBuffer, chunk: &[u8], count: usize) -> Result<usize> {
    let mut drained = 0;
    for frame in 0..count {
        buffer.write_slice(chunk);
        if frame % FRAMES_PER_FLUSH == FRAMES_PER_FLUSH - 1 {
            buffer.flush();
            drained += drain(buffer)?;
        }
    }
    buffer.flush();
    drained += drain(buffer)?;
    Ok(drained)
}

fn main() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .try_init();

    if let Err(err) = run() {
        eprintln!("bench_buffer failed: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let config = BenchConfig::from_args();
    let count = config.chunk_count();
    let expected = count * config.chunk_size;

    let mut chunk = vec![0u8; config.chunk_size];
    XorShift64::new(0x1234_5678_9ABC_DEF0).fill(&mut chunk);

    let pool = SegmentPool::new(config.segment_size, DEFAULT_MAX_CACHED_SEGMENTS);
    let mut buffer = StagingBuffer::with_pool(pool.clone());

    println!(
        "bytes={}, chunk_size={}, segment_size={}, chunks={}",
        config.total_bytes, config.chunk_size, config.segment_size, count
    );

    stage_slices(&mut buffer, &chunk, FRAMES_PER_FLUSH * 4)?;

    let start = Instant::now();
    let drained = stage_regions(&mut buffer, &chunk, count)?;
    ensure!(drained == expected, "region path lost bytes: {drained} != {expected}");
    report("REGION", drained, start.elapsed());

    let start = Instant::now();
    let drained = stage_slices(&mut buffer, &chunk, count)?;
    ensure!(drained == expected, "slice path lost bytes: {drained} != {expected}");
    report("SLICE", drained, start.elapsed());

    let stats = pool.stats();
    info!(
        allocated = stats.allocated,
        reused = stats.reused,
        cached = stats.cached,
        "bench.segments"
    );
    println!(
        "segments: allocated={}, reused={}, released={}",
        stats.allocated, stats.reused, stats.released
    );
    Ok(())
}

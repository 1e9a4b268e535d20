//! # Connection Pool Benchmark
//!
//! Purpose: Measure rent/return throughput of `ConnectionPool` under
//! contention, independent of any network, by pooling in-memory connections.
//!
//! ## Design Principles
//! 1. **Isolated Hot Path**: Connections cost nothing to open, so the numbers
//!    reflect slot bookkeeping only.
//! 2. **Fail-Fast Accounting**: Exhausted rents are counted, not retried
//!    blindly, to show how often callers would be turned away.
//!
//! Usage: `bench_pool [iterations] [max_pool_size] [tasks]`

use std::env;
use std::future::Future;
use std::hint::black_box;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use chw_client::{
    ClientError, ClientResult, ConnectionPool, ManageConnection, PoolConfig, DEFAULT_MAX_POOL_SIZE,
};

const DEFAULT_ITERATIONS: usize = 100_000;
const DEFAULT_TASKS: usize = 32;

struct BenchConfig {
    iterations: usize,
    max_pool_size: usize,
    tasks: usize,
}

impl BenchConfig {
    fn from_args() -> Self {
        let mut args = env::args().skip(1);
        BenchConfig {
            iterations: parse_usize(args.next(), DEFAULT_ITERATIONS),
            max_pool_size: parse_usize(args.next(), DEFAULT_MAX_POOL_SIZE).max(1),
            tasks: parse_usize(args.next(), DEFAULT_TASKS).max(1),
        }
    }
}

fn parse_usize(value: Option<String>, fallback: usize) -> usize {
    value.and_then(|raw| raw.parse().ok()).unwrap_or(fallback)
}

/// Opens connections that are just a counter value.
#[derive(Default)]
struct MemoryManager {
    opened: AtomicU64,
}

impl ManageConnection for MemoryManager {
    type Connection = u64;

    fn connect(&self) -> impl Future<Output = ClientResult<u64>> + Send {
        let id = self.opened.fetch_add(1, Ordering::Relaxed);
        async move { Ok(id) }
    }
}

fn report(label: &str, ops: usize, elapsed: Duration) {
    let secs = elapsed.as_secs_f64();
    let ops_per_sec = (ops as f64) / secs;
    let nanos_per_op = (secs * 1e9) / (ops as f64);
    println!(
        "{label}: {ops} ops in {secs:.3}s ({ops_per_sec:.0} ops/s, {nanos_per_op:.1} ns/op)"
    );
}

async fn single_caller(pool: &ConnectionPool<MemoryManager>, iterations: usize) -> Result<()> {
    let start = Instant::now();
    for _ in 0..iterations {
        let conn = pool.rent().await?;
        black_box(*conn);
        pool.give_back(conn)?;
    }
    report("RENT/RETURN (1 task)", iterations, start.elapsed());
    Ok(())
}

async fn contended(pool: &ConnectionPool<MemoryManager>, config: &BenchConfig) -> Result<()> {
    let per_task = (config.iterations / config.tasks).max(1);
    let start = Instant::now();

    let mut handles = Vec::with_capacity(config.tasks);
    for _ in 0..config.tasks {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            let mut served = 0usize;
            let mut exhausted = 0usize;
            for _ in 0..per_task {
                match pool.rent().await {
                    Ok(conn) => {
                        black_box(*conn);
                        served += 1;
                        tokio::task::yield_now().await;
                    }
                    Err(ClientError::PoolExhausted { .. }) => {
                        exhausted += 1;
                        tokio::task::yield_now().await;
                    }
                    Err(err) => return Err(err),
                }
            }
            Ok::<_, ClientError>((served, exhausted))
        }));
    }

    let mut served = 0;
    let mut exhausted = 0;
    for handle in handles {
        let (ok, full) = handle.await??;
        served += ok;
        exhausted += full;
    }
    let label = format!("RENT/RETURN ({} tasks)", config.tasks);
    report(&label, served + exhausted, start.elapsed());
    println!("served={served}, exhausted={exhausted}");
    Ok(())
}

fn main() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .try_init();

    if let Err(err) = run() {
        eprintln!("bench_pool failed: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let config = BenchConfig::from_args();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let pool = ConnectionPool::new(
            PoolConfig {
                max_pool_size: config.max_pool_size,
            },
            MemoryManager::default(),
        )?;
        println!(
            "iterations={}, max_pool_size={}, tasks={}",
            config.iterations, config.max_pool_size, config.tasks
        );

        single_caller(&pool, config.iterations).await?;
        contended(&pool, &config).await?;

        let status = pool.status();
        if status.rented != 0 {
            bail!("{} connections still rented after the run", status.rented);
        }
        info!(
            opened = pool.manager().opened.load(Ordering::Relaxed),
            idle = status.idle,
            "bench.pool"
        );
        pool.dispose();
        Ok::<(), anyhow::Error>(())
    })
}

//! # chwire Client
//!
//! Purpose: Share a bounded set of TCP connections among concurrent callers,
//! each connection staging its traffic in segmented buffers.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Reuse TCP connections to avoid repeated connects.
//! 2. **Fail Fast**: A full pool rejects the rent instead of queueing.
//! 3. **RAII Leases**: A rented connection goes home when it is dropped.
//! 4. **Pluggable Transport**: The pool is generic over `ManageConnection`.

mod client;
mod connection;
mod pool;

pub use client::{Client, ClientConfig, ClientError, ClientResult, SessionSettings, Setting};
pub use connection::{TcpConnection, TcpConnector};
pub use pool::{
    ConnectionPool, ManageConnection, PoolConfig, PoolStatus, PooledConnection, ReturnOutcome,
    DEFAULT_MAX_POOL_SIZE,
};

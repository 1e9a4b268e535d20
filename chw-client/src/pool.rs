//! # Connection Pool
//!
//! Purpose: Bound the number of open connections to a server and hand them
//! out to concurrent callers without double-issuing or leaking any.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: A fixed array of slots, each `Empty`, `Idle`
//!    or `Rented`.
//! 2. **Minimal Locking**: The mutex covers slot transitions only; opening a
//!    connection happens outside it, so idle connections stay rentable while
//!    another caller is connecting.
//! 3. **Fail Fast**: Renting from a full pool returns
//!    `ClientError::PoolExhausted` immediately; there is no wait queue.
//! 4. **RAII Leases**: `PooledConnection` returns itself on drop; broken
//!    connections are closed instead of re-pooled.
//!
//! ## Slot Lifecycle
//!
//! ```text
//!            rent (open)                give_back / drop
//!   Empty ───────────────> Rented ─────────────────────────> Idle
//!     ^                      │  ^                              │
//!     │  open failed,        │  └──────── rent (reuse) ────────┘
//!     │  cancelled, broken,  │
//!     └──────── disposed ────┘
//! ```
//!
//! A slot is `Rented` from the moment a caller reserves it, including while
//! its connection is still being opened, so capacity can never be
//! oversubscribed. A `Rented` slot holds no connection: the
//! `PooledConnection` lease owns it until it comes back.

use std::fmt;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::client::{ClientError, ClientResult};

/// Default upper bound on pooled connections.
pub const DEFAULT_MAX_POOL_SIZE: usize = 16;

/// Opens, checks and closes the connections a pool manages.
///
/// This is the seam to the session layer, which decides what "opening a
/// connection" means (socket, handshake, authentication).
pub trait ManageConnection: Send + Sync + 'static {
    /// The pooled resource.
    type Connection: Send + 'static;

    /// Opens a fresh connection.
    fn connect(&self) -> impl Future<Output = ClientResult<Self::Connection>> + Send;

    /// Health hook run when a connection comes back to the pool.
    ///
    /// Returning true closes the connection instead of re-pooling it.
    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }

    /// Releases a connection that leaves the pool for good.
    fn close(&self, conn: Self::Connection) {
        drop(conn);
    }
}

/// Pool configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum number of idle plus rented connections.
    pub max_pool_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            max_pool_size: DEFAULT_MAX_POOL_SIZE,
        }
    }
}

/// Point-in-time view of slot states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub max_pool_size: usize,
    pub idle: usize,
    pub rented: usize,
    pub empty: usize,
    pub disposed: bool,
}

/// What happened to a connection handed back to the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnOutcome {
    /// Stored as idle for the next renter.
    Pooled,
    /// Broken; closed and its slot emptied.
    Discarded,
    /// The pool was disposed; closed and dropped.
    Closed,
}

enum Slot<C> {
    Empty,
    Idle(C),
    Rented,
}

struct PoolState<C> {
    slots: Vec<Slot<C>>,
    disposed: bool,
}

enum Claim<C> {
    Idle(usize, C),
    Reserved(usize),
}

struct PoolInner<M: ManageConnection> {
    config: PoolConfig,
    manager: M,
    state: Mutex<PoolState<M::Connection>>,
}

impl<M: ManageConnection> PoolInner<M> {
    fn claim_slot(&self) -> ClientResult<Claim<M::Connection>> {
        let mut state = self.state.lock();
        if state.disposed {
            return Err(ClientError::PoolDisposed);
        }

        let mut empty = None;
        for (index, slot) in state.slots.iter_mut().enumerate() {
            if matches!(slot, Slot::Idle(_)) {
                if let Slot::Idle(conn) = std::mem::replace(slot, Slot::Rented) {
                    return Ok(Claim::Idle(index, conn));
                }
            } else if empty.is_none() && matches!(slot, Slot::Empty) {
                empty = Some(index);
            }
        }

        match empty {
            Some(index) => {
                state.slots[index] = Slot::Rented;
                Ok(Claim::Reserved(index))
            }
            None => {
                debug!(
                    max_pool_size = self.config.max_pool_size,
                    "pool.rent.exhausted"
                );
                Err(ClientError::PoolExhausted {
                    max_pool_size: self.config.max_pool_size,
                })
            }
        }
    }

    fn release(&self, index: usize, mut conn: M::Connection, broken: bool) -> ReturnOutcome {
        let healthy = !broken && !self.manager.has_broken(&mut conn);
        let outcome = {
            let mut state = self.state.lock();
            if state.disposed {
                state.slots[index] = Slot::Empty;
                ReturnOutcome::Closed
            } else if healthy {
                state.slots[index] = Slot::Idle(conn);
                return ReturnOutcome::Pooled;
            } else {
                state.slots[index] = Slot::Empty;
                ReturnOutcome::Discarded
            }
        };
        debug!(slot = index, outcome = ?outcome, "pool.return.close");
        self.manager.close(conn);
        outcome
    }

    fn free_slot(&self, index: usize) {
        let mut state = self.state.lock();
        state.slots[index] = Slot::Empty;
    }
}

impl<M: ManageConnection> Drop for PoolInner<M> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        for slot in state.slots.drain(..) {
            if let Slot::Idle(conn) = slot {
                self.manager.close(conn);
            }
        }
    }
}

/// Holds a reserved slot while its connection is being opened.
///
/// Dropping it before `commit` (the open failed, or the renting future was
/// dropped) frees the slot again.
struct Reservation<'a, M: ManageConnection> {
    pool: &'a Arc<PoolInner<M>>,
    index: usize,
    armed: bool,
}

impl<M: ManageConnection> Reservation<'_, M> {
    fn commit(mut self, conn: M::Connection) -> ClientResult<PooledConnection<M>> {
        self.armed = false;
        let disposed = self.pool.state.lock().disposed;
        if disposed {
            self.pool.free_slot(self.index);
            self.pool.manager.close(conn);
            return Err(ClientError::PoolDisposed);
        }
        Ok(PooledConnection::new(Arc::clone(self.pool), self.index, conn))
    }
}

impl<M: ManageConnection> Drop for Reservation<'_, M> {
    fn drop(&mut self) {
        if self.armed {
            debug!(slot = self.index, "pool.rent.abandoned");
            self.pool.free_slot(self.index);
        }
    }
}

/// Bounded pool of connections produced by a `ManageConnection`.
///
/// Cloning the handle shares the same pool.
pub struct ConnectionPool<M: ManageConnection> {
    inner: Arc<PoolInner<M>>,
}

impl<M: ManageConnection> Clone for ConnectionPool<M> {
    fn clone(&self) -> Self {
        ConnectionPool {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: ManageConnection> ConnectionPool<M> {
    /// Creates an empty pool; connections are opened on first demand.
    ///
    /// # Errors
    /// Returns `ClientError::InvalidConfig` when `max_pool_size` is zero.
    pub fn new(config: PoolConfig, manager: M) -> ClientResult<Self> {
        if config.max_pool_size == 0 {
            return Err(ClientError::InvalidConfig(
                "max_pool_size must be greater than zero".to_string(),
            ));
        }
        let slots = (0..config.max_pool_size).map(|_| Slot::Empty).collect();
        Ok(ConnectionPool {
            inner: Arc::new(PoolInner {
                config,
                manager,
                state: Mutex::new(PoolState {
                    slots,
                    disposed: false,
                }),
            }),
        })
    }

    /// Returns the pool configuration.
    pub fn config(&self) -> PoolConfig {
        self.inner.config
    }

    /// Returns the connection manager.
    pub fn manager(&self) -> &M {
        &self.inner.manager
    }

    /// Rents a connection, reusing an idle one or opening a new one.
    ///
    /// # Errors
    /// - `ClientError::PoolExhausted` when every slot is idle-less and rented.
    /// - `ClientError::PoolDisposed` after `dispose`.
    /// - Whatever `ManageConnection::connect` returns; the slot is freed.
    ///
    /// Dropping the returned future while it is opening a connection frees the
    /// reserved slot and drops the half-opened connection.
    pub async fn rent(&self) -> ClientResult<PooledConnection<M>> {
        let index = match self.inner.claim_slot()? {
            Claim::Idle(index, conn) => {
                debug!(slot = index, "pool.rent.idle");
                return Ok(PooledConnection::new(Arc::clone(&self.inner), index, conn));
            }
            Claim::Reserved(index) => index,
        };

        let reservation = Reservation {
            pool: &self.inner,
            index,
            armed: true,
        };
        debug!(slot = index, "pool.rent.open");
        let conn = self.inner.manager.connect().await?;
        reservation.commit(conn)
    }

    /// Hands a lease back explicitly and reports what became of it.
    ///
    /// # Errors
    /// Returns `ClientError::ForeignConnection` when the lease was issued by a
    /// different pool. The lease is then released to the pool that issued it.
    pub fn give_back(&self, mut conn: PooledConnection<M>) -> ClientResult<ReturnOutcome> {
        if !Arc::ptr_eq(&self.inner, &conn.pool) {
            debug!(slot = conn.index, "pool.return.foreign");
            return Err(ClientError::ForeignConnection);
        }
        match conn.conn.take() {
            Some(inner) => Ok(self.inner.release(conn.index, inner, conn.broken)),
            None => Err(ClientError::ForeignConnection),
        }
    }

    /// Counts slots by state.
    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock();
        let mut status = PoolStatus {
            max_pool_size: self.inner.config.max_pool_size,
            idle: 0,
            rented: 0,
            empty: 0,
            disposed: state.disposed,
        };
        for slot in &state.slots {
            match slot {
                Slot::Empty => status.empty += 1,
                Slot::Idle(_) => status.idle += 1,
                Slot::Rented => status.rented += 1,
            }
        }
        status
    }

    /// Returns true once `dispose` has run.
    pub fn is_disposed(&self) -> bool {
        self.inner.state.lock().disposed
    }

    /// Closes every idle connection and refuses further rents.
    ///
    /// Connections still rented are closed when they come back.
    pub fn dispose(&self) {
        let mut idle = Vec::new();
        {
            let mut state = self.inner.state.lock();
            if state.disposed {
                return;
            }
            state.disposed = true;
            for slot in state.slots.iter_mut() {
                if matches!(slot, Slot::Idle(_)) {
                    if let Slot::Idle(conn) = std::mem::replace(slot, Slot::Empty) {
                        idle.push(conn);
                    }
                }
            }
        }
        info!(closed = idle.len(), "pool.dispose");
        for conn in idle {
            self.inner.manager.close(conn);
        }
    }
}

impl<M: ManageConnection> fmt::Debug for ConnectionPool<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("status", &self.status())
            .finish()
    }
}

/// A rented connection.
///
/// Derefs to the underlying connection. Dropping the lease returns the
/// connection to its pool; a lease marked broken is closed instead.
pub struct PooledConnection<M: ManageConnection> {
    pool: Arc<PoolInner<M>>,
    index: usize,
    conn: Option<M::Connection>,
    broken: bool,
}

impl<M: ManageConnection> PooledConnection<M> {
    fn new(pool: Arc<PoolInner<M>>, index: usize, conn: M::Connection) -> Self {
        PooledConnection {
            pool,
            index,
            conn: Some(conn),
            broken: false,
        }
    }

    /// Slot this lease occupies.
    pub fn slot(&self) -> usize {
        self.index
    }

    /// Marks the connection unusable so the pool will not re-pool it.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    /// Returns true when `mark_broken` was called.
    pub fn is_marked_broken(&self) -> bool {
        self.broken
    }
}

impl<M: ManageConnection> Deref for PooledConnection<M> {
    type Target = M::Connection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("connection exists until the lease ends")
    }
}

impl<M: ManageConnection> DerefMut for PooledConnection<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("connection exists until the lease ends")
    }
}

impl<M: ManageConnection> Drop for PooledConnection<M> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(self.index, conn, self.broken);
        }
    }
}

impl<M: ManageConnection> fmt::Debug for PooledConnection<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("slot", &self.index)
            .field("broken", &self.broken)
            .finish()
    }
}

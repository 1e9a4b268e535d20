//! # Error Types
//!
//! Purpose: Report contract violations of the staging buffer and the indexed
//! collection synchronously to the immediate caller.
//!
//! ## Design Principles
//! 1. **Fail Fast**: Usage errors are returned at the call that broke the contract.
//! 2. **No Partial Effects**: A call that returns an error leaves state untouched.
//! 3. **Classified**: Every error maps onto a small taxonomy so callers can
//!    decide between fixing a bug, backing off, or dropping a resource.

use std::io;

use thiserror::Error;

/// Result alias for the common layer.
pub type ChwResult<T> = Result<T, ChwError>;

/// Broad error taxonomy shared by every layer of the driver core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Programmer contract violation; never retried.
    Usage,
    /// A bounded resource is at its limit; the caller may back off and retry.
    Capacity,
    /// An underlying resource (socket, peer) failed.
    Resource,
}

/// Errors raised by the staging buffer and the indexed collection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChwError {
    /// More bytes were confirmed as written than the last writable region held.
    #[error("cannot confirm {requested} written bytes, only {available} were handed out")]
    WriteOverrun { requested: usize, available: usize },
    /// More bytes were confirmed as read than the last readable span held.
    #[error("cannot confirm {requested} read bytes, only {available} were readable")]
    ReadOverrun { requested: usize, available: usize },
    /// The key is already present in the collection.
    #[error("an item with the same key has already been added")]
    DuplicateKey,
    /// Position outside of `0..len` (or `0..=len` for inserts).
    #[error("index {index} is out of range for length {len}")]
    IndexOutOfRange { index: usize, len: usize },
}

impl ChwError {
    /// Returns the taxonomy bucket of this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            ChwError::WriteOverrun { .. }
            | ChwError::ReadOverrun { .. }
            | ChwError::DuplicateKey
            | ChwError::IndexOutOfRange { .. } => ErrorClass::Usage,
        }
    }
}

impl From<ChwError> for io::Error {
    fn from(err: ChwError) -> Self {
        io::Error::new(io::ErrorKind::InvalidInput, err)
    }
}

// chw-common - Shared error types and collections for the chwire driver core
//
// The buffer and client crates both build on the definitions here.

pub mod collection;
pub mod error;

// Re-export for convenience
pub use collection::*;
pub use error::*;

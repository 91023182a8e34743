//! Error types for storage operations.

use thiserror::Error;

/// Errors that can occur in a storage backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// A lock guarding in-memory state was poisoned by a panicking writer.
    #[error("store lock poisoned: {0}")]
    Poisoned(String),

    /// The backend failed to read or write.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Convenience type alias for storage operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

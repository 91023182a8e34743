use fcc_store::StoreError;
use fcc_types::SeriesKey;

/// Errors produced by lock operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LockError {
    /// Another holder kept the series for the whole acquire window.
    #[error("series {key} is locked (waited {waited_ms} ms)")]
    Busy { key: SeriesKey, waited_ms: u64 },

    #[error("invalid lease: {0}")]
    InvalidLease(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Convenience type alias for lock operations.
pub type LockResult<T> = std::result::Result<T, LockError>;

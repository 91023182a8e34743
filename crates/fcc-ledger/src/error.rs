use fcc_store::StoreError;
use fcc_types::{ChainHash, SeriesKey};

/// Errors produced by ledger operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    /// The head moved between observation and commit.
    #[error(
        "chain conflict on {key}: expected head {}, found {}",
        describe(.expected),
        describe(.actual)
    )]
    Conflict {
        key: SeriesKey,
        expected: Option<ChainHash>,
        actual: Option<ChainHash>,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

fn describe(head: &Option<ChainHash>) -> String {
    head.as_ref()
        .map_or_else(|| "<empty>".to_string(), |h| h.short_hex().to_string())
}

/// Convenience type alias for ledger operations.
pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

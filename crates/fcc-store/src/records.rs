use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fcc_types::{ChainHash, DocumentId, DocumentStatus, FiscalDocument, LockId, SeriesKey};

/// Current head of one series chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainState {
    pub key: SeriesKey,
    pub current_hash: ChainHash,
    /// The head this one replaced; `None` after the first append.
    pub previous_hash: Option<ChainHash>,
    /// Number of committed appends.
    pub length: u64,
    pub last_updated: DateTime<Utc>,
}

/// Result of a conditional head update.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CasOutcome {
    /// The head matched the expectation and now points at the new hash.
    Committed(ChainState),
    /// The head had moved; nothing was written.
    Conflict { current: Option<ChainHash> },
}

impl CasOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed(_))
    }
}

/// A lease on one series.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesLockRecord {
    pub key: SeriesKey,
    pub lock_id: LockId,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub active: bool,
}

impl SeriesLockRecord {
    /// Returns `true` if the lease is active and not yet expired at `now`.
    pub fn is_held_at(&self, now: DateTime<Utc>) -> bool {
        self.active && self.expires_at > now
    }

    /// Returns `true` if the record is still flagged active but its lease ran out.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.active && self.expires_at <= now
    }
}

/// Error detail stored with a failed attempt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable machine-readable code.
    pub code: String,
    pub message: String,
    /// The processing state the attempt was in when it failed.
    pub stage: DocumentStatus,
}

/// Final state of one submission attempt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: DocumentId,
    pub document: FiscalDocument,
    pub status: DocumentStatus,
    pub authority_id: Option<String>,
    pub validation_ref: Option<String>,
    /// 1-based position in the series chain once committed.
    pub chain_position: Option<u64>,
    pub error: Option<ErrorInfo>,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DocumentRecord {
    /// A fresh record in the `Queued` state.
    pub fn queued(id: DocumentId, document: FiscalDocument, now: DateTime<Utc>) -> Self {
        Self {
            id,
            document,
            status: DocumentStatus::Queued,
            authority_id: None,
            validation_ref: None,
            chain_position: None,
            error: None,
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The series the record's document belongs to, if its key is well formed.
    pub fn series_key(&self) -> Option<SeriesKey> {
        self.document.series_key().ok()
    }
}

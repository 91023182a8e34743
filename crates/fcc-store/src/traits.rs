//! Storage boundaries used by the ledger, the series lock, and the pipeline.
//!
//! Every backend must be thread-safe (`Send + Sync`). The conditional
//! operations (`compare_and_swap`, `insert_if_free`) must be atomic with
//! respect to each other on the same key; everything else may be plain
//! reads and writes.

use chrono::{DateTime, Utc};

use fcc_types::{ChainHash, DocumentId, LockId, SeriesKey};

use crate::error::StoreResult;
use crate::records::{CasOutcome, ChainState, DocumentRecord, SeriesLockRecord};

/// Per-series chain heads.
pub trait ChainStore: Send + Sync {
    /// Read the current head of a series.
    ///
    /// Returns `Ok(None)` if nothing has been committed on the series yet.
    fn head(&self, key: &SeriesKey) -> StoreResult<Option<ChainState>>;

    /// Move the head of `key` from `expected` to `new_hash`.
    ///
    /// An absent head matches only `expected == None`. On a mismatch nothing
    /// is written and [`CasOutcome::Conflict`] carries the head actually
    /// found.
    fn compare_and_swap(
        &self,
        key: &SeriesKey,
        expected: Option<&ChainHash>,
        new_hash: &ChainHash,
        now: DateTime<Utc>,
    ) -> StoreResult<CasOutcome>;

    /// All chain heads of one taxpayer, ordered by series.
    fn chains_for_taxpayer(&self, taxpayer_id: &str) -> StoreResult<Vec<ChainState>>;
}

/// Series lock records.
pub trait LockStore: Send + Sync {
    /// Install `record` unless an active lease that has not expired at `now`
    /// already exists for its key.
    ///
    /// Returns `Ok(true)` if the record was installed. An expired record is
    /// replaced.
    fn insert_if_free(&self, record: SeriesLockRecord, now: DateTime<Utc>) -> StoreResult<bool>;

    /// Read the lock record of a key, active or not.
    fn lock_record(&self, key: &SeriesKey) -> StoreResult<Option<SeriesLockRecord>>;

    /// Deactivate the lock of `key`.
    ///
    /// With `Some(lock_id)` only a record carrying that id is touched.
    /// Returns `Ok(true)` if an active record was deactivated.
    fn release_lock(&self, key: &SeriesKey, lock_id: Option<&LockId>) -> StoreResult<bool>;

    /// Deactivate the lock of `key` if it is active but expired at `now`.
    fn reclaim_if_expired(&self, key: &SeriesKey, now: DateTime<Utc>) -> StoreResult<bool>;

    /// Deactivate every expired lock. Returns how many were reclaimed.
    fn reclaim_expired(&self, now: DateTime<Utc>) -> StoreResult<usize>;
}

/// Document records.
pub trait DocumentStore: Send + Sync {
    /// Insert or replace a record by id.
    fn put_document(&self, record: &DocumentRecord) -> StoreResult<()>;

    fn get_document(&self, id: &DocumentId) -> StoreResult<Option<DocumentRecord>>;

    /// Look a record up by the id the authority assigned to it.
    fn find_by_authority_id(&self, authority_id: &str) -> StoreResult<Option<DocumentRecord>>;

    /// Every attempt recorded for one document number of a series, oldest
    /// first.
    fn find_by_number(&self, key: &SeriesKey, number: &str) -> StoreResult<Vec<DocumentRecord>>;

    /// Committed records of a series in chain order.
    fn list_committed(&self, key: &SeriesKey) -> StoreResult<Vec<DocumentRecord>>;
}

/// A backend providing all three storage boundaries.
pub trait PersistenceStore: ChainStore + LockStore + DocumentStore {}

impl<T: ChainStore + LockStore + DocumentStore> PersistenceStore for T {}

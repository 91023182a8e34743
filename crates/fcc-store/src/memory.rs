//! In-memory store for tests and single-instance deployments.
//!
//! [`InMemoryStore`] keeps chain heads, lock records and document records in
//! `HashMap`s behind `RwLock`s. Conditional operations run under the write
//! lock of their map, which makes them atomic. Data is lost when the store is
//! dropped.

use std::collections::HashMap;
use std::fmt::Display;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use tracing::debug;

use fcc_types::{ChainHash, DocumentId, LockId, SeriesKey};

use crate::error::{StoreError, StoreResult};
use crate::records::{CasOutcome, ChainState, DocumentRecord, SeriesLockRecord};
use crate::traits::{ChainStore, DocumentStore, LockStore};

/// An in-memory implementation of every storage boundary.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    chains: RwLock<HashMap<SeriesKey, ChainState>>,
    locks: RwLock<HashMap<SeriesKey, SeriesLockRecord>>,
    documents: RwLock<HashMap<DocumentId, DocumentRecord>>,
}

impl InMemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored document records.
    pub fn document_count(&self) -> StoreResult<usize> {
        Ok(self.documents.read().map_err(poisoned)?.len())
    }
}

fn poisoned(e: impl Display) -> StoreError {
    StoreError::Poisoned(e.to_string())
}

impl ChainStore for InMemoryStore {
    fn head(&self, key: &SeriesKey) -> StoreResult<Option<ChainState>> {
        let chains = self.chains.read().map_err(poisoned)?;
        Ok(chains.get(key).cloned())
    }

    fn compare_and_swap(
        &self,
        key: &SeriesKey,
        expected: Option<&ChainHash>,
        new_hash: &ChainHash,
        now: DateTime<Utc>,
    ) -> StoreResult<CasOutcome> {
        let mut chains = self.chains.write().map_err(poisoned)?;
        let current = chains.get(key);

        if current.map(|s| &s.current_hash) != expected {
            return Ok(CasOutcome::Conflict {
                current: current.map(|s| s.current_hash.clone()),
            });
        }

        let state = ChainState {
            key: key.clone(),
            current_hash: new_hash.clone(),
            previous_hash: current.map(|s| s.current_hash.clone()),
            length: current.map_or(0, |s| s.length) + 1,
            last_updated: now,
        };
        chains.insert(key.clone(), state.clone());
        Ok(CasOutcome::Committed(state))
    }

    fn chains_for_taxpayer(&self, taxpayer_id: &str) -> StoreResult<Vec<ChainState>> {
        let chains = self.chains.read().map_err(poisoned)?;
        let mut result: Vec<ChainState> = chains
            .values()
            .filter(|s| s.key.taxpayer_id() == taxpayer_id)
            .cloned()
            .collect();
        result.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(result)
    }
}

impl LockStore for InMemoryStore {
    fn insert_if_free(&self, record: SeriesLockRecord, now: DateTime<Utc>) -> StoreResult<bool> {
        let mut locks = self.locks.write().map_err(poisoned)?;
        if locks.get(&record.key).is_some_and(|r| r.is_held_at(now)) {
            return Ok(false);
        }
        locks.insert(record.key.clone(), record);
        Ok(true)
    }

    fn lock_record(&self, key: &SeriesKey) -> StoreResult<Option<SeriesLockRecord>> {
        let locks = self.locks.read().map_err(poisoned)?;
        Ok(locks.get(key).cloned())
    }

    fn release_lock(&self, key: &SeriesKey, lock_id: Option<&LockId>) -> StoreResult<bool> {
        let mut locks = self.locks.write().map_err(poisoned)?;
        match locks.get_mut(key) {
            Some(record) if record.active && lock_id.map_or(true, |id| *id == record.lock_id) => {
                record.active = false;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn reclaim_if_expired(&self, key: &SeriesKey, now: DateTime<Utc>) -> StoreResult<bool> {
        let mut locks = self.locks.write().map_err(poisoned)?;
        match locks.get_mut(key) {
            Some(record) if record.is_expired_at(now) => {
                record.active = false;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn reclaim_expired(&self, now: DateTime<Utc>) -> StoreResult<usize> {
        let mut locks = self.locks.write().map_err(poisoned)?;
        let mut reclaimed = 0;
        for record in locks.values_mut().filter(|r| r.is_expired_at(now)) {
            debug!(key = %record.key, lock_id = %record.lock_id, "reclaiming expired lock");
            record.active = false;
            reclaimed += 1;
        }
        Ok(reclaimed)
    }
}

impl DocumentStore for InMemoryStore {
    fn put_document(&self, record: &DocumentRecord) -> StoreResult<()> {
        let mut documents = self.documents.write().map_err(poisoned)?;
        documents.insert(record.id, record.clone());
        Ok(())
    }

    fn get_document(&self, id: &DocumentId) -> StoreResult<Option<DocumentRecord>> {
        let documents = self.documents.read().map_err(poisoned)?;
        Ok(documents.get(id).cloned())
    }

    fn find_by_authority_id(&self, authority_id: &str) -> StoreResult<Option<DocumentRecord>> {
        let documents = self.documents.read().map_err(poisoned)?;
        Ok(documents
            .values()
            .find(|r| r.authority_id.as_deref() == Some(authority_id))
            .cloned())
    }

    fn find_by_number(&self, key: &SeriesKey, number: &str) -> StoreResult<Vec<DocumentRecord>> {
        let documents = self.documents.read().map_err(poisoned)?;
        let mut result: Vec<DocumentRecord> = documents
            .values()
            .filter(|r| r.document.number == number && belongs_to(r, key))
            .cloned()
            .collect();
        result.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(result)
    }

    fn list_committed(&self, key: &SeriesKey) -> StoreResult<Vec<DocumentRecord>> {
        let documents = self.documents.read().map_err(poisoned)?;
        let mut result: Vec<DocumentRecord> = documents
            .values()
            .filter(|r| r.chain_position.is_some() && belongs_to(r, key))
            .cloned()
            .collect();
        result.sort_by_key(|r| r.chain_position);
        Ok(result)
    }
}

fn belongs_to(record: &DocumentRecord, key: &SeriesKey) -> bool {
    record.document.taxpayer_id == key.taxpayer_id() && record.document.series == key.series()
}

use std::sync::Arc;

use tracing::{debug, error};

use fcc_crypto::ChainHasher;
use fcc_store::{CasOutcome, ChainState, ChainStore};
use fcc_types::{ChainHash, ChainLink, FiscalDocument, SeriesKey, SharedClock};

use crate::audit::{SeriesAudit, SeriesAuditor};
use crate::error::{LedgerError, LedgerResult};

/// Per-series hash chain over a [`ChainStore`].
///
/// The ledger never writes a head unconditionally: [`commit_head`] moves the
/// head only if it still equals the hash the caller linked against. Callers
/// serialize appends with the series lock; the conditional commit catches
/// anything the lock missed.
///
/// [`commit_head`]: HashChainLedger::commit_head
#[derive(Clone)]
pub struct HashChainLedger {
    store: Arc<dyn ChainStore>,
    clock: SharedClock,
}

impl HashChainLedger {
    pub fn new(store: Arc<dyn ChainStore>, clock: SharedClock) -> Self {
        Self { store, clock }
    }

    /// The current head hash of a series, or `None` for an empty chain.
    pub fn get_head(&self, key: &SeriesKey) -> LedgerResult<Option<ChainHash>> {
        Ok(self.store.head(key)?.map(|s| s.current_hash))
    }

    /// The full chain state of a series.
    pub fn chain_state(&self, key: &SeriesKey) -> LedgerResult<Option<ChainState>> {
        Ok(self.store.head(key)?)
    }

    /// Hash a document against the previous hash it carries. `None` if the
    /// document total overflows.
    pub fn compute_hash(&self, doc: &FiscalDocument) -> Option<ChainHash> {
        ChainHasher::compute(doc, doc.prev_hash.as_ref())
    }

    /// The link a document would take if appended after `head`.
    pub fn candidate_link(
        &self,
        doc: &FiscalDocument,
        head: Option<ChainHash>,
    ) -> Option<ChainLink> {
        ChainHasher::link(doc, head)
    }

    /// Move the head of `key` from `expected_prev` to `new_hash`.
    ///
    /// Returns [`LedgerError::Conflict`] if the stored head is not
    /// `expected_prev`; the chain is left untouched in that case.
    pub fn commit_head(
        &self,
        key: &SeriesKey,
        expected_prev: Option<&ChainHash>,
        new_hash: &ChainHash,
    ) -> LedgerResult<ChainState> {
        match self
            .store
            .compare_and_swap(key, expected_prev, new_hash, self.clock.now())?
        {
            CasOutcome::Committed(state) => {
                debug!(key = %key, hash = %new_hash.short_hex(), length = state.length, "chain head advanced");
                Ok(state)
            }
            CasOutcome::Conflict { current } => {
                error!(
                    key = %key,
                    expected = ?expected_prev.map(ChainHash::short_hex),
                    actual = ?current.as_ref().map(ChainHash::short_hex),
                    "chain head moved before commit"
                );
                Err(LedgerError::Conflict {
                    key: key.clone(),
                    expected: expected_prev.cloned(),
                    actual: current,
                })
            }
        }
    }

    /// All chain heads of a taxpayer, ordered by series.
    pub fn chains_for_taxpayer(&self, taxpayer_id: &str) -> LedgerResult<Vec<ChainState>> {
        Ok(self.store.chains_for_taxpayer(taxpayer_id)?)
    }

    /// Audit committed documents of `key` in chain order.
    pub fn audit_series(&self, key: &SeriesKey, documents: &[FiscalDocument]) -> SeriesAudit {
        SeriesAuditor::audit(key, documents)
    }
}

impl std::fmt::Debug for HashChainLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashChainLedger").finish_non_exhaustive()
    }
}

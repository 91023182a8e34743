use std::sync::Arc;

use tracing::{debug, error, info, warn};

use fcc_ledger::{HashChainLedger, SeriesAudit};
use fcc_lock::{LockSweeper, SeriesLock};
use fcc_store::{DocumentRecord, DocumentStore, PersistenceStore, StoreError};
use fcc_types::{
    validate_document, DocumentId, DocumentStatus, FiscalDocument, SeriesKey, SharedClock,
};

use crate::config::{ConfigError, PipelineConfig};
use crate::error::{PipelineError, PipelineResult};
use crate::outcome::{CancelOutcome, OutcomeError, SubmitMode, SubmitOutcome};
use crate::registration::registration_bytes;
use crate::signer::DocumentSigner;
use crate::transport::{AuthorityStatus, AuthorityTransport, DocumentMetadata, TransportError};

/// Where a failed attempt stopped.
struct Failure {
    stage: DocumentStatus,
    error: PipelineError,
}

impl Failure {
    fn new(stage: DocumentStatus, error: PipelineError) -> Self {
        Self { stage, error }
    }
}

/// Drives a document from submission to a committed chain link.
///
/// A submission is validated, then processed under the series lock: the
/// chain head is read, the document is linked and signed, the authority is
/// called, and only after the authority accepts is the head moved with a
/// conditional commit. Every stage failure maps to one [`PipelineError`] and
/// the series lock is released on every exit path, including cancellation of
/// the `submit` future.
pub struct InvoicePipeline {
    ledger: HashChainLedger,
    lock: SeriesLock,
    documents: Arc<dyn DocumentStore>,
    signer: Arc<dyn DocumentSigner>,
    transport: Arc<dyn AuthorityTransport>,
    config: PipelineConfig,
    clock: SharedClock,
}

impl InvoicePipeline {
    /// Build a pipeline whose chain, lock and document state share one store.
    pub fn new<S>(
        store: Arc<S>,
        signer: Arc<dyn DocumentSigner>,
        transport: Arc<dyn AuthorityTransport>,
        config: PipelineConfig,
        clock: SharedClock,
    ) -> Result<Self, ConfigError>
    where
        S: PersistenceStore + 'static,
    {
        let ledger = HashChainLedger::new(store.clone(), clock.clone());
        let lock = SeriesLock::new(store.clone(), clock.clone());
        Self::from_parts(ledger, lock, store, signer, transport, config, clock)
    }

    /// Build a pipeline from separately wired components.
    pub fn from_parts(
        ledger: HashChainLedger,
        lock: SeriesLock,
        documents: Arc<dyn DocumentStore>,
        signer: Arc<dyn DocumentSigner>,
        transport: Arc<dyn AuthorityTransport>,
        config: PipelineConfig,
        clock: SharedClock,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            ledger,
            lock,
            documents,
            signer,
            transport,
            config,
            clock,
        })
    }

    pub fn ledger(&self) -> &HashChainLedger {
        &self.ledger
    }

    pub fn series_lock(&self) -> &SeriesLock {
        &self.lock
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Submit one document.
    ///
    /// Any chain link the caller put on the document is discarded; the link
    /// is always computed from the series head observed under the lock.
    pub async fn submit(&self, document: FiscalDocument, mode: SubmitMode) -> SubmitOutcome {
        let mut record = DocumentRecord::queued(DocumentId::new(), document, self.clock.now());
        record.document.clear_link();
        debug!(id = %record.id, number = %record.document.number, stage = ?record.status, "document queued");

        match self.process(&mut record, mode).await {
            Ok(outcome) => outcome,
            Err(failure) => self.fail(record, failure),
        }
    }

    async fn process(
        &self,
        record: &mut DocumentRecord,
        mode: SubmitMode,
    ) -> Result<SubmitOutcome, Failure> {
        use DocumentStatus as S;

        validate_document(&record.document)
            .map_err(|e| Failure::new(S::Queued, PipelineError::ValidationFailed(e.to_string())))?;
        if let SubmitMode::SendSigned(artifact) = &mode {
            if artifact.is_empty() {
                return Err(Failure::new(
                    S::Queued,
                    PipelineError::ValidationFailed("pre-signed artifact is empty".into()),
                ));
            }
        }
        let key = record
            .document
            .series_key()
            .map_err(|e| Failure::new(S::Queued, PipelineError::ValidationFailed(e.to_string())))?;
        let total = record
            .document
            .total()
            .ok_or_else(|| Failure::new(S::Queued, total_overflow()))?;

        self.enter(record, S::Locking);
        let guard = self
            .lock
            .acquire(&key, &self.config.lease_policy())
            .await
            .map_err(|e| Failure::new(S::Locking, PipelineError::LockBusy(e.to_string())))?;

        if let Some(previous) = self
            .committed_attempt(&key, &record.document.number)
            .map_err(|e| Failure::new(S::Locking, store_busy(e)))?
        {
            if !same_content(&previous.document, &record.document) {
                return Err(Failure::new(
                    S::Locking,
                    PipelineError::ValidationFailed(format!(
                        "number {} already committed as {} with different content",
                        record.document.number, previous.id
                    )),
                ));
            }
            info!(
                key = %key,
                number = %record.document.number,
                id = %previous.id,
                status = %previous.status,
                "document already committed, replaying stored outcome"
            );
            return Ok(SubmitOutcome::from_record(&previous, true));
        }

        self.enter(record, S::Hashing);
        let head = self
            .ledger
            .get_head(&key)
            .map_err(|e| Failure::new(S::Hashing, PipelineError::LockBusy(e.to_string())))?;
        let link = self
            .ledger
            .candidate_link(&record.document, head.clone())
            .ok_or_else(|| Failure::new(S::Hashing, total_overflow()))?;
        record.document.assign_link(link.clone());
        debug!(key = %key, hash = %link.hash.short_hex(), genesis = link.is_genesis(), "document linked");

        self.enter(record, S::Signing);
        let artifact = match mode {
            SubmitMode::SendSigned(artifact) => artifact,
            SubmitMode::SignAndSend => {
                let payload = registration_bytes(&record.document)
                    .map_err(|e| Failure::new(S::Signing, PipelineError::Signing(e.to_string())))?;
                self.signer
                    .sign(&payload)
                    .await
                    .map_err(|e| Failure::new(S::Signing, PipelineError::Signing(e.to_string())))?
            }
        };

        self.enter(record, S::Transporting);
        let metadata = DocumentMetadata {
            document_id: record.id,
            key: key.clone(),
            number: record.document.number.clone(),
            issue_date: record.document.issue_date,
            total,
            hash: link.hash.clone(),
            prev_hash: link.prev_hash.clone(),
        };
        let timeout = self.config.transport_timeout();
        let receipt = match tokio::time::timeout(timeout, self.transport.submit(&artifact, &metadata)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(timeout)),
        }
        .map_err(|e| Failure::new(S::Transporting, transport_failure(e)))?;

        if receipt.status == AuthorityStatus::AcceptedWithErrors {
            warn!(
                key = %key,
                authority_id = %receipt.authority_id,
                warnings = ?receipt.warnings,
                "authority accepted document with errors"
            );
        }
        record.authority_id = Some(receipt.authority_id);
        record.validation_ref = receipt.validation_ref;

        self.enter(record, S::Committing);
        match guard.is_held() {
            Ok(true) => {}
            Ok(false) => {
                warn!(key = %key, lock_id = %guard.lock_id(), "series lease lost before commit")
            }
            Err(e) => warn!(
                key = %key,
                lock_id = %guard.lock_id(),
                error = %e,
                "could not confirm series lease before commit"
            ),
        }
        let state = self
            .ledger
            .commit_head(&key, head.as_ref(), &link.hash)
            .map_err(|e| Failure::new(S::Committing, PipelineError::ChainConflict(e.to_string())))?;

        record.status = S::Accepted;
        record.chain_position = Some(state.length);
        record.updated_at = self.clock.now();
        // Stored before the lock is released so a retry of the same number
        // finds it.
        self.documents.put_document(record).map_err(|e| {
            Failure::new(
                S::Committing,
                PipelineError::ChainConflict(format!("chain advanced but record not stored: {e}")),
            )
        })?;

        info!(
            key = %key,
            number = %record.document.number,
            id = %record.id,
            authority_id = record.authority_id.as_deref().unwrap_or_default(),
            position = state.length,
            "document accepted"
        );

        if let Err(e) = guard.release() {
            warn!(key = %key, error = %e, "failed to release series lock");
        }
        Ok(SubmitOutcome::from_record(record, false))
    }

    fn enter(&self, record: &mut DocumentRecord, stage: DocumentStatus) {
        debug!(id = %record.id, number = %record.document.number, stage = ?stage, "stage");
        record.status = stage;
    }

    fn fail(&self, mut record: DocumentRecord, failure: Failure) -> SubmitOutcome {
        let Failure { stage, error } = failure;
        let status = match error {
            PipelineError::TransportRejected { .. } => DocumentStatus::Rejected,
            _ => DocumentStatus::Error,
        };

        match &error {
            PipelineError::ChainConflict(_) => error!(
                id = %record.id,
                number = %record.document.number,
                authority_id = record.authority_id.as_deref().unwrap_or_default(),
                error = %error,
                "document not committed; manual reconciliation required"
            ),
            _ => warn!(
                id = %record.id,
                number = %record.document.number,
                stage = ?stage,
                code = %error.code(),
                error = %error,
                "document submission failed"
            ),
        }

        // Only a conflicting commit keeps its candidate link, for
        // reconciliation.
        if !matches!(error, PipelineError::ChainConflict(_)) {
            record.document.clear_link();
        }
        let outcome_error = OutcomeError::new(&error, stage);
        record.status = status;
        record.error = Some(outcome_error.to_info());
        record.updated_at = self.clock.now();
        if let Err(e) = self.documents.put_document(&record) {
            error!(id = %record.id, error = %e, "failed to store document record");
        }

        SubmitOutcome {
            error: Some(outcome_error),
            ..SubmitOutcome::from_record(&record, false)
        }
    }

    /// The latest committed attempt for a document number.
    fn committed_attempt(
        &self,
        key: &SeriesKey,
        number: &str,
    ) -> Result<Option<DocumentRecord>, StoreError> {
        Ok(self
            .documents
            .find_by_number(key, number)?
            .into_iter()
            .rev()
            .find(|r| r.status.is_committed()))
    }

    /// Cancel an accepted document at the authority.
    ///
    /// `id` is tried as a document id first and then as an authority id. The
    /// chain is never touched.
    pub async fn cancel(&self, id: &str, reason: &str) -> CancelOutcome {
        let record = match self.resolve(id) {
            Ok(Some(record)) => record,
            Ok(None) => {
                let error = PipelineError::ValidationFailed(format!("no document with id {id}"));
                return CancelOutcome {
                    id: id.to_string(),
                    status: DocumentStatus::Error,
                    error: Some(OutcomeError::new(&error, DocumentStatus::Queued)),
                };
            }
            Err(e) => {
                return CancelOutcome {
                    id: id.to_string(),
                    status: DocumentStatus::Error,
                    error: Some(OutcomeError::new(&store_busy(e), DocumentStatus::Queued)),
                };
            }
        };

        let document_id = record.id;
        match self.cancel_record(record, reason).await {
            Ok(record) => CancelOutcome {
                id: document_id.to_string(),
                status: record.status,
                error: None,
            },
            Err((status, failure)) => {
                warn!(
                    id = %document_id,
                    code = %failure.error.code(),
                    error = %failure.error,
                    "cancellation failed"
                );
                CancelOutcome {
                    id: document_id.to_string(),
                    status,
                    error: Some(OutcomeError::new(&failure.error, failure.stage)),
                }
            }
        }
    }

    async fn cancel_record(
        &self,
        record: DocumentRecord,
        reason: &str,
    ) -> Result<DocumentRecord, (DocumentStatus, Failure)> {
        let status = record.status;
        let invalid = |message: String| {
            (
                status,
                Failure::new(status, PipelineError::ValidationFailed(message)),
            )
        };

        if reason.trim().is_empty() {
            return Err(invalid("a cancellation reason is required".into()));
        }
        let key = record
            .document
            .series_key()
            .map_err(|e| invalid(e.to_string()))?;

        let guard = self
            .lock
            .acquire(&key, &self.config.lease_policy())
            .await
            .map_err(|e| (status, Failure::new(status, PipelineError::LockBusy(e.to_string()))))?;

        // Re-read under the lock; a concurrent cancel may have finished first.
        let mut record = self
            .documents
            .get_document(&record.id)
            .map_err(|e| (status, Failure::new(status, store_busy(e))))?
            .unwrap_or(record);
        let status = record.status;
        if status != DocumentStatus::Accepted {
            return Err((
                status,
                Failure::new(
                    status,
                    PipelineError::ValidationFailed(format!(
                        "document is {status}; only ACCEPTED documents can be cancelled"
                    )),
                ),
            ));
        }
        let Some(authority_id) = record.authority_id.clone() else {
            return Err((
                status,
                Failure::new(
                    status,
                    PipelineError::ValidationFailed("document has no authority id".into()),
                ),
            ));
        };

        let timeout = self.config.transport_timeout();
        match tokio::time::timeout(timeout, self.transport.cancel(&authority_id, reason)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(timeout)),
        }
        .map_err(|e| (status, Failure::new(DocumentStatus::Transporting, transport_failure(e))))?;

        record.status = DocumentStatus::Cancelled;
        record.cancellation_reason = Some(reason.to_string());
        record.updated_at = self.clock.now();
        self.documents.put_document(&record).map_err(|e| {
            (
                status,
                Failure::new(
                    DocumentStatus::Committing,
                    PipelineError::ChainConflict(format!(
                        "cancelled at authority but record not stored: {e}"
                    )),
                ),
            )
        })?;
        drop(guard);

        info!(id = %record.id, authority_id = %authority_id, reason, "document cancelled");
        Ok(record)
    }

    fn resolve(&self, id: &str) -> Result<Option<DocumentRecord>, StoreError> {
        if let Ok(document_id) = DocumentId::parse(id) {
            if let Some(record) = self.documents.get_document(&document_id)? {
                return Ok(Some(record));
            }
        }
        self.documents.find_by_authority_id(id)
    }

    /// Read back a stored document record.
    pub fn get(&self, id: &DocumentId) -> PipelineResult<Option<DocumentRecord>> {
        self.documents.get_document(id).map_err(store_busy)
    }

    /// Audit the committed documents of a series in chain order.
    pub fn audit_series(&self, key: &SeriesKey) -> PipelineResult<SeriesAudit> {
        let documents: Vec<FiscalDocument> = self
            .documents
            .list_committed(key)
            .map_err(store_busy)?
            .into_iter()
            .map(|r| r.document)
            .collect();
        Ok(self.ledger.audit_series(key, &documents))
    }

    /// Start the expired-lock sweeper on the current runtime.
    pub fn spawn_sweeper(&self) -> LockSweeper {
        LockSweeper::spawn(self.lock.clone(), self.config.sweep_interval())
    }
}

impl std::fmt::Debug for InvoicePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvoicePipeline")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn store_busy(e: StoreError) -> PipelineError {
    PipelineError::LockBusy(format!("store unavailable: {e}"))
}

fn total_overflow() -> PipelineError {
    PipelineError::ValidationFailed("document total overflows".into())
}

/// Whether a resubmission carries the same document as a committed one,
/// ignoring chain links.
fn same_content(committed: &FiscalDocument, incoming: &FiscalDocument) -> bool {
    let mut committed = committed.clone();
    committed.clear_link();
    let mut incoming = incoming.clone();
    incoming.clear_link();
    committed == incoming
}

fn transport_failure(e: TransportError) -> PipelineError {
    match e {
        TransportError::Rejected { code, message } => {
            PipelineError::TransportRejected { code, message }
        }
        other => PipelineError::TransportNetwork(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{DateTime, NaiveDate, Utc};
    use fcc_store::{ChainStore, InMemoryStore, LockStore, SeriesLockRecord, StoreResult};
    use fcc_types::{ChainHash, LockId, ManualClock, SignedArtifact, TaxLine};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use tokio::sync::{mpsc, Semaphore};

    use crate::error::ErrorCode;
    use crate::signer::{DeterministicSigner, SigningError};
    use crate::transport::{CancellationReceipt, SimulatedAuthority, SubmissionReceipt};

    const HASH_1: &str = "E05D5B28875CFFF97E65671F9201E4DA9A1459354476BC380A79024C26E08F95";
    const HASH_2: &str = "7C0A0B7171536B6F651AAD4E68E3518BCE1E07CDFC39D6768816A0A17B1826B4";

    struct Harness {
        pipeline: Arc<InvoicePipeline>,
        store: Arc<InMemoryStore>,
        authority: Arc<SimulatedAuthority>,
    }

    fn fast_config() -> PipelineConfig {
        PipelineConfig {
            acquire_timeout_ms: 200,
            acquire_retry_ms: 5,
            ..Default::default()
        }
    }

    fn clock() -> SharedClock {
        Arc::new(ManualClock::starting_now())
    }

    fn harness_with(signer: Arc<dyn DocumentSigner>, config: PipelineConfig) -> Harness {
        let clock = clock();
        let store = Arc::new(InMemoryStore::new());
        let authority = Arc::new(SimulatedAuthority::new(clock.clone()));
        let pipeline =
            InvoicePipeline::new(store.clone(), signer, authority.clone(), config, clock).unwrap();
        Harness {
            pipeline: Arc::new(pipeline),
            store,
            authority,
        }
    }

    fn harness() -> Harness {
        harness_with(Arc::new(DeterministicSigner), fast_config())
    }

    fn key() -> SeriesKey {
        SeriesKey::new("B00000000", "A").unwrap()
    }

    fn doc(number: &str, day: u32, base: Decimal) -> FiscalDocument {
        FiscalDocument::new(
            "B00000000",
            "A",
            number,
            NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            vec![TaxLine::new(base, dec!(21.00), base * dec!(0.21))],
        )
    }

    fn chain_length(store: &InMemoryStore) -> u64 {
        store.head(&key()).unwrap().map_or(0, |s| s.length)
    }

    /// Holds every submission until a permit is added to the gate.
    struct GatedTransport {
        inner: SimulatedAuthority,
        gate: Semaphore,
        entered: mpsc::UnboundedSender<()>,
    }

    impl GatedTransport {
        fn new(clock: SharedClock) -> (Arc<Self>, mpsc::UnboundedReceiver<()>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let transport = Self {
                inner: SimulatedAuthority::new(clock),
                gate: Semaphore::new(0),
                entered: tx,
            };
            (Arc::new(transport), rx)
        }

        fn open(&self, permits: usize) {
            self.gate.add_permits(permits);
        }
    }

    #[async_trait]
    impl AuthorityTransport for GatedTransport {
        async fn submit(
            &self,
            artifact: &SignedArtifact,
            metadata: &DocumentMetadata,
        ) -> Result<SubmissionReceipt, TransportError> {
            let _ = self.entered.send(());
            self.gate
                .acquire()
                .await
                .map_err(|e| TransportError::Network(e.to_string()))?
                .forget();
            self.inner.submit(artifact, metadata).await
        }

        async fn cancel(
            &self,
            authority_id: &str,
            reason: &str,
        ) -> Result<CancellationReceipt, TransportError> {
            self.inner.cancel(authority_id, reason).await
        }
    }

    struct OfflineSigner;

    #[async_trait]
    impl DocumentSigner for OfflineSigner {
        async fn sign(&self, _payload: &[u8]) -> Result<SignedArtifact, SigningError> {
            Err(SigningError::Unavailable("certificate store offline".into()))
        }
    }

    /// Grants and releases leases but cannot read them back.
    struct UnreadableLockStore(Arc<InMemoryStore>);

    impl LockStore for UnreadableLockStore {
        fn insert_if_free(&self, record: SeriesLockRecord, now: DateTime<Utc>) -> StoreResult<bool> {
            self.0.insert_if_free(record, now)
        }

        fn lock_record(&self, _key: &SeriesKey) -> StoreResult<Option<SeriesLockRecord>> {
            Err(StoreError::Backend("lock table unreadable".into()))
        }

        fn release_lock(&self, key: &SeriesKey, lock_id: Option<&LockId>) -> StoreResult<bool> {
            self.0.release_lock(key, lock_id)
        }

        fn reclaim_if_expired(&self, key: &SeriesKey, now: DateTime<Utc>) -> StoreResult<bool> {
            self.0.reclaim_if_expired(key, now)
        }

        fn reclaim_expired(&self, now: DateTime<Utc>) -> StoreResult<usize> {
            self.0.reclaim_expired(now)
        }
    }

    // ---- Test 1: Chain linkage ----

    #[tokio::test]
    async fn sequential_submissions_form_a_chain() {
        let h = harness();
        let mut outcomes = Vec::new();
        for n in 1..=5u32 {
            let outcome = h
                .pipeline
                .submit(doc(&n.to_string(), n, dec!(100)), SubmitMode::SignAndSend)
                .await;
            assert!(outcome.is_accepted(), "{outcome:?}");
            outcomes.push(outcome);
        }

        assert_eq!(outcomes[0].prev_hash(), None);
        for pair in outcomes.windows(2) {
            assert_eq!(pair[1].prev_hash(), pair[0].hash());
        }
        let positions: Vec<u64> = outcomes.iter().filter_map(|o| o.chain_position).collect();
        assert_eq!(positions, vec![1, 2, 3, 4, 5]);
        assert_eq!(chain_length(&h.store), 5);
        assert_eq!(
            h.pipeline.ledger().get_head(&key()).unwrap().as_ref(),
            outcomes[4].hash()
        );
        assert!(h.pipeline.audit_series(&key()).unwrap().is_valid());
    }

    #[tokio::test]
    async fn submitted_link_is_recomputed() {
        let h = harness();
        let mut forged = doc("1", 15, dec!(100));
        forged.prev_hash = Some(ChainHash::from_digest([9; 32]));
        forged.hash = Some(ChainHash::from_digest([8; 32]));

        let outcome = h.pipeline.submit(forged, SubmitMode::SignAndSend).await;
        assert_eq!(outcome.prev_hash(), None);
        assert_eq!(outcome.hash().unwrap().as_str(), HASH_1);
    }

    // ---- Test 2: Reference scenario B00000000/A ----

    #[tokio::test]
    async fn reference_scenario_with_concurrent_third_document() {
        let clock = clock();
        let store = Arc::new(InMemoryStore::new());
        let (transport, mut entered) = GatedTransport::new(clock.clone());
        let config = PipelineConfig {
            acquire_timeout_ms: 50,
            acquire_retry_ms: 5,
            ..Default::default()
        };
        let pipeline = Arc::new(
            InvoicePipeline::new(
                store.clone(),
                Arc::new(DeterministicSigner),
                transport.clone(),
                config,
                clock,
            )
            .unwrap(),
        );

        transport.open(1);
        let first = pipeline.submit(doc("1", 15, dec!(100)), SubmitMode::SignAndSend).await;
        assert!(first.is_accepted());
        assert_eq!(first.hash().unwrap().as_str(), HASH_1);
        let json = serde_json::to_value(&first).unwrap();
        assert_eq!(json["prev_hash"], "");

        transport.open(1);
        let second = pipeline.submit(doc("2", 16, dec!(200)), SubmitMode::SignAndSend).await;
        assert!(second.is_accepted());
        assert_eq!(second.prev_hash().unwrap().as_str(), HASH_1);
        assert_eq!(second.hash().unwrap().as_str(), HASH_2);
        entered.recv().await.unwrap();
        entered.recv().await.unwrap();

        // Third document: one submission holds the series at the authority
        // while a competing one waits out its acquire window.
        let holder = {
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move {
                pipeline
                    .submit(doc("3", 17, dec!(50)), SubmitMode::SignAndSend)
                    .await
            })
        };
        entered.recv().await.unwrap();

        let loser = pipeline
            .submit(doc("3", 17, dec!(50)), SubmitMode::SignAndSend)
            .await;
        assert_eq!(loser.status, DocumentStatus::Error);
        assert_eq!(loser.error_code(), Some(ErrorCode::LockBusy));
        assert_eq!(loser.error.as_ref().unwrap().stage, DocumentStatus::Locking);
        assert!(loser.error.as_ref().unwrap().retryable);

        transport.open(1);
        let winner = holder.await.unwrap();
        assert!(winner.is_accepted());
        assert_eq!(winner.prev_hash().unwrap().as_str(), HASH_2);

        assert_eq!(chain_length(&store), 3);
        let audit = pipeline.audit_series(&key()).unwrap();
        assert!(audit.is_valid());
        assert_eq!(audit.document_count, 3);
        assert!(!pipeline.series_lock().is_locked(&key()).unwrap());
    }

    #[tokio::test]
    async fn unreadable_lease_does_not_block_commit() {
        let clock = clock();
        let store = Arc::new(InMemoryStore::new());
        let locks = Arc::new(InMemoryStore::new());
        let authority = Arc::new(SimulatedAuthority::new(clock.clone()));
        let pipeline = InvoicePipeline::from_parts(
            HashChainLedger::new(store.clone(), clock.clone()),
            SeriesLock::new(Arc::new(UnreadableLockStore(locks.clone())), clock.clone()),
            store.clone(),
            Arc::new(DeterministicSigner),
            authority,
            fast_config(),
            clock,
        )
        .unwrap();

        let outcome = pipeline
            .submit(doc("1", 15, dec!(100)), SubmitMode::SignAndSend)
            .await;
        assert!(outcome.is_accepted(), "{outcome:?}");
        assert_eq!(chain_length(&store), 1);
        assert!(!locks.lock_record(&key()).unwrap().unwrap().active);
    }

    // ---- Test 3: Compare-and-swap behind an ineffective lock ----

    #[tokio::test]
    async fn split_lock_stores_surface_chain_conflict() {
        let clock = clock();
        let shared = Arc::new(InMemoryStore::new());
        let (transport, mut entered) = GatedTransport::new(clock.clone());

        let build = |lock_store: Arc<InMemoryStore>| {
            let lock = SeriesLock::new(lock_store, clock.clone());
            let ledger = HashChainLedger::new(shared.clone(), clock.clone());
            Arc::new(
                InvoicePipeline::from_parts(
                    ledger,
                    lock,
                    shared.clone(),
                    Arc::new(DeterministicSigner),
                    transport.clone(),
                    fast_config(),
                    clock.clone(),
                )
                .unwrap(),
            )
        };
        let a = build(Arc::new(InMemoryStore::new()));
        let b = build(Arc::new(InMemoryStore::new()));

        let run = |pipeline: Arc<InvoicePipeline>, number: &'static str| {
            tokio::spawn(async move {
                pipeline
                    .submit(doc(number, 15, dec!(100)), SubmitMode::SignAndSend)
                    .await
            })
        };
        let task_a = run(a.clone(), "1");
        let task_b = run(b.clone(), "2");

        // Both observed the empty chain before either commits.
        entered.recv().await.unwrap();
        entered.recv().await.unwrap();
        transport.open(2);

        let outcomes = [task_a.await.unwrap(), task_b.await.unwrap()];
        let accepted = outcomes.iter().filter(|o| o.is_accepted()).count();
        assert_eq!(accepted, 1);

        let conflicted = outcomes.iter().find(|o| !o.is_accepted()).unwrap();
        assert_eq!(conflicted.status, DocumentStatus::Error);
        assert_eq!(conflicted.error_code(), Some(ErrorCode::ChainConflict));
        assert_eq!(conflicted.error.as_ref().unwrap().stage, DocumentStatus::Committing);
        assert!(!conflicted.error.as_ref().unwrap().retryable);
        assert!(conflicted.authority_id.is_some());

        assert_eq!(chain_length(&shared), 1);
        assert!(!a.series_lock().is_locked(&key()).unwrap());
        assert!(!b.series_lock().is_locked(&key()).unwrap());
    }

    // ---- Test 4: Failure paths ----

    #[tokio::test]
    async fn network_failure_leaves_chain_unchanged() {
        let h = harness();
        h.authority
            .fail_next(TransportError::Network("connection reset".into()));

        let outcome = h
            .pipeline
            .submit(doc("1", 15, dec!(100)), SubmitMode::SignAndSend)
            .await;
        assert_eq!(outcome.status, DocumentStatus::Error);
        assert_eq!(outcome.error_code(), Some(ErrorCode::TransportNetwork));
        assert_eq!(outcome.error.as_ref().unwrap().stage, DocumentStatus::Transporting);
        assert!(outcome.link.is_none());
        assert_eq!(h.store.head(&key()).unwrap(), None);
        assert!(!h.pipeline.series_lock().is_locked(&key()).unwrap());

        let stored = h.pipeline.get(&outcome.id).unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::Error);
        assert_eq!(stored.error.unwrap().code, "TRANSPORT_NETWORK");
    }

    #[tokio::test]
    async fn authority_rejection_marks_rejected() {
        let h = harness();
        h.authority.fail_next(TransportError::Rejected {
            code: "4102".into(),
            message: "unknown taxpayer".into(),
        });

        let outcome = h
            .pipeline
            .submit(doc("1", 15, dec!(100)), SubmitMode::SignAndSend)
            .await;
        assert_eq!(outcome.status, DocumentStatus::Rejected);
        assert_eq!(outcome.error_code(), Some(ErrorCode::TransportRejected));
        assert!(!outcome.error.as_ref().unwrap().retryable);
        assert_eq!(h.store.head(&key()).unwrap(), None);
    }

    #[tokio::test]
    async fn transport_timeout_is_a_network_error() {
        let clock = clock();
        let store = Arc::new(InMemoryStore::new());
        let authority = Arc::new(
            SimulatedAuthority::new(clock.clone()).with_latency(Duration::from_millis(1_500)),
        );
        let config = PipelineConfig {
            transport_timeout_secs: 1,
            ..fast_config()
        };
        let pipeline = InvoicePipeline::new(
            store.clone(),
            Arc::new(DeterministicSigner),
            authority,
            config,
            clock,
        )
        .unwrap();

        let outcome = pipeline
            .submit(doc("1", 15, dec!(100)), SubmitMode::SignAndSend)
            .await;
        assert_eq!(outcome.error_code(), Some(ErrorCode::TransportNetwork));
        assert_eq!(outcome.status, DocumentStatus::Error);
        assert_eq!(store.head(&key()).unwrap(), None);
    }

    #[tokio::test]
    async fn signing_failure_never_reaches_authority() {
        let h = harness_with(Arc::new(OfflineSigner), fast_config());
        let outcome = h
            .pipeline
            .submit(doc("1", 15, dec!(100)), SubmitMode::SignAndSend)
            .await;

        assert_eq!(outcome.error_code(), Some(ErrorCode::SigningError));
        assert_eq!(outcome.error.as_ref().unwrap().stage, DocumentStatus::Signing);
        assert!(outcome.error.as_ref().unwrap().retryable);
        assert_eq!(h.authority.submission_count(), 0);
        assert_eq!(h.store.head(&key()).unwrap(), None);
        assert!(!h.pipeline.series_lock().is_locked(&key()).unwrap());
    }

    #[tokio::test]
    async fn invalid_tax_amount_takes_no_lock() {
        let h = harness();
        let mut bad = doc("1", 15, dec!(100.00));
        bad.tax_lines[0].tax_amount = dec!(21.50);

        let outcome = h.pipeline.submit(bad, SubmitMode::SignAndSend).await;
        assert_eq!(outcome.error_code(), Some(ErrorCode::ValidationFailed));
        assert_eq!(outcome.error.as_ref().unwrap().stage, DocumentStatus::Queued);
        assert!(h.store.lock_record(&key()).unwrap().is_none());
        assert_eq!(h.authority.submission_count(), 0);
    }

    #[tokio::test]
    async fn overflowing_amounts_fail_validation() {
        let h = harness();
        let huge = FiscalDocument::new(
            "B00000000",
            "A",
            "1",
            NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            vec![TaxLine::new(Decimal::MAX, dec!(21), dec!(0))],
        );

        let pipeline = Arc::clone(&h.pipeline);
        let outcome = tokio::spawn(async move {
            pipeline.submit(huge, SubmitMode::SignAndSend).await
        })
        .await
        .unwrap();

        assert_eq!(outcome.status, DocumentStatus::Error);
        assert_eq!(outcome.error_code(), Some(ErrorCode::ValidationFailed));
        assert!(outcome.error.as_ref().unwrap().message.contains("overflow"));
        assert!(h.store.lock_record(&key()).unwrap().is_none());
        assert_eq!(h.authority.submission_count(), 0);
        assert_eq!(chain_length(&h.store), 0);
    }

    #[tokio::test]
    async fn issue_year_beyond_four_digits_is_invalid() {
        let h = harness();
        let mut far = doc("1", 15, dec!(100));
        far.issue_date = NaiveDate::from_ymd_opt(10000, 1, 15).unwrap();

        let outcome = h.pipeline.submit(far, SubmitMode::SignAndSend).await;
        assert_eq!(outcome.error_code(), Some(ErrorCode::ValidationFailed));
        assert_eq!(h.authority.submission_count(), 0);
    }

    #[tokio::test]
    async fn empty_pre_signed_artifact_is_invalid() {
        let h = harness();
        let outcome = h
            .pipeline
            .submit(
                doc("1", 15, dec!(100)),
                SubmitMode::SendSigned(SignedArtifact::pre_signed(Vec::new())),
            )
            .await;
        assert_eq!(outcome.error_code(), Some(ErrorCode::ValidationFailed));
        assert!(h.store.lock_record(&key()).unwrap().is_none());
    }

    #[tokio::test]
    async fn pre_signed_artifact_is_forwarded() {
        let h = harness_with(Arc::new(OfflineSigner), fast_config());
        let outcome = h
            .pipeline
            .submit(
                doc("1", 15, dec!(100)),
                SubmitMode::SendSigned(SignedArtifact::pre_signed(b"<signed/>".to_vec())),
            )
            .await;
        assert!(outcome.is_accepted(), "{outcome:?}");
        assert_eq!(h.authority.submission_count(), 1);
    }

    // ---- Test 5: Retries ----

    #[tokio::test]
    async fn resubmitting_accepted_number_replays() {
        let h = harness();
        let first = h
            .pipeline
            .submit(doc("1", 15, dec!(100)), SubmitMode::SignAndSend)
            .await;
        let again = h
            .pipeline
            .submit(doc("1", 15, dec!(100)), SubmitMode::SignAndSend)
            .await;

        assert!(again.replayed);
        assert_eq!(again.id, first.id);
        assert_eq!(again.authority_id, first.authority_id);
        assert_eq!(again.hash(), first.hash());
        assert_eq!(h.authority.submission_count(), 1);
        assert_eq!(chain_length(&h.store), 1);
    }

    #[tokio::test]
    async fn reused_number_with_different_content_is_refused() {
        let h = harness();
        let first = h
            .pipeline
            .submit(doc("1", 15, dec!(100)), SubmitMode::SignAndSend)
            .await;
        assert!(first.is_accepted());

        let mut other_date = doc("1", 15, dec!(100));
        other_date.issue_date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let other_total = doc("1", 15, dec!(5000));

        for conflicting in [other_date, other_total] {
            let outcome = h.pipeline.submit(conflicting, SubmitMode::SignAndSend).await;
            assert!(!outcome.replayed);
            assert_eq!(outcome.status, DocumentStatus::Error);
            assert_eq!(outcome.error_code(), Some(ErrorCode::ValidationFailed));
            assert_eq!(outcome.error.as_ref().unwrap().stage, DocumentStatus::Locking);
            assert!(outcome.error.as_ref().unwrap().message.contains("different content"));
            assert_ne!(outcome.id, first.id);
            assert_eq!(outcome.hash(), None);
        }

        assert_eq!(h.authority.submission_count(), 1);
        assert_eq!(chain_length(&h.store), 1);
        assert!(!h.pipeline.series_lock().is_locked(&key()).unwrap());

        // The original document still replays.
        let again = h
            .pipeline
            .submit(doc("1", 15, dec!(100)), SubmitMode::SignAndSend)
            .await;
        assert!(again.replayed);
        assert_eq!(again.id, first.id);
    }

    #[tokio::test]
    async fn retry_after_network_failure_appends_once() {
        let h = harness();
        h.authority.fail_next(TransportError::Network("reset".into()));

        let failed = h
            .pipeline
            .submit(doc("1", 15, dec!(100)), SubmitMode::SignAndSend)
            .await;
        assert!(failed.error.as_ref().unwrap().retryable);

        let retried = h
            .pipeline
            .submit(doc("1", 15, dec!(100)), SubmitMode::SignAndSend)
            .await;
        assert!(retried.is_accepted());
        assert!(!retried.replayed);
        assert_ne!(retried.id, failed.id);
        assert_eq!(retried.hash().unwrap().as_str(), HASH_1);
        assert_eq!(chain_length(&h.store), 1);
    }

    // ---- Test 6: Cancellation ----

    #[tokio::test]
    async fn cancel_by_document_id() {
        let h = harness();
        let accepted = h
            .pipeline
            .submit(doc("1", 15, dec!(100)), SubmitMode::SignAndSend)
            .await;
        let head_before = h.store.head(&key()).unwrap();

        let outcome = h.pipeline.cancel(&accepted.id.to_string(), "duplicate issue").await;
        assert!(outcome.is_cancelled(), "{outcome:?}");
        assert_eq!(outcome.id, accepted.id.to_string());

        let stored = h.pipeline.get(&accepted.id).unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::Cancelled);
        assert_eq!(stored.cancellation_reason.as_deref(), Some("duplicate issue"));
        assert_eq!(h.store.head(&key()).unwrap(), head_before);
        assert!(h
            .authority
            .is_cancelled(accepted.authority_id.as_deref().unwrap()));

        // Cancelled documents still replay and cannot be cancelled twice.
        let replay = h
            .pipeline
            .submit(doc("1", 15, dec!(100)), SubmitMode::SignAndSend)
            .await;
        assert!(replay.replayed);
        assert_eq!(replay.status, DocumentStatus::Cancelled);

        let twice = h.pipeline.cancel(&accepted.id.to_string(), "again").await;
        assert_eq!(twice.error_code(), Some(ErrorCode::ValidationFailed));
        assert_eq!(twice.status, DocumentStatus::Cancelled);
    }

    #[tokio::test]
    async fn cancel_by_authority_id() {
        let h = harness();
        let accepted = h
            .pipeline
            .submit(doc("1", 15, dec!(100)), SubmitMode::SignAndSend)
            .await;
        let authority_id = accepted.authority_id.clone().unwrap();

        let outcome = h.pipeline.cancel(&authority_id, "wrong customer").await;
        assert!(outcome.is_cancelled());
        assert_eq!(outcome.id, accepted.id.to_string());
    }

    #[tokio::test]
    async fn cancel_rejects_unknown_and_unaccepted() {
        let h = harness();
        let unknown = h.pipeline.cancel("AEAT-nothing", "x").await;
        assert_eq!(unknown.error_code(), Some(ErrorCode::ValidationFailed));
        assert_eq!(unknown.status, DocumentStatus::Error);

        h.authority.fail_next(TransportError::Network("reset".into()));
        let failed = h
            .pipeline
            .submit(doc("1", 15, dec!(100)), SubmitMode::SignAndSend)
            .await;
        let outcome = h.pipeline.cancel(&failed.id.to_string(), "x").await;
        assert_eq!(outcome.error_code(), Some(ErrorCode::ValidationFailed));

        let accepted = h
            .pipeline
            .submit(doc("2", 16, dec!(100)), SubmitMode::SignAndSend)
            .await;
        let blank = h.pipeline.cancel(&accepted.id.to_string(), "  ").await;
        assert_eq!(blank.error_code(), Some(ErrorCode::ValidationFailed));
        assert_eq!(blank.status, DocumentStatus::Accepted);
    }

    #[tokio::test]
    async fn cancel_transport_failure_keeps_document_accepted() {
        let h = harness();
        let accepted = h
            .pipeline
            .submit(doc("1", 15, dec!(100)), SubmitMode::SignAndSend)
            .await;
        h.authority.fail_next(TransportError::Network("reset".into()));

        let outcome = h.pipeline.cancel(&accepted.id.to_string(), "duplicate").await;
        assert_eq!(outcome.error_code(), Some(ErrorCode::TransportNetwork));
        assert_eq!(outcome.status, DocumentStatus::Accepted);
        let stored = h.pipeline.get(&accepted.id).unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::Accepted);
    }

    // ---- Test 7: Cancellation of the submit future ----

    #[tokio::test]
    async fn dropped_submission_releases_lock() {
        let clock = clock();
        let store = Arc::new(InMemoryStore::new());
        let (transport, mut entered) = GatedTransport::new(clock.clone());
        let pipeline = Arc::new(
            InvoicePipeline::new(
                store.clone(),
                Arc::new(DeterministicSigner),
                transport.clone(),
                fast_config(),
                clock,
            )
            .unwrap(),
        );

        let task = {
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move {
                pipeline
                    .submit(doc("1", 15, dec!(100)), SubmitMode::SignAndSend)
                    .await
            })
        };
        entered.recv().await.unwrap();
        assert!(pipeline.series_lock().is_locked(&key()).unwrap());

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        assert!(!pipeline.series_lock().is_locked(&key()).unwrap());
        assert_eq!(store.head(&key()).unwrap(), None);

        transport.open(1);
        let outcome = pipeline
            .submit(doc("1", 15, dec!(100)), SubmitMode::SignAndSend)
            .await;
        assert!(outcome.is_accepted());
    }

    // ---- Test 8: Wiring ----

    #[test]
    fn invalid_config_is_refused() {
        let clock = clock();
        let config = PipelineConfig {
            lease_secs: 30,
            transport_timeout_secs: 60,
            ..Default::default()
        };
        let result = InvoicePipeline::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(DeterministicSigner),
            Arc::new(SimulatedAuthority::new(clock.clone())),
            config,
            clock,
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[tokio::test]
    async fn sweeper_runs_until_shutdown() {
        let h = harness();
        let sweeper = h.pipeline.spawn_sweeper();
        assert!(!sweeper.is_finished());
        sweeper.shutdown().await;
    }
}

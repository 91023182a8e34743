//! Authority transport capability.
//!
//! An [`AuthorityTransport`] delivers signed artifacts to the regulatory
//! authority and relays its verdict. The wire protocol lives entirely behind
//! this trait. [`SimulatedAuthority`] is an in-process stand-in that issues
//! sequential authority ids and can be scripted to fail.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use fcc_types::{ChainHash, DocumentId, SeriesKey, SharedClock, SignedArtifact};

/// What the transport knows about the document it carries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub document_id: DocumentId,
    pub key: SeriesKey,
    pub number: String,
    pub issue_date: NaiveDate,
    pub total: Decimal,
    pub hash: ChainHash,
    pub prev_hash: Option<ChainHash>,
}

/// Verdict of a successful registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthorityStatus {
    Accepted,
    /// Registered, but the authority flagged non-blocking defects.
    AcceptedWithErrors,
}

/// Authority response to a registration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    pub authority_id: String,
    pub status: AuthorityStatus,
    pub validation_ref: Option<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// Authority response to a cancellation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationReceipt {
    pub authority_id: String,
    pub cancelled_at: DateTime<Utc>,
}

/// Errors from an authority call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),

    #[error("authority did not answer within {0:?}")]
    Timeout(Duration),

    /// The authority answered and refused the request.
    #[error("rejected [{code}]: {message}")]
    Rejected { code: String, message: String },
}

impl TransportError {
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

/// Delivers signed artifacts to the authority.
#[async_trait]
pub trait AuthorityTransport: Send + Sync {
    async fn submit(
        &self,
        artifact: &SignedArtifact,
        metadata: &DocumentMetadata,
    ) -> Result<SubmissionReceipt, TransportError>;

    async fn cancel(
        &self,
        authority_id: &str,
        reason: &str,
    ) -> Result<CancellationReceipt, TransportError>;
}

/// Deterministic in-process authority.
///
/// Authority ids have the form `AEAT-<yyyyMMddHHmmss>-<NNNN>` where the
/// suffix is a per-instance sequence. Queued failures from
/// [`fail_next`](Self::fail_next) are returned by the next submit or cancel
/// calls, one per call, before any registration happens.
pub struct SimulatedAuthority {
    clock: SharedClock,
    latency: Duration,
    sequence: AtomicU64,
    submissions: AtomicU64,
    script: Mutex<VecDeque<TransportError>>,
    registered: Mutex<HashMap<String, bool>>,
}

impl SimulatedAuthority {
    pub const VALIDATION_BASE: &'static str =
        "https://sede.agenciatributaria.gob.es/ValidarQR?id=";

    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            latency: Duration::ZERO,
            sequence: AtomicU64::new(0),
            submissions: AtomicU64::new(0),
            script: Mutex::new(VecDeque::new()),
            registered: Mutex::new(HashMap::new()),
        }
    }

    /// Delay every call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make the next call fail with `error`.
    pub fn fail_next(&self, error: TransportError) {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(error);
    }

    /// Number of submit calls received, failed ones included.
    pub fn submission_count(&self) -> u64 {
        self.submissions.load(Ordering::SeqCst)
    }

    /// Returns `true` if `authority_id` was registered and then cancelled.
    pub fn is_cancelled(&self, authority_id: &str) -> bool {
        self.registered
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(authority_id)
            .copied()
            .unwrap_or(false)
    }

    async fn delay_and_script(&self) -> Result<(), TransportError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        match self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
        {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl AuthorityTransport for SimulatedAuthority {
    async fn submit(
        &self,
        artifact: &SignedArtifact,
        metadata: &DocumentMetadata,
    ) -> Result<SubmissionReceipt, TransportError> {
        self.submissions.fetch_add(1, Ordering::SeqCst);
        self.delay_and_script().await?;

        if artifact.is_empty() {
            return Err(TransportError::Rejected {
                code: "EMPTY_ARTIFACT".into(),
                message: "no signed content".into(),
            });
        }

        let seq = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let authority_id = format!(
            "AEAT-{}-{:04}",
            self.clock.now().format("%Y%m%d%H%M%S"),
            seq
        );
        self.registered
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(authority_id.clone(), false);

        debug!(
            key = %metadata.key,
            number = %metadata.number,
            authority_id = %authority_id,
            "simulated registration"
        );
        Ok(SubmissionReceipt {
            validation_ref: Some(format!("{}{}", Self::VALIDATION_BASE, authority_id)),
            authority_id,
            status: AuthorityStatus::Accepted,
            warnings: Vec::new(),
        })
    }

    async fn cancel(
        &self,
        authority_id: &str,
        reason: &str,
    ) -> Result<CancellationReceipt, TransportError> {
        self.delay_and_script().await?;

        let mut registered = self.registered.lock().unwrap_or_else(|e| e.into_inner());
        match registered.get_mut(authority_id) {
            None => Err(TransportError::Rejected {
                code: "NOT_FOUND".into(),
                message: format!("unknown record {authority_id}"),
            }),
            Some(true) => Err(TransportError::Rejected {
                code: "ALREADY_CANCELLED".into(),
                message: format!("record {authority_id} is already cancelled"),
            }),
            Some(cancelled) => {
                *cancelled = true;
                debug!(authority_id, reason, "simulated cancellation");
                Ok(CancellationReceipt {
                    authority_id: authority_id.to_string(),
                    cancelled_at: self.clock.now(),
                })
            }
        }
    }
}

impl std::fmt::Debug for SimulatedAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedAuthority")
            .field("latency", &self.latency)
            .field("submissions", &self.submission_count())
            .finish_non_exhaustive()
    }
}

use serde::Serialize;

use fcc_store::{DocumentRecord, ErrorInfo};
use fcc_types::{ChainHash, ChainLink, DocumentId, DocumentStatus, SignedArtifact};

use crate::error::{ErrorCode, PipelineError};

/// How the artifact sent to the authority is obtained.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubmitMode {
    /// Build the registration payload and sign it with the configured signer.
    SignAndSend,
    /// Forward an artifact the caller already signed.
    SendSigned(SignedArtifact),
}

/// Failure detail attached to an outcome.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OutcomeError {
    pub code: ErrorCode,
    pub message: String,
    /// The processing state the attempt was in when it failed.
    pub stage: DocumentStatus,
    pub retryable: bool,
}

impl OutcomeError {
    pub fn new(error: &PipelineError, stage: DocumentStatus) -> Self {
        Self {
            code: error.code(),
            message: error.to_string(),
            stage,
            retryable: error.is_retryable(),
        }
    }

    /// The form stored on document records.
    pub fn to_info(&self) -> ErrorInfo {
        ErrorInfo {
            code: self.code.as_str().to_string(),
            message: self.message.clone(),
            stage: self.stage,
        }
    }
}

/// Result of one submission.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SubmitOutcome {
    pub id: DocumentId,
    pub status: DocumentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authority_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_ref: Option<String>,
    /// Present once the document has been linked into its chain.
    #[serde(flatten)]
    pub link: Option<ChainLink>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_position: Option<u64>,
    /// `true` if this outcome was read back from an earlier accepted
    /// submission of the same document number.
    pub replayed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<OutcomeError>,
}

impl SubmitOutcome {
    pub(crate) fn from_record(record: &DocumentRecord, replayed: bool) -> Self {
        Self {
            id: record.id,
            status: record.status,
            authority_id: record.authority_id.clone(),
            validation_ref: record.validation_ref.clone(),
            link: record.document.chain_link(),
            chain_position: record.chain_position,
            replayed,
            error: None,
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.status == DocumentStatus::Accepted
    }

    pub fn hash(&self) -> Option<&ChainHash> {
        self.link.as_ref().map(|l| &l.hash)
    }

    pub fn prev_hash(&self) -> Option<&ChainHash> {
        self.link.as_ref().and_then(|l| l.prev_hash.as_ref())
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        self.error.as_ref().map(|e| e.code)
    }
}

/// Result of a cancellation request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CancelOutcome {
    /// The resolved document id, or the id as given if it matched nothing.
    pub id: String,
    pub status: DocumentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<OutcomeError>,
}

impl CancelOutcome {
    pub fn is_cancelled(&self) -> bool {
        self.status == DocumentStatus::Cancelled && self.error.is_none()
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        self.error.as_ref().map(|e| e.code)
    }
}

//! Error taxonomy surfaced by the pipeline.
//!
//! Lower layers keep their own error enums; only [`PipelineError`] and its
//! [`ErrorCode`] cross the pipeline boundary.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable machine-readable error code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationFailed,
    LockBusy,
    SigningError,
    TransportNetwork,
    TransportRejected,
    ChainConflict,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::LockBusy => "LOCK_BUSY",
            Self::SigningError => "SIGNING_ERROR",
            Self::TransportNetwork => "TRANSPORT_NETWORK",
            Self::TransportRejected => "TRANSPORT_REJECTED",
            Self::ChainConflict => "CHAIN_CONFLICT",
        }
    }

    /// Whether resubmitting the same document unchanged may succeed.
    ///
    /// Signing errors are retryable but callers should back off.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::LockBusy | Self::SigningError | Self::TransportNetwork
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors reported by the pipeline.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("series busy: {0}")]
    LockBusy(String),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("transport failed: {0}")]
    TransportNetwork(String),

    #[error("rejected by authority [{code}]: {message}")]
    TransportRejected { code: String, message: String },

    #[error("chain conflict: {0}")]
    ChainConflict(String),
}

impl PipelineError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::ValidationFailed(_) => ErrorCode::ValidationFailed,
            Self::LockBusy(_) => ErrorCode::LockBusy,
            Self::Signing(_) => ErrorCode::SigningError,
            Self::TransportNetwork(_) => ErrorCode::TransportNetwork,
            Self::TransportRejected { .. } => ErrorCode::TransportRejected,
            Self::ChainConflict(_) => ErrorCode::ChainConflict,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }
}

/// Convenience type alias for pipeline operations.
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

//! Invoice processing pipeline for the fiscal chain connector.
//!
//! [`InvoicePipeline`] takes a fiscal document through validation, the
//! series lock, chain linkage, signing, authority transport and the
//! conditional chain commit. Signing and transport are capabilities behind
//! the [`DocumentSigner`] and [`AuthorityTransport`] traits.
//!
//! # Modules
//!
//! - [`pipeline`]: The [`InvoicePipeline`] itself
//! - [`config`] - [`PipelineConfig`], loadable from TOML
//! - [`error`] - [`PipelineError`] and its stable [`ErrorCode`]s
//! - [`outcome`] - [`SubmitOutcome`], [`CancelOutcome`], [`SubmitMode`]
//! - [`signer`] - [`DocumentSigner`], [`Ed25519Signer`], [`DeterministicSigner`]
//! - [`transport`] - [`AuthorityTransport`], [`SimulatedAuthority`]
//! - [`registration`]: The payload handed to the signer

pub mod config;
pub mod error;
pub mod outcome;
pub mod pipeline;
pub mod registration;
pub mod signer;
pub mod transport;

pub use config::{ConfigError, PipelineConfig};
pub use error::{ErrorCode, PipelineError, PipelineResult};
pub use outcome::{CancelOutcome, OutcomeError, SubmitMode, SubmitOutcome};
pub use pipeline::InvoicePipeline;
pub use registration::{registration_bytes, RegistrationPayload};
pub use signer::{DeterministicSigner, DocumentSigner, Ed25519Signer, SigningError};
pub use transport::{
    AuthorityStatus, AuthorityTransport, CancellationReceipt, DocumentMetadata,
    SimulatedAuthority, SubmissionReceipt, TransportError,
};

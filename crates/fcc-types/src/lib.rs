//! Foundation types for the fiscal chain connector (FCC).
//!
//! This crate provides the data model shared by every other FCC crate: the
//! fiscal document and its tax lines, the identifiers that key chain state and
//! series locks, the chain hash newtype, and the clock abstraction used for
//! lease expiry.
//!
//! # Key Types
//!
//! - [`FiscalDocument`]: A document submitted to the authority, with [`TaxLine`]s
//! - [`SeriesKey`]: The `(taxpayer, series)` pair every chain is keyed by
//! - [`ChainHash`]: Uppercase hex SHA-256 digest linking documents in a chain
//! - [`ChainLink`]: The `(prev_hash, hash)` pair assigned to a document
//! - [`DocumentStatus`]: Processing state of a submitted document
//! - [`Clock`]: Injectable time source ([`SystemClock`], [`ManualClock`])

pub mod artifact;
pub mod document;
pub mod error;
pub mod hash;
pub mod identity;
pub mod status;
pub mod temporal;
pub mod validation;

pub use artifact::SignedArtifact;
pub use document::{ChainLink, DocumentType, FiscalDocument, TaxKind, TaxLine};
pub use error::TypeError;
pub use hash::ChainHash;
pub use identity::{DocumentId, LockId, SeriesKey};
pub use status::DocumentStatus;
pub use temporal::{Clock, ManualClock, SharedClock, SystemClock};
pub use validation::{validate_document, ValidationError, ISSUE_YEARS, TAX_TOLERANCE};

//! Hash chain ledger for the fiscal chain connector.
//!
//! Every `(taxpayer, series)` pair owns an append-only chain of document
//! hashes. [`HashChainLedger`] reads the current head of a chain, computes
//! candidate hashes, and moves the head forward only through a conditional
//! commit that fails if another writer got there first. [`SeriesAuditor`]
//! walks a committed series and reports every broken link.
//!
//! # Key Types
//!
//! - [`HashChainLedger`]: Head lookup, hash computation, conditional commit
//! - [`SeriesAuditor`]: Full integrity report over a committed series
//! - [`SeriesAudit`]: The report, with one [`Violation`] per defect
//! - [`LedgerError`]: Conflict and storage errors

pub mod audit;
pub mod error;
pub mod ledger;

pub use audit::{SeriesAudit, SeriesAuditor, Violation, ViolationKind};
pub use error::{LedgerError, LedgerResult};
pub use ledger::HashChainLedger;

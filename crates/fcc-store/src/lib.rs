//! Persistence layer for the fiscal chain connector.
//!
//! Three storage boundaries are defined here:
//!
//! - [`ChainStore`] holds one [`ChainState`] row per series. Its head hash can
//!   only change through [`ChainStore::compare_and_swap`], which refuses the
//!   update if the head moved since the caller observed it.
//! - [`LockStore`] holds [`SeriesLockRecord`]s and installs them with an
//!   atomic conditional insert.
//! - [`DocumentStore`] holds [`DocumentRecord`]s, the final state of every
//!   submission attempt.
//!
//! [`InMemoryStore`] implements all three for tests and single-instance
//! deployments.
//!
//! # Modules
//!
//! - [`error`] - [`StoreError`] and the [`StoreResult`] alias
//! - [`records`]: Stored row types
//! - [`traits`]: Storage boundaries
//! - [`memory`]: In-memory backend

pub mod error;
pub mod memory;
pub mod records;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryStore;
pub use records::{CasOutcome, ChainState, DocumentRecord, ErrorInfo, SeriesLockRecord};
pub use traits::{ChainStore, DocumentStore, LockStore, PersistenceStore};

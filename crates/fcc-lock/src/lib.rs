//! Leased per-series locks.
//!
//! A [`SeriesLock`] grants exclusive ownership of one `(taxpayer, series)`
//! pair for a bounded lease. Grants are stored as lock records, so several
//! connector instances sharing a store exclude each other. Expired leases are
//! reclaimed lazily when a key is inspected and in bulk by the
//! [`LockSweeper`].
//!
//! # Key Types
//!
//! - [`SeriesLock`]: Try-acquire, bounded-wait acquire, release, expiry
//! - [`SeriesLockGuard`]: Releases its own grant when dropped
//! - [`LeasePolicy`]: Lease length and acquire wait bounds
//! - [`LockSweeper`]: Background task reclaiming expired leases

pub mod error;
pub mod guard;
pub mod policy;
pub mod series_lock;
pub mod sweeper;

pub use error::{LockError, LockResult};
pub use guard::SeriesLockGuard;
pub use policy::LeasePolicy;
pub use series_lock::SeriesLock;
pub use sweeper::LockSweeper;

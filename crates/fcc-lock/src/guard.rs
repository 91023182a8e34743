use tracing::warn;

use fcc_types::{LockId, SeriesKey};

use crate::error::LockResult;
use crate::series_lock::SeriesLock;

/// Ownership of one series lock grant.
///
/// Dropping the guard releases the grant, so an early return, a panic or a
/// cancelled future all leave the series unlocked. Only the grant this guard
/// was issued is released: if the lease expired and another holder took the
/// series over, the drop is a no-op.
#[must_use = "the series is unlocked as soon as the guard is dropped"]
pub struct SeriesLockGuard {
    lock: SeriesLock,
    key: SeriesKey,
    lock_id: LockId,
    released: bool,
}

impl SeriesLockGuard {
    pub(crate) fn new(lock: SeriesLock, key: SeriesKey, lock_id: LockId) -> Self {
        Self {
            lock,
            key,
            lock_id,
            released: false,
        }
    }

    pub fn key(&self) -> &SeriesKey {
        &self.key
    }

    pub fn lock_id(&self) -> &LockId {
        &self.lock_id
    }

    /// Returns `true` while the grant is still the unexpired holder.
    pub fn is_held(&self) -> LockResult<bool> {
        self.lock.holds(&self.key, &self.lock_id)
    }

    /// Release now and report whether the grant was still active.
    pub fn release(mut self) -> LockResult<bool> {
        self.released = true;
        self.lock.release_grant(&self.key, &self.lock_id)
    }
}

impl Drop for SeriesLockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.lock.release_grant(&self.key, &self.lock_id) {
            warn!(key = %self.key, lock_id = %self.lock_id, error = %e, "failed to release series lock");
        }
    }
}

impl std::fmt::Debug for SeriesLockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeriesLockGuard")
            .field("key", &self.key)
            .field("lock_id", &self.lock_id)
            .finish()
    }
}

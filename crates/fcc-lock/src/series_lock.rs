use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use fcc_store::{LockStore, SeriesLockRecord};
use fcc_types::{LockId, SeriesKey, SharedClock};

use crate::error::{LockError, LockResult};
use crate::guard::SeriesLockGuard;
use crate::policy::LeasePolicy;

/// Leased mutual exclusion keyed by series.
///
/// Each key is either unlocked or locked by one grant with an expiry. A new
/// grant is installed only through the store's atomic conditional insert, so
/// concurrent attempts on one key have exactly one winner.
#[derive(Clone)]
pub struct SeriesLock {
    store: Arc<dyn LockStore>,
    clock: SharedClock,
}

impl SeriesLock {
    pub fn new(store: Arc<dyn LockStore>, clock: SharedClock) -> Self {
        Self { store, clock }
    }

    /// Try once to lock `key` for `lease`.
    ///
    /// Returns `Ok(false)` if an unexpired grant already exists. The grant is
    /// not tied to a guard; release it with [`release`](Self::release).
    pub fn try_acquire(&self, key: &SeriesKey, lease: Duration) -> LockResult<bool> {
        Ok(self.install(key, lease)?.is_some())
    }

    /// Try once to lock `key`, returning a guard that releases on drop.
    pub fn try_lock(&self, key: &SeriesKey, lease: Duration) -> LockResult<Option<SeriesLockGuard>> {
        Ok(self
            .install(key, lease)?
            .map(|lock_id| SeriesLockGuard::new(self.clone(), key.clone(), lock_id)))
    }

    /// Lock `key`, retrying until `policy.acquire_timeout` elapses.
    ///
    /// Returns [`LockError::Busy`] if the key stayed locked for the whole
    /// window.
    pub async fn acquire(&self, key: &SeriesKey, policy: &LeasePolicy) -> LockResult<SeriesLockGuard> {
        let started = Instant::now();
        let deadline = started + policy.acquire_timeout;
        loop {
            if let Some(guard) = self.try_lock(key, policy.lease)? {
                return Ok(guard);
            }
            let now = Instant::now();
            if now >= deadline {
                let waited_ms = now.duration_since(started).as_millis() as u64;
                warn!(key = %key, waited_ms, "series lock busy");
                return Err(LockError::Busy {
                    key: key.clone(),
                    waited_ms,
                });
            }
            tokio::time::sleep(policy.retry_interval.min(deadline - now)).await;
        }
    }

    /// Release whatever grant holds `key`. A no-op if the key is unlocked.
    pub fn release(&self, key: &SeriesKey) -> LockResult<bool> {
        let released = self.store.release_lock(key, None)?;
        if released {
            debug!(key = %key, "series lock released");
        }
        Ok(released)
    }

    /// Release `key` only if it is still held by `lock_id`.
    pub(crate) fn release_grant(&self, key: &SeriesKey, lock_id: &LockId) -> LockResult<bool> {
        let released = self.store.release_lock(key, Some(lock_id))?;
        if released {
            debug!(key = %key, lock_id = %lock_id, "series lock released");
        }
        Ok(released)
    }

    /// Returns `true` if an unexpired grant holds `key`.
    ///
    /// An expired grant found here is deactivated on the spot.
    pub fn is_locked(&self, key: &SeriesKey) -> LockResult<bool> {
        let now = self.clock.now();
        let Some(record) = self.store.lock_record(key)? else {
            return Ok(false);
        };
        if record.is_expired_at(now) && self.store.reclaim_if_expired(key, now)? {
            warn!(key = %key, lock_id = %record.lock_id, "reclaimed expired series lock");
            return Ok(false);
        }
        Ok(record.is_held_at(now))
    }

    /// Returns `true` if `lock_id` is the unexpired grant on `key`.
    pub fn holds(&self, key: &SeriesKey, lock_id: &LockId) -> LockResult<bool> {
        let now = self.clock.now();
        Ok(self
            .store
            .lock_record(key)?
            .is_some_and(|r| r.lock_id == *lock_id && r.is_held_at(now)))
    }

    /// Deactivate every expired grant. Returns how many were reclaimed.
    pub fn cleanup_expired_locks(&self) -> LockResult<usize> {
        let reclaimed = self.store.reclaim_expired(self.clock.now())?;
        if reclaimed > 0 {
            warn!(reclaimed, "reclaimed expired series locks");
        }
        Ok(reclaimed)
    }

    fn install(&self, key: &SeriesKey, lease: Duration) -> LockResult<Option<LockId>> {
        if lease.is_zero() {
            return Err(LockError::InvalidLease("lease must be positive".into()));
        }
        let lease = chrono::Duration::from_std(lease)
            .map_err(|e| LockError::InvalidLease(e.to_string()))?;
        let now = self.clock.now();
        let expires_at = now
            .checked_add_signed(lease)
            .ok_or_else(|| LockError::InvalidLease("lease overflows the clock".into()))?;

        let record = SeriesLockRecord {
            key: key.clone(),
            lock_id: LockId::new(),
            acquired_at: now,
            expires_at,
            active: true,
        };
        let lock_id = record.lock_id;
        if self.store.insert_if_free(record, now)? {
            debug!(key = %key, lock_id = %lock_id, expires_at = %expires_at, "series lock acquired");
            Ok(Some(lock_id))
        } else {
            Ok(None)
        }
    }
}

impl std::fmt::Debug for SeriesLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeriesLock").finish_non_exhaustive()
    }
}

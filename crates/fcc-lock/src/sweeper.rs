use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::series_lock::SeriesLock;

/// Background task that reclaims expired series locks on a fixed interval.
///
/// Lazy reclamation in [`SeriesLock::is_locked`] only covers keys somebody
/// looks at; the sweeper covers the rest. Stop it with
/// [`shutdown`](Self::shutdown).
#[derive(Debug)]
pub struct LockSweeper {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl LockSweeper {
    /// Spawn the sweeper on the current tokio runtime.
    pub fn spawn(lock: SeriesLock, interval: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            info!(interval_ms = interval.as_millis() as u64, "lock sweeper started");
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    result = shutdown_rx.changed() => {
                        if result.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }

                match lock.cleanup_expired_locks() {
                    Ok(0) => {}
                    Ok(reclaimed) => debug!(reclaimed, "lock sweep finished"),
                    Err(e) => warn!(error = %e, "lock sweep failed"),
                }
            }
            info!("lock sweeper stopped");
        });

        Self {
            shutdown_tx,
            handle,
        }
    }

    /// Signal the task to stop and wait for it to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "lock sweeper task failed");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

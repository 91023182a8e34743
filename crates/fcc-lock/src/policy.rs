use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How long a grant lasts and how long to wait for one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeasePolicy {
    /// Lifetime of a grant before it may be reclaimed.
    pub lease: Duration,
    /// Upper bound on the time spent waiting in [`acquire`](crate::SeriesLock::acquire).
    pub acquire_timeout: Duration,
    /// Pause between attempts while waiting.
    pub retry_interval: Duration,
}

impl Default for LeasePolicy {
    fn default() -> Self {
        Self {
            lease: Duration::from_secs(300),
            acquire_timeout: Duration::from_secs(10),
            retry_interval: Duration::from_millis(100),
        }
    }
}

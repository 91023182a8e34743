use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use fcc_lock::LeasePolicy;

/// Configuration for the invoice processing pipeline.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Lifetime of a series lock grant.
    pub lease_secs: u64,
    /// How long a submission waits for a busy series before giving up.
    pub acquire_timeout_ms: u64,
    /// Pause between lock attempts while waiting.
    pub acquire_retry_ms: u64,
    /// Upper bound on one authority call.
    pub transport_timeout_secs: u64,
    /// Interval of the expired-lock sweeper.
    pub sweep_interval_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            lease_secs: 300,
            acquire_timeout_ms: 10_000,
            acquire_retry_ms: 100,
            transport_timeout_secs: 60,
            sweep_interval_secs: 60,
        }
    }
}

impl PipelineConfig {
    /// Read and validate a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&raw)
    }

    /// Parse and validate a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Reject zero values and a lease that could run out during a transport
    /// call.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("lease_secs", self.lease_secs),
            ("acquire_timeout_ms", self.acquire_timeout_ms),
            ("acquire_retry_ms", self.acquire_retry_ms),
            ("transport_timeout_secs", self.transport_timeout_secs),
            ("sweep_interval_secs", self.sweep_interval_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be positive")));
            }
        }
        if self.lease_secs <= self.transport_timeout_secs {
            return Err(ConfigError::Invalid(format!(
                "lease_secs ({}) must exceed transport_timeout_secs ({})",
                self.lease_secs, self.transport_timeout_secs
            )));
        }
        Ok(())
    }

    pub fn lease_policy(&self) -> LeasePolicy {
        LeasePolicy {
            lease: Duration::from_secs(self.lease_secs),
            acquire_timeout: Duration::from_millis(self.acquire_timeout_ms),
            retry_interval: Duration::from_millis(self.acquire_retry_ms),
        }
    }

    pub fn transport_timeout(&self) -> Duration {
        Duration::from_secs(self.transport_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Errors from loading or validating configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("cannot read {path}: {message}")]
    Io { path: String, message: String },

    #[error("invalid TOML: {0}")]
    Parse(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

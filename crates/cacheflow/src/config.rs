//! Initialization configuration
//!
//! Accepts the camelCase JSON shape
//!
//! ```json
//! {
//!   "local":  { "enabled": true, "checkExpireIntervalSeconds": 5, "globalThreshold": 100 },
//!   "remote": { "host": "127.0.0.1", "port": 6379, "password": null }
//! }
//! ```
//!
//! A missing `local` disables the local table and the sweeper's local pass;
//! a missing `remote` disables the remote backend.

use std::path::PathBuf;
use std::time::Duration;

use flowstore::RemoteConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::decision::ScoreWeights;
use crate::error::{Error, Result};

/// Sweep interval used when no local table is configured
pub const DEFAULT_SWEEP_INTERVAL_SECS: f64 = 10.0;

/// Longest accepted sweep interval (one year)
pub const MAX_SWEEP_INTERVAL_SECS: f64 = 365.0 * 24.0 * 3600.0;

/// Local table settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LocalConfig {
    /// Open the local table
    pub enabled: bool,

    /// Seconds between expiry sweeps
    pub check_expire_interval_seconds: f64,

    /// Process-wide frequency threshold in calls per second
    pub global_threshold: Option<f64>,

    /// Directory for `localStorage.json`; in-memory when unset
    pub path: Option<PathBuf>,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_expire_interval_seconds: DEFAULT_SWEEP_INTERVAL_SECS,
            global_threshold: None,
            path: None,
        }
    }
}

impl LocalConfig {
    /// Enabled, in-memory, default sweep interval
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the sweep interval in seconds
    pub fn check_expire_interval_seconds(mut self, seconds: f64) -> Self {
        self.check_expire_interval_seconds = seconds;
        self
    }

    /// Set the global threshold in calls per second
    pub fn global_threshold(mut self, calls_per_second: f64) -> Self {
        self.global_threshold = Some(calls_per_second);
        self
    }

    /// Persist the table under `dir`
    pub fn path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.path = Some(dir.into());
        self
    }
}

/// Everything [`CacheFlow::init`](crate::CacheFlow::init) needs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheFlowConfig {
    /// Local table, absent to disable
    pub local: Option<LocalConfig>,

    /// Remote service, absent to disable
    pub remote: Option<RemoteConfig>,

    /// Directory for `localMetricsStorage.json` and `globalMetrics.json`
    pub metrics_dir: Option<PathBuf>,

    /// Adaptive score coefficients
    pub score: ScoreWeights,
}

impl CacheFlowConfig {
    /// No backends configured
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a JSON configuration
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::Configuration(format!("invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate an already decoded JSON configuration
    pub fn from_json_value(value: Value) -> Result<Self> {
        let config: Self = serde_json::from_value(value)
            .map_err(|e| Error::Configuration(format!("invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Configure the local table
    pub fn with_local(mut self, local: LocalConfig) -> Self {
        self.local = Some(local);
        self
    }

    /// Configure the remote service
    pub fn with_remote(mut self, remote: RemoteConfig) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Mirror the metrics documents to `dir`
    pub fn with_metrics_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.metrics_dir = Some(dir.into());
        self
    }

    /// Override the adaptive score coefficients
    pub fn with_score(mut self, score: ScoreWeights) -> Self {
        self.score = score;
        self
    }

    /// Check ranges
    pub fn validate(&self) -> Result<()> {
        if let Some(local) = &self.local {
            let interval = local.check_expire_interval_seconds;
            if !interval.is_finite() || interval <= 0.0 || interval > MAX_SWEEP_INTERVAL_SECS {
                return Err(Error::Configuration(format!(
                    "checkExpireIntervalSeconds must be positive and at most {}, got {}",
                    MAX_SWEEP_INTERVAL_SECS, interval
                )));
            }
            if let Some(threshold) = local.global_threshold {
                if !threshold.is_finite() || threshold < 0.0 {
                    return Err(Error::Configuration(format!(
                        "globalThreshold must be a non-negative number, got {}",
                        threshold
                    )));
                }
            }
        }
        self.score.validate()
    }

    /// Local table settings if the table is enabled
    pub fn local_enabled(&self) -> Option<&LocalConfig> {
        self.local.as_ref().filter(|local| local.enabled)
    }

    /// Default frequency threshold in calls per millisecond
    pub fn default_threshold(&self) -> Option<f64> {
        self.local
            .as_ref()
            .and_then(|local| local.global_threshold)
            .map(|t| t / 1000.0)
    }

    /// Time between sweeps
    pub fn sweep_interval(&self) -> Result<Duration> {
        let seconds = self
            .local
            .as_ref()
            .map_or(DEFAULT_SWEEP_INTERVAL_SECS, |local| {
                local.check_expire_interval_seconds
            });
        Duration::try_from_secs_f64(seconds).map_err(|_| {
            Error::Configuration(format!(
                "checkExpireIntervalSeconds is not a usable interval: {}",
                seconds
            ))
        })
    }
}

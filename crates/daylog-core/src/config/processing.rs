//! Day queue processing configuration.

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Configuration for the day-partitioned processing queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Seconds between sweeps of the pending queue.
    #[serde(default = "default_processing_interval")]
    pub processing_interval_seconds: u64,
    /// Maximum number of days processed at once.
    #[serde(default = "default_max_concurrent_days")]
    pub max_concurrent_days: usize,
    /// Upper bound on days picked up by one sweep (`None` = all pending).
    #[serde(default)]
    pub max_days_per_sweep: Option<usize>,
    /// Timeout for a whole sweep, in seconds.
    #[serde(default = "default_sweep_timeout")]
    pub sweep_timeout_seconds: u64,
    /// Retry budget of the sweep job.
    #[serde(default = "default_sweep_max_retries")]
    pub sweep_max_retries: u32,
    /// Time budget for a single progress callback, in seconds.
    #[serde(default = "default_callback_timeout")]
    pub callback_timeout_seconds: u64,
}

impl ProcessingConfig {
    /// Reject values that cannot drive the processing queue.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.processing_interval_seconds == 0 {
            return Err(AppError::configuration(
                "processing.processing_interval_seconds must be at least 1",
            ));
        }
        if self.max_concurrent_days == 0 {
            return Err(AppError::configuration(
                "processing.max_concurrent_days must be at least 1",
            ));
        }
        if self.max_days_per_sweep == Some(0) {
            return Err(AppError::configuration(
                "processing.max_days_per_sweep must be at least 1 when set",
            ));
        }
        if self.sweep_timeout_seconds == 0 || self.callback_timeout_seconds == 0 {
            return Err(AppError::configuration(
                "processing timeouts must be at least 1 second",
            ));
        }
        if self.sweep_max_retries == 0 {
            return Err(AppError::configuration(
                "processing.sweep_max_retries must be at least 1",
            ));
        }
        Ok(())
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            processing_interval_seconds: default_processing_interval(),
            max_concurrent_days: default_max_concurrent_days(),
            max_days_per_sweep: None,
            sweep_timeout_seconds: default_sweep_timeout(),
            sweep_max_retries: default_sweep_max_retries(),
            callback_timeout_seconds: default_callback_timeout(),
        }
    }
}

fn default_processing_interval() -> u64 {
    300
}

fn default_max_concurrent_days() -> usize {
    3
}

fn default_sweep_timeout() -> u64 {
    1800
}

fn default_sweep_max_retries() -> u32 {
    3
}

fn default_callback_timeout() -> u64 {
    10
}

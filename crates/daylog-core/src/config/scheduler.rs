//! Job scheduler configuration.

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Periodic job scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between control loop ticks.
    #[serde(default = "default_check_interval")]
    pub check_interval_seconds: u64,
    /// Maximum number of job runs in flight at once, across all jobs.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    /// Retry budget for jobs that do not set their own.
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,
    /// Base delay for exponential retry backoff, in seconds.
    #[serde(default = "default_retry_base_delay")]
    pub default_retry_base_delay_seconds: u64,
    /// Per-run timeout for jobs that do not set their own, in seconds.
    #[serde(default = "default_timeout")]
    pub default_timeout_seconds: u64,
    /// How late a job may be before health reports it as overdue, in seconds.
    #[serde(default = "default_overdue_threshold")]
    pub overdue_threshold_seconds: u64,
}

impl SchedulerConfig {
    /// Reject values that cannot drive the control loop.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.check_interval_seconds == 0 {
            return Err(AppError::configuration(
                "scheduler.check_interval_seconds must be at least 1",
            ));
        }
        if self.max_concurrent_jobs == 0 {
            return Err(AppError::configuration(
                "scheduler.max_concurrent_jobs must be at least 1",
            ));
        }
        if self.default_max_retries == 0 {
            return Err(AppError::configuration(
                "scheduler.default_max_retries must be at least 1",
            ));
        }
        if self.default_timeout_seconds == 0 {
            return Err(AppError::configuration(
                "scheduler.default_timeout_seconds must be at least 1",
            ));
        }
        Ok(())
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            check_interval_seconds: default_check_interval(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            default_max_retries: default_max_retries(),
            default_retry_base_delay_seconds: default_retry_base_delay(),
            default_timeout_seconds: default_timeout(),
            overdue_threshold_seconds: default_overdue_threshold(),
        }
    }
}

fn default_check_interval() -> u64 {
    5
}

fn default_max_concurrent_jobs() -> usize {
    5
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay() -> u64 {
    60
}

fn default_timeout() -> u64 {
    300
}

fn default_overdue_threshold() -> u64 {
    3600
}

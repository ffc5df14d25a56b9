//! Scheduled job model and its transition table.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use daylog_core::result::AppResult;
use daylog_core::types::JobId;

/// Upper bound for a single retry backoff.
pub const MAX_BACKOFF: Duration = Duration::from_secs(3600);

/// Future produced by one run of a job body.
pub type JobFuture = BoxFuture<'static, AppResult<()>>;

/// Zero-argument job body. Called once per run.
pub type JobFn = Arc<dyn Fn() -> JobFuture + Send + Sync>;

/// Lifecycle status of a scheduled job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting for `next_run`.
    Pending,
    /// A run is in flight.
    Running,
    /// The last run succeeded; waiting for `next_run`.
    Completed,
    /// Retry budget exhausted. Transient: the scheduler self-heals it back to `Pending`.
    Failed,
    /// Not scheduled until resumed. The only status without a `next_run`.
    Paused,
    /// The last run was cancelled by `stop()`; re-armed by the next `start()`.
    Cancelled,
}

impl JobStatus {
    /// Whether the control loop may pick the job up when it is due.
    pub fn is_schedulable(&self) -> bool {
        matches!(self, Self::Pending | Self::Completed)
    }

    /// Return the status as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Paused => "paused",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters for registering a job with [`JobScheduler::add_job`].
///
/// Unset retry, backoff and timeout values fall back to the scheduler defaults.
///
/// [`JobScheduler::add_job`]: crate::scheduler::JobScheduler::add_job
#[derive(Debug, Clone)]
pub struct JobOptions {
    /// Human-readable job name.
    pub name: String,
    /// Grouping label (e.g. "processing", "maintenance").
    pub namespace: String,
    /// Time between successful runs.
    pub interval: Duration,
    /// Consecutive failures tolerated before self-healing.
    pub max_retries: Option<u32>,
    /// Base delay for exponential retry backoff.
    pub retry_base_delay: Option<Duration>,
    /// Per-run timeout.
    pub timeout: Option<Duration>,
    /// Delay before the first run. Defaults to one interval.
    pub initial_delay: Option<Duration>,
}

impl JobOptions {
    /// Create options for a job running every `interval`.
    pub fn new(name: impl Into<String>, namespace: impl Into<String>, interval: Duration) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            interval,
            max_retries: None,
            retry_base_delay: None,
            timeout: None,
            initial_delay: None,
        }
    }

    /// Set the retry budget
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Set the backoff base delay
    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = Some(delay);
        self
    }

    /// Set the per-run timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the delay before the first run
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = Some(delay);
        self
    }
}

/// What the scheduler decided after a failed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// Retry after an exponential backoff.
    Retry {
        /// Failures in the current streak.
        attempt: u32,
        /// Delay until the retry.
        delay: Duration,
    },
    /// Retry budget exhausted; streak reset and normal cadence resumed.
    SelfHeal,
    /// The job was paused while running; schedule left untouched.
    Paused,
}

/// One scheduled unit of recurring work.
#[derive(Debug, Clone)]
pub struct Job {
    /// Job identifier.
    pub id: JobId,
    /// Human-readable name.
    pub name: String,
    /// Grouping label.
    pub namespace: String,
    /// Time between successful runs.
    pub interval: Duration,
    /// Current status.
    pub status: JobStatus,
    /// When the job was registered.
    pub created_at: DateTime<Utc>,
    /// Start of the most recent run.
    pub last_run: Option<DateTime<Utc>>,
    /// When the job is next due. `None` exactly when paused.
    pub next_run: Option<DateTime<Utc>>,
    /// Consecutive failures in the current streak.
    pub error_count: u32,
    /// Failures tolerated before self-healing.
    pub max_retries: u32,
    /// Base delay for exponential backoff.
    pub retry_base_delay: Duration,
    /// Per-run timeout.
    pub timeout: Duration,
    /// Message of the most recent failure.
    pub last_error: Option<String>,
    /// Runs started over the job's lifetime.
    pub total_runs: u64,
    /// Runs that failed or timed out over the job's lifetime.
    pub total_failures: u64,
}

impl Job {
    pub(crate) fn new(
        id: JobId,
        options: JobOptions,
        max_retries: u32,
        retry_base_delay: Duration,
        timeout: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        let first_delay = options.initial_delay.unwrap_or(options.interval);
        Self {
            id,
            name: options.name,
            namespace: options.namespace,
            interval: options.interval,
            status: JobStatus::Pending,
            created_at: now,
            last_run: None,
            next_run: Some(after(now, first_delay)),
            error_count: 0,
            max_retries,
            retry_base_delay,
            timeout,
            last_error: None,
            total_runs: 0,
            total_failures: 0,
        }
    }

    /// Whether the control loop should launch the job at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status.is_schedulable() && self.next_run.is_some_and(|next| next <= now)
    }

    /// Whether the job is later than `threshold` past its `next_run`.
    pub fn is_overdue(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        match (self.status, self.next_run) {
            (JobStatus::Paused | JobStatus::Running, _) | (_, None) => false,
            (_, Some(next)) => after(next, threshold) < now,
        }
    }

    /// Backoff for the current failure streak: `base * 2^(error_count - 1)`, capped.
    pub fn backoff_delay(&self) -> Duration {
        let exponent = self.error_count.saturating_sub(1).min(31);
        self.retry_base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(MAX_BACKOFF)
            .min(MAX_BACKOFF)
    }

    pub(crate) fn mark_started(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Running;
        self.last_run = Some(now);
        self.total_runs += 1;
    }

    pub(crate) fn record_success(&mut self, now: DateTime<Utc>) {
        self.last_error = None;
        if self.status == JobStatus::Paused {
            return;
        }
        self.status = JobStatus::Completed;
        self.error_count = 0;
        self.next_run = Some(after(now, self.interval));
    }

    pub(crate) fn record_failure(&mut self, now: DateTime<Utc>, error: String) -> FailureAction {
        self.total_failures += 1;
        self.last_error = Some(error);
        if self.status == JobStatus::Paused {
            return FailureAction::Paused;
        }

        self.error_count += 1;
        if self.error_count < self.max_retries {
            let delay = self.backoff_delay();
            self.status = JobStatus::Pending;
            self.next_run = Some(after(now, delay));
            FailureAction::Retry {
                attempt: self.error_count,
                delay,
            }
        } else {
            // Failed is never left standing: reset the streak and fall back to cadence.
            self.error_count = 0;
            self.status = JobStatus::Pending;
            self.next_run = Some(after(now, self.interval));
            FailureAction::SelfHeal
        }
    }

    pub(crate) fn record_cancelled(&mut self) {
        if self.status != JobStatus::Paused {
            self.status = JobStatus::Cancelled;
        }
    }

    pub(crate) fn pause(&mut self) {
        self.status = JobStatus::Paused;
        self.next_run = None;
    }

    pub(crate) fn resume(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Pending;
        self.next_run = Some(now);
    }

    pub(crate) fn rearm(&mut self, now: DateTime<Utc>) {
        if self.status == JobStatus::Cancelled {
            self.status = JobStatus::Pending;
            self.next_run = Some(now);
        }
    }

    /// Snapshot for status APIs.
    pub fn to_info(&self, is_running: bool) -> JobInfo {
        JobInfo {
            id: self.id,
            name: self.name.clone(),
            namespace: self.namespace.clone(),
            status: self.status,
            interval_seconds: self.interval.as_secs_f64(),
            created_at: self.created_at,
            last_run: self.last_run,
            next_run: self.next_run,
            error_count: self.error_count,
            max_retries: self.max_retries,
            timeout_seconds: self.timeout.as_secs_f64(),
            last_error: self.last_error.clone(),
            total_runs: self.total_runs,
            total_failures: self.total_failures,
            is_running,
        }
    }
}

/// Serializable snapshot of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
    /// Job identifier
    pub id: JobId,
    /// Job name
    pub name: String,
    /// Grouping label
    pub namespace: String,
    /// Current status
    pub status: JobStatus,
    /// Interval between successful runs
    pub interval_seconds: f64,
    /// Registration time
    pub created_at: DateTime<Utc>,
    /// Start of the most recent run
    pub last_run: Option<DateTime<Utc>>,
    /// Next due time
    pub next_run: Option<DateTime<Utc>>,
    /// Current failure streak
    pub error_count: u32,
    /// Retry budget
    pub max_retries: u32,
    /// Per-run timeout
    pub timeout_seconds: f64,
    /// Most recent failure message
    pub last_error: Option<String>,
    /// Runs started
    pub total_runs: u64,
    /// Runs failed
    pub total_failures: u64,
    /// Whether a run task is currently held by the scheduler
    pub is_running: bool,
}

/// `now + delay`, saturating at the far future.
pub(crate) fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

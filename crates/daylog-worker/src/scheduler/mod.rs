//! Interval job scheduler with bounded concurrency, retry backoff, and self-healing.
//!
//! A single control loop ticks every `check_interval`. Each tick reaps the
//! runs that finished since the previous tick, applies their outcome to the
//! job's bookkeeping, then launches due jobs in `next_run` order until the
//! global concurrency cap is reached. Whatever does not fit waits for the
//! next tick.

pub mod executor;
pub mod health;
pub mod job;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use daylog_core::config::SchedulerConfig;
use daylog_core::error::AppError;
use daylog_core::result::AppResult;
use daylog_core::types::JobId;

use self::executor::{JobExecutionError, panic_message};
use self::health::SchedulerHealth;
use self::job::{FailureAction, Job, JobFn, JobInfo, JobOptions};

pub use self::job::JobStatus;

/// Runtime settings of a [`JobScheduler`].
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Time between control loop ticks.
    pub check_interval: Duration,
    /// Maximum number of runs in flight across all jobs.
    pub max_concurrent_jobs: usize,
    /// Retry budget for jobs that do not set their own.
    pub default_max_retries: u32,
    /// Backoff base for jobs that do not set their own.
    pub default_retry_base_delay: Duration,
    /// Per-run timeout for jobs that do not set their own.
    pub default_timeout: Duration,
    /// Lateness after which health reports a job as overdue.
    pub overdue_threshold: Duration,
}

impl SchedulerSettings {
    /// Build settings from the configuration section.
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            check_interval: Duration::from_secs(config.check_interval_seconds),
            max_concurrent_jobs: config.max_concurrent_jobs,
            default_max_retries: config.default_max_retries,
            default_retry_base_delay: Duration::from_secs(config.default_retry_base_delay_seconds),
            default_timeout: Duration::from_secs(config.default_timeout_seconds),
            overdue_threshold: Duration::from_secs(config.overdue_threshold_seconds),
        }
    }

    fn validate(&self) -> AppResult<()> {
        if self.check_interval.is_zero() {
            return Err(AppError::configuration("check_interval must be non-zero"));
        }
        if self.max_concurrent_jobs == 0 {
            return Err(AppError::configuration(
                "max_concurrent_jobs must be at least 1",
            ));
        }
        if self.default_max_retries == 0 {
            return Err(AppError::configuration(
                "default_max_retries must be at least 1",
            ));
        }
        if self.default_timeout.is_zero() {
            return Err(AppError::configuration("default_timeout must be non-zero"));
        }
        Ok(())
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from_config(&SchedulerConfig::default())
    }
}

/// Periodic job runner.
///
/// Cheap to clone; clones share the same registry and control loop.
#[derive(Clone)]
pub struct JobScheduler {
    inner: Arc<SchedulerInner>,
}

impl fmt::Debug for JobScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobScheduler")
            .field("settings", &self.inner.settings)
            .finish()
    }
}

struct SchedulerInner {
    settings: SchedulerSettings,
    /// Job registry and in-flight runs
    state: Mutex<SchedulerState>,
    /// Control loop, present while started. Always locked before `state`.
    control: Mutex<Option<ControlLoop>>,
}

struct ControlLoop {
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
    started_at: DateTime<Utc>,
}

#[derive(Default)]
struct SchedulerState {
    jobs: HashMap<JobId, RegisteredJob>,
    running: HashMap<JobId, RunningJob>,
    next_seq: u64,
}

struct RegisteredJob {
    job: Job,
    task: JobFn,
    /// Registration order, breaks `next_run` ties
    seq: u64,
}

struct RunningJob {
    handle: JoinHandle<Result<(), JobExecutionError>>,
    cancel: CancellationToken,
}

impl JobScheduler {
    /// Create a scheduler. Fails on unusable settings.
    pub fn new(settings: SchedulerSettings) -> AppResult<Self> {
        settings.validate()?;
        Ok(Self {
            inner: Arc::new(SchedulerInner {
                settings,
                state: Mutex::new(SchedulerState::default()),
                control: Mutex::new(None),
            }),
        })
    }

    /// Scheduler settings.
    pub fn settings(&self) -> &SchedulerSettings {
        &self.inner.settings
    }

    /// Register a recurring job. Its first run is one interval (or the
    /// configured initial delay) from now.
    pub async fn add_job<F, Fut>(&self, options: JobOptions, f: F) -> AppResult<JobId>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AppResult<()>> + Send + 'static,
    {
        let settings = &self.inner.settings;
        if options.interval.is_zero() {
            return Err(AppError::configuration(format!(
                "Job '{}' must have a non-zero interval",
                options.name
            )));
        }
        let max_retries = options.max_retries.unwrap_or(settings.default_max_retries);
        if max_retries == 0 {
            return Err(AppError::configuration(format!(
                "Job '{}' must allow at least one retry",
                options.name
            )));
        }
        let timeout = options.timeout.unwrap_or(settings.default_timeout);
        if timeout.is_zero() {
            return Err(AppError::configuration(format!(
                "Job '{}' must have a non-zero timeout",
                options.name
            )));
        }
        let retry_base_delay = options
            .retry_base_delay
            .unwrap_or(settings.default_retry_base_delay);

        let id = JobId::new();
        let job = Job::new(
            id,
            options,
            max_retries,
            retry_base_delay,
            timeout,
            Utc::now(),
        );
        let task: JobFn = Arc::new(move || f().boxed());

        tracing::info!(
            "Registered job '{}' (id={}, namespace='{}', interval={:?}, max_retries={})",
            job.name,
            id,
            job.namespace,
            job.interval,
            job.max_retries
        );

        let mut state = self.inner.state.lock().await;
        let seq = state.next_seq;
        state.next_seq += 1;
        state.jobs.insert(id, RegisteredJob { job, task, seq });
        Ok(id)
    }

    /// Remove a job, cancelling its run if one is in flight.
    pub async fn remove_job(&self, job_id: JobId) -> bool {
        let (removed, running) = {
            let mut state = self.inner.state.lock().await;
            (state.jobs.remove(&job_id), state.running.remove(&job_id))
        };

        if let Some(run) = running {
            run.cancel.cancel();
            // A job removing itself cannot wait for its own task.
            if tokio::task::try_id() != Some(run.handle.id()) {
                let _ = run.handle.await;
            }
        }

        match removed {
            Some(entry) => {
                tracing::info!("Removed job '{}' (id={})", entry.job.name, job_id);
                true
            }
            None => false,
        }
    }

    /// Stop scheduling a job until it is resumed. A run in flight is not interrupted.
    pub async fn pause_job(&self, job_id: JobId) -> bool {
        let mut state = self.inner.state.lock().await;
        match state.jobs.get_mut(&job_id) {
            Some(entry) => {
                entry.job.pause();
                tracing::info!("Paused job '{}' (id={})", entry.job.name, job_id);
                true
            }
            None => false,
        }
    }

    /// Resume a paused job; it becomes due immediately.
    pub async fn resume_job(&self, job_id: JobId) -> bool {
        let mut state = self.inner.state.lock().await;
        match state.jobs.get_mut(&job_id) {
            Some(entry) if entry.job.status == JobStatus::Paused => {
                entry.job.resume(Utc::now());
                tracing::info!("Resumed job '{}' (id={})", entry.job.name, job_id);
                true
            }
            _ => false,
        }
    }

    /// Run a job now, outside its schedule.
    ///
    /// Returns `false` if the job is unknown, paused, already running, or
    /// the concurrency cap is reached.
    pub async fn trigger_job(&self, job_id: JobId) -> bool {
        let max = self.inner.settings.max_concurrent_jobs;
        let mut guard = self.inner.state.lock().await;
        let state = &mut *guard;
        state.reap_finished().await;

        let Some(entry) = state.jobs.get(&job_id) else {
            return false;
        };
        if entry.job.status == JobStatus::Paused {
            tracing::debug!("Not triggering paused job '{}'", entry.job.name);
            return false;
        }
        if state.running.contains_key(&job_id) {
            tracing::debug!("Job '{}' is already running", entry.job.name);
            return false;
        }
        if state.running.len() >= max {
            tracing::warn!(
                "Cannot trigger job '{}': {} of {} slots in use",
                entry.job.name,
                state.running.len(),
                max
            );
            return false;
        }

        tracing::info!("Manually triggering job '{}'", entry.job.name);
        state.launch(job_id, Utc::now());
        true
    }

    /// Start the control loop. Jobs cancelled by a previous `stop()` are
    /// re-armed to run immediately.
    pub async fn start(&self) {
        let mut control = self.inner.control.lock().await;
        if control.is_some() {
            tracing::warn!("Scheduler already running");
            return;
        }

        {
            let now = Utc::now();
            let mut state = self.inner.state.lock().await;
            for entry in state.jobs.values_mut() {
                entry.job.rearm(now);
            }
        }

        let shutdown = CancellationToken::new();
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(inner.run_loop(shutdown.clone()));

        *control = Some(ControlLoop {
            shutdown,
            handle,
            started_at: Utc::now(),
        });

        tracing::info!(
            "Job scheduler started (check_interval={:?}, max_concurrent_jobs={})",
            self.inner.settings.check_interval,
            self.inner.settings.max_concurrent_jobs
        );
    }

    /// Stop the control loop, cancel every run in flight, and wait for all
    /// of them to finish before returning. Runs launched by
    /// [`trigger_job`](Self::trigger_job) are drained even when the control
    /// loop was never started.
    pub async fn stop(&self) {
        // Held until the runs are drained so a concurrent start() waits.
        let mut control = self.inner.control.lock().await;
        tracing::info!("Stopping job scheduler...");
        if let Some(control_loop) = control.take() {
            control_loop.shutdown.cancel();
            if let Err(e) = control_loop.handle.await {
                tracing::error!("Scheduler control loop ended abnormally: {}", e);
            }
        }

        let running: Vec<(JobId, RunningJob)> = {
            let mut state = self.inner.state.lock().await;
            state.running.drain().collect()
        };
        for (_, run) in &running {
            run.cancel.cancel();
        }

        let mut outcomes = Vec::with_capacity(running.len());
        for (job_id, run) in running {
            outcomes.push((job_id, join_run(run.handle).await));
        }

        let now = Utc::now();
        let mut state = self.inner.state.lock().await;
        for (job_id, outcome) in outcomes {
            state.apply_outcome(job_id, outcome, now);
        }

        tracing::info!("Job scheduler stopped");
    }

    /// Whether the control loop is running.
    pub async fn is_running(&self) -> bool {
        self.inner.control.lock().await.is_some()
    }

    /// Snapshot of one job.
    pub async fn get_job_status(&self, job_id: JobId) -> Option<JobInfo> {
        let mut guard = self.inner.state.lock().await;
        let state = &mut *guard;
        state.reap_finished().await;
        state
            .jobs
            .get(&job_id)
            .map(|entry| entry.job.to_info(state.running.contains_key(&job_id)))
    }

    /// Snapshots of every job, in registration order.
    pub async fn get_all_jobs_status(&self) -> Vec<JobInfo> {
        let mut guard = self.inner.state.lock().await;
        let state = &mut *guard;
        state.reap_finished().await;
        state.snapshot(|_| true)
    }

    /// Snapshots of the jobs in one namespace, in registration order.
    pub async fn get_jobs_in_namespace(&self, namespace: &str) -> Vec<JobInfo> {
        let mut guard = self.inner.state.lock().await;
        let state = &mut *guard;
        state.reap_finished().await;
        state.snapshot(|job| job.namespace == namespace)
    }

    /// Health report over the registry and the control loop.
    pub async fn get_scheduler_health(&self) -> SchedulerHealth {
        let started_at = self
            .inner
            .control
            .lock()
            .await
            .as_ref()
            .map(|c| c.started_at);

        let mut guard = self.inner.state.lock().await;
        let state = &mut *guard;
        state.reap_finished().await;
        health::assess(
            state.jobs.values().map(|entry| &entry.job),
            state.running.len(),
            started_at,
            self.inner.settings.overdue_threshold,
            Utc::now(),
        )
    }
}

impl SchedulerInner {
    async fn run_loop(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.settings.check_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!("Scheduler control loop received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
    }

    async fn tick(&self) {
        let max = self.settings.max_concurrent_jobs;
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        state.reap_finished().await;

        let now = Utc::now();
        let mut due: Vec<(DateTime<Utc>, u64, JobId)> = state
            .jobs
            .iter()
            .filter(|(id, entry)| entry.job.is_due(now) && !state.running.contains_key(*id))
            .filter_map(|(id, entry)| entry.job.next_run.map(|next| (next, entry.seq, *id)))
            .collect();
        if due.is_empty() {
            return;
        }
        due.sort();

        let mut deferred = 0;
        for (_, _, job_id) in due {
            if state.running.len() >= max {
                deferred += 1;
                continue;
            }
            state.launch(job_id, now);
        }
        if deferred > 0 {
            tracing::debug!(
                "{} due jobs deferred to the next tick ({} slots in use)",
                deferred,
                max
            );
        }
    }
}

impl SchedulerState {
    fn launch(&mut self, job_id: JobId, now: DateTime<Utc>) {
        let Some(entry) = self.jobs.get_mut(&job_id) else {
            tracing::error!("Attempted to launch unknown job: {}", job_id);
            return;
        };
        entry.job.mark_started(now);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(executor::execute(
            Arc::clone(&entry.task),
            entry.job.timeout,
            cancel.clone(),
        ));

        tracing::debug!(
            "Started job '{}' (id={}, run={})",
            entry.job.name,
            job_id,
            entry.job.total_runs
        );
        self.running.insert(job_id, RunningJob { handle, cancel });
    }

    async fn reap_finished(&mut self) {
        let finished: Vec<JobId> = self
            .running
            .iter()
            .filter(|(_, run)| run.handle.is_finished())
            .map(|(id, _)| *id)
            .collect();

        let now = Utc::now();
        for job_id in finished {
            if let Some(run) = self.running.remove(&job_id) {
                let outcome = join_run(run.handle).await;
                self.apply_outcome(job_id, outcome, now);
            }
        }
    }

    fn apply_outcome(
        &mut self,
        job_id: JobId,
        outcome: Result<(), JobExecutionError>,
        now: DateTime<Utc>,
    ) {
        let Some(entry) = self.jobs.get_mut(&job_id) else {
            return;
        };
        let job = &mut entry.job;

        match outcome {
            Ok(()) => {
                job.record_success(now);
                tracing::info!(job_id = %job_id, job_name = %job.name, "Job completed successfully");
            }
            Err(e) if !e.is_failure() => {
                job.record_cancelled();
                tracing::info!(job_id = %job_id, job_name = %job.name, "Job was cancelled");
            }
            Err(e) => match job.record_failure(now, e.to_string()) {
                FailureAction::Retry { attempt, delay } => {
                    tracing::warn!(
                        job_id = %job_id,
                        job_name = %job.name,
                        "Job failed (attempt {}/{}), retrying in {:?}: {}",
                        attempt,
                        job.max_retries,
                        delay,
                        e
                    );
                }
                FailureAction::SelfHeal => {
                    tracing::error!(
                        job_id = %job_id,
                        job_name = %job.name,
                        "Job failed {} times in a row, resetting to its normal interval: {}",
                        job.max_retries,
                        e
                    );
                }
                FailureAction::Paused => {
                    tracing::warn!(job_id = %job_id, job_name = %job.name, "Paused job failed: {}", e);
                }
            },
        }
    }

    fn snapshot(&self, filter: impl Fn(&Job) -> bool) -> Vec<JobInfo> {
        let mut entries: Vec<&RegisteredJob> =
            self.jobs.values().filter(|e| filter(&e.job)).collect();
        entries.sort_by_key(|e| e.seq);
        entries
            .into_iter()
            .map(|e| e.job.to_info(self.running.contains_key(&e.job.id)))
            .collect()
    }
}

/// Await a run task, folding task-level failures into the run outcome.
async fn join_run(
    handle: JoinHandle<Result<(), JobExecutionError>>,
) -> Result<(), JobExecutionError> {
    match handle.await {
        Ok(outcome) => outcome,
        Err(e) if e.is_panic() => Err(JobExecutionError::Panicked(panic_message(
            e.into_panic().as_ref(),
        ))),
        Err(_) => Err(JobExecutionError::Cancelled),
    }
}

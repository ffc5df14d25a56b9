//! Day queue orchestrator: turns scheduler ticks into per-day processing runs.
//!
//! The orchestrator registers one sweep job with the [`JobScheduler`]. Each
//! sweep asks the [`ItemStore`] for pending days and processes them under a
//! second concurrency cap (`max_concurrent_days`), with at most one run per
//! day at any time. Per-day state lives in the store; the orchestrator only
//! tracks which days are in flight in this process.
//!
//! Days that end `Failed` are not picked up again by the sweep, which only
//! selects pending days. A forced manual trigger or an external reset of the
//! day's items brings them back.

pub mod types;

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashSet;
use futures::FutureExt;
use tokio::sync::{Mutex, Notify, Semaphore};

use daylog_core::config::ProcessingConfig;
use daylog_core::error::AppError;
use daylog_core::result::AppResult;
use daylog_core::traits::{ItemStore, ProcessingEngine};
use daylog_core::types::{CallbackId, DayKey, JobId, ProcessingStatus};

use crate::notifier::ProgressNotifier;
use crate::scheduler::JobScheduler;
use crate::scheduler::executor::panic_message;
use crate::scheduler::job::JobOptions;

pub use self::types::{DayStatusReport, ProcessingResult, ProcessingStatistics, QueueStatus};

/// Name of the sweep job registered with the scheduler.
pub const SWEEP_JOB_NAME: &str = "day_queue_sweep";

/// Namespace of the sweep job.
pub const SWEEP_JOB_NAMESPACE: &str = "processing";

/// Runtime settings of a [`DayQueueOrchestrator`].
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Time between sweeps.
    pub processing_interval: Duration,
    /// Maximum number of days processed at once.
    pub max_concurrent_days: usize,
    /// Upper bound on days picked up by one sweep.
    pub max_days_per_sweep: Option<usize>,
    /// Timeout of one sweep.
    pub sweep_timeout: Duration,
    /// Retry budget of the sweep job.
    pub sweep_max_retries: u32,
}

impl OrchestratorSettings {
    /// Build settings from the configuration section.
    pub fn from_config(config: &ProcessingConfig) -> Self {
        Self {
            processing_interval: Duration::from_secs(config.processing_interval_seconds),
            max_concurrent_days: config.max_concurrent_days,
            max_days_per_sweep: config.max_days_per_sweep,
            sweep_timeout: Duration::from_secs(config.sweep_timeout_seconds),
            sweep_max_retries: config.sweep_max_retries,
        }
    }

    fn validate(&self) -> AppResult<()> {
        if self.processing_interval.is_zero() {
            return Err(AppError::configuration(
                "processing_interval must be non-zero",
            ));
        }
        if self.max_concurrent_days == 0 {
            return Err(AppError::configuration(
                "max_concurrent_days must be at least 1",
            ));
        }
        if self.max_days_per_sweep == Some(0) {
            return Err(AppError::configuration(
                "max_days_per_sweep must be at least 1 when set",
            ));
        }
        if self.sweep_timeout.is_zero() {
            return Err(AppError::configuration("sweep_timeout must be non-zero"));
        }
        if self.sweep_max_retries == 0 {
            return Err(AppError::configuration(
                "sweep_max_retries must be at least 1",
            ));
        }
        Ok(())
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&ProcessingConfig::default())
    }
}

/// Day-partitioned processing queue.
///
/// Cheap to clone; clones share the same active set and concurrency cap.
#[derive(Clone)]
pub struct DayQueueOrchestrator {
    inner: Arc<OrchestratorInner>,
}

impl std::fmt::Debug for DayQueueOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DayQueueOrchestrator")
            .field("settings", &self.inner.settings)
            .field("active", &self.inner.active.len())
            .field("queued", &self.inner.queued.len())
            .finish()
    }
}

struct OrchestratorInner {
    settings: OrchestratorSettings,
    scheduler: JobScheduler,
    store: Arc<dyn ItemStore>,
    engine: Arc<dyn ProcessingEngine>,
    notifier: Arc<ProgressNotifier>,
    /// Days with a run in flight
    active: DashSet<DayKey>,
    /// Days reserved by a non-forced request, from before its slot wait until it ends
    queued: DashSet<DayKey>,
    /// One permit per concurrently processed day
    slots: Arc<Semaphore>,
    /// Woken whenever a day leaves the active set
    released: Notify,
    /// Sweep job id while registered
    sweep_job: Mutex<Option<JobId>>,
}

/// How a run of one day was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunMode {
    /// Picked from the store's pending days by a batch or a sweep
    Pending,
    /// Manual trigger without force
    Manual,
    /// Manual trigger with force
    Forced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClaimSlot {
    Queued,
    Active,
}

/// Ownership of a day in the queued or the active set. Dropping it releases the day.
struct DayClaim {
    inner: Arc<OrchestratorInner>,
    key: DayKey,
    slot: ClaimSlot,
}

impl Drop for DayClaim {
    fn drop(&mut self) {
        match self.slot {
            ClaimSlot::Queued => {
                self.inner.queued.remove(&self.key);
            }
            ClaimSlot::Active => {
                self.inner.active.remove(&self.key);
                self.inner.released.notify_waiters();
            }
        }
    }
}

impl DayQueueOrchestrator {
    /// Create an orchestrator over explicitly injected collaborators.
    pub fn new(
        settings: OrchestratorSettings,
        scheduler: JobScheduler,
        store: Arc<dyn ItemStore>,
        engine: Arc<dyn ProcessingEngine>,
        notifier: Arc<ProgressNotifier>,
    ) -> AppResult<Self> {
        settings.validate()?;
        let slots = Arc::new(Semaphore::new(settings.max_concurrent_days));
        Ok(Self {
            inner: Arc::new(OrchestratorInner {
                settings,
                scheduler,
                store,
                engine,
                notifier,
                active: DashSet::new(),
                queued: DashSet::new(),
                slots,
                released: Notify::new(),
                sweep_job: Mutex::new(None),
            }),
        })
    }

    /// Recover days interrupted by a previous process, then register the sweep job.
    ///
    /// The first sweep runs on the scheduler's next tick. Calling this twice
    /// returns the already registered job.
    pub async fn initialize(&self) -> AppResult<JobId> {
        let mut sweep_job = self.inner.sweep_job.lock().await;
        if let Some(job_id) = *sweep_job {
            tracing::warn!("Day queue already initialized (sweep job {})", job_id);
            return Ok(job_id);
        }

        let recovered = self.inner.recover_interrupted().await?;
        if recovered > 0 {
            tracing::info!(
                "Reset {} days left processing by a previous run back to pending",
                recovered
            );
        }

        let settings = &self.inner.settings;
        let options = JobOptions::new(
            SWEEP_JOB_NAME,
            SWEEP_JOB_NAMESPACE,
            settings.processing_interval,
        )
        .with_max_retries(settings.sweep_max_retries)
        .with_timeout(settings.sweep_timeout)
        .with_initial_delay(Duration::ZERO);

        let weak: Weak<OrchestratorInner> = Arc::downgrade(&self.inner);
        let job_id = self
            .inner
            .scheduler
            .add_job(options, move || {
                let weak = weak.clone();
                async move {
                    match weak.upgrade() {
                        Some(inner) => inner.sweep().await,
                        None => Ok(()),
                    }
                }
            })
            .await?;

        *sweep_job = Some(job_id);
        tracing::info!(
            "Day queue initialized (sweep every {:?}, max_concurrent_days={})",
            settings.processing_interval,
            settings.max_concurrent_days
        );
        Ok(job_id)
    }

    /// Deregister the sweep job. Runs in flight are left to drain.
    pub async fn shutdown(&self) {
        let job_id = self.inner.sweep_job.lock().await.take();
        if let Some(job_id) = job_id {
            self.inner.scheduler.remove_job(job_id).await;
            tracing::info!(
                "Day queue shut down ({} days still in flight)",
                self.inner.active.len()
            );
        }
    }

    /// Id of the registered sweep job.
    pub async fn sweep_job_id(&self) -> Option<JobId> {
        *self.inner.sweep_job.lock().await
    }

    /// Process one day now.
    ///
    /// Without `force`, a day that is already in flight or waiting for a slot
    /// is not run again: the call returns at once with status `Processing`. With `force`, the
    /// day is processed whatever its stored status, after any run in flight
    /// has released it.
    pub async fn trigger_day_processing(&self, key: DayKey, force: bool) -> ProcessingResult {
        if !force && self.inner.is_busy(&key) {
            tracing::debug!("Day {} is already being processed", key);
            return ProcessingResult::already_processing(key);
        }

        let mode = if force { RunMode::Forced } else { RunMode::Manual };
        let inner = Arc::clone(&self.inner);
        let task_key = key.clone();
        match tokio::spawn(async move { inner.process_key(task_key, mode).await }).await {
            Ok(result) => result,
            Err(e) => ProcessingResult::failed(
                key,
                format!("Processing task failed: {}", e),
                Duration::ZERO,
            ),
        }
    }

    /// Process up to `max_keys` pending days concurrently, bounded by
    /// `max_concurrent_days`. Per-day failures become `Failed` results.
    pub async fn trigger_batch_processing(
        &self,
        max_keys: Option<usize>,
    ) -> AppResult<Vec<ProcessingResult>> {
        self.inner.run_batch(max_keys).await
    }

    /// Status of every known day plus the days in flight.
    pub async fn get_processing_queue_status(&self) -> AppResult<QueueStatus> {
        let summaries = self.inner.store.get_key_summaries().await?;

        let mut status = QueueStatus {
            total: summaries.len(),
            pending: 0,
            processing: 0,
            completed: 0,
            failed: 0,
            active: self.active_days(),
            per_key: Default::default(),
        };
        for summary in summaries {
            match summary.status {
                ProcessingStatus::Pending => status.pending += 1,
                ProcessingStatus::Processing => status.processing += 1,
                ProcessingStatus::Completed => status.completed += 1,
                ProcessingStatus::Failed => status.failed += 1,
            }
            let active = self.inner.active.contains(&summary.key);
            status
                .per_key
                .insert(summary.key.clone(), DayStatusReport::new(summary, active));
        }
        Ok(status)
    }

    /// Aggregate statistics, recomputed from the store.
    pub async fn get_processing_statistics(&self) -> AppResult<ProcessingStatistics> {
        let summaries = self.inner.store.get_key_summaries().await?;
        Ok(ProcessingStatistics::from_summaries(&summaries, Utc::now()))
    }

    /// Status of one day, or `None` if the store does not know it.
    pub async fn get_day_status(&self, key: &DayKey) -> AppResult<Option<DayStatusReport>> {
        let summary = self.inner.store.get_key_summary(key).await?;
        Ok(summary.map(|s| DayStatusReport::new(s, self.inner.active.contains(key))))
    }

    /// Days currently in flight, sorted.
    pub fn active_days(&self) -> Vec<DayKey> {
        let mut days: Vec<DayKey> = self.inner.active.iter().map(|k| k.key().clone()).collect();
        days.sort();
        days
    }

    /// Register a progress callback.
    pub async fn add_progress_callback<F, Fut>(&self, callback: F) -> CallbackId
    where
        F: Fn(DayKey, ProcessingStatus) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = AppResult<()>> + Send + 'static,
    {
        self.inner.notifier.add(callback).await
    }

    /// Unregister a progress callback.
    pub async fn remove_progress_callback(&self, id: CallbackId) -> bool {
        self.inner.notifier.remove(id).await
    }
}

impl OrchestratorInner {
    /// Reset days stuck in `Processing` by a previous process to `Pending`.
    async fn recover_interrupted(&self) -> AppResult<usize> {
        let stuck = self
            .store
            .get_keys_with_status(ProcessingStatus::Processing)
            .await?;
        for key in &stuck {
            self.store.set_status(key, ProcessingStatus::Pending).await?;
            tracing::debug!("Recovered interrupted day {}", key);
        }
        Ok(stuck.len())
    }

    /// One scheduled sweep. Fails only if the store cannot be read or every day failed.
    async fn sweep(self: Arc<Self>) -> AppResult<()> {
        let results = self.run_batch(self.settings.max_days_per_sweep).await?;
        if results.is_empty() {
            tracing::trace!("Sweep found no pending days");
            return Ok(());
        }

        let ran = results.iter().filter(|r| r.started()).count();
        let failed = results
            .iter()
            .filter(|r| r.started() && r.status == ProcessingStatus::Failed)
            .count();
        tracing::info!(
            "Sweep processed {} days ({} failed, {} skipped)",
            ran,
            failed,
            results.len() - ran
        );

        if ran > 0 && failed == ran {
            return Err(AppError::external_service(format!(
                "All {} days in sweep failed",
                failed
            )));
        }
        Ok(())
    }

    async fn run_batch(self: &Arc<Self>, max_keys: Option<usize>) -> AppResult<Vec<ProcessingResult>> {
        let keys = self.store.get_pending_keys(max_keys).await?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        tracing::debug!("Processing batch of {} pending days", keys.len());

        let tasks: Vec<_> = keys
            .into_iter()
            .map(|key| {
                let inner = Arc::clone(self);
                let task_key = key.clone();
                (
                    key,
                    tokio::spawn(async move { inner.process_key(task_key, RunMode::Pending).await }),
                )
            })
            .collect();

        let mut results = Vec::with_capacity(tasks.len());
        for (key, handle) in tasks {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(key = %key, "Processing task failed: {}", e);
                    ProcessingResult::failed(
                        key,
                        format!("Processing task failed: {}", e),
                        Duration::ZERO,
                    )
                }
            };
            results.push(result);
        }
        Ok(results)
    }

    /// Whether a run of the day is in flight or waiting for a slot.
    fn is_busy(&self, key: &DayKey) -> bool {
        self.active.contains(key) || self.queued.contains(key)
    }

    async fn process_key(self: Arc<Self>, key: DayKey, mode: RunMode) -> ProcessingResult {
        let forced = mode == RunMode::Forced;
        let _reservation = if forced {
            None
        } else {
            match self.reserve(&key) {
                Some(reservation) => Some(reservation),
                None => return ProcessingResult::already_processing(key),
            }
        };

        let _permit = match Arc::clone(&self.slots).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                return ProcessingResult::failed(key, "Processing slots closed", Duration::ZERO);
            }
        };

        let Some(_claim) = self.claim(&key, forced).await else {
            tracing::debug!("Day {} was claimed by a concurrent run", key);
            return ProcessingResult::already_processing(key);
        };

        // A concurrent batch may have finished the day since it was listed as pending.
        if mode == RunMode::Pending {
            match self.store.get_key_summary(&key).await {
                Ok(Some(summary)) if summary.status != ProcessingStatus::Pending => {
                    tracing::debug!(
                        key = %key,
                        "Day is no longer pending ({}), skipping",
                        summary.status
                    );
                    return ProcessingResult::not_pending(key, summary.status);
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(key = %key, "Failed to re-read day status: {}", e);
                    return ProcessingResult::failed(key, e.to_string(), Duration::ZERO);
                }
            }
        }

        self.run_claimed(key).await
    }

    /// Reserve the day for a non-forced request before it waits for a slot.
    fn reserve(self: &Arc<Self>, key: &DayKey) -> Option<DayClaim> {
        if self.active.contains(key) || !self.queued.insert(key.clone()) {
            return None;
        }
        Some(DayClaim {
            inner: Arc::clone(self),
            key: key.clone(),
            slot: ClaimSlot::Queued,
        })
    }

    /// Put the day in the active set. With `force`, wait for a run in flight to release it.
    async fn claim(self: &Arc<Self>, key: &DayKey, force: bool) -> Option<DayClaim> {
        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            if self.active.insert(key.clone()) {
                return Some(DayClaim {
                    inner: Arc::clone(self),
                    key: key.clone(),
                    slot: ClaimSlot::Active,
                });
            }
            if !force {
                return None;
            }
            tracing::debug!("Forced run of day {} waiting for the run in flight", key);
            released.await;
        }
    }

    async fn run_claimed(&self, key: DayKey) -> ProcessingResult {
        let started = Instant::now();
        tracing::info!(key = %key, "Processing day");
        self.notifier
            .notify_all(&key, ProcessingStatus::Processing)
            .await;

        let outcome = AssertUnwindSafe(self.execute(&key, started))
            .catch_unwind()
            .await;
        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                self.mark_failed(&key).await;
                ProcessingResult::failed(key.clone(), e.to_string(), started.elapsed())
            }
            Err(panic) => {
                self.mark_failed(&key).await;
                ProcessingResult::failed(
                    key.clone(),
                    format!("Processing panicked: {}", panic_message(panic.as_ref())),
                    started.elapsed(),
                )
            }
        };

        match &result.error_message {
            None => tracing::info!(
                key = %key,
                status = %result.status,
                "Day completed: {} items, {} units in {}ms",
                result.items_processed,
                result.units_created,
                result.duration_ms
            ),
            Some(error) => tracing::warn!(key = %key, status = %result.status, "Day failed: {}", error),
        }

        self.notifier.notify_all(&key, result.status).await;
        result
    }

    async fn execute(&self, key: &DayKey, started: Instant) -> AppResult<ProcessingResult> {
        self.store
            .set_status(key, ProcessingStatus::Processing)
            .await?;

        let items = self.store.get_items(key).await?;
        if items.is_empty() {
            self.store
                .set_status(key, ProcessingStatus::Completed)
                .await?;
            self.store.set_units_created(key, 0).await?;
            return Ok(ProcessingResult::completed(
                key.clone(),
                0,
                0,
                started.elapsed(),
            ));
        }

        let output = self.engine.process(key, &items).await?;

        if !output.errors.is_empty() {
            self.store.set_status(key, ProcessingStatus::Failed).await?;
            return Ok(ProcessingResult {
                items_processed: output.items_processed,
                units_created: output.units_created,
                ..ProcessingResult::failed(key.clone(), output.errors.join("; "), started.elapsed())
            });
        }

        self.store
            .set_status(key, ProcessingStatus::Completed)
            .await?;
        self.store
            .set_units_created(key, output.units_created)
            .await?;
        Ok(ProcessingResult::completed(
            key.clone(),
            output.items_processed,
            output.units_created,
            started.elapsed(),
        ))
    }

    async fn mark_failed(&self, key: &DayKey) {
        if let Err(e) = self.store.set_status(key, ProcessingStatus::Failed).await {
            tracing::error!(key = %key, "Failed to mark day as failed: {}", e);
        }
    }
}

//! Shared test helpers for integration tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use daylog_core::error::AppError;
use daylog_core::result::AppResult;
use daylog_core::traits::ProcessingEngine;
use daylog_core::types::{DayKey, EngineOutput, Item, ProcessingStatus};
use daylog_worker::{
    DayQueueOrchestrator, JobScheduler, MemoryItemStore, OrchestratorSettings, ProgressNotifier,
    SchedulerSettings,
};

/// Scheduler settings with millisecond ticks.
pub fn fast_scheduler_settings(max_concurrent_jobs: usize) -> SchedulerSettings {
    SchedulerSettings {
        check_interval: Duration::from_millis(10),
        max_concurrent_jobs,
        default_max_retries: 3,
        default_retry_base_delay: Duration::from_millis(10),
        default_timeout: Duration::from_secs(5),
        overdue_threshold: Duration::from_secs(3600),
    }
}

/// Orchestrator settings with a short sweep interval.
pub fn fast_orchestrator_settings(max_concurrent_days: usize) -> OrchestratorSettings {
    OrchestratorSettings {
        processing_interval: Duration::from_millis(100),
        max_concurrent_days,
        max_days_per_sweep: None,
        sweep_timeout: Duration::from_secs(5),
        sweep_max_retries: 3,
    }
}

/// Tracks how many holders are inside a section and the highest count seen.
#[derive(Debug, Default)]
pub struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl Gauge {
    pub fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    pub fn leave(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Engine double with a scripted delay and a set of days that fail.
#[derive(Debug, Default)]
pub struct ScriptedEngine {
    delay: Duration,
    failing: Mutex<HashSet<DayKey>>,
    calls: Mutex<Vec<DayKey>>,
    pub gauge: Gauge,
}

impl ScriptedEngine {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    /// Make every run of `key` fail until [`heal`](Self::heal) is called.
    pub fn fail_on(self, key: &DayKey) -> Self {
        self.failing.lock().unwrap().insert(key.clone());
        self
    }

    pub fn heal(&self, key: &DayKey) {
        self.failing.lock().unwrap().remove(key);
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_for(&self, key: &DayKey) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|k| *k == key)
            .count()
    }
}

#[async_trait]
impl ProcessingEngine for ScriptedEngine {
    async fn process(&self, key: &DayKey, items: &[Item]) -> AppResult<EngineOutput> {
        self.calls.lock().unwrap().push(key.clone());
        self.gauge.enter();
        tokio::time::sleep(self.delay).await;
        self.gauge.leave();

        if self.failing.lock().unwrap().contains(key) {
            return Err(AppError::external_service(format!(
                "engine rejected day {}",
                key
            )));
        }
        Ok(EngineOutput {
            items_processed: items.len() as u64,
            units_created: items.len().min(1) as u64,
            duration: self.delay,
            errors: Vec::new(),
        })
    }
}

/// A wired scheduler and day queue over an in-memory store.
pub struct TestQueue {
    pub scheduler: JobScheduler,
    pub store: Arc<MemoryItemStore>,
    pub engine: Arc<ScriptedEngine>,
    pub orchestrator: DayQueueOrchestrator,
}

impl TestQueue {
    pub fn new(engine: ScriptedEngine, max_concurrent_days: usize) -> Self {
        Self::with_store(engine, max_concurrent_days, Arc::new(MemoryItemStore::new()))
    }

    pub fn with_store(
        engine: ScriptedEngine,
        max_concurrent_days: usize,
        store: Arc<MemoryItemStore>,
    ) -> Self {
        let scheduler = JobScheduler::new(fast_scheduler_settings(5)).unwrap();
        let engine = Arc::new(engine);
        let orchestrator = DayQueueOrchestrator::new(
            fast_orchestrator_settings(max_concurrent_days),
            scheduler.clone(),
            store.clone(),
            engine.clone(),
            Arc::new(ProgressNotifier::with_timeout(Duration::from_millis(100))),
        )
        .unwrap();

        Self {
            scheduler,
            store,
            engine,
            orchestrator,
        }
    }

    /// File `count` items under `key`.
    pub fn seed(&self, key: &str, count: usize) -> DayKey {
        let key = DayKey::new(key);
        if count == 0 {
            self.store.ensure_key(key.clone());
        }
        for i in 0..count {
            self.store
                .insert_item(Item::new(key.clone(), format!("event {}", i)));
        }
        key
    }

    /// Register a callback that records every notification.
    pub async fn record_progress(&self) -> Arc<Mutex<Vec<(DayKey, ProcessingStatus)>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        self.orchestrator
            .add_progress_callback(move |key, status| {
                let sink = Arc::clone(&sink);
                async move {
                    sink.lock().unwrap().push((key, status));
                    Ok(())
                }
            })
            .await;
        seen
    }
}

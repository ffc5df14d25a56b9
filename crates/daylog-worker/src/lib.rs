//! Scheduling and day-partitioned processing for Daylog.
//!
//! This crate provides:
//! - An interval job scheduler with bounded concurrency, retry backoff, and self-healing
//! - A day queue orchestrator that sweeps pending days through a processing engine
//! - A progress notifier that fans status transitions out to callbacks
//! - An in-memory item store and an exact-duplicate engine

pub mod engine;
pub mod notifier;
pub mod orchestrator;
pub mod scheduler;
pub mod store;

pub use engine::ExactDuplicateEngine;
pub use notifier::ProgressNotifier;
pub use orchestrator::{DayQueueOrchestrator, OrchestratorSettings, ProcessingResult};
pub use scheduler::job::{JobInfo, JobOptions};
pub use scheduler::{JobScheduler, JobStatus, SchedulerSettings};
pub use store::MemoryItemStore;

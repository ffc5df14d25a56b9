//! Daylog Scheduler: day-partitioned processing service
//!
//! Main entry point that wires the scheduler, the day queue, and their
//! collaborators together and runs until interrupted.

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{EnvFilter, fmt};

use daylog_core::config::AppConfig;
use daylog_core::error::AppError;
use daylog_worker::{
    DayQueueOrchestrator, ExactDuplicateEngine, JobScheduler, MemoryItemStore,
    OrchestratorSettings, ProgressNotifier, SchedulerSettings,
};

#[tokio::main]
async fn main() {
    let config = match load_configuration() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if let Err(e) = run(config).await {
        tracing::error!("Scheduler error: {}", e);
        std::process::exit(1);
    }
}

/// Load configuration from file and environment
fn load_configuration() -> Result<AppConfig, AppError> {
    let env = std::env::var("DAYLOG_ENV").unwrap_or_else(|_| "development".to_string());
    AppConfig::load(&env)
}

/// Initialize tracing/logging
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

/// Main run function
async fn run(config: AppConfig) -> Result<(), AppError> {
    tracing::info!("Starting Daylog scheduler v{}", env!("CARGO_PKG_VERSION"));

    // ── Step 1: Collaborators ────────────────────────────────────
    let store = Arc::new(MemoryItemStore::new());
    let engine = Arc::new(ExactDuplicateEngine::new());
    let notifier = Arc::new(ProgressNotifier::with_timeout(Duration::from_secs(
        config.processing.callback_timeout_seconds,
    )));

    // ── Step 2: Scheduler ────────────────────────────────────────
    let scheduler = JobScheduler::new(SchedulerSettings::from_config(&config.scheduler))?;

    // ── Step 3: Day queue ────────────────────────────────────────
    let orchestrator = DayQueueOrchestrator::new(
        OrchestratorSettings::from_config(&config.processing),
        scheduler.clone(),
        store,
        engine,
        notifier,
    )?;

    orchestrator
        .add_progress_callback(|key, status| async move {
            tracing::info!(key = %key, status = %status, "Day progress");
            Ok(())
        })
        .await;

    let sweep_job = orchestrator.initialize().await?;
    tracing::info!("Day queue sweep registered as job {}", sweep_job);

    // ── Step 4: Run until interrupted ────────────────────────────
    scheduler.start().await;
    tracing::info!("Daylog scheduler running, press Ctrl-C to stop");

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }

    // ── Step 5: Graceful shutdown ────────────────────────────────
    tracing::info!("Shutting down...");
    orchestrator.shutdown().await;
    scheduler.stop().await;

    let health = scheduler.get_scheduler_health().await;
    tracing::info!(
        "Scheduler stopped ({} jobs registered, {} issues)",
        health.total_jobs,
        health.issues.len()
    );

    tracing::info!("Daylog scheduler shut down gracefully");
    Ok(())
}

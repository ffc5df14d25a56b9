//! Integration tests for the job scheduler: retries, self-healing, pausing,
//! the concurrency cap, and shutdown.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;

use daylog_core::error::AppError;
use daylog_worker::{JobOptions, JobScheduler, JobStatus};

use crate::helpers::{Gauge, fast_scheduler_settings};

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_fails_twice_then_succeeds() {
    let scheduler = JobScheduler::new(fast_scheduler_settings(5)).unwrap();
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);

    let id = scheduler
        .add_job(
            JobOptions::new("flaky", "tests", Duration::from_secs(1))
                .with_max_retries(2)
                .with_retry_base_delay(Duration::from_millis(20))
                .with_initial_delay(Duration::ZERO),
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    if attempt <= 2 {
                        Err(AppError::external_service(format!("attempt {} failed", attempt)))
                    } else {
                        Ok(())
                    }
                }
            },
        )
        .await
        .unwrap();

    scheduler.start().await;
    tokio::time::sleep(Duration::from_millis(1500)).await;
    let info = scheduler.get_job_status(id).await.unwrap();
    scheduler.stop().await;

    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(info.status, JobStatus::Completed);
    assert_eq!(info.error_count, 0);
    assert_eq!(info.total_failures, 2);
    assert!(info.last_error.is_none());
}

#[tokio::test]
async fn test_exhausted_retries_self_heal() {
    let scheduler = JobScheduler::new(fast_scheduler_settings(5)).unwrap();
    let id = scheduler
        .add_job(
            JobOptions::new("broken", "tests", Duration::from_secs(60))
                .with_max_retries(2)
                .with_retry_base_delay(Duration::from_millis(20))
                .with_initial_delay(Duration::ZERO),
            || async { Err(AppError::storage("disk unavailable")) },
        )
        .await
        .unwrap();

    scheduler.start().await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    let info = scheduler.get_job_status(id).await.unwrap();
    let health = scheduler.get_scheduler_health().await;
    scheduler.stop().await;

    assert_eq!(info.total_failures, 2);
    assert_eq!(info.error_count, 0);
    assert_eq!(info.status, JobStatus::Pending);
    let next_run = info.next_run.unwrap();
    assert!(next_run > Utc::now() + chrono::Duration::seconds(50));
    assert!(info.last_error.unwrap().contains("disk unavailable"));
    assert_eq!(health.permanently_failed_jobs, 0);
}

#[tokio::test]
async fn test_timeout_counts_as_failure() {
    let scheduler = JobScheduler::new(fast_scheduler_settings(5)).unwrap();
    let id = scheduler
        .add_job(
            JobOptions::new("stuck", "tests", Duration::from_secs(60))
                .with_timeout(Duration::from_millis(50))
                .with_retry_base_delay(Duration::from_secs(30))
                .with_initial_delay(Duration::ZERO),
            || async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            },
        )
        .await
        .unwrap();

    scheduler.start().await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    let info = scheduler.get_job_status(id).await.unwrap();
    scheduler.stop().await;

    assert_eq!(info.error_count, 1);
    assert_eq!(info.status, JobStatus::Pending);
    assert!(info.last_error.unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_pause_and_resume() {
    let scheduler = JobScheduler::new(fast_scheduler_settings(5)).unwrap();
    let id = scheduler
        .add_job(
            JobOptions::new("report", "tests", Duration::from_secs(3600)),
            || async { Ok(()) },
        )
        .await
        .unwrap();

    assert!(scheduler.pause_job(id).await);
    let paused = scheduler.get_job_status(id).await.unwrap();
    assert_eq!(paused.status, JobStatus::Paused);
    assert!(paused.next_run.is_none());
    assert!(!scheduler.trigger_job(id).await);

    assert!(scheduler.resume_job(id).await);
    let resumed = scheduler.get_job_status(id).await.unwrap();
    assert_eq!(resumed.status, JobStatus::Pending);
    assert!(resumed.next_run.unwrap() <= Utc::now());
    assert!(!scheduler.resume_job(id).await);
}

#[tokio::test]
async fn test_running_jobs_never_exceed_cap() {
    let scheduler = JobScheduler::new(fast_scheduler_settings(2)).unwrap();
    let gauge = Arc::new(Gauge::default());
    let runs = Arc::new(AtomicUsize::new(0));

    for i in 0..5 {
        let gauge = Arc::clone(&gauge);
        let runs = Arc::clone(&runs);
        scheduler
            .add_job(
                JobOptions::new(format!("job-{}", i), "tests", Duration::from_secs(3600))
                    .with_initial_delay(Duration::ZERO),
                move || {
                    let gauge = Arc::clone(&gauge);
                    let runs = Arc::clone(&runs);
                    async move {
                        gauge.enter();
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        gauge.leave();
                        runs.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                },
            )
            .await
            .unwrap();
    }

    scheduler.start().await;
    tokio::time::sleep(Duration::from_millis(500)).await;
    scheduler.stop().await;

    assert_eq!(runs.load(Ordering::SeqCst), 5);
    assert!(gauge.peak() <= 2, "peak concurrency was {}", gauge.peak());
    let jobs = scheduler.get_all_jobs_status().await;
    assert!(jobs.iter().all(|j| j.status == JobStatus::Completed));
}

#[tokio::test]
async fn test_stop_awaits_cancelled_runs() {
    let scheduler = JobScheduler::new(fast_scheduler_settings(5)).unwrap();
    let dropped = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&dropped);

    let id = scheduler
        .add_job(
            JobOptions::new("long", "tests", Duration::from_secs(3600))
                .with_initial_delay(Duration::ZERO),
            move || {
                let guard = DropFlag(Arc::clone(&flag));
                async move {
                    let _guard = guard;
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(())
                }
            },
        )
        .await
        .unwrap();

    scheduler.start().await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(scheduler.get_job_status(id).await.unwrap().is_running);

    scheduler.stop().await;
    assert!(dropped.load(Ordering::SeqCst));
    assert!(!scheduler.is_running().await);

    let info = scheduler.get_job_status(id).await.unwrap();
    assert_eq!(info.status, JobStatus::Cancelled);
    assert!(!info.is_running);
    assert_eq!(info.error_count, 0);

    let health = scheduler.get_scheduler_health().await;
    assert!(!health.running);
    assert_eq!(health.running_jobs, 0);
    assert!(health.issues.iter().any(|i| i.issue_type == "scheduler_not_running"));
}

#[tokio::test]
async fn test_removing_job_cancels_its_run() {
    let scheduler = JobScheduler::new(fast_scheduler_settings(5)).unwrap();
    let dropped = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&dropped);

    let id = scheduler
        .add_job(
            JobOptions::new("long", "tests", Duration::from_secs(3600)),
            move || {
                let guard = DropFlag(Arc::clone(&flag));
                async move {
                    let _guard = guard;
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(())
                }
            },
        )
        .await
        .unwrap();

    assert!(scheduler.trigger_job(id).await);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(scheduler.remove_job(id).await);
    assert!(dropped.load(Ordering::SeqCst));
    assert!(scheduler.get_job_status(id).await.is_none());
}

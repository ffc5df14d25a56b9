//! Integration tests for the day queue: batches, sweeps, crash recovery,
//! per-day mutual exclusion, and progress callbacks.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use daylog_core::error::AppError;
use daylog_core::traits::ItemStore;
use daylog_core::types::{DayKey, Item, ProcessingStatus};
use daylog_worker::MemoryItemStore;
use daylog_worker::orchestrator::{SWEEP_JOB_NAME, SWEEP_JOB_NAMESPACE};

use crate::helpers::{ScriptedEngine, TestQueue};

#[tokio::test]
async fn test_batch_of_empty_days_completes() {
    let queue = TestQueue::new(ScriptedEngine::new(Duration::ZERO), 2);
    for day in 1..=5 {
        queue.seed(&format!("2024-06-0{}", day), 0);
    }
    let before = queue
        .orchestrator
        .get_processing_statistics()
        .await
        .unwrap();

    let results = queue
        .orchestrator
        .trigger_batch_processing(None)
        .await
        .unwrap();

    assert_eq!(results.len(), 5);
    assert!(results.iter().all(|r| r.status == ProcessingStatus::Completed));
    assert!(results.iter().all(|r| r.items_processed == 0));
    assert_eq!(queue.engine.calls(), 0);

    let after = queue
        .orchestrator
        .get_processing_statistics()
        .await
        .unwrap();
    assert_eq!(after.total_keys_processed, before.total_keys_processed + 5);
    assert_eq!(after.success_rate, 1.0);
}

#[tokio::test]
async fn test_active_days_never_exceed_cap() {
    let queue = TestQueue::new(ScriptedEngine::new(Duration::from_millis(40)), 2);
    for day in 1..=6 {
        queue.seed(&format!("2024-06-1{}", day), 3);
    }

    let results = queue
        .orchestrator
        .trigger_batch_processing(None)
        .await
        .unwrap();

    assert_eq!(results.len(), 6);
    assert!(results.iter().all(|r| r.is_success()));
    assert_eq!(queue.engine.calls(), 6);
    assert!(queue.engine.gauge.peak() <= 2, "peak was {}", queue.engine.gauge.peak());
    assert!(queue.orchestrator.active_days().is_empty());

    let stats = queue
        .orchestrator
        .get_processing_statistics()
        .await
        .unwrap();
    assert_eq!(stats.total_items_processed, 18);
    assert_eq!(stats.total_units_created, 6);
}

#[tokio::test]
async fn test_batch_respects_max_keys() {
    let queue = TestQueue::new(ScriptedEngine::new(Duration::ZERO), 3);
    for day in 1..=4 {
        queue.seed(&format!("2024-07-0{}", day), 1);
    }

    let results = queue
        .orchestrator
        .trigger_batch_processing(Some(3))
        .await
        .unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].key, DayKey::new("2024-07-01"));

    let status = queue
        .orchestrator
        .get_processing_queue_status()
        .await
        .unwrap();
    assert_eq!(status.total, 4);
    assert_eq!(status.completed, 3);
    assert_eq!(status.pending, 1);
    assert!(status.active.is_empty());
    assert_eq!(
        status.per_key[&DayKey::new("2024-07-04")].status,
        ProcessingStatus::Pending
    );
}

#[tokio::test]
async fn test_failed_day_is_not_swept_again() {
    let bad = DayKey::new("2024-08-01");
    let queue = TestQueue::new(ScriptedEngine::new(Duration::ZERO).fail_on(&bad), 2);
    queue.seed("2024-08-01", 2);
    let good = queue.seed("2024-08-02", 2);

    queue.orchestrator.initialize().await.unwrap();
    queue.scheduler.start().await;
    tokio::time::sleep(Duration::from_millis(450)).await;
    queue.orchestrator.shutdown().await;
    queue.scheduler.stop().await;

    assert_eq!(queue.engine.calls_for(&bad), 1);
    assert_eq!(queue.engine.calls_for(&good), 1);

    let report = queue.orchestrator.get_day_status(&bad).await.unwrap().unwrap();
    assert_eq!(report.status, ProcessingStatus::Failed);
    assert!(!report.active);
    assert!(queue.store.get_pending_keys(None).await.unwrap().is_empty());

    let stats = queue
        .orchestrator
        .get_processing_statistics()
        .await
        .unwrap();
    assert_eq!(stats.total_keys_processed, 2);
    assert!((stats.success_rate - 0.5).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_engine_failure_reported_in_result() {
    let bad = DayKey::new("2024-08-03");
    let queue = TestQueue::new(ScriptedEngine::new(Duration::ZERO).fail_on(&bad), 2);
    queue.seed("2024-08-03", 1);

    let result = queue
        .orchestrator
        .trigger_day_processing(bad.clone(), false)
        .await;

    assert_eq!(result.status, ProcessingStatus::Failed);
    assert!(!result.error_message.unwrap().is_empty());
    assert!(queue.orchestrator.active_days().is_empty());
    let items = queue.store.get_items(&bad).await.unwrap();
    assert!(items.iter().all(|i| i.status == ProcessingStatus::Failed));
}

#[tokio::test]
async fn test_forced_trigger_retries_failed_day() {
    let bad = DayKey::new("2024-08-04");
    let queue = TestQueue::new(ScriptedEngine::new(Duration::ZERO).fail_on(&bad), 2);
    queue.seed("2024-08-04", 2);

    let first = queue
        .orchestrator
        .trigger_day_processing(bad.clone(), false)
        .await;
    assert_eq!(first.status, ProcessingStatus::Failed);

    queue.engine.heal(&bad);
    let retry = queue
        .orchestrator
        .trigger_day_processing(bad.clone(), true)
        .await;

    assert!(retry.is_success());
    assert_eq!(retry.items_processed, 2);
    let report = queue.orchestrator.get_day_status(&bad).await.unwrap().unwrap();
    assert_eq!(report.status, ProcessingStatus::Completed);
    assert_eq!(report.units_created, 1);
}

#[tokio::test]
async fn test_concurrent_triggers_launch_one_run() {
    let queue = TestQueue::new(ScriptedEngine::new(Duration::from_millis(100)), 3);
    let key = queue.seed("2024-09-01", 2);

    let first = queue
        .orchestrator
        .trigger_day_processing(key.clone(), false);
    let followers = join_all((0..4).map(|_| {
        let orchestrator = queue.orchestrator.clone();
        let key = key.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            orchestrator.trigger_day_processing(key, false).await
        }
    }));
    let (first, followers) = tokio::join!(first, followers);

    assert!(first.is_success());
    assert!(followers
        .iter()
        .all(|r| r.status == ProcessingStatus::Processing && r.note.is_some()));
    assert_eq!(queue.engine.calls(), 1);
}

#[tokio::test]
async fn test_overlapping_batches_never_repeat_a_day() {
    let queue = TestQueue::new(ScriptedEngine::new(Duration::from_millis(30)), 1);
    let first = queue.seed("2024-09-02", 1);
    let second = queue.seed("2024-09-03", 1);

    let (left, right) = tokio::join!(
        queue.orchestrator.trigger_batch_processing(None),
        queue.orchestrator.trigger_batch_processing(None)
    );
    let results: Vec<_> = left.unwrap().into_iter().chain(right.unwrap()).collect();

    assert_eq!(queue.engine.calls_for(&first), 1);
    assert_eq!(queue.engine.calls_for(&second), 1);
    assert_eq!(results.iter().filter(|r| r.started()).count(), 2);
    assert!(results
        .iter()
        .filter(|r| !r.started())
        .all(|r| r.note.is_some() && r.error_message.is_none()));
    assert!(queue.store.get_pending_keys(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_initialize_resets_interrupted_days() {
    let store = Arc::new(MemoryItemStore::new());
    let interrupted = DayKey::new("2024-10-01");
    store.insert_item(Item::new(interrupted.clone(), "left over"));
    store
        .set_status(&interrupted, ProcessingStatus::Processing)
        .await
        .unwrap();

    let queue = TestQueue::with_store(ScriptedEngine::new(Duration::ZERO), 2, store);
    assert!(queue.store.get_pending_keys(None).await.unwrap().is_empty());

    let job_id = queue.orchestrator.initialize().await.unwrap();
    assert_eq!(
        queue.store.get_pending_keys(None).await.unwrap(),
        vec![interrupted.clone()]
    );

    let jobs = queue.scheduler.get_jobs_in_namespace(SWEEP_JOB_NAMESPACE).await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].id, job_id);
    assert_eq!(jobs[0].name, SWEEP_JOB_NAME);

    queue.scheduler.start().await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    queue.orchestrator.shutdown().await;
    queue.scheduler.stop().await;

    let report = queue
        .orchestrator
        .get_day_status(&interrupted)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.status, ProcessingStatus::Completed);
    assert!(queue.scheduler.get_job_status(job_id).await.is_none());
}

#[tokio::test]
async fn test_misbehaving_callbacks_are_contained() {
    let queue = TestQueue::new(ScriptedEngine::new(Duration::ZERO), 2);
    let key = queue.seed("2024-11-01", 1);

    queue
        .orchestrator
        .add_progress_callback(|_, _| async { Err(AppError::external_service("socket gone")) })
        .await;
    queue
        .orchestrator
        .add_progress_callback(|_, _| async { panic!("observer bug") })
        .await;
    let seen = queue.record_progress().await;

    let result = queue
        .orchestrator
        .trigger_day_processing(key.clone(), false)
        .await;

    assert!(result.is_success());
    assert_eq!(
        seen.lock().unwrap().as_slice(),
        &[
            (key.clone(), ProcessingStatus::Processing),
            (key, ProcessingStatus::Completed)
        ]
    );
}

#[tokio::test]
async fn test_removed_callback_is_not_called() {
    let queue = TestQueue::new(ScriptedEngine::new(Duration::ZERO), 2);
    let key = queue.seed("2024-11-02", 0);

    let id = queue
        .orchestrator
        .add_progress_callback(|_, _| async { panic!("should have been removed") })
        .await;
    assert!(queue.orchestrator.remove_progress_callback(id).await);
    assert!(!queue.orchestrator.remove_progress_callback(id).await);
    let seen = queue.record_progress().await;

    queue
        .orchestrator
        .trigger_day_processing(key, false)
        .await;
    assert_eq!(seen.lock().unwrap().len(), 2);
}

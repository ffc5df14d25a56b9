//! Result and report types of the day queue.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use daylog_core::types::{DayKey, KeySummary, ProcessingStatus};

/// Outcome of one processing request for one day. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingResult {
    /// The day
    pub key: DayKey,
    /// `Completed` or `Failed`; for a request that did not start a run, the
    /// status the day was in
    pub status: ProcessingStatus,
    /// Items handed to the engine
    pub items_processed: u64,
    /// Units (e.g. clusters) produced
    pub units_created: u64,
    /// Wall time of the request in milliseconds
    pub duration_ms: u64,
    /// Why the run failed
    pub error_message: Option<String>,
    /// Informational note, set when no run was started
    pub note: Option<String>,
}

impl ProcessingResult {
    pub(crate) fn completed(
        key: DayKey,
        items_processed: u64,
        units_created: u64,
        duration: Duration,
    ) -> Self {
        Self {
            key,
            status: ProcessingStatus::Completed,
            items_processed,
            units_created,
            duration_ms: duration.as_millis() as u64,
            error_message: None,
            note: None,
        }
    }

    pub(crate) fn failed(key: DayKey, error_message: impl Into<String>, duration: Duration) -> Self {
        Self {
            key,
            status: ProcessingStatus::Failed,
            items_processed: 0,
            units_created: 0,
            duration_ms: duration.as_millis() as u64,
            error_message: Some(error_message.into()),
            note: None,
        }
    }

    pub(crate) fn already_processing(key: DayKey) -> Self {
        Self {
            key,
            status: ProcessingStatus::Processing,
            items_processed: 0,
            units_created: 0,
            duration_ms: 0,
            error_message: None,
            note: Some("Day is already being processed".to_string()),
        }
    }

    pub(crate) fn not_pending(key: DayKey, status: ProcessingStatus) -> Self {
        Self {
            key,
            status,
            items_processed: 0,
            units_created: 0,
            duration_ms: 0,
            error_message: None,
            note: Some(format!("Day is no longer pending ({status})")),
        }
    }

    /// Whether this request started a run of the day.
    pub fn started(&self) -> bool {
        self.note.is_none()
    }

    /// Whether a run finished without errors.
    pub fn is_success(&self) -> bool {
        self.started() && self.status == ProcessingStatus::Completed
    }
}

/// Status of one day as seen by the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayStatusReport {
    /// The day
    pub key: DayKey,
    /// Stored status
    pub status: ProcessingStatus,
    /// Items filed under the day
    pub item_count: u64,
    /// Units produced by the last successful run
    pub units_created: u64,
    /// Last status change
    pub updated_at: DateTime<Utc>,
    /// Whether a run for the day is in flight in this process
    pub active: bool,
}

impl DayStatusReport {
    pub(crate) fn new(summary: KeySummary, active: bool) -> Self {
        Self {
            key: summary.key,
            status: summary.status,
            item_count: summary.item_count,
            units_created: summary.units_created,
            updated_at: summary.updated_at,
            active,
        }
    }
}

/// Snapshot of the whole processing queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStatus {
    /// Known days
    pub total: usize,
    /// Days waiting for processing
    pub pending: usize,
    /// Days marked processing
    pub processing: usize,
    /// Days whose last run succeeded
    pub completed: usize,
    /// Days whose last run failed
    pub failed: usize,
    /// Days with a run in flight in this process
    pub active: Vec<DayKey>,
    /// Per-day breakdown
    pub per_key: BTreeMap<DayKey, DayStatusReport>,
}

/// Aggregate processing statistics, recomputed from the store on each call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingStatistics {
    /// Days that reached a terminal status
    pub total_keys_processed: u64,
    /// Items in completed days
    pub total_items_processed: u64,
    /// Units produced across completed days
    pub total_units_created: u64,
    /// Completed days over processed days, 0.0 when nothing was processed
    pub success_rate: f64,
    /// When these numbers were computed
    pub last_updated: DateTime<Utc>,
}

impl ProcessingStatistics {
    pub(crate) fn from_summaries(summaries: &[KeySummary], now: DateTime<Utc>) -> Self {
        let mut completed = 0u64;
        let mut failed = 0u64;
        let mut items = 0u64;
        let mut units = 0u64;

        for summary in summaries {
            match summary.status {
                ProcessingStatus::Completed => {
                    completed += 1;
                    items += summary.item_count;
                    units += summary.units_created;
                }
                ProcessingStatus::Failed => failed += 1,
                ProcessingStatus::Pending | ProcessingStatus::Processing => {}
            }
        }

        let processed = completed + failed;
        let success_rate = if processed == 0 {
            0.0
        } else {
            completed as f64 / processed as f64
        };

        Self {
            total_keys_processed: processed,
            total_items_processed: items,
            total_units_created: units,
            success_rate,
            last_updated: now,
        }
    }
}

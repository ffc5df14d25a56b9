//! Work items and the records exchanged with the store and the engine.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::day::{DayKey, ProcessingStatus};
use super::id::ItemId;

/// One externally stored unit of work, filed under a day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Item identifier.
    pub id: ItemId,
    /// Day the item belongs to.
    pub key: DayKey,
    /// Raw content handed to the processing engine.
    pub content: String,
    /// Current processing status.
    pub status: ProcessingStatus,
    /// When the item was stored.
    pub created_at: DateTime<Utc>,
}

impl Item {
    /// Create a new pending item.
    pub fn new(key: DayKey, content: impl Into<String>) -> Self {
        Self {
            id: ItemId::new(),
            key,
            content: content.into(),
            status: ProcessingStatus::Pending,
            created_at: Utc::now(),
        }
    }
}

/// Aggregate view of one day as reported by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySummary {
    /// The day.
    pub key: DayKey,
    /// Status of the day, derived from its items.
    pub status: ProcessingStatus,
    /// Number of items filed under the day.
    pub item_count: u64,
    /// Units produced by the last completed run.
    pub units_created: u64,
    /// Last status change.
    pub updated_at: DateTime<Utc>,
}

/// What the processing engine reports for one batch of items.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineOutput {
    /// Items the engine consumed.
    pub items_processed: u64,
    /// Units (e.g. clusters) produced.
    pub units_created: u64,
    /// Wall time spent by the engine.
    pub duration: Duration,
    /// Per-item errors. Any entry fails the whole day.
    pub errors: Vec<String>,
}

//! In-memory item store using dashmap.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use daylog_core::error::AppError;
use daylog_core::result::AppResult;
use daylog_core::traits::ItemStore;
use daylog_core::types::{DayKey, Item, KeySummary, ProcessingStatus};

/// State of one day held by the store.
#[derive(Debug, Clone)]
struct DayEntry {
    status: ProcessingStatus,
    items: Vec<Item>,
    units_created: u64,
    updated_at: DateTime<Utc>,
}

impl DayEntry {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            status: ProcessingStatus::Pending,
            items: Vec::new(),
            units_created: 0,
            updated_at: now,
        }
    }

    fn summary(&self, key: &DayKey) -> KeySummary {
        KeySummary {
            key: key.clone(),
            status: self.status,
            item_count: self.items.len() as u64,
            units_created: self.units_created,
            updated_at: self.updated_at,
        }
    }
}

/// Process-local [`ItemStore`].
///
/// A day is pending as soon as it holds new items or was registered through
/// [`ensure_key`](Self::ensure_key). Inserting into a finished day reopens it;
/// a day in processing keeps its status until the run ends.
#[derive(Debug, Default)]
pub struct MemoryItemStore {
    days: DashMap<DayKey, DayEntry>,
}

impl MemoryItemStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// File one item under its day.
    pub fn insert_item(&self, item: Item) {
        let now = Utc::now();
        let mut entry = self
            .days
            .entry(item.key.clone())
            .or_insert_with(|| DayEntry::new(now));
        if entry.status != ProcessingStatus::Processing {
            entry.status = ProcessingStatus::Pending;
            entry.updated_at = now;
        }
        entry.items.push(item);
    }

    /// File several items.
    pub fn insert_items(&self, items: impl IntoIterator<Item = Item>) {
        for item in items {
            self.insert_item(item);
        }
    }

    /// Register a day without items. Existing days are left untouched.
    pub fn ensure_key(&self, key: DayKey) {
        self.days
            .entry(key)
            .or_insert_with(|| DayEntry::new(Utc::now()));
    }

    /// Number of known days.
    pub fn len(&self) -> usize {
        self.days.len()
    }

    /// Whether no day is known.
    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    fn keys_where(&self, predicate: impl Fn(&DayEntry) -> bool) -> Vec<DayKey> {
        let mut keys: Vec<DayKey> = self
            .days
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ItemStore for MemoryItemStore {
    async fn get_pending_keys(&self, limit: Option<usize>) -> AppResult<Vec<DayKey>> {
        let mut keys = self.keys_where(|entry| entry.status == ProcessingStatus::Pending);
        if let Some(limit) = limit {
            keys.truncate(limit);
        }
        Ok(keys)
    }

    async fn get_items(&self, key: &DayKey) -> AppResult<Vec<Item>> {
        Ok(self
            .days
            .get(key)
            .map(|entry| entry.items.clone())
            .unwrap_or_default())
    }

    async fn set_status(&self, key: &DayKey, status: ProcessingStatus) -> AppResult<u64> {
        let now = Utc::now();
        let mut entry = self
            .days
            .entry(key.clone())
            .or_insert_with(|| DayEntry::new(now));
        let current = entry.status;
        if current != status && !current.can_transition_to(status) {
            return Err(AppError::validation(format!(
                "Day {} cannot move from {} to {}",
                key, current, status
            )));
        }
        entry.status = status;
        entry.updated_at = now;
        for item in entry.items.iter_mut() {
            item.status = status;
        }
        Ok(entry.items.len() as u64)
    }

    async fn get_keys_with_status(&self, status: ProcessingStatus) -> AppResult<Vec<DayKey>> {
        Ok(self.keys_where(|entry| entry.status == status))
    }

    async fn set_units_created(&self, key: &DayKey, units: u64) -> AppResult<()> {
        if let Some(mut entry) = self.days.get_mut(key) {
            entry.units_created = units;
        }
        Ok(())
    }

    async fn get_key_summaries(&self) -> AppResult<Vec<KeySummary>> {
        let mut summaries: Vec<KeySummary> = self
            .days
            .iter()
            .map(|entry| entry.value().summary(entry.key()))
            .collect();
        summaries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(summaries)
    }

    async fn get_key_summary(&self, key: &DayKey) -> AppResult<Option<KeySummary>> {
        Ok(self.days.get(key).map(|entry| entry.summary(key)))
    }
}

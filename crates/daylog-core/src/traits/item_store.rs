//! Item store trait for the externally persisted work queue.

use async_trait::async_trait;

use crate::result::AppResult;
use crate::types::{DayKey, Item, KeySummary, ProcessingStatus};

/// Trait for stores holding work items grouped by day.
///
/// The processing queue owns no state of its own beyond the set of days in
/// flight; every status it reports is read back from the store.
#[async_trait]
pub trait ItemStore: Send + Sync + std::fmt::Debug + 'static {
    /// Days with pending items, oldest first. `None` returns all of them.
    async fn get_pending_keys(&self, limit: Option<usize>) -> AppResult<Vec<DayKey>>;

    /// All items filed under a day.
    async fn get_items(&self, key: &DayKey) -> AppResult<Vec<Item>>;

    /// Set the status of every item under a day. Returns the number of items touched.
    ///
    /// Implementations reject a move that
    /// [`ProcessingStatus::can_transition_to`] does not allow with a
    /// validation error. Setting the status a day already has is accepted.
    async fn set_status(&self, key: &DayKey, status: ProcessingStatus) -> AppResult<u64>;

    /// Days whose status is currently `status`.
    async fn get_keys_with_status(&self, status: ProcessingStatus) -> AppResult<Vec<DayKey>>;

    /// Record how many units the last successful run of a day produced.
    async fn set_units_created(&self, key: &DayKey, units: u64) -> AppResult<()>;

    /// Summaries of every known day, ordered by key.
    async fn get_key_summaries(&self) -> AppResult<Vec<KeySummary>>;

    /// Summary of one day, or `None` if the store has never seen it.
    async fn get_key_summary(&self, key: &DayKey) -> AppResult<Option<KeySummary>>;
}

//! Processing engine trait.

use async_trait::async_trait;

use crate::result::AppResult;
use crate::types::{DayKey, EngineOutput, Item};

/// Does the actual content work for one day's items.
///
/// Per-item problems are reported in [`EngineOutput::errors`]; an `Err`
/// means the whole run failed. Either way the day ends up `Failed`.
#[async_trait]
pub trait ProcessingEngine: Send + Sync + std::fmt::Debug + 'static {
    /// Process the items of one day.
    async fn process(&self, key: &DayKey, items: &[Item]) -> AppResult<EngineOutput>;
}

//! Exact-duplicate grouping engine.
//!
//! Items whose content is equal after normalization (trimmed, lowercased,
//! inner whitespace collapsed) land in the same group. Each group is one
//! unit. Blank items cannot be grouped and are reported as errors.

use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;

use daylog_core::result::AppResult;
use daylog_core::traits::ProcessingEngine;
use daylog_core::types::{DayKey, EngineOutput, Item};

/// Groups a day's items by normalized content.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactDuplicateEngine;

impl ExactDuplicateEngine {
    /// Create the engine.
    pub fn new() -> Self {
        Self
    }

    /// Group sizes keyed by normalized content.
    pub fn group(items: &[Item]) -> (HashMap<String, usize>, Vec<String>) {
        let mut groups: HashMap<String, usize> = HashMap::new();
        let mut errors = Vec::new();

        for item in items {
            let normalized = normalize(&item.content);
            if normalized.is_empty() {
                errors.push(format!("Item {} has no content", item.id));
                continue;
            }
            *groups.entry(normalized).or_default() += 1;
        }
        (groups, errors)
    }
}

#[async_trait]
impl ProcessingEngine for ExactDuplicateEngine {
    async fn process(&self, key: &DayKey, items: &[Item]) -> AppResult<EngineOutput> {
        let started = Instant::now();
        let (groups, errors) = Self::group(items);

        let duplicates = groups.values().filter(|&&n| n > 1).count();
        tracing::debug!(
            key = %key,
            "Grouped {} items into {} units ({} with duplicates)",
            items.len(),
            groups.len(),
            duplicates
        );

        Ok(EngineOutput {
            items_processed: items.len() as u64,
            units_created: groups.len() as u64,
            duration: started.elapsed(),
            errors,
        })
    }
}

fn normalize(content: &str) -> String {
    content
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

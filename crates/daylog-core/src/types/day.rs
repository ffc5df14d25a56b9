//! Partition keys and per-key processing status.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Partition key the processing queue groups work items by.
///
/// Usually a calendar day in `YYYY-MM-DD` form, but any stable string works.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DayKey(String);

impl DayKey {
    /// Create a key from any string.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Create the key for a calendar day.
    pub fn from_date(date: NaiveDate) -> Self {
        Self(date.format("%Y-%m-%d").to_string())
    }

    /// Interpret the key as a calendar day, if it is one.
    pub fn as_date(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(&self.0, "%Y-%m-%d").ok()
    }

    /// Return the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DayKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for DayKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl From<NaiveDate> for DayKey {
    fn from(date: NaiveDate) -> Self {
        Self::from_date(date)
    }
}

/// Processing status of a work item, and of the day it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    /// Waiting for a sweep or manual trigger.
    Pending,
    /// A processing run is in flight.
    Processing,
    /// The last run finished without errors.
    Completed,
    /// The last run reported errors or failed outright.
    Failed,
}

impl ProcessingStatus {
    /// Check if the status ends a processing run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether the store may move a key from `self` to `next`.
    ///
    /// `Processing -> Pending` is the crash-recovery reset; terminal states
    /// only leave through an explicit re-run or an external reset.
    pub fn can_transition_to(&self, next: ProcessingStatus) -> bool {
        use ProcessingStatus::*;
        match (*self, next) {
            (Pending, Processing) => true,
            (Pending, Pending | Completed | Failed) => false,
            (Processing, Completed | Failed | Pending) => true,
            (Processing, Processing) => false,
            (Completed | Failed, Processing | Pending) => true,
            (Completed | Failed, Completed | Failed) => false,
        }
    }

    /// Return the status as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(AppError::validation(format!(
                "Unknown processing status '{other}'"
            ))),
        }
    }
}

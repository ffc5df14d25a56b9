//! Core type definitions used across the Daylog workspace.

pub mod day;
pub mod id;
pub mod item;

pub use day::{DayKey, ProcessingStatus};
pub use id::*;
pub use item::{EngineOutput, Item, KeySummary};

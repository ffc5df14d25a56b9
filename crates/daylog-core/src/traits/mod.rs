//! Collaborator traits defined in `daylog-core` and implemented by other crates.

pub mod engine;
pub mod item_store;

pub use engine::ProcessingEngine;
pub use item_store::ItemStore;

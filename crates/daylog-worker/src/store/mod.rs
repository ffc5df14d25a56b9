//! `ItemStore` implementations shipped with the worker.

pub mod memory;

pub use memory::MemoryItemStore;

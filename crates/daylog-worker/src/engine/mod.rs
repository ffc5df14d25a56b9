//! `ProcessingEngine` implementations shipped with the worker.

pub mod exact_match;

pub use exact_match::ExactDuplicateEngine;

//! # daylog-core
//!
//! Core crate for Daylog. Contains the collaborator traits consumed by the
//! processing queue, configuration schemas, typed identifiers, shared
//! domain types, and the unified error system.
//!
//! This crate has **no** internal dependencies on other Daylog crates.

pub mod config;
pub mod error;
pub mod result;
pub mod traits;
pub mod types;

pub use error::AppError;
pub use result::AppResult;

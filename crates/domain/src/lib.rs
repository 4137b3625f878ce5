//! # Meridian Domain
//!
//! Business domain types for the Meridian client core.
//!
//! This crate contains:
//! - Job types (`Job`, `JobId`, `JobStatus`) and their wire reports
//! - The cross-crate error type and `Result` alias
//! - Configuration structures
//! - Domain constants
//!
//! ## Architecture
//! - No dependencies on other Meridian crates
//! - Only external dependencies allowed
//! - Pure domain models and data structures

pub mod config;
pub mod constants;
pub mod errors;
pub mod macros;
pub mod types;

// Re-export commonly used items
pub use config::*;
pub use errors::*;
pub use types::*;

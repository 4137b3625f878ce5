//! # Meridian Core
//!
//! Pure business logic layer - no infrastructure dependencies.
//!
//! This crate contains:
//! - The job API port (`JobApi`)
//! - Job tracking, polling and submission services
//!
//! ## Architecture Principles
//! - Only depends on `meridian-domain`
//! - No HTTP or platform code
//! - All external dependencies via traits
//! - Pure, testable business logic

pub mod jobs;

pub use jobs::ports::JobApi;
pub use jobs::{JobError, JobEvent, JobPoller, JobService, JobTracker};

//! Long-running job workflow
//!
//! [`JobService`] submits calculations and inserts the accepted job into the
//! shared [`JobTracker`]; [`JobPoller`] refreshes every non-terminal job until
//! it completes or fails.

pub mod error;
pub mod poller;
pub mod ports;
pub mod service;
pub mod tracker;

pub use error::JobError;
pub use poller::JobPoller;
pub use service::JobService;
pub use tracker::{JobEvent, JobTracker};

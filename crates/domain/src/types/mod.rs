//! Domain types and models

pub mod job;

pub use job::{DistanceCalculationRequest, Job, JobId, JobStatus, JobStatusReport, JobSubmission};

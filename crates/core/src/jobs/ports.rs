//! Port interfaces for the remote job API
//!
//! These traits define the boundaries between core business logic
//! and the HTTP adapter in `meridian-infra`.

use async_trait::async_trait;
use meridian_domain::{DistanceCalculationRequest, JobId, JobStatusReport, JobSubmission, Result};

/// Remote job endpoints
#[async_trait]
pub trait JobApi: Send + Sync {
    /// `POST /jobs/calculate-distance`
    async fn submit_distance_calculation(
        &self,
        request: &DistanceCalculationRequest,
    ) -> Result<JobSubmission>;

    /// `GET /jobs/{id}`
    async fn fetch_status(&self, job_id: &JobId) -> Result<JobStatusReport>;

    /// `GET /jobs`
    async fn list_jobs(&self) -> Result<Vec<JobStatusReport>>;

    /// `GET /jobs/{id}/csv`
    async fn download_csv(&self, job_id: &JobId) -> Result<String>;
}

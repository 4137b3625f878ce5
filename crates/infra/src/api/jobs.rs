//! HTTP adapter for the job endpoints

use std::sync::Arc;

use async_trait::async_trait;
use meridian_core::JobApi;
use meridian_domain::{DistanceCalculationRequest, JobId, JobStatusReport, JobSubmission, Result};
use serde::Deserialize;
use tracing::debug;

use super::client::ApiClient;

/// `GET /jobs` answers with either a bare array or `{ "jobs": [...] }`.
#[derive(Deserialize)]
#[serde(untagged)]
enum JobListing {
    Bare(Vec<JobStatusReport>),
    Wrapped { jobs: Vec<JobStatusReport> },
}

impl JobListing {
    fn into_reports(self) -> Vec<JobStatusReport> {
        match self {
            Self::Bare(jobs) | Self::Wrapped { jobs } => jobs,
        }
    }
}

/// [`JobApi`] over the resilient gateway client
#[derive(Debug, Clone)]
pub struct HttpJobApi {
    client: Arc<ApiClient>,
}

impl HttpJobApi {
    pub const fn new(client: Arc<ApiClient>) -> Self {
        Self { client }
    }

    fn job_path(job_id: &JobId, suffix: &str) -> String {
        format!("jobs/{}{suffix}", urlencoding::encode(job_id.as_str()))
    }
}

#[async_trait]
impl JobApi for HttpJobApi {
    async fn submit_distance_calculation(
        &self,
        request: &DistanceCalculationRequest,
    ) -> Result<JobSubmission> {
        let response =
            self.client.post::<_, JobSubmission>("jobs/calculate-distance", request).await?;
        debug!(
            job_id = %response.data.job_id,
            trace_id = ?response.trace_id,
            "distance calculation accepted"
        );
        let mut submission = response.data;
        if submission.trace_id.is_none() {
            submission.trace_id = response.trace_id;
        }
        Ok(submission)
    }

    async fn fetch_status(&self, job_id: &JobId) -> Result<JobStatusReport> {
        let response = self.client.get::<JobStatusReport>(&Self::job_path(job_id, "")).await?;
        Ok(response.data)
    }

    async fn list_jobs(&self) -> Result<Vec<JobStatusReport>> {
        let response = self.client.get::<JobListing>("jobs").await?;
        Ok(response.data.into_reports())
    }

    async fn download_csv(&self, job_id: &JobId) -> Result<String> {
        let response = self.client.get_text(&Self::job_path(job_id, "/csv")).await?;
        debug!(%job_id, bytes = response.data.len(), trace_id = ?response.trace_id, "CSV downloaded");
        Ok(response.data)
    }
}

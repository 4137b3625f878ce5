//! Job submission service - core business logic

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use meridian_domain::{DistanceCalculationRequest, Job, JobId, JobStatus, MeridianError};
use tracing::{debug, info, instrument, warn};

use super::error::JobError;
use super::ports::JobApi;
use super::tracker::JobTracker;

/// Submits calculations and exposes the tracked jobs
pub struct JobService {
    api: Arc<dyn JobApi>,
    tracker: Arc<JobTracker>,
}

impl JobService {
    pub fn new(api: Arc<dyn JobApi>, tracker: Arc<JobTracker>) -> Self {
        Self { api, tracker }
    }

    #[must_use]
    pub const fn tracker(&self) -> &Arc<JobTracker> {
        &self.tracker
    }

    /// Submit a distance calculation for `date` (`YYYY-MM-DD`).
    ///
    /// The accepted job is in the tracker when this returns.
    ///
    /// # Errors
    /// `InvalidInput` for a missing or malformed date or a blank device id,
    /// `Submission` when the API rejects the request.
    #[instrument(skip(self))]
    pub async fn calculate(&self, date: &str, device_id: Option<&str>) -> Result<Job, JobError> {
        let request = validate_request(date, device_id)?;
        let submission =
            self.api.submit_distance_calculation(&request).await.map_err(JobError::Submission)?;

        let job = Job::submitted(&submission, &request, Utc::now());
        if !self.tracker.insert(job.clone()) {
            debug!(job_id = %job.job_id, "server returned an already tracked job");
        }
        info!(
            job_id = %job.job_id,
            status = %job.status,
            trace_id = ?job.trace_id,
            "distance calculation submitted"
        );
        Ok(job)
    }

    /// Load the server's job list into the tracker. Known jobs only move
    /// forward; terminal jobs are never regressed.
    ///
    /// # Errors
    /// `Listing` when the API call fails.
    pub async fn refresh_jobs(&self) -> Result<Vec<Job>, JobError> {
        let reports = self.api.list_jobs().await.map_err(JobError::Listing)?;
        let now = Utc::now();
        let listed: Vec<Job> = reports
            .iter()
            .filter_map(|report| {
                let job = Job::from_report(report, now);
                if job.is_none() {
                    warn!(job_id = %report.job_id, "skipping listed job without a date");
                }
                job
            })
            .collect();

        let changed = self.tracker.merge(listed);
        debug!(listed = reports.len(), changed, "job list refreshed");
        Ok(self.tracker.jobs())
    }

    /// CSV export of a completed job.
    ///
    /// # Errors
    /// `NotFound` for an untracked job, `Download` when the job has not
    /// completed or the export fails.
    pub async fn download_csv(&self, job_id: &JobId) -> Result<String, JobError> {
        let job = self.tracker.get(job_id).ok_or_else(|| JobError::NotFound(job_id.clone()))?;
        if job.status != JobStatus::Completed {
            return Err(JobError::Download {
                job_id: job_id.clone(),
                reason: format!("job is {}, only completed jobs can be exported", job.status),
            });
        }

        self.api.download_csv(job_id).await.map_err(|err| match err {
            MeridianError::NotFound(_) => JobError::NotFound(job_id.clone()),
            other => JobError::Download { job_id: job_id.clone(), reason: other.to_string() },
        })
    }
}

fn validate_request(date: &str, device_id: Option<&str>) -> Result<DistanceCalculationRequest, JobError> {
    let date = date.trim();
    if date.is_empty() {
        return Err(JobError::InvalidInput("date is required".into()));
    }
    let bytes = date.as_bytes();
    let iso_shape = bytes.len() == 10 && bytes[4] == b'-' && bytes[7] == b'-';
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .ok()
        .filter(|_| iso_shape)
        .ok_or_else(|| JobError::InvalidInput(format!("date must be YYYY-MM-DD, got {date:?}")))?;

    let device_id = match device_id {
        Some(device) if device.trim().is_empty() => {
            return Err(JobError::InvalidInput("device_id must not be blank".into()));
        }
        Some(device) => Some(device.trim().to_owned()),
        None => None,
    };

    Ok(DistanceCalculationRequest { date, device_id })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use meridian_domain::{JobStatusReport, JobSubmission, Result};

    use super::*;

    #[derive(Default)]
    struct FakeApi {
        submissions: AtomicUsize,
        listing: Vec<JobStatusReport>,
    }

    #[async_trait]
    impl JobApi for FakeApi {
        async fn submit_distance_calculation(
            &self,
            request: &DistanceCalculationRequest,
        ) -> Result<JobSubmission> {
            let n = self.submissions.fetch_add(1, Ordering::SeqCst);
            if request.device_id.as_deref() == Some("forbidden") {
                return Err(MeridianError::Forbidden("device not enrolled".into()));
            }
            Ok(JobSubmission {
                job_id: JobId::new(format!("job-{n}")),
                status: "queued".into(),
                trace_id: None,
            })
        }

        async fn fetch_status(&self, job_id: &JobId) -> Result<JobStatusReport> {
            Err(MeridianError::NotFound(job_id.to_string()))
        }

        async fn list_jobs(&self) -> Result<Vec<JobStatusReport>> {
            Ok(self.listing.clone())
        }

        async fn download_csv(&self, job_id: &JobId) -> Result<String> {
            Ok(format!("job_id,distance_km\n{job_id},12.5\n"))
        }
    }

    fn service(api: FakeApi) -> (Arc<FakeApi>, JobService) {
        let api = Arc::new(api);
        (api.clone(), JobService::new(api, Arc::new(JobTracker::new())))
    }

    fn listed(id: &str, status: &str) -> JobStatusReport {
        JobStatusReport {
            job_id: JobId::new(id),
            status: status.into(),
            date: NaiveDate::from_ymd_opt(2024, 3, 1),
            device_id: None,
            queued_at: None,
            completed_at: None,
            result: None,
            error: None,
        }
    }

    #[tokio::test]
    async fn calculate_tracks_queued_job_immediately() {
        let (_, service) = service(FakeApi::default());

        let job = service.calculate("2024-03-01", Some(" dev-7 ")).await.unwrap();

        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.device_id.as_deref(), Some("dev-7"));
        assert_eq!(service.tracker().jobs(), vec![job]);
    }

    #[tokio::test]
    async fn invalid_input_never_reaches_the_api() {
        let (api, service) = service(FakeApi::default());

        for (date, device) in [("", None), ("03/01/2024", None), ("2024-3-1", None), ("2024-02-30", None), ("2024-03-01", Some("  "))] {
            let err = service.calculate(date, device).await.unwrap_err();
            assert!(matches!(err, JobError::InvalidInput(_)), "{date:?} {device:?}");
        }
        assert_eq!(api.submissions.load(Ordering::SeqCst), 0);
        assert!(service.tracker().is_empty());
    }

    #[tokio::test]
    async fn rejected_submission_is_not_tracked() {
        let (_, service) = service(FakeApi::default());
        let err = service.calculate("2024-03-01", Some("forbidden")).await.unwrap_err();
        assert!(matches!(err, JobError::Submission(MeridianError::Forbidden(_))));
        assert!(service.tracker().is_empty());
    }

    #[tokio::test]
    async fn refresh_merges_listing_and_skips_undated_jobs() {
        let mut undated = listed("undated", "queued");
        undated.date = None;
        let (_, service) =
            service(FakeApi { listing: vec![listed("a", "completed"), undated], ..Default::default() });

        let jobs = service.refresh_jobs().await.unwrap();

        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn csv_download_requires_completed_job() {
        let (_, service) = service(FakeApi { listing: vec![listed("done", "completed")], ..Default::default() });
        let pending = service.calculate("2024-03-01", None).await.unwrap();
        service.refresh_jobs().await.unwrap();

        let csv = service.download_csv(&JobId::new("done")).await.unwrap();
        assert!(csv.starts_with("job_id,distance_km"));

        assert!(matches!(service.download_csv(&pending.job_id).await, Err(JobError::Download { .. })));
        assert!(matches!(service.download_csv(&JobId::new("nope")).await, Err(JobError::NotFound(_))));
    }
}

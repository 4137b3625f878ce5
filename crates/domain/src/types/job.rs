//! Long-running job types
//!
//! A job is created when the server accepts a calculation request and is
//! afterwards mutated only by status reports. Status transitions are
//! monotonic: `queued < processing < {completed, failed}`, and a terminal job
//! never changes again.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::impl_wire_status;

/// Server-assigned job identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Lifecycle status of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl_wire_status!(JobStatus {
    Queued => "queued",
    Processing => "processing",
    Completed => "completed",
    Failed => "failed",
});

impl JobStatus {
    /// Completed and failed jobs are never polled again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Position in the lifecycle order. Both terminal states share a rank.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Processing => 1,
            Self::Completed | Self::Failed => 2,
        }
    }

    /// Whether moving from `self` to `next` respects the lifecycle order.
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    /// Parse a status reported by the server.
    ///
    /// Unknown values are treated as `Queued` so the job keeps being polled,
    /// and a warning is logged.
    #[must_use]
    pub fn from_wire(raw: &str) -> Self {
        raw.parse().unwrap_or_else(|_| {
            tracing::warn!(status = raw, "unrecognized job status from server, treating as queued");
            Self::Queued
        })
    }
}

/// Body of `POST /jobs/calculate-distance`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistanceCalculationRequest {
    pub date: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

/// Server acknowledgement of a submitted job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSubmission {
    pub job_id: JobId,
    pub status: String,
    /// Server trace id of the accepting response, filled in by the transport.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

/// Job status as reported by `GET /jobs/{id}` and `GET /jobs`
///
/// `status` is kept as the raw wire string; callers validate it with
/// [`JobStatus::from_wire`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusReport {
    pub job_id: JobId,
    pub status: String,
    pub date: Option<NaiveDate>,
    pub device_id: Option<String>,
    pub queued_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

/// A tracked job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: JobId,
    pub status: JobStatus,
    pub date: NaiveDate,
    pub device_id: Option<String>,
    pub queued_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    /// Trace id of the submission response, for correlating with server logs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

impl Job {
    /// Build the local record for a freshly accepted submission.
    #[must_use]
    pub fn submitted(
        submission: &JobSubmission,
        request: &DistanceCalculationRequest,
        queued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id: submission.job_id.clone(),
            status: JobStatus::from_wire(&submission.status),
            date: request.date,
            device_id: request.device_id.clone(),
            queued_at,
            completed_at: None,
            result: None,
            error: None,
            trace_id: submission.trace_id.clone(),
        }
    }

    /// Build a job from a listing entry.
    ///
    /// Returns `None` when the report lacks the calculation date.
    #[must_use]
    pub fn from_report(report: &JobStatusReport, now: DateTime<Utc>) -> Option<Self> {
        let date = report.date?;
        Some(Self {
            job_id: report.job_id.clone(),
            status: JobStatus::from_wire(&report.status),
            date,
            device_id: report.device_id.clone(),
            queued_at: report.queued_at.unwrap_or(now),
            completed_at: report.completed_at,
            result: report.result.clone(),
            error: report.error.clone(),
            trace_id: None,
        })
    }

    /// Merge a status report into this job.
    ///
    /// Returns the new status when the report advanced the lifecycle, `None`
    /// when it was stale, repeated, or the job is already terminal.
    pub fn apply(&mut self, report: &JobStatusReport, now: DateTime<Utc>) -> Option<JobStatus> {
        let next = JobStatus::from_wire(&report.status);
        if !self.status.can_advance_to(next) {
            return None;
        }

        self.status = next;
        if next.is_terminal() {
            self.completed_at = Some(report.completed_at.unwrap_or(now));
            self.result = report.result.clone();
            self.error = report.error.clone();
        }
        Some(next)
    }
}

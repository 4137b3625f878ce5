use meridian_domain::{JobId, MeridianError};
use thiserror::Error;

/// Error type for job workflow operations
#[derive(Debug, Error)]
pub enum JobError {
    #[error("invalid job input: {0}")]
    InvalidInput(String),

    #[error("job submission failed: {0}")]
    Submission(#[source] MeridianError),

    /// One job's status fetch failed. Non-fatal: the poller keeps the last
    /// known status and tries again next round.
    #[error("status poll for job {job_id} failed: {source}")]
    Poll {
        job_id: JobId,
        #[source]
        source: MeridianError,
    },

    #[error("job listing failed: {0}")]
    Listing(#[source] MeridianError),

    #[error("job {0} not found")]
    NotFound(JobId),

    #[error("CSV download for job {job_id} failed: {reason}")]
    Download { job_id: JobId, reason: String },
}

impl JobError {
    /// True when the underlying request ended the user session.
    #[must_use]
    pub const fn is_auth(&self) -> bool {
        match self {
            Self::Submission(source) | Self::Listing(source) | Self::Poll { source, .. } => {
                source.is_auth()
            }
            Self::InvalidInput(_) | Self::NotFound(_) | Self::Download { .. } => false,
        }
    }
}

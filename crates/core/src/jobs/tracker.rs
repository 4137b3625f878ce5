//! Shared set of tracked jobs
//!
//! The tracker is the single owner of job state. Submissions insert, status
//! reports merge, and the UI reads snapshots. Every non-terminal to terminal
//! transition is broadcast exactly once as a [`JobEvent`].

use chrono::Utc;
use meridian_domain::constants::JOB_EVENT_CHANNEL_CAPACITY;
use meridian_domain::{Job, JobId, JobStatus, JobStatusReport};
use parking_lot::RwLock;
use tokio::sync::futures::Notified;
use tokio::sync::{broadcast, Notify};
use tracing::{debug, info};

/// Terminal transition of a tracked job
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Completed { job: Job },
    Failed { job: Job },
}

impl JobEvent {
    #[must_use]
    pub const fn job(&self) -> &Job {
        match self {
            Self::Completed { job } | Self::Failed { job } => job,
        }
    }

    fn for_terminal(job: &Job) -> Option<Self> {
        match job.status {
            JobStatus::Completed => Some(Self::Completed { job: job.clone() }),
            JobStatus::Failed => Some(Self::Failed { job: job.clone() }),
            JobStatus::Queued | JobStatus::Processing => None,
        }
    }
}

pub struct JobTracker {
    /// Newest submission first.
    jobs: RwLock<Vec<Job>>,
    changed: Notify,
    events: broadcast::Sender<JobEvent>,
}

impl Default for JobTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for JobTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobTracker").field("jobs", &self.jobs.read().len()).finish_non_exhaustive()
    }
}

impl JobTracker {
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(JOB_EVENT_CHANNEL_CAPACITY);
        Self { jobs: RwLock::new(Vec::new()), changed: Notify::new(), events }
    }

    /// Track a freshly submitted job. Returns `false` when the id is already
    /// tracked, leaving the existing record untouched.
    pub fn insert(&self, job: Job) -> bool {
        {
            let mut jobs = self.jobs.write();
            if jobs.iter().any(|existing| existing.job_id == job.job_id) {
                return false;
            }
            debug!(job_id = %job.job_id, status = %job.status, "tracking job");
            jobs.insert(0, job);
        }
        self.changed.notify_waiters();
        true
    }

    /// Merge a server listing: unknown jobs are added, known jobs only move
    /// forward in their lifecycle. Returns how many records changed.
    pub fn merge(&self, listed: Vec<Job>) -> usize {
        let mut events = Vec::new();
        let mut changed = 0;
        {
            let mut jobs = self.jobs.write();
            for incoming in listed {
                match jobs.iter_mut().find(|existing| existing.job_id == incoming.job_id) {
                    Some(existing) => {
                        if existing.status.can_advance_to(incoming.status) {
                            *existing = incoming;
                            changed += 1;
                            events.extend(JobEvent::for_terminal(existing));
                        }
                    }
                    None => {
                        jobs.push(incoming);
                        changed += 1;
                    }
                }
            }
            jobs.sort_by(|a, b| b.queued_at.cmp(&a.queued_at));
        }

        for event in events {
            self.publish(event);
        }
        if changed > 0 {
            self.changed.notify_waiters();
        }
        changed
    }

    /// Apply one status report. Returns the new status when the job advanced.
    pub fn apply_report(&self, report: &JobStatusReport) -> Option<JobStatus> {
        let (status, event) = {
            let mut jobs = self.jobs.write();
            let Some(job) = jobs.iter_mut().find(|job| job.job_id == report.job_id) else {
                debug!(job_id = %report.job_id, "status report for untracked job");
                return None;
            };
            let status = job.apply(report, Utc::now())?;
            (status, JobEvent::for_terminal(job))
        };

        debug!(job_id = %report.job_id, %status, "job advanced");
        if let Some(event) = event {
            self.publish(event);
        }
        Some(status)
    }

    fn publish(&self, event: JobEvent) {
        let job = event.job();
        info!(job_id = %job.job_id, status = %job.status, "job finished");
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    #[must_use]
    pub fn jobs(&self) -> Vec<Job> {
        self.jobs.read().clone()
    }

    #[must_use]
    pub fn get(&self, job_id: &JobId) -> Option<Job> {
        self.jobs.read().iter().find(|job| &job.job_id == job_id).cloned()
    }

    /// Ids of every non-terminal job.
    #[must_use]
    pub fn active_ids(&self) -> Vec<JobId> {
        self.jobs
            .read()
            .iter()
            .filter(|job| !job.status.is_terminal())
            .map(|job| job.job_id.clone())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Resolves on the next insert or effective merge. Call
    /// [`Notified::enable`] before checking state to avoid missing a change.
    pub fn changed(&self) -> Notified<'_> {
        self.changed.notified()
    }
}

//! Self-rescheduling status poller
//!
//! One spawned task per poller. Each iteration:
//!
//! 1. parks until the tracker changes while no job is active,
//! 2. sleeps the poll interval,
//! 3. fetches every active job's status with at most `max_concurrency`
//!    requests in flight, and applies the reports as they arrive.
//!
//! A round fully settles before the next sleep starts. Disposal cancels the
//! task: no fetch starts afterwards and results still in flight are dropped.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use meridian_domain::PollerConfig;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::JobError;
use super::ports::JobApi;
use super::tracker::JobTracker;

pub struct JobPoller {
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl JobPoller {
    /// Start polling on the current tokio runtime.
    pub fn spawn(api: Arc<dyn JobApi>, tracker: Arc<JobTracker>, config: &PollerConfig) -> Self {
        let cancel = CancellationToken::new();
        let worker = PollLoop {
            api,
            tracker,
            interval: config.interval(),
            max_concurrency: config.max_concurrency.max(1),
            cancel: cancel.clone(),
        };
        info!(
            interval_ms = config.interval_ms,
            max_concurrency = worker.max_concurrency,
            "starting job poller"
        );
        let handle = tokio::spawn(worker.run());
        Self { cancel, handle: Mutex::new(Some(handle)) }
    }

    /// Stop polling. Idempotent.
    pub fn dispose(&self) {
        if !self.cancel.is_cancelled() {
            info!("disposing job poller");
            self.cancel.cancel();
        }
    }

    /// Dispose and wait for the polling task to exit.
    pub async fn shutdown(&self) {
        self.dispose();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!(error = %err, "job poller task ended abnormally");
            }
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
            && self.handle.lock().as_ref().is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for JobPoller {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for JobPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobPoller").field("cancelled", &self.cancel.is_cancelled()).finish()
    }
}

struct PollLoop {
    api: Arc<dyn JobApi>,
    tracker: Arc<JobTracker>,
    interval: Duration,
    max_concurrency: usize,
    cancel: CancellationToken,
}

impl PollLoop {
    async fn run(self) {
        loop {
            let changed = self.tracker.changed();
            tokio::pin!(changed);
            changed.as_mut().enable();

            if self.tracker.active_ids().is_empty() {
                debug!("no active jobs; poller idle");
                tokio::select! {
                    () = self.cancel.cancelled() => break,
                    () = changed.as_mut() => continue,
                }
            }

            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(self.interval) => {}
            }

            if !self.round().await {
                break;
            }
        }
        debug!("job poller stopped");
    }

    /// One bounded-concurrency round. Returns `false` when cancelled midway.
    async fn round(&self) -> bool {
        let ids = self.tracker.active_ids();
        let total = ids.len();
        let api = &self.api;
        let cancel = &self.cancel;

        let mut fetches = stream::iter(ids)
            .map(|job_id| async move {
                if cancel.is_cancelled() {
                    return None;
                }
                let result = api
                    .fetch_status(&job_id)
                    .await
                    .map_err(|source| JobError::Poll { job_id, source });
                Some(result)
            })
            .buffer_unordered(self.max_concurrency);

        let mut advanced = 0;
        let mut failed = 0;
        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => return false,
                next = fetches.next() => next,
            };
            let Some(outcome) = next else { break };
            if cancel.is_cancelled() {
                return false;
            }

            match outcome {
                Some(Ok(report)) => {
                    if self.tracker.apply_report(&report).is_some() {
                        advanced += 1;
                    }
                }
                Some(Err(err)) => {
                    failed += 1;
                    if err.is_auth() {
                        warn!(error = %err, "job status poll rejected");
                    } else {
                        debug!(error = %err, "job status poll failed; keeping last status");
                    }
                }
                None => return false,
            }
        }

        debug!(total, advanced, failed, "poll round settled");
        true
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::{NaiveDate, Utc};
    use meridian_domain::{
        DistanceCalculationRequest, Job, JobId, JobStatus, JobStatusReport, JobSubmission,
        MeridianError, Result,
    };

    use super::*;
    use crate::jobs::JobEvent;

    /// Scripted job API: each job walks through its status list, one entry
    /// per fetch, repeating the last one.
    #[derive(Default)]
    struct ScriptedApi {
        scripts: parking_lot::Mutex<HashMap<String, Vec<&'static str>>>,
        fetch_delay: Duration,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        fetches: AtomicUsize,
    }

    impl ScriptedApi {
        fn new(fetch_delay: Duration) -> Self {
            Self { fetch_delay, ..Default::default() }
        }

        fn script(&self, id: &str, statuses: &[&'static str]) {
            self.scripts.lock().insert(id.to_owned(), statuses.to_vec());
        }
    }

    #[async_trait]
    impl JobApi for ScriptedApi {
        async fn submit_distance_calculation(
            &self,
            _request: &DistanceCalculationRequest,
        ) -> Result<JobSubmission> {
            Err(MeridianError::Internal("not scripted".into()))
        }

        async fn fetch_status(&self, job_id: &JobId) -> Result<JobStatusReport> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.fetches.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.fetch_delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let status = {
                let mut scripts = self.scripts.lock();
                let script = scripts
                    .get_mut(job_id.as_str())
                    .ok_or_else(|| MeridianError::NotFound(job_id.to_string()))?;
                if script.len() > 1 {
                    script.remove(0)
                } else {
                    script[0]
                }
            };
            if status == "error" {
                return Err(MeridianError::Network("connection reset".into()));
            }
            Ok(JobStatusReport {
                job_id: job_id.clone(),
                status: status.to_owned(),
                date: None,
                device_id: None,
                queued_at: None,
                completed_at: None,
                result: None,
                error: None,
            })
        }

        async fn list_jobs(&self) -> Result<Vec<JobStatusReport>> {
            Ok(Vec::new())
        }

        async fn download_csv(&self, _job_id: &JobId) -> Result<String> {
            Ok(String::new())
        }
    }

    fn queued(id: &str) -> Job {
        Job::submitted(
            &JobSubmission { job_id: JobId::new(id), status: "queued".into(), trace_id: None },
            &DistanceCalculationRequest { date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(), device_id: None },
            Utc::now(),
        )
    }

    fn config(max_concurrency: usize) -> PollerConfig {
        PollerConfig { interval_ms: 1_000, max_concurrency }
    }

    #[tokio::test(start_paused = true)]
    async fn polls_until_terminal_and_emits_one_event() {
        let api = Arc::new(ScriptedApi::new(Duration::from_millis(10)));
        api.script("a", &["processing", "completed"]);
        let tracker = Arc::new(JobTracker::new());
        let mut events = tracker.subscribe();
        tracker.insert(queued("a"));

        let poller = JobPoller::spawn(api.clone(), tracker.clone(), &config(5));

        let event = events.recv().await.unwrap();
        assert!(matches!(event, JobEvent::Completed { ref job } if job.job_id.as_str() == "a"));
        assert_eq!(api.fetches.load(Ordering::SeqCst), 2);

        // Nothing active: further time passes without fetches.
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(api.fetches.load(Ordering::SeqCst), 2);
        assert!(poller.is_running());
        poller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_never_exceeds_cap() {
        let api = Arc::new(ScriptedApi::new(Duration::from_millis(200)));
        let tracker = Arc::new(JobTracker::new());
        for i in 0..12 {
            let id = format!("job-{i}");
            api.script(&id, &["completed"]);
            tracker.insert(queued(&id));
        }

        let poller = JobPoller::spawn(api.clone(), tracker.clone(), &config(3));
        while !tracker.active_ids().is_empty() {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        assert_eq!(api.peak.load(Ordering::SeqCst), 3);
        assert_eq!(api.fetches.load(Ordering::SeqCst), 12);
        poller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_fetch_keeps_last_status() {
        let api = Arc::new(ScriptedApi::new(Duration::from_millis(10)));
        api.script("a", &["error", "completed"]);
        api.script("b", &["processing"]);
        let tracker = Arc::new(JobTracker::new());
        tracker.insert(queued("a"));
        tracker.insert(queued("b"));

        let poller = JobPoller::spawn(api.clone(), tracker.clone(), &config(5));
        tokio::time::sleep(Duration::from_millis(1_100)).await;

        assert_eq!(tracker.get(&JobId::new("a")).unwrap().status, JobStatus::Queued);
        assert_eq!(tracker.get(&JobId::new("b")).unwrap().status, JobStatus::Processing);

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert_eq!(tracker.get(&JobId::new("a")).unwrap().status, JobStatus::Completed);
        poller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_stops_fetches_and_discards_in_flight_results() {
        let api = Arc::new(ScriptedApi::new(Duration::from_millis(500)));
        api.script("a", &["completed"]);
        let tracker = Arc::new(JobTracker::new());
        tracker.insert(queued("a"));

        let poller = JobPoller::spawn(api.clone(), tracker.clone(), &config(5));
        // First round starts at 1s; dispose while its fetch is in flight.
        tokio::time::sleep(Duration::from_millis(1_200)).await;
        assert_eq!(api.fetches.load(Ordering::SeqCst), 1);
        poller.dispose();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(api.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.get(&JobId::new("a")).unwrap().status, JobStatus::Queued);
        assert!(!poller.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_poller_wakes_on_new_job() {
        let api = Arc::new(ScriptedApi::new(Duration::from_millis(10)));
        api.script("late", &["completed"]);
        let tracker = Arc::new(JobTracker::new());

        let poller = JobPoller::spawn(api.clone(), tracker.clone(), &config(5));
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(api.fetches.load(Ordering::SeqCst), 0);

        tracker.insert(queued("late"));
        tokio::time::sleep(Duration::from_millis(1_100)).await;

        assert_eq!(tracker.get(&JobId::new("late")).unwrap().status, JobStatus::Completed);
        poller.shutdown().await;
    }
}

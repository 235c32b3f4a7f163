use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::models::Destination;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_finished(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// Observable state of one auto-upload
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    pub job_id: Uuid,
    pub shortcode: String,
    pub destination: Option<Destination>,
    pub state: JobState,
    pub error: Option<String>,
    pub published_post_id: Option<String>,
    pub queued_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

pub type JobMap = Arc<Mutex<HashMap<Uuid, JobProgress>>>;

/// Finished jobs stay observable for this long
pub const DEFAULT_JOB_RETENTION_MINUTES: i64 = 60;

/// Shared registry of upload jobs
#[derive(Clone)]
pub struct JobTracker {
    jobs: JobMap,
    finished: Arc<Notify>,
    retention: chrono::Duration,
}

impl Default for JobTracker {
    fn default() -> Self {
        Self::with_retention(chrono::Duration::minutes(DEFAULT_JOB_RETENTION_MINUTES))
    }
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retention: chrono::Duration) -> Self {
        Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            finished: Arc::new(Notify::new()),
            retention,
        }
    }

    /// Register a queued job, evicting finished jobs past retention
    pub fn register(&self, shortcode: &str) -> Uuid {
        let job_id = Uuid::new_v4();
        let progress = JobProgress {
            job_id,
            shortcode: shortcode.to_string(),
            destination: None,
            state: JobState::Queued,
            error: None,
            published_post_id: None,
            queued_at: Utc::now(),
            finished_at: None,
        };

        match self.jobs.lock() {
            Ok(mut jobs) => {
                let cutoff = Utc::now() - self.retention;
                let before = jobs.len();
                jobs.retain(|_, job| job.finished_at.map_or(true, |at| at > cutoff));
                if jobs.len() < before {
                    log::debug!("Evicted {} finished job(s)", before - jobs.len());
                }
                jobs.insert(job_id, progress);
            }
            Err(e) => log::error!("Failed to register job {} (non-critical): {}", job_id, e),
        }
        job_id
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().map(|jobs| jobs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, job_id: Uuid) -> Option<JobProgress> {
        self.read(job_id, "status lookup", |job| job.clone())
    }

    pub fn mark_running(&self, job_id: Uuid) {
        self.update(job_id, "mark running", |job| {
            job.state = JobState::Running;
        });
    }

    pub fn set_destination(&self, job_id: Uuid, destination: Destination) {
        self.update(job_id, "destination update", |job| {
            job.destination = Some(destination);
        });
    }

    pub fn mark_completed(&self, job_id: Uuid, post_id: String) {
        self.update(job_id, "mark completed", |job| {
            job.state = JobState::Completed;
            job.published_post_id = Some(post_id);
            job.finished_at = Some(Utc::now());
        });
        self.finished.notify_waiters();
    }

    pub fn mark_failed(&self, job_id: Uuid, error: String) {
        self.update(job_id, "mark failed", |job| {
            job.state = JobState::Failed;
            job.error = Some(error);
            job.finished_at = Some(Utc::now());
        });
        self.finished.notify_waiters();
    }

    /// Wait until the job has completed or failed. `None` on timeout or for
    /// unknown jobs.
    pub async fn wait_for_completion(&self, job_id: Uuid, timeout: Duration) -> Option<JobProgress> {
        let wait = async {
            loop {
                let notified = self.finished.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                match self.get(job_id) {
                    Some(job) if job.state.is_finished() => return Some(job),
                    Some(_) => {}
                    None => return None,
                }

                notified.await;
            }
        };

        tokio::time::timeout(timeout, wait).await.ok().flatten()
    }

    fn update<F>(&self, job_id: Uuid, operation: &str, f: F) -> bool
    where
        F: FnOnce(&mut JobProgress),
    {
        match self.jobs.lock() {
            Ok(mut jobs) => {
                if let Some(job) = jobs.get_mut(&job_id) {
                    f(job);
                    true
                } else {
                    log::warn!("Job {} not found for {} operation", job_id, operation);
                    false
                }
            }
            Err(e) => {
                log::error!(
                    "Failed to acquire job lock for {} on job {} (non-critical): {}",
                    operation,
                    job_id,
                    e
                );
                false
            }
        }
    }

    fn read<F, R>(&self, job_id: Uuid, operation: &str, f: F) -> Option<R>
    where
        F: FnOnce(&JobProgress) -> R,
    {
        match self.jobs.lock() {
            Ok(jobs) => jobs.get(&job_id).map(f),
            Err(e) => {
                log::error!(
                    "Failed to acquire job lock for {} on job {}: {}",
                    operation,
                    job_id,
                    e
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DestinationKind;

    #[test]
    fn tracks_state_transitions() {
        let tracker = JobTracker::new();
        let id = tracker.register("abc123");

        assert_eq!(tracker.get(id).unwrap().state, JobState::Queued);

        tracker.mark_running(id);
        tracker.set_destination(
            id,
            Destination {
                kind: DestinationKind::Club,
                id: "club-1".to_string(),
            },
        );
        tracker.mark_completed(id, "post-9".to_string());

        let job = tracker.get(id).unwrap();
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.published_post_id.as_deref(), Some("post-9"));
        assert!(job.finished_at.is_some());
        assert_eq!(job.destination.unwrap().id, "club-1");
    }

    #[test]
    fn unknown_jobs_are_ignored() {
        let tracker = JobTracker::new();
        let stray = Uuid::new_v4();
        tracker.mark_failed(stray, "boom".to_string());
        assert!(tracker.get(stray).is_none());
    }

    #[test]
    fn finished_jobs_are_evicted_after_retention() {
        let tracker = JobTracker::new();
        let old = tracker.register("old");
        let running = tracker.register("running");
        tracker.mark_running(running);
        tracker.mark_completed(old, "p1".to_string());

        // still within retention
        tracker.register("next");
        assert!(tracker.get(old).is_some());

        tracker.update(old, "backdate", |job| {
            job.finished_at = Some(Utc::now() - chrono::Duration::minutes(DEFAULT_JOB_RETENTION_MINUTES + 1));
        });
        let newest = tracker.register("newest");

        assert!(tracker.get(old).is_none());
        assert!(tracker.get(running).is_some());
        assert!(tracker.get(newest).is_some());
        assert_eq!(tracker.len(), 3);
    }

    #[tokio::test]
    async fn waiters_wake_on_failure() {
        let tracker = JobTracker::new();
        let id = tracker.register("abc123");

        let background = tracker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            background.mark_failed(id, "Post not found: abc123".to_string());
        });

        let job = tracker
            .wait_for_completion(id, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.error.as_deref(), Some("Post not found: abc123"));
    }

    #[tokio::test]
    async fn waiting_times_out() {
        let tracker = JobTracker::new();
        let id = tracker.register("slow");
        assert!(tracker
            .wait_for_completion(id, Duration::from_millis(20))
            .await
            .is_none());
    }
}

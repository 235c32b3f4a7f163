use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::pipeline::Pipeline;
use super::progress_tracker::JobTracker;

/// An approved post waiting to be published
#[derive(Debug, Clone)]
pub struct UploadJob {
    pub job_id: Uuid,
    pub shortcode: String,
}

type SharedReceiver = Arc<Mutex<mpsc::Receiver<UploadJob>>>;

/// Bounded queue of auto-uploads drained by a fixed set of workers
#[derive(Clone)]
pub struct UploadQueue {
    sender: mpsc::Sender<UploadJob>,
    tracker: JobTracker,
    pipeline: Pipeline,
}

impl UploadQueue {
    /// Create the queue and spawn `workers` tasks processing it.
    ///
    /// Workers stop once every clone of the queue has been dropped and the
    /// remaining jobs are drained.
    pub fn start(
        pipeline: Pipeline,
        tracker: JobTracker,
        workers: usize,
        capacity: usize,
    ) -> (Self, Vec<JoinHandle<()>>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let receiver: SharedReceiver = Arc::new(Mutex::new(receiver));

        let handles = (0..workers.max(1))
            .map(|worker_id| {
                spawn_worker(
                    worker_id,
                    pipeline.clone(),
                    tracker.clone(),
                    Arc::clone(&receiver),
                )
            })
            .collect();

        log::info!(
            "Upload queue started with {} worker(s), capacity {}",
            workers.max(1),
            capacity.max(1)
        );

        (
            Self {
                sender,
                tracker,
                pipeline,
            },
            handles,
        )
    }

    pub fn tracker(&self) -> &JobTracker {
        &self.tracker
    }

    /// Enqueue an auto-upload without waiting for it.
    ///
    /// When the queue is full or closed the job is recorded as failed right
    /// away and the post moves from `approved` to `failed`.
    pub async fn submit(&self, shortcode: &str) -> Uuid {
        let job_id = self.tracker.register(shortcode);
        let job = UploadJob {
            job_id,
            shortcode: shortcode.to_string(),
        };

        match self.sender.try_send(job) {
            Ok(()) => {
                log::info!("Queued upload job {} for {}", job_id, shortcode);
            }
            Err(e) => {
                let reason = match e {
                    mpsc::error::TrySendError::Full(_) => "Upload queue is full",
                    mpsc::error::TrySendError::Closed(_) => "Upload queue is closed",
                };
                log::error!("{}, could not queue {}", reason, shortcode);
                self.tracker.mark_failed(job_id, reason.to_string());
                self.pipeline.mark_approval_failed(shortcode).await;
            }
        }

        job_id
    }
}

fn spawn_worker(
    worker_id: usize,
    pipeline: Pipeline,
    tracker: JobTracker,
    receiver: SharedReceiver,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        log::debug!("Upload worker {} started", worker_id);

        loop {
            // lock only while waiting for the next job so other workers can run
            let next = { receiver.lock().await.recv().await };
            let Some(job) = next else { break };

            log::info!(
                "Worker {} processing job {} for {}",
                worker_id,
                job.job_id,
                job.shortcode
            );
            tracker.mark_running(job.job_id);

            match pipeline.run_auto_upload(&job.shortcode).await {
                Ok(published) => {
                    tracker.set_destination(job.job_id, published.destination);
                    tracker.mark_completed(job.job_id, published.post_id);
                }
                Err(e) => {
                    tracker.mark_failed(job.job_id, e.to_string());
                }
            }
        }

        log::debug!("Upload worker {} stopped (queue closed)", worker_id);
    })
}

use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::database::Database;
use crate::errors::AppResult;
use crate::scraper::{ResultsStore, ScraperLauncher};
use crate::session::SessionManager;
use crate::uploader::{
    BackendClient, JobTracker, MediaUploader, Pipeline, PostPublisher, UploadQueue,
};

/// Shared handles every request handler works with
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Database,
    pub results: ResultsStore,
    pub sessions: SessionManager,
    pub pipeline: Pipeline,
    pub queue: UploadQueue,
    pub launcher: ScraperLauncher,
    pub http: reqwest::Client,
    pub started_at: Instant,
}

impl AppState {
    /// Wire up clients and start the upload workers. Must run inside a tokio
    /// runtime.
    pub fn initialize(config: Config, db: Database) -> AppResult<(Self, Vec<JoinHandle<()>>)> {
        let backend = BackendClient::new(&config.base_url, config.http_timeout())?;
        let http = backend.http().clone();

        let sessions = SessionManager::new(backend.clone(), db.clone(), config.credentials.clone());
        let uploader = MediaUploader::new(backend.clone(), sessions.clone());
        let publisher = PostPublisher::new(backend, sessions.clone());
        let results = ResultsStore::new(config.results_dir.clone());

        let pipeline = Pipeline::new(
            db.clone(),
            results.clone(),
            http.clone(),
            uploader,
            publisher,
            sessions.clone(),
            config.temp_dir.clone(),
        );

        let (queue, workers) = UploadQueue::start(
            pipeline.clone(),
            JobTracker::new(),
            config.upload_workers,
            config.upload_queue_capacity,
        );

        let launcher = ScraperLauncher::new(
            config.scraper_program.clone(),
            config.scraper_script.clone(),
            config.scraper_credentials.clone(),
        );

        let state = Self {
            config: Arc::new(config),
            db,
            results,
            sessions,
            pipeline,
            queue,
            launcher,
            http,
            started_at: Instant::now(),
        };

        Ok((state, workers))
    }
}

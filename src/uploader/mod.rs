// Everything that moves media from the scraper's results to the backend:
// downloads, storage uploads, content publishing and the approval queue

pub mod backend_client;
pub mod media;
pub mod pipeline;
pub mod progress_tracker;
pub mod publisher;
pub mod storage_client;
pub mod upload_queue;

pub use backend_client::BackendClient;
pub use pipeline::{Pipeline, Published};
pub use progress_tracker::{JobProgress, JobState, JobTracker};
pub use publisher::PostPublisher;
pub use storage_client::MediaUploader;
pub use upload_queue::UploadQueue;

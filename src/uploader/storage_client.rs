use reqwest::{multipart, Body};
use std::path::Path;

use crate::errors::{AppError, AppResult};
use crate::session::SessionManager;

use super::backend_client::BackendClient;

const UPLOAD_ENDPOINT: &str = "/content/uploadToS3";

/// Streams local files to the backend's object-storage endpoint
#[derive(Clone)]
pub struct MediaUploader {
    client: BackendClient,
    sessions: SessionManager,
}

impl MediaUploader {
    pub fn new(client: BackendClient, sessions: SessionManager) -> Self {
        Self { client, sessions }
    }

    /// Upload `file_path` and return the storage key the backend assigned
    pub async fn upload_to_storage(&self, file_path: &Path) -> AppResult<String> {
        let file = tokio::fs::File::open(file_path).await?;
        let size = file.metadata().await?.len();
        log::info!(
            "Uploading {} ({:.2} MB) to storage",
            file_path.display(),
            size as f64 / (1024.0 * 1024.0)
        );

        let token = self.sessions.get_valid_token().await?;

        let filename = file_path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();

        let part = multipart::Part::stream_with_length(Body::from(file), size)
            .file_name(filename)
            .mime_str(mime_for_path(file_path))?;
        let form = multipart::Form::new().part("file", part);

        let response = self
            .client
            .post_multipart(UPLOAD_ENDPOINT, form, Some(&token))
            .await
            .map_err(|e| AppError::upload(format!("Storage request failed: {}", e)))?;

        let succeeded = response.is_success()
            && response
                .body
                .get("success")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);

        match response.str_field("key") {
            Some(key) if succeeded => {
                log::info!("File uploaded to storage successfully. Key: {}", key);
                Ok(key.to_string())
            }
            _ => Err(AppError::upload(response.summary())),
        }
    }
}

/// MIME type from the file extension
pub fn mime_for_path(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("mp4") => "video/mp4",
        Some("mov") => "video/quicktime",
        _ => "application/octet-stream",
    }
}

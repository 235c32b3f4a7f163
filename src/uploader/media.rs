use reqwest::{header, Client};
use std::path::Path;
use tokio::io::AsyncWriteExt;

use crate::errors::{AppError, AppResult};
use crate::models::ContentType;

use super::backend_client::BROWSER_USER_AGENT;

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Optional ceiling applied while downloading
#[derive(Debug, Clone, Copy)]
pub struct SizeCeiling {
    pub content_type: ContentType,
}

impl SizeCeiling {
    pub fn for_content(content_type: ContentType) -> Self {
        Self { content_type }
    }

    pub fn max_bytes(&self) -> u64 {
        self.content_type.size_limit_mb() * BYTES_PER_MB
    }

    fn error(&self, size_bytes: u64) -> AppError {
        AppError::size_limit(
            size_bytes,
            self.content_type.size_limit_mb(),
            self.content_type.plural(),
        )
    }
}

/// Stream `url` into `destination`, returning the number of bytes written.
///
/// With a ceiling, the download stops as soon as it is exceeded and the
/// partial file is removed before the error is returned.
pub async fn download_media(
    client: &Client,
    url: &str,
    destination: &Path,
    ceiling: Option<SizeCeiling>,
) -> AppResult<u64> {
    log::info!("Downloading {} to {}", url, destination.display());

    let mut response = client
        .get(url)
        .header(header::USER_AGENT, BROWSER_USER_AGENT)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(AppError::download(url, format!("HTTP {}", status.as_u16())));
    }

    if let (Some(ceiling), Some(length)) = (ceiling, response.content_length()) {
        if length > ceiling.max_bytes() {
            return Err(ceiling.error(length));
        }
    }

    let mut file = tokio::fs::File::create(destination).await?;
    let mut written: u64 = 0;

    while let Some(chunk) = response.chunk().await? {
        written += chunk.len() as u64;

        if let Some(ceiling) = ceiling {
            if written > ceiling.max_bytes() {
                drop(file);
                if let Err(e) = tokio::fs::remove_file(destination).await {
                    log::warn!("Failed to remove oversized download {}: {}", destination.display(), e);
                }
                return Err(ceiling.error(written));
            }
        }

        file.write_all(&chunk).await?;
    }

    file.flush().await?;
    log::info!(
        "Downloaded file size: {:.2} MB",
        written as f64 / BYTES_PER_MB as f64
    );
    Ok(written)
}

use reqwest::Client;
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::database::Database;
use crate::errors::{AppError, AppResult};
use crate::models::{Destination, DestinationKind, PostStatus, ScrapedPost};
use crate::scraper::ResultsStore;
use crate::security::{FileSystemGuard, InputValidator};
use crate::session::SessionManager;

use super::media::{download_media, SizeCeiling};
use super::publisher::{PostPublisher, PublishRequest};
use super::storage_client::MediaUploader;

/// Where a post ended up
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Published {
    pub destination: Destination,
    pub post_id: String,
}

/// Download, upload and publish steps shared by approval and manual share
#[derive(Clone)]
pub struct Pipeline {
    db: Database,
    results: ResultsStore,
    http: Client,
    uploader: MediaUploader,
    publisher: PostPublisher,
    sessions: SessionManager,
    temp_dir: PathBuf,
}

impl Pipeline {
    pub fn new(
        db: Database,
        results: ResultsStore,
        http: Client,
        uploader: MediaUploader,
        publisher: PostPublisher,
        sessions: SessionManager,
        temp_dir: PathBuf,
    ) -> Self {
        Self {
            db,
            results,
            http,
            uploader,
            publisher,
            sessions,
            temp_dir,
        }
    }

    async fn find_post(&self, shortcode: &str) -> AppResult<ScrapedPost> {
        self.results
            .find(shortcode)
            .await?
            .ok_or_else(|| AppError::not_found("Post", shortcode))
    }

    /// Publish an approved post to the active profile's destination.
    ///
    /// Any failure moves the post from `approved` to `failed`. A post whose
    /// status changed in the meantime is left alone.
    pub async fn run_auto_upload(&self, shortcode: &str) -> AppResult<Published> {
        match self.auto_upload(shortcode).await {
            Ok(published) => Ok(published),
            Err(e) => {
                log::error!("Auto-upload failed for {}: {}", shortcode, e);
                self.mark_approval_failed(shortcode).await;
                Err(e)
            }
        }
    }

    /// Move `shortcode` from `approved` to `failed`, leaving any other status alone
    pub async fn mark_approval_failed(&self, shortcode: &str) {
        match self
            .db
            .compare_and_set_status(shortcode, PostStatus::Approved, PostStatus::Failed)
            .await
        {
            Ok(true) => {}
            Ok(false) => log::warn!(
                "Status of {} is no longer approved, not marking it failed",
                shortcode
            ),
            Err(db_err) => log::error!("Failed to mark {} as failed: {}", shortcode, db_err),
        }
    }

    async fn auto_upload(&self, shortcode: &str) -> AppResult<Published> {
        let post = self.find_post(shortcode).await?;

        let profile = self
            .db
            .active_profile()
            .await?
            .ok_or_else(|| AppError::Config("No active profile".to_string()))?;
        let destination = profile.destination().ok_or_else(|| {
            AppError::Config(format!("Profile '{}' has no destination set", profile.name))
        })?;

        log::info!(
            "Auto-uploading {} to {} {}",
            shortcode,
            destination.kind.as_str(),
            destination.id
        );

        let post_id = self.transfer(&post, &destination, None).await?;
        self.db.set_status(shortcode, PostStatus::Uploaded).await?;

        log::info!("Auto-upload complete for {}", shortcode);
        Ok(Published {
            destination,
            post_id,
        })
    }

    /// Manually share a post to a caller-chosen destination, enforcing the
    /// per-type size ceiling.
    pub async fn share_post(
        &self,
        shortcode: &str,
        destination_id: &str,
        kind: DestinationKind,
    ) -> AppResult<Published> {
        let post = self.find_post(shortcode).await?;
        let destination = Destination {
            kind,
            id: destination_id.trim().to_string(),
        };

        log::info!(
            "Sharing {} to {} {}",
            shortcode,
            destination.kind.as_str(),
            destination.id
        );

        self.sessions.force_login().await?;

        let ceiling = SizeCeiling::for_content(post.content_type());
        let post_id = self.transfer(&post, &destination, Some(ceiling)).await?;
        self.db.record_share(shortcode, &destination.id).await?;

        log::info!("Shared {} to {}", shortcode, destination.id);
        Ok(Published {
            destination,
            post_id,
        })
    }

    /// Download to a scratch file, upload it and publish. The scratch file is
    /// removed whatever the outcome.
    async fn transfer(
        &self,
        post: &ScrapedPost,
        destination: &Destination,
        ceiling: Option<SizeCeiling>,
    ) -> AppResult<String> {
        let media_url = post.media_url().ok_or_else(|| {
            AppError::validation("mediaUrl", &format!("Post {} has no media URL", post.shortcode))
        })?;
        InputValidator::validate_media_url(media_url)?;
        let content_type = post.content_type();

        let scratch = FileSystemGuard::create_scratch_path(
            &self.temp_dir,
            &post.shortcode,
            content_type.extension(),
        )?;

        let result = self
            .transfer_file(post, media_url, &scratch, destination, ceiling)
            .await;
        FileSystemGuard::remove_scratch_file(&scratch).await;
        result
    }

    async fn transfer_file(
        &self,
        post: &ScrapedPost,
        media_url: &str,
        scratch: &Path,
        destination: &Destination,
        ceiling: Option<SizeCeiling>,
    ) -> AppResult<String> {
        download_media(&self.http, media_url, scratch, ceiling).await?;

        let storage_key = self.uploader.upload_to_storage(scratch).await?;

        let request = PublishRequest {
            destination_kind: destination.kind,
            destination_id: destination.id.clone(),
            content_type: post.content_type(),
            storage_key,
            caption: post.caption_text().to_string(),
            aspect_ratio: None,
            public_mode: None,
        };
        self.publisher.publish(&request).await
    }
}

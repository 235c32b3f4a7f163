use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use crate::config::cleanup_old_files;
use crate::errors::{AppError, AppResult};

fn shortcode_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("shortcode pattern"))
}

fn username_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9._]{1,30}$").expect("username pattern"))
}

pub struct InputValidator;

impl InputValidator {
    pub fn validate_shortcode(shortcode: &str) -> AppResult<()> {
        let trimmed = shortcode.trim();

        if trimmed.is_empty() {
            return Err(AppError::validation("shortcode", "Shortcode cannot be empty"));
        }

        if !shortcode_pattern().is_match(trimmed) {
            return Err(AppError::validation("shortcode", "Shortcode contains invalid characters"));
        }

        Ok(())
    }

    /// Source account names end up as subprocess arguments, so they are kept
    /// to the characters the source platform allows.
    pub fn validate_username(username: &str) -> AppResult<()> {
        if !username_pattern().is_match(username) {
            return Err(AppError::validation(
                "instagramUsernames",
                &format!("Invalid username '{}'", username),
            ));
        }
        Ok(())
    }

    pub fn validate_media_url(url: &str) -> AppResult<()> {
        let trimmed = url.trim();

        if trimmed.is_empty() {
            return Err(AppError::validation("url", "URL is required"));
        }

        if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
            return Err(AppError::validation("url", "Only http and https URLs are allowed"));
        }

        if trimmed.len() > 4096 {
            return Err(AppError::validation("url", "URL too long"));
        }

        Ok(())
    }

    pub fn validate_scrape_limit(limit: u32) -> AppResult<()> {
        if limit == 0 || limit > 1000 {
            return Err(AppError::validation("scrapeLimit", "Must be between 1 and 1000"));
        }
        Ok(())
    }
}

// Scratch file handling for downloaded media
pub struct FileSystemGuard;

impl FileSystemGuard {
    /// Unique path in `temp_dir` for one download of `shortcode`
    pub fn create_scratch_path(temp_dir: &Path, shortcode: &str, extension: &str) -> AppResult<PathBuf> {
        InputValidator::validate_shortcode(shortcode)?;
        std::fs::create_dir_all(temp_dir)?;

        let random_name = uuid::Uuid::new_v4().simple().to_string();
        Ok(temp_dir.join(format!("{}-{}.{}", shortcode.trim(), random_name, extension)))
    }

    /// Remove a scratch file, logging instead of failing
    pub async fn remove_scratch_file(path: &Path) {
        match tokio::fs::remove_file(path).await {
            Ok(()) => log::debug!("Removed scratch file {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Failed to remove scratch file {}: {}", path.display(), e),
        }
    }

    /// Drop scratch files left behind by a previous run
    pub fn cleanup_stale_scratch(temp_dir: &Path) -> AppResult<usize> {
        cleanup_old_files(temp_dir, Duration::from_secs(60 * 60))
    }
}

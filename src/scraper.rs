use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

use crate::config::ScraperCredentials;
use crate::errors::AppResult;
use crate::models::{MergedPost, PostStatus, ScrapedPost, StatusRecord};
use crate::security::InputValidator;

const RESULT_FILE_SUFFIX: &str = "_posts.json";

/// Read side of the scraper's `<username>_posts.json` output directory
#[derive(Debug, Clone)]
pub struct ResultsStore {
    dir: PathBuf,
}

impl ResultsStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Result files in name order, so listings are stable across calls
    async fn result_files(&self) -> AppResult<Vec<PathBuf>> {
        if !tokio::fs::try_exists(&self.dir).await? {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_result = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.ends_with(RESULT_FILE_SUFFIX))
                .unwrap_or(false);
            if is_result && path.is_file() {
                files.push(path);
            }
        }

        files.sort();
        Ok(files)
    }

    async fn read_file(path: &Path) -> Option<Vec<ScrapedPost>> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) => {
                log::warn!("Failed to read result file {}: {}", path.display(), e);
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(posts) => Some(posts),
            Err(e) => {
                log::warn!("Skipping malformed result file {}: {}", path.display(), e);
                None
            }
        }
    }

    pub async fn load_all(&self) -> AppResult<Vec<ScrapedPost>> {
        let mut posts = Vec::new();
        for file in self.result_files().await? {
            if let Some(mut batch) = Self::read_file(&file).await {
                posts.append(&mut batch);
            }
        }
        Ok(posts)
    }

    /// First post with `shortcode`, scanning files in name order
    pub async fn find(&self, shortcode: &str) -> AppResult<Option<ScrapedPost>> {
        for file in self.result_files().await? {
            if let Some(batch) = Self::read_file(&file).await {
                if let Some(post) = batch.into_iter().find(|p| p.shortcode == shortcode) {
                    return Ok(Some(post));
                }
            }
        }
        Ok(None)
    }
}

/// Attach tracked status to each scraped post; untracked posts are pending
pub fn merge_with_status(
    posts: Vec<ScrapedPost>,
    statuses: &HashMap<String, StatusRecord>,
) -> Vec<MergedPost> {
    posts
        .into_iter()
        .map(|post| {
            let (status, shared_to) = match statuses.get(&post.shortcode) {
                Some(record) => (record.status, record.shared_to.clone()),
                None => (PostStatus::Pending, Vec::new()),
            };
            MergedPost {
                post,
                status,
                shared_to,
            }
        })
        .collect()
}

/// Spawns the external scraper, one detached process per source account
#[derive(Debug, Clone)]
pub struct ScraperLauncher {
    program: String,
    script: PathBuf,
    credentials: ScraperCredentials,
}

impl ScraperLauncher {
    pub fn new(program: String, script: PathBuf, credentials: ScraperCredentials) -> Self {
        Self {
            program,
            script,
            credentials,
        }
    }

    pub fn build_args(&self, username: &str, limit: u32) -> Vec<String> {
        let mut args = vec![
            self.script.to_string_lossy().to_string(),
            username.to_string(),
            "--limit".to_string(),
            limit.to_string(),
        ];

        if let Some((user, pass)) = self.credentials.usable() {
            args.push("--login_user".to_string());
            args.push(user.to_string());
            args.push("--login_pass".to_string());
            args.push(pass.to_string());
        }

        args
    }

    /// Start a scrape for every valid username without waiting for any of them.
    /// Returns how many processes were started.
    pub fn spawn_all(&self, usernames: &[String], limit: u32) -> usize {
        let authenticated = self.credentials.usable().is_some();
        let mut started = 0;

        for username in usernames {
            if let Err(e) = InputValidator::validate_username(username) {
                log::warn!("[{}] Skipping scrape: {}", username, e);
                continue;
            }

            log::info!(
                "[{}] Spawning scraper{}...",
                username,
                if authenticated { " (authenticated)" } else { "" }
            );

            let spawned = Command::new(&self.program)
                .args(self.build_args(username, limit))
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn();

            let mut child = match spawned {
                Ok(child) => child,
                Err(e) => {
                    log::error!("[{}] Failed to start scraper: {}", username, e);
                    continue;
                }
            };

            if let Some(stdout) = child.stdout.take() {
                tokio::spawn(forward_output(username.clone(), stdout));
            }
            if let Some(stderr) = child.stderr.take() {
                tokio::spawn(forward_output(username.clone(), stderr));
            }

            let name = username.clone();
            tokio::spawn(async move {
                match child.wait().await {
                    Ok(status) => match status.code() {
                        Some(code) => log::info!("[{}] Scraper finished with code {}", name, code),
                        None => log::warn!("[{}] Scraper terminated by signal", name),
                    },
                    Err(e) => log::error!("[{}] Failed waiting for scraper: {}", name, e),
                }
            });

            started += 1;
        }

        started
    }
}

async fn forward_output<R: AsyncRead + Unpin>(username: String, stream: R) {
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if !line.is_empty() {
                    log::info!("[{}] {}", username, line);
                }
            }
            Ok(None) => break,
            Err(e) => {
                log::warn!("[{}] Failed reading scraper output: {}", username, e);
                break;
            }
        }
    }
}

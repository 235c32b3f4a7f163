use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::{AppError, AppResult};

const APP_DIR_NAME: &str = "Community Relay";

/// Placeholder the sample `.env` ships with for the scraper login
const PLACEHOLDER_SCRAPER_USER: &str = "your_instagram_username";

#[derive(Clone)]
pub struct BackendCredentials {
    pub email: String,
    pub password: String,
    pub platform: String,
}

impl fmt::Debug for BackendCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendCredentials")
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .field("platform", &self.platform)
            .finish()
    }
}

#[derive(Clone, Default)]
pub struct ScraperCredentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl fmt::Debug for ScraperCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScraperCredentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl ScraperCredentials {
    /// Login pair to hand to the scraper, unless unset or still the sample value
    pub fn usable(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(pass))
                if !user.trim().is_empty()
                    && !pass.is_empty()
                    && !user.contains(PLACEHOLDER_SCRAPER_USER) =>
            {
                Some((user, pass))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: String,
    pub credentials: BackendCredentials,
    pub scraper_credentials: ScraperCredentials,
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub results_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub scraper_program: String,
    pub scraper_script: PathBuf,
    pub upload_workers: usize,
    pub upload_queue_capacity: usize,
    pub http_timeout_secs: u64,
    pub log_level: String,
}

impl Config {
    /// Read configuration from the environment, after loading `.env` if present
    pub fn from_env() -> AppResult<Self> {
        if let Err(e) = dotenvy::dotenv() {
            log::debug!("No .env file loaded: {}", e);
        }

        let config = Self {
            base_url: required_var("BASE_URL")?
                .trim_end_matches('/')
                .to_string(),
            credentials: BackendCredentials {
                email: required_var("EMAIL")?,
                password: required_var("PASSWORD")?,
                platform: optional_var("PLATFORM").unwrap_or_else(|| "web".to_string()),
            },
            scraper_credentials: ScraperCredentials {
                username: optional_var("INSTAGRAM_USER"),
                password: optional_var("INSTAGRAM_PASSWORD"),
            },
            host: optional_var("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_var("PORT", 3001)?,
            data_dir: match optional_var("DATA_DIR") {
                Some(dir) => PathBuf::from(dir),
                None => default_data_directory()?,
            },
            results_dir: optional_var("RESULTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("results")),
            temp_dir: optional_var("TEMP_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| env::temp_dir().join("community_relay")),
            scraper_program: optional_var("SCRAPER_PROGRAM")
                .unwrap_or_else(|| "python".to_string()),
            scraper_script: optional_var("SCRAPER_SCRIPT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("scraper.py")),
            upload_workers: parse_var("UPLOAD_WORKERS", 2)?,
            upload_queue_capacity: parse_var("UPLOAD_QUEUE_CAPACITY", 64)?,
            http_timeout_secs: parse_var("HTTP_TIMEOUT_SECS", 120)?,
            log_level: optional_var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        };

        validate_config(&config)?;
        Ok(config)
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("relay.db")
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn optional_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn required_var(name: &str) -> AppResult<String> {
    optional_var(name)
        .ok_or_else(|| AppError::Config(format!("Missing required environment variable {}", name)))
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> AppResult<T> {
    match optional_var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::validation(name, &format!("Invalid value '{}'", raw))),
        None => Ok(default),
    }
}

fn default_data_directory() -> AppResult<PathBuf> {
    let data_dir = dirs::data_dir()
        .ok_or_else(|| AppError::Config("Could not find data directory".to_string()))?
        .join(APP_DIR_NAME);
    Ok(data_dir)
}

pub fn validate_config(config: &Config) -> AppResult<()> {
    let base_url = config.base_url.trim();
    if base_url.is_empty() {
        return Err(AppError::validation("BASE_URL", "Must not be empty"));
    }

    if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
        return Err(AppError::validation("BASE_URL", "Must be an http or https URL"));
    }

    if config.upload_workers == 0 || config.upload_workers > 16 {
        return Err(AppError::validation("UPLOAD_WORKERS", "Must be between 1 and 16"));
    }

    if config.upload_queue_capacity == 0 {
        return Err(AppError::validation("UPLOAD_QUEUE_CAPACITY", "Must be greater than 0"));
    }

    if config.http_timeout_secs < 5 {
        return Err(AppError::validation("HTTP_TIMEOUT_SECS", "Must be at least 5 seconds"));
    }

    let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
    if !valid_log_levels.contains(&config.log_level.as_str()) {
        return Err(AppError::validation("LOG_LEVEL", "Must be a valid log level"));
    }

    Ok(())
}

/// Create the directories the service writes into
pub fn ensure_directories(config: &Config) -> AppResult<()> {
    fs::create_dir_all(&config.data_dir)?;
    fs::create_dir_all(&config.temp_dir)?;
    log::info!("Data directory: {}", config.data_dir.display());
    log::info!("Scratch directory: {}", config.temp_dir.display());
    Ok(())
}

/// Remove files in `directory` last modified more than `max_age` ago
pub fn cleanup_old_files(directory: &Path, max_age: Duration) -> AppResult<usize> {
    if !directory.exists() {
        return Ok(0);
    }

    let cutoff_time = std::time::SystemTime::now() - max_age;
    let mut removed = 0;

    for entry in fs::read_dir(directory)? {
        let entry = entry?;
        let path = entry.path();

        if path.is_file() {
            if let Ok(metadata) = entry.metadata() {
                if let Ok(modified) = metadata.modified() {
                    if modified < cutoff_time {
                        if let Err(e) = fs::remove_file(&path) {
                            log::warn!("Failed to remove old file {}: {}", path.display(), e);
                        } else {
                            log::debug!("Removed old file: {}", path.display());
                            removed += 1;
                        }
                    }
                }
            }
        }
    }

    Ok(removed)
}

#[cfg(test)]
pub(crate) fn test_config(base_url: &str, root: &Path) -> Config {
    Config {
        base_url: base_url.to_string(),
        credentials: BackendCredentials {
            email: "relay@example.com".to_string(),
            password: "secret".to_string(),
            platform: "web".to_string(),
        },
        scraper_credentials: ScraperCredentials::default(),
        host: "127.0.0.1".to_string(),
        port: 0,
        data_dir: root.join("data"),
        results_dir: root.join("results"),
        temp_dir: root.join("temp"),
        scraper_program: "python".to_string(),
        scraper_script: PathBuf::from("scraper.py"),
        upload_workers: 1,
        upload_queue_capacity: 8,
        http_timeout_secs: 30,
        log_level: "info".to_string(),
    }
}

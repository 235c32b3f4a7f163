use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Authentication failed: {reason}")]
    Auth { reason: String },

    #[error("Upload failed: {reason}")]
    Upload { reason: String },

    #[error("Publish failed: {reason}")]
    Publish { reason: String },

    #[error("{what} not found: {id}")]
    NotFound { what: String, id: String },

    #[error("File too large ({size_mb:.1}MB). Max allowed: {limit_mb}MB for {kind}.")]
    SizeLimit {
        size_mb: f64,
        limit_mb: u64,
        kind: String,
    },

    #[error("Download failed for {url}: {reason}")]
    Download { url: String, reason: String },

    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Custom result type
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn validation(field: &str, message: &str) -> Self {
        Self::Validation {
            field: field.to_string(),
            message: message.to_string(),
        }
    }

    pub fn auth(reason: impl Into<String>) -> Self {
        Self::Auth {
            reason: reason.into(),
        }
    }

    pub fn upload(reason: impl Into<String>) -> Self {
        Self::Upload {
            reason: reason.into(),
        }
    }

    pub fn publish(reason: impl Into<String>) -> Self {
        Self::Publish {
            reason: reason.into(),
        }
    }

    pub fn not_found(what: &str, id: &str) -> Self {
        Self::NotFound {
            what: what.to_string(),
            id: id.to_string(),
        }
    }

    pub fn size_limit(size_bytes: u64, limit_mb: u64, kind: &str) -> Self {
        Self::SizeLimit {
            size_mb: size_bytes as f64 / (1024.0 * 1024.0),
            limit_mb,
            kind: kind.to_string(),
        }
    }

    pub fn download(url: &str, reason: impl Into<String>) -> Self {
        Self::Download {
            url: url.to_string(),
            reason: reason.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation { .. } => StatusCode::BAD_REQUEST,
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::SizeLimit { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            log::error!("Request failed: {}", self);
        } else {
            log::warn!("Request rejected ({}): {}", status.as_u16(), self);
        }

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::config::BackendCredentials;
use crate::database::Database;
use crate::errors::{AppError, AppResult};
use crate::uploader::backend_client::BackendClient;

/// Tokens are refreshed once older than this; the backend expires them at 25 minutes
pub const TOKEN_FRESHNESS_MINUTES: i64 = 20;

const LOGIN_ENDPOINT: &str = "/auth/user/login";
const REFRESH_ENDPOINT: &str = "/auth/user/regenerateAccessToken";

/// Bearer credentials issued by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub user_id: Option<String>,
    pub issued_at: DateTime<Utc>,
}

impl Session {
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.issued_at
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.age(now) > Duration::minutes(TOKEN_FRESHNESS_MINUTES)
    }
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
    platform: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
    platform: &'a str,
}

/// Owns the single persisted backend session
#[derive(Clone)]
pub struct SessionManager {
    client: BackendClient,
    db: Database,
    credentials: BackendCredentials,
    // serializes token acquisition so concurrent callers share one login
    token_lock: Arc<Mutex<()>>,
}

impl SessionManager {
    pub fn new(client: BackendClient, db: Database, credentials: BackendCredentials) -> Self {
        Self {
            client,
            db,
            credentials,
            token_lock: Arc::new(Mutex::new(())),
        }
    }

    pub async fn current_session(&self) -> AppResult<Option<Session>> {
        self.db.load_session().await
    }

    /// A usable bearer token: logs in, refreshes, or reuses the stored one
    pub async fn get_valid_token(&self) -> AppResult<String> {
        let _guard = self.token_lock.lock().await;

        let session = match self.db.load_session().await? {
            None => {
                log::info!("No session found, logging in...");
                self.login_locked().await?
            }
            Some(session) if session.is_stale(Utc::now()) => {
                log::info!(
                    "Token is {} minutes old, refreshing...",
                    session.age(Utc::now()).num_minutes()
                );
                self.refresh_or_login(session).await?
            }
            Some(session) => session,
        };

        Ok(session.access_token)
    }

    /// Unconditional fresh login, for calls the backend rejects with stale tokens
    pub async fn force_login(&self) -> AppResult<String> {
        let _guard = self.token_lock.lock().await;
        log::info!("Forcing fresh login...");
        Ok(self.login_locked().await?.access_token)
    }

    pub async fn login(&self) -> AppResult<Session> {
        let _guard = self.token_lock.lock().await;
        self.login_locked().await
    }

    pub async fn refresh_tokens(&self, refresh_token: &str) -> AppResult<Session> {
        let _guard = self.token_lock.lock().await;
        let current = self.db.load_session().await?;
        self.refresh_locked(current, refresh_token).await
    }

    async fn refresh_or_login(&self, session: Session) -> AppResult<Session> {
        let refreshed = match session.refresh_token.clone() {
            Some(refresh_token) => self.refresh_locked(Some(session), &refresh_token).await,
            None => Err(AppError::auth("Stored session has no refresh token")),
        };

        match refreshed {
            Ok(session) => Ok(session),
            Err(e) => {
                log::warn!("Refresh failed ({}), logging in again...", e);
                self.login_locked().await
            }
        }
    }

    async fn login_locked(&self) -> AppResult<Session> {
        let request = LoginRequest {
            email: &self.credentials.email,
            password: &self.credentials.password,
            platform: &self.credentials.platform,
        };

        let response = self
            .client
            .post_json(LOGIN_ENDPOINT, &request, None)
            .await
            .map_err(|e| AppError::auth(format!("Login request failed: {}", e)))?;

        let token = match response.str_field("token") {
            Some(token) if response.is_success() => token.to_string(),
            _ => {
                return Err(AppError::auth(format!(
                    "Login failed: {}",
                    response.summary()
                )))
            }
        };

        let user_id = response
            .body
            .get("user")
            .and_then(|user| user.get("_id"))
            .and_then(|id| id.as_str())
            .map(str::to_string);

        let session = Session {
            access_token: token,
            refresh_token: response.str_field("refreshToken").map(str::to_string),
            user_id,
            issued_at: Utc::now(),
        };

        self.db.save_session(&session).await?;
        log::info!(
            "Login successful. User ID: {}",
            session.user_id.as_deref().unwrap_or("unknown")
        );
        Ok(session)
    }

    async fn refresh_locked(
        &self,
        current: Option<Session>,
        refresh_token: &str,
    ) -> AppResult<Session> {
        let request = RefreshRequest {
            refresh_token,
            platform: &self.credentials.platform,
        };

        let response = self
            .client
            .post_json(REFRESH_ENDPOINT, &request, None)
            .await
            .map_err(|e| AppError::auth(format!("Refresh request failed: {}", e)))?;

        let access_token = match response.str_field("newAccessToken") {
            Some(token) if response.is_success() => token.to_string(),
            _ => {
                return Err(AppError::auth(format!(
                    "Refresh failed: {}",
                    response.summary()
                )))
            }
        };

        let new_refresh = response
            .str_field("newRefreshToken")
            .map(str::to_string)
            .unwrap_or_else(|| refresh_token.to_string());

        let session = Session {
            access_token,
            refresh_token: Some(new_refresh),
            user_id: current.and_then(|s| s.user_id),
            issued_at: Utc::now(),
        };

        self.db.save_session(&session).await?;
        log::info!("Tokens refreshed successfully.");
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staleness_threshold_is_twenty_minutes() {
        let now = Utc::now();
        let session = |minutes: i64| Session {
            access_token: "t".to_string(),
            refresh_token: None,
            user_id: None,
            issued_at: now - Duration::minutes(minutes),
        };

        assert!(!session(0).is_stale(now));
        assert!(!session(19).is_stale(now));
        assert!(session(21).is_stale(now));
        assert!(session(60).is_stale(now));
    }
}

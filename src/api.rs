use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::models::{CommunityRef, DestinationKind, MergedPost, PostStatus, Profile};
use crate::scraper::merge_with_status;
use crate::security::InputValidator;
use crate::state::AppState;
use crate::uploader::backend_client::BROWSER_USER_AGENT;
use crate::uploader::JobProgress;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/posts", get(list_posts))
        .route("/api/posts/status", post(update_status))
        .route("/api/settings", get(get_settings).post(update_settings))
        .route("/api/scrape", post(trigger_scrape))
        .route("/api/share", post(share_post))
        .route("/api/proxy", get(proxy_media))
        .route("/api/jobs/:id", get(get_job))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "active",
        "timestamp": Utc::now().to_rfc3339(),
        "uptime": state.started_at.elapsed().as_secs_f64(),
    }))
}

async fn list_posts(State(state): State<AppState>) -> AppResult<Json<Vec<MergedPost>>> {
    let posts = state.results.load_all().await?;
    let statuses = state.db.all_statuses().await?;
    Ok(Json(merge_with_status(posts, &statuses)))
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdateRequest {
    pub shortcode: Option<String>,
    pub status: Option<String>,
}

async fn update_status(
    State(state): State<AppState>,
    Json(request): Json<StatusUpdateRequest>,
) -> AppResult<Json<Value>> {
    let (shortcode, status) = match (request.shortcode, request.status) {
        (Some(shortcode), Some(status)) => (shortcode, status),
        _ => {
            return Err(AppError::validation(
                "request",
                "shortcode and status required",
            ))
        }
    };
    InputValidator::validate_shortcode(&shortcode)?;
    let shortcode = shortcode.trim();
    let status: PostStatus = status.parse()?;

    state.db.set_status(shortcode, status).await?;
    log::info!("Status of {} set to {}", shortcode, status);

    if status == PostStatus::Approved {
        let job_id = state.queue.submit(shortcode).await;
        return Ok(Json(json!({ "success": true, "jobId": job_id })));
    }

    Ok(Json(json!({ "success": true })))
}

async fn get_settings(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let profiles = state.db.list_profiles().await?;
    let communities = state.db.list_communities().await?;
    let active_profile_id = state.db.active_profile_id().await?;

    let (usernames, scrape_limit) = profiles
        .iter()
        .find(|p| p.id == active_profile_id)
        .map(|p| (p.instagram_usernames.clone(), p.scrape_limit))
        .unwrap_or_else(|| (Vec::new(), Profile::default_profile().scrape_limit));

    Ok(Json(json!({
        "instagramUsernames": usernames,
        "scrapeLimit": scrape_limit,
        "communities": communities,
        "profiles": profiles,
        "activeProfileId": active_profile_id,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdate {
    pub instagram_usernames: Option<Vec<String>>,
    pub scrape_limit: Option<u32>,
    pub communities: Option<Vec<CommunityRef>>,
    pub profiles: Option<Vec<Profile>>,
    pub active_profile_id: Option<String>,
}

impl SettingsUpdate {
    fn validate(&self) -> AppResult<()> {
        if let Some(usernames) = &self.instagram_usernames {
            for username in usernames {
                InputValidator::validate_username(username)?;
            }
        }

        if let Some(limit) = self.scrape_limit {
            InputValidator::validate_scrape_limit(limit)?;
        }

        if let Some(profiles) = &self.profiles {
            let mut seen = std::collections::HashSet::new();
            for profile in profiles {
                if profile.id.trim().is_empty() {
                    return Err(AppError::validation("profiles", "Profile id cannot be empty"));
                }
                if !seen.insert(profile.id.as_str()) {
                    return Err(AppError::validation(
                        "profiles",
                        &format!("Duplicate profile id '{}'", profile.id),
                    ));
                }
                for username in &profile.instagram_usernames {
                    InputValidator::validate_username(username)?;
                }
                InputValidator::validate_scrape_limit(profile.scrape_limit)?;
            }
        }

        Ok(())
    }
}

async fn update_settings(
    State(state): State<AppState>,
    Json(update): Json<SettingsUpdate>,
) -> AppResult<Json<Value>> {
    update.validate()?;

    if let Some(communities) = &update.communities {
        state.db.replace_communities(communities).await?;
    }
    if let Some(profiles) = &update.profiles {
        state.db.replace_profiles(profiles).await?;
    }
    if let Some(active_id) = &update.active_profile_id {
        let known = state.db.list_profiles().await?.iter().any(|p| &p.id == active_id);
        if !known {
            return Err(AppError::validation(
                "activeProfileId",
                &format!("Unknown profile '{}'", active_id),
            ));
        }
        state.db.set_active_profile_id(active_id).await?;
    }

    if update.instagram_usernames.is_some() || update.scrape_limit.is_some() {
        let active_id = state.db.active_profile_id().await?;
        let updated = state
            .db
            .update_profile_sources(
                &active_id,
                update.instagram_usernames.as_deref(),
                update.scrape_limit,
            )
            .await?;
        if !updated {
            log::warn!("Active profile {} not found, source settings ignored", active_id);
        }
    }

    Ok(Json(json!({ "success": true })))
}

async fn trigger_scrape(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let profile = state.db.active_profile().await?;
    let (usernames, limit) = profile
        .map(|p| (p.instagram_usernames, p.scrape_limit))
        .unwrap_or_default();

    if usernames.is_empty() {
        return Err(AppError::validation(
            "instagramUsernames",
            "No usernames configured. Add usernames in Settings.",
        ));
    }

    log::info!(
        "Starting scrape for {} user(s) with limit {}",
        usernames.len(),
        limit
    );
    let started = state.launcher.spawn_all(&usernames, limit);

    Ok(Json(json!({
        "success": true,
        "message": format!("Scraping started for {} users", usernames.len()),
        "started": started,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareRequest {
    pub shortcode: Option<String>,
    pub community_id: Option<String>,
    pub destination_kind: Option<String>,
}

async fn share_post(
    State(state): State<AppState>,
    Json(request): Json<ShareRequest>,
) -> AppResult<Json<Value>> {
    let (shortcode, destination_id) = match (request.shortcode, request.community_id) {
        (Some(s), Some(c)) if !s.trim().is_empty() && !c.trim().is_empty() => (s, c),
        _ => {
            return Err(AppError::validation(
                "request",
                "shortcode and communityId required",
            ))
        }
    };
    InputValidator::validate_shortcode(&shortcode)?;

    let kind = match request.destination_kind.as_deref() {
        Some(kind) => DestinationKind::parse(kind)?,
        None => DestinationKind::Community,
    };

    let published = state
        .pipeline
        .share_post(shortcode.trim(), &destination_id, kind)
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": format!(
            "Shared to {} {}",
            published.destination.kind.as_str(),
            published.destination.id
        ),
        "postId": published.post_id,
    })))
}

#[derive(Debug, Deserialize)]
pub struct ProxyQuery {
    pub url: Option<String>,
}

async fn proxy_media(
    State(state): State<AppState>,
    Query(query): Query<ProxyQuery>,
) -> AppResult<Response> {
    let url = query
        .url
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| AppError::validation("url", "URL is required"))?;
    InputValidator::validate_media_url(&url)?;

    let upstream = state
        .http
        .get(url.trim())
        .header(reqwest::header::USER_AGENT, BROWSER_USER_AGENT)
        .send()
        .await?;

    let status = StatusCode::from_u16(upstream.status().as_u16())
        .unwrap_or(StatusCode::BAD_GATEWAY);
    if !status.is_success() {
        return Err(AppError::download(&url, format!("HTTP {}", status.as_u16())));
    }

    // reqwest 0.11 is on http 0.2, axum on http 1
    let content_type = upstream
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| header::HeaderValue::from_bytes(v.as_bytes()).ok());

    let mut response = Body::from_stream(upstream.bytes_stream()).into_response();
    if let Some(content_type) = content_type {
        response.headers_mut().insert(header::CONTENT_TYPE, content_type);
    }

    Ok(response)
}

async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<JobProgress>> {
    let job_id = Uuid::parse_str(&id)
        .map_err(|_| AppError::validation("id", "Job id must be a UUID"))?;

    state
        .queue
        .tracker()
        .get(job_id)
        .map(Json)
        .ok_or_else(|| AppError::not_found("Job", &id))
}

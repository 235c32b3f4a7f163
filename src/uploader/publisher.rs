use serde::Serialize;
use serde_json::Value;

use crate::errors::{AppError, AppResult};
use crate::models::{ContentType, DestinationKind};
use crate::session::SessionManager;

use super::backend_client::{BackendClient, BackendResponse};

const CREATE_CONTENT_ENDPOINT: &str = "/content/createContent";
const COMMUNITY_POST_ENDPOINT: &str = "/community/post";
const CLUB_POST_ENDPOINT: &str = "/club/postContent";
const CLUB_RATING_ENDPOINT: &str = "/club/updateRating";

pub const DEFAULT_ASPECT_RATIO: &str = "1";

/// Everything needed to turn an uploaded object into a feed post
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub destination_kind: DestinationKind,
    pub destination_id: String,
    pub content_type: ContentType,
    pub storage_key: String,
    pub caption: String,
    pub aspect_ratio: Option<String>,
    pub public_mode: Option<bool>,
}

/// Body of `createContent`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentPayload {
    pub content_type: ContentType,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    pub text: String,
    pub send_by: &'static str,
    pub belongs_to: String,
    pub key: &'static str,
    pub people_tagged: Vec<String>,
    pub tags: Vec<String>,
    pub universe_meta_data: serde_json::Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

impl ContentPayload {
    /// Images carry their aspect ratio inline as `<key>#<ratio>`; videos leave
    /// `url` empty and put the key in `videoUrl`.
    pub fn build(request: &PublishRequest) -> Self {
        let (url, video_url) = match request.content_type {
            ContentType::Image => {
                let ratio = request
                    .aspect_ratio
                    .as_deref()
                    .filter(|r| !r.trim().is_empty())
                    .unwrap_or(DEFAULT_ASPECT_RATIO);
                (format!("{}#{}", request.storage_key, ratio), None)
            }
            ContentType::Video => (String::new(), Some(request.storage_key.clone())),
        };

        let (send_by, template) = match request.destination_kind {
            DestinationKind::Community => ("userCommunity", None),
            DestinationKind::Club => ("club", Some(String::new())),
        };

        Self {
            content_type: request.content_type,
            url,
            video_url,
            text: request.caption.clone(),
            send_by,
            belongs_to: request.destination_id.clone(),
            key: "normal",
            people_tagged: Vec::new(),
            tags: Vec::new(),
            universe_meta_data: serde_json::Map::new(),
            template,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CommunityPostBody<'a> {
    community_id: &'a str,
    content_id: &'a str,
    content_type: ContentType,
    action_handled: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ClubPostBody<'a> {
    club_id: &'a str,
    content_id: &'a str,
    public_mode: bool,
}

/// Registers content and attaches it to a community or club feed
#[derive(Clone)]
pub struct PostPublisher {
    client: BackendClient,
    sessions: SessionManager,
}

impl PostPublisher {
    pub fn new(client: BackendClient, sessions: SessionManager) -> Self {
        Self { client, sessions }
    }

    /// Returns the published post id.
    ///
    /// Not atomic: when attaching fails after registration the content is left
    /// orphaned on the backend and the whole call reports failure.
    pub async fn publish(&self, request: &PublishRequest) -> AppResult<String> {
        if request.destination_id.trim().is_empty() {
            return Err(AppError::validation("destinationId", "Destination is required"));
        }

        // community posts fail with cached tokens; club posts accept them
        let token = match request.destination_kind {
            DestinationKind::Community => self.sessions.force_login().await?,
            DestinationKind::Club => self.sessions.get_valid_token().await?,
        };

        let payload = ContentPayload::build(request);
        log::info!(
            "Creating {} content for {} {}",
            request.content_type.as_str(),
            request.destination_kind.as_str(),
            request.destination_id
        );
        log::debug!("Content payload: {}", serde_json::to_string(&payload)?);

        let response = self
            .client
            .post_json(CREATE_CONTENT_ENDPOINT, &payload, Some(&token))
            .await
            .map_err(|e| AppError::publish(format!("createContent request failed: {}", e)))?;

        let content_id = match response.str_field("contentId") {
            Some(id) if response.is_success() => id.to_string(),
            _ => {
                return Err(AppError::publish(format!(
                    "Failed to get contentId: {}",
                    response.summary()
                )))
            }
        };
        log::info!("Content created successfully. ID: {}", content_id);

        match request.destination_kind {
            DestinationKind::Community => {
                self.attach_to_community(request, &content_id, &token).await
            }
            DestinationKind::Club => self.attach_to_club(request, &content_id, &token).await,
        }
    }

    async fn attach_to_community(
        &self,
        request: &PublishRequest,
        content_id: &str,
        token: &str,
    ) -> AppResult<String> {
        let body = CommunityPostBody {
            community_id: &request.destination_id,
            content_id,
            content_type: request.content_type,
            action_handled: true,
        };

        let response = self
            .client
            .post_json(COMMUNITY_POST_ENDPOINT, &body, Some(token))
            .await
            .map_err(|e| AppError::publish(format!("community post request failed: {}", e)))?;
        ensure_success(&response, "Finalizing community post")?;

        log::info!("Post finalized in community {}", request.destination_id);
        Ok(published_id(&response).unwrap_or_else(|| content_id.to_string()))
    }

    async fn attach_to_club(
        &self,
        request: &PublishRequest,
        content_id: &str,
        token: &str,
    ) -> AppResult<String> {
        let body = ClubPostBody {
            club_id: &request.destination_id,
            content_id,
            public_mode: request.public_mode.unwrap_or(false),
        };

        let response = self
            .client
            .post_json(CLUB_POST_ENDPOINT, &body, Some(token))
            .await
            .map_err(|e| AppError::publish(format!("club post request failed: {}", e)))?;
        ensure_success(&response, "Posting club content")?;

        let rating = self
            .client
            .get(
                CLUB_RATING_ENDPOINT,
                &[("clubId", request.destination_id.as_str())],
                Some(token),
            )
            .await
            .map_err(|e| AppError::publish(format!("club rating request failed: {}", e)))?;
        ensure_success(&rating, "Updating club rating")?;

        log::info!("Club post finalized in {}", request.destination_id);
        Ok(published_id(&response).unwrap_or_else(|| content_id.to_string()))
    }
}

fn ensure_success(response: &BackendResponse, step: &str) -> AppResult<()> {
    if response.is_success() {
        Ok(())
    } else {
        Err(AppError::publish(format!("{} failed: {}", step, response.summary())))
    }
}

/// Post id from an attach response, top level or nested under `data`
fn published_id(response: &BackendResponse) -> Option<String> {
    let pick = |body: &Value| {
        ["postId", "_id"]
            .iter()
            .find_map(|key| body.get(*key).and_then(Value::as_str))
            .filter(|id| !id.is_empty())
            .map(str::to_string)
    };
    pick(&response.body).or_else(|| response.body.get("data").and_then(pick))
}

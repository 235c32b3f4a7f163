use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use community_relay::{
    api,
    config::{BackendCredentials, Config, ScraperCredentials},
    database::Database,
    models::{DestinationKind, PostStatus, Profile},
    session::{Session, SessionManager},
    uploader::{BackendClient, JobState},
    AppState,
};

/// Integration tests for the relay: a wiremock server stands in for both the
/// posting backend and the media CDN

fn relay_config(base_url: &str, root: &Path) -> Config {
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

struct Harness {
    root: TempDir,
    server: MockServer,
    config: Config,
    db: Database,
}

impl Harness {
    async fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let server = MockServer::start().await;
        let config = relay_config(&server.uri(), root.path());
        std::fs::create_dir_all(&config.temp_dir).unwrap();
        let db = Database::connect(&config.database_path()).await.unwrap();

        Self {
            root,
            server,
            config,
            db,
        }
    }

    fn sessions(&self) -> SessionManager {
        let client = BackendClient::new(&self.config.base_url, self.config.http_timeout()).unwrap();
        SessionManager::new(client, self.db.clone(), self.config.credentials.clone())
    }

    fn app(&self) -> (AppState, Router) {
        let (state, _workers) = AppState::initialize(self.config.clone(), self.db.clone()).unwrap();
        let router = api::router(state.clone());
        (state, router)
    }

    fn media_url(&self, file: &str) -> String {
        format!("{}/media/{}", self.server.uri(), file)
    }

    fn write_results(&self, username: &str, posts: Value) {
        let dir = &self.config.results_dir;
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join(format!("{}_posts.json", username)), posts.to_string()).unwrap();
    }

    async fn bind_destination(&self, kind: DestinationKind, id: &str) {
        let mut profile = Profile::default_profile();
        profile.destination_kind = kind;
        profile.destination_id = id.to_string();
        self.db.replace_profiles(&[profile]).await.unwrap();
    }

    fn scratch_files(&self) -> usize {
        std::fs::read_dir(&self.config.temp_dir).unwrap().count()
    }

    async fn mock_login(&self) {
        Mock::given(method("POST"))
            .and(path("/auth/user/login"))
            .and(body_partial_json(json!({
                "email": "relay@example.com",
                "platform": "web"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "token": "tok-login",
                "refreshToken": "ref-1",
                "user": { "_id": "user-1" }
            })))
            .mount(&self.server)
            .await;
    }

    async fn mock_media(&self, file: &str, content_type: &str, bytes: Vec<u8>) {
        Mock::given(method("GET"))
            .and(path(format!("/media/{}", file)))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", content_type)
                    .set_body_bytes(bytes),
            )
            .mount(&self.server)
            .await;
    }

    async fn mock_storage(&self, key: &str, times: u64) {
        Mock::given(method("POST"))
            .and(path("/content/uploadToS3"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "success": true, "key": key })),
            )
            .expect(times)
            .mount(&self.server)
            .await;
    }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn stored_session(minutes_old: i64) -> Session {
    Session {
        access_token: "tok-old".to_string(),
        refresh_token: Some("ref-old".to_string()),
        user_id: Some("user-1".to_string()),
        issued_at: Utc::now() - ChronoDuration::minutes(minutes_old),
    }
}

async fn wait_for_job(state: &AppState, body: &Value) -> community_relay::uploader::JobProgress {
    let job_id: Uuid = body["jobId"].as_str().unwrap().parse().unwrap();
    state
        .queue
        .tracker()
        .wait_for_completion(job_id, Duration::from_secs(10))
        .await
        .expect("job should finish")
}

#[tokio::test]
async fn test_stale_session_is_refreshed_not_logged_in() {
    let h = Harness::new().await;
    h.db.save_session(&stored_session(21)).await.unwrap();

    Mock::given(method("POST"))
        .and(path("/auth/user/regenerateAccessToken"))
        .and(body_partial_json(json!({ "refreshToken": "ref-old", "platform": "web" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "newAccessToken": "tok-refreshed",
            "newRefreshToken": "ref-new"
        })))
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/user/login"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&h.server)
        .await;

    let token = h.sessions().get_valid_token().await.unwrap();
    assert_eq!(token, "tok-refreshed");

    let session = h.db.load_session().await.unwrap().unwrap();
    assert_eq!(session.refresh_token.as_deref(), Some("ref-new"));
    assert_eq!(session.user_id.as_deref(), Some("user-1"));
    assert!(!session.is_stale(Utc::now()));
}

#[tokio::test]
async fn test_fresh_session_is_reused() {
    let h = Harness::new().await;
    h.db.save_session(&stored_session(5)).await.unwrap();

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&h.server)
        .await;

    assert_eq!(h.sessions().get_valid_token().await.unwrap(), "tok-old");
}

#[tokio::test]
async fn test_failed_refresh_falls_back_to_login() {
    let h = Harness::new().await;
    h.db.save_session(&stored_session(30)).await.unwrap();

    Mock::given(method("POST"))
        .and(path("/auth/user/regenerateAccessToken"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "message": "expired" })))
        .expect(1)
        .mount(&h.server)
        .await;
    h.mock_login().await;

    let token = h.sessions().get_valid_token().await.unwrap();
    assert_eq!(token, "tok-login");
    assert_eq!(
        h.db.load_session().await.unwrap().unwrap().refresh_token.as_deref(),
        Some("ref-1")
    );
}

#[tokio::test]
async fn test_missing_session_logs_in_once() {
    let h = Harness::new().await;

    Mock::given(method("POST"))
        .and(path("/auth/user/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token": "tok-login",
            "refreshToken": "ref-1",
            "user": { "_id": "user-1" }
        })))
        .expect(1)
        .mount(&h.server)
        .await;

    let sessions = h.sessions();
    assert_eq!(sessions.get_valid_token().await.unwrap(), "tok-login");
    // second call finds the fresh session
    assert_eq!(sessions.get_valid_token().await.unwrap(), "tok-login");
}

#[tokio::test]
async fn test_rejected_login_is_an_auth_error() {
    let h = Harness::new().await;

    Mock::given(method("POST"))
        .and(path("/auth/user/login"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "message": "bad password" })))
        .mount(&h.server)
        .await;

    let err = h.sessions().get_valid_token().await.unwrap_err();
    assert!(err.to_string().starts_with("Authentication failed"));
    assert!(h.db.load_session().await.unwrap().is_none());
}

#[tokio::test]
async fn test_login_response_without_token_is_an_auth_error() {
    let h = Harness::new().await;

    Mock::given(method("POST"))
        .and(path("/auth/user/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "refreshToken": "ref-1",
            "user": { "_id": "user-1" }
        })))
        .expect(1)
        .mount(&h.server)
        .await;

    let sessions = h.sessions();
    let err = sessions.login().await.unwrap_err();
    assert!(err.to_string().contains("Login failed"));
    assert!(sessions.current_session().await.unwrap().is_none());
}

#[tokio::test]
async fn test_refresh_response_without_token_falls_back_to_login() {
    let h = Harness::new().await;
    h.db.save_session(&stored_session(21)).await.unwrap();

    Mock::given(method("POST"))
        .and(path("/auth/user/regenerateAccessToken"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "newRefreshToken": "ref-new" })))
        .expect(1)
        .mount(&h.server)
        .await;
    h.mock_login().await;

    let sessions = h.sessions();
    assert_eq!(sessions.get_valid_token().await.unwrap(), "tok-login");

    let session = sessions.current_session().await.unwrap().unwrap();
    assert_eq!(session.access_token, "tok-login");
    assert_eq!(session.refresh_token.as_deref(), Some("ref-1"));
}

#[tokio::test]
async fn test_refresh_tokens_without_access_token_keeps_session() {
    let h = Harness::new().await;
    h.db.save_session(&stored_session(5)).await.unwrap();

    Mock::given(method("POST"))
        .and(path("/auth/user/regenerateAccessToken"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&h.server)
        .await;

    let sessions = h.sessions();
    let err = sessions.refresh_tokens("ref-old").await.unwrap_err();
    assert!(err.to_string().contains("Refresh failed"));
    assert_eq!(
        sessions.current_session().await.unwrap().unwrap().access_token,
        "tok-old"
    );
}

#[tokio::test]
async fn test_refresh_tokens_replaces_session_and_keeps_user() {
    let h = Harness::new().await;
    h.db.save_session(&stored_session(5)).await.unwrap();

    Mock::given(method("POST"))
        .and(path("/auth/user/regenerateAccessToken"))
        .and(body_partial_json(json!({ "refreshToken": "ref-old" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "newAccessToken": "tok-new" })))
        .expect(1)
        .mount(&h.server)
        .await;

    let sessions = h.sessions();
    let session = sessions.refresh_tokens("ref-old").await.unwrap();
    assert_eq!(session.access_token, "tok-new");
    // no new refresh token issued, so the old one stays
    assert_eq!(session.refresh_token.as_deref(), Some("ref-old"));
    assert_eq!(session.user_id.as_deref(), Some("user-1"));
    let stored = sessions.current_session().await.unwrap().unwrap();
    assert_eq!(stored.access_token, "tok-new");
    assert_eq!(stored.refresh_token.as_deref(), Some("ref-old"));
}

#[tokio::test]
async fn test_backend_get_encodes_query_values() {
    let h = Harness::new().await;

    Mock::given(method("GET"))
        .and(path("/club/updateRating"))
        .and(query_param("clubId", "club 7&x=1"))
        .and(header("authorization", "Bearer tok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .expect(1)
        .mount(&h.server)
        .await;

    let client = BackendClient::new(&h.config.base_url, h.config.http_timeout()).unwrap();
    let response = client
        .get("/club/updateRating", &[("clubId", "club 7&x=1")], Some("tok"))
        .await
        .unwrap();
    assert!(response.is_success());
    assert_eq!(response.body["ok"], true);
}

#[tokio::test]
async fn test_listing_posts_is_idempotent() {
    let h = Harness::new().await;
    h.write_results(
        "nasa",
        json!([
            { "shortcode": "abc123", "is_video": false, "display_url": "http://x/a.jpg", "caption": "hi", "likes": 3 },
            { "shortcode": "def456", "is_video": true, "video_url": "http://x/b.mp4" }
        ]),
    );
    h.write_results("esa", json!([{ "shortcode": "ghi789" }]));
    h.db.set_status("def456", PostStatus::Rejected).await.unwrap();

    let (_state, app) = h.app();
    let (status, first) = send(&app, get("/api/posts")).await;
    let (_, second) = send(&app, get("/api/posts")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(first, second);

    let posts = first.as_array().unwrap();
    // esa_posts.json sorts before nasa_posts.json
    assert_eq!(posts[0]["shortcode"], "ghi789");
    assert_eq!(posts[1]["status"], "pending");
    assert_eq!(posts[1]["likes"], 3);
    assert_eq!(posts[2]["status"], "rejected");
}

#[tokio::test]
async fn test_listing_without_results_directory_is_empty() {
    let h = Harness::new().await;
    let (_state, app) = h.app();

    let (status, body) = send(&app, get("/api/posts")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn test_approving_unknown_post_ends_failed() {
    let h = Harness::new().await;
    h.write_results("nasa", json!([{ "shortcode": "abc123" }]));
    let (state, app) = h.app();

    let (status, body) = send(
        &app,
        post_json("/api/posts/status", json!({ "shortcode": "ghost", "status": "approved" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let job = wait_for_job(&state, &body).await;
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.error.as_deref(), Some("Post not found: ghost"));

    let record = h.db.get_status("ghost").await.unwrap().unwrap();
    assert_eq!(record.status, PostStatus::Failed);
}

#[tokio::test]
async fn test_approval_without_destination_fails() {
    let h = Harness::new().await;
    h.write_results(
        "nasa",
        json!([{ "shortcode": "abc123", "display_url": h.media_url("abc123.jpg") }]),
    );
    h.mock_storage("K", 0).await;
    let (state, app) = h.app();

    let (_, body) = send(
        &app,
        post_json("/api/posts/status", json!({ "shortcode": "abc123", "status": "approved" })),
    )
    .await;

    let job = wait_for_job(&state, &body).await;
    assert_eq!(job.state, JobState::Failed);
    assert!(job.error.unwrap().contains("no destination"));
    assert_eq!(
        h.db.get_status("abc123").await.unwrap().unwrap().status,
        PostStatus::Failed
    );
}

#[tokio::test]
async fn test_approvals_beyond_queue_capacity_end_failed() {
    let mut h = Harness::new().await;
    h.config.upload_workers = 1;
    h.config.upload_queue_capacity = 1;

    let slow = h.media_url("slow.jpg");
    h.write_results(
        "nasa",
        json!([
            { "shortcode": "a1", "display_url": slow },
            { "shortcode": "a2", "display_url": slow },
            { "shortcode": "a3", "display_url": slow }
        ]),
    );
    h.bind_destination(DestinationKind::Community, "comm-1").await;

    // keeps the single worker busy while the queue fills up
    Mock::given(method("GET"))
        .and(path("/media/slow.jpg"))
        .respond_with(ResponseTemplate::new(404).set_delay(Duration::from_secs(1)))
        .mount(&h.server)
        .await;
    h.mock_storage("K", 0).await;

    let (state, app) = h.app();
    let mut accepted = Vec::new();
    for shortcode in ["a1", "a2", "a3"] {
        let (status, body) = send(
            &app,
            post_json("/api/posts/status", json!({ "shortcode": shortcode, "status": "approved" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["jobId"].is_string());
        accepted.push((shortcode, body));
    }

    let mut overflowed = 0;
    for (shortcode, body) in &accepted {
        let job = wait_for_job(&state, body).await;
        assert_eq!(job.state, JobState::Failed);
        if job.error.as_deref() == Some("Upload queue is full") {
            overflowed += 1;
        }
        assert_eq!(
            h.db.get_status(shortcode).await.unwrap().unwrap().status,
            PostStatus::Failed
        );
    }
    assert!(overflowed >= 1);
}

#[tokio::test]
async fn test_end_to_end_approval_publishes_to_active_profile() {
    let h = Harness::new().await;
    h.write_results(
        "nasa",
        json!([{
            "shortcode": "abc123",
            "is_video": false,
            "display_url": h.media_url("abc123.jpg"),
            "caption": "hi"
        }]),
    );
    h.bind_destination(DestinationKind::Community, "comm-1").await;

    h.mock_login().await;
    h.mock_media("abc123.jpg", "image/jpeg", vec![0xFF; 2048]).await;
    h.mock_storage("K", 1).await;
    Mock::given(method("POST"))
        .and(path("/content/createContent"))
        .and(body_partial_json(json!({
            "contentType": "image",
            "url": "K#1",
            "text": "hi",
            "sendBy": "userCommunity",
            "belongsTo": "comm-1"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "contentId": "content-1" })))
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/community/post"))
        .and(body_partial_json(json!({
            "communityId": "comm-1",
            "contentId": "content-1",
            "contentType": "image",
            "actionHandled": true
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": { "_id": "post-1" } })))
        .expect(1)
        .mount(&h.server)
        .await;

    let (state, app) = h.app();
    let (status, body) = send(
        &app,
        post_json("/api/posts/status", json!({ "shortcode": "abc123", "status": "approved" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let job = wait_for_job(&state, &body).await;
    assert_eq!(job.state, JobState::Completed, "job error: {:?}", job.error);
    assert_eq!(job.published_post_id.as_deref(), Some("post-1"));
    assert_eq!(job.destination.unwrap().id, "comm-1");

    assert_eq!(
        h.db.get_status("abc123").await.unwrap().unwrap().status,
        PostStatus::Uploaded
    );
    assert_eq!(h.scratch_files(), 0);

    let (_, job_body) = send(&app, get(&format!("/api/jobs/{}", job.job_id))).await;
    assert_eq!(job_body["state"], "completed");
    assert_eq!(job_body["publishedPostId"], "post-1");
}

#[tokio::test]
async fn test_share_above_ceiling_is_rejected_before_upload() {
    let h = Harness::new().await;
    h.write_results(
        "nasa",
        json!([{ "shortcode": "big1", "is_video": false, "display_url": h.media_url("big1.jpg") }]),
    );

    h.mock_login().await;
    h.mock_media("big1.jpg", "image/jpeg", vec![0u8; 11 * 1024 * 1024]).await;
    h.mock_storage("K", 0).await;

    let (_state, app) = h.app();
    let (status, body) = send(
        &app,
        post_json("/api/share", json!({ "shortcode": "big1", "communityId": "comm-9" })),
    )
    .await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(
        body["error"],
        "File too large (11.0MB). Max allowed: 10MB for images."
    );
    assert_eq!(h.scratch_files(), 0);
    assert!(h.db.get_status("big1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_video_share_to_club() {
    let h = Harness::new().await;
    h.write_results(
        "nasa",
        json!([{
            "shortcode": "vid1",
            "is_video": true,
            "video_url": h.media_url("vid1.mp4"),
            "display_url": h.media_url("thumb.jpg"),
            "caption": "launch"
        }]),
    );

    h.mock_login().await;
    h.mock_media("vid1.mp4", "video/mp4", vec![7u8; 4096]).await;
    h.mock_storage("V", 1).await;
    Mock::given(method("POST"))
        .and(path("/content/createContent"))
        .and(body_partial_json(json!({
            "contentType": "video",
            "url": "",
            "videoUrl": "V",
            "sendBy": "club",
            "template": "",
            "belongsTo": "club 7"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "contentId": "content-2" })))
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/club/postContent"))
        .and(body_partial_json(json!({
            "clubId": "club 7",
            "contentId": "content-2",
            "publicMode": false
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "message": "ok" })))
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/club/updateRating"))
        .and(query_param("clubId", "club 7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&h.server)
        .await;

    let (_state, app) = h.app();
    let (status, body) = send(
        &app,
        post_json(
            "/api/share",
            json!({ "shortcode": "vid1", "communityId": "club 7", "destinationKind": "club" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "body: {}", body);
    // no post id in the attach response, so the content id stands in
    assert_eq!(body["postId"], "content-2");

    let record = h.db.get_status("vid1").await.unwrap().unwrap();
    assert_eq!(record.status, PostStatus::Uploaded);
    assert_eq!(record.shared_to, vec!["club 7"]);
    assert_eq!(h.scratch_files(), 0);
}

#[tokio::test]
async fn test_failed_attach_reports_error_and_cleans_up() {
    let h = Harness::new().await;
    h.write_results(
        "nasa",
        json!([{ "shortcode": "abc123", "display_url": h.media_url("abc123.jpg"), "caption": "hi" }]),
    );

    h.mock_login().await;
    h.mock_media("abc123.jpg", "image/jpeg", vec![1u8; 512]).await;
    h.mock_storage("K", 1).await;
    Mock::given(method("POST"))
        .and(path("/content/createContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "contentId": "content-3" })))
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/community/post"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({ "message": "not a member" })))
        .mount(&h.server)
        .await;

    let (_state, app) = h.app();
    let (status, body) = send(
        &app,
        post_json("/api/share", json!({ "shortcode": "abc123", "communityId": "comm-1" })),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("not a member"));
    assert!(h.db.get_status("abc123").await.unwrap().is_none());
    assert_eq!(h.scratch_files(), 0);
}

#[tokio::test]
async fn test_share_request_validation() {
    let h = Harness::new().await;
    h.write_results("nasa", json!([{ "shortcode": "abc123" }]));
    let (_state, app) = h.app();

    let (status, body) = send(&app, post_json("/api/share", json!({ "shortcode": "abc123" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("communityId required"));

    let (status, _) = send(
        &app,
        post_json("/api/share", json!({ "shortcode": "ghost", "communityId": "c1" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        post_json(
            "/api/share",
            json!({ "shortcode": "abc123", "communityId": "c1", "destinationKind": "group" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_status_update_validation() {
    let h = Harness::new().await;
    let (_state, app) = h.app();

    let (status, _) = send(
        &app,
        post_json("/api/posts/status", json!({ "shortcode": "abc123", "status": "published" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        post_json("/api/posts/status", json!({ "shortcode": "../x", "status": "rejected" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &app,
        post_json("/api/posts/status", json!({ "shortcode": "abc123", "status": "rejected" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.get("jobId").is_none());
    assert_eq!(
        h.db.get_status("abc123").await.unwrap().unwrap().status,
        PostStatus::Rejected
    );
}

#[tokio::test]
async fn test_settings_round_trip() {
    let h = Harness::new().await;
    let (_state, app) = h.app();

    let (status, body) = send(&app, get("/api/settings")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["activeProfileId"], "default");
    assert_eq!(body["instagramUsernames"], json!(["strangerthingstv"]));
    assert_eq!(body["scrapeLimit"], 10);

    let (status, _) = send(
        &app,
        post_json(
            "/api/settings",
            json!({
                "communities": [{ "id": "comm-1", "name": "Space", "kind": "community" }],
                "profiles": [
                    { "id": "default", "name": "Default Profile", "communityId": "comm-1", "instagramUsernames": ["nasa"] },
                    { "id": "clubs", "name": "Clubs", "destinationKind": "club", "destinationId": "club-1", "instagramUsernames": ["esa"], "scrapeLimit": 3 }
                ],
                "activeProfileId": "clubs",
                "scrapeLimit": 25
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(&app, get("/api/settings")).await;
    assert_eq!(body["activeProfileId"], "clubs");
    assert_eq!(body["instagramUsernames"], json!(["esa"]));
    assert_eq!(body["scrapeLimit"], 25);
    assert_eq!(body["communities"][0]["name"], "Space");
    assert_eq!(body["profiles"].as_array().unwrap().len(), 2);

    let (status, _) = send(
        &app,
        post_json("/api/settings", json!({ "instagramUsernames": ["--login_user"] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, post_json("/api/settings", json!({ "activeProfileId": "nope" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, post_json("/api/settings", json!({ "scrapeLimit": 0 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (_, body) = send(&app, get("/api/settings")).await;
    assert_eq!(body["scrapeLimit"], 25);
}

#[tokio::test]
async fn test_scrape_without_usernames_is_rejected() {
    let h = Harness::new().await;
    let (_state, app) = h.app();

    let (status, _) = send(&app, post_json("/api/settings", json!({ "instagramUsernames": [] }))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, post_json("/api/scrape", json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("No usernames configured"));
}

#[tokio::test]
async fn test_proxy_streams_media_with_content_type() {
    let h = Harness::new().await;
    h.mock_media("pic.png", "image/png", vec![1, 2, 3, 4]).await;
    let (_state, app) = h.app();

    let uri = format!("/api/proxy?url={}", h.media_url("pic.png"));
    let response = app.clone().oneshot(get(&uri)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "image/png");
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], &[1, 2, 3, 4]);

    let (status, _) = send(&app, get("/api/proxy")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_job_lookup_errors() {
    let h = Harness::new().await;
    let (_state, app) = h.app();

    let (status, _) = send(&app, get("/api/jobs/not-a-uuid")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, get(&format!("/api/jobs/{}", Uuid::new_v4()))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health_reports_active() {
    let h = Harness::new().await;
    let (_state, app) = h.app();

    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "active");
    assert!(body["uptime"].as_f64().unwrap() >= 0.0);
    // keep the tempdir alive until here
    assert!(h.root.path().exists());
}

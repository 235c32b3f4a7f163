use reqwest::{multipart, Client, RequestBuilder};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

use crate::errors::AppResult;

/// Desktop browser agent; media CDNs refuse obvious bot agents
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Status and decoded body of a backend call.
///
/// Non-JSON bodies are kept as a JSON string so callers can still report them.
#[derive(Debug, Clone)]
pub struct BackendResponse {
    pub status: u16,
    pub body: Value,
}

impl BackendResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.body
            .get(key)
            .and_then(Value::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Body rendered for error messages, truncated
    pub fn summary(&self) -> String {
        let text = match &self.body {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let end = text
            .char_indices()
            .nth(300)
            .map(|(i, _)| i)
            .unwrap_or(text.len());
        format!("HTTP {}: {}", self.status, &text[..end])
    }
}

/// Thin wrapper over the backend's REST API
#[derive(Debug, Clone)]
pub struct BackendClient {
    client: Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(base_url: &str, timeout: Duration) -> AppResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Underlying client, shared with the media downloader and proxy
    pub fn http(&self) -> &Client {
        &self.client
    }

    pub fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &B,
        token: Option<&str>,
    ) -> AppResult<BackendResponse> {
        let url = self.url(endpoint);
        log::debug!("POST {}", url);
        let request = with_bearer(self.client.post(&url).json(body), token);
        Self::read_response(request).await
    }

    pub async fn get(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
        token: Option<&str>,
    ) -> AppResult<BackendResponse> {
        let url = self.url(endpoint);
        log::debug!("GET {} {:?}", url, query);
        let request = with_bearer(self.client.get(&url).query(query), token);
        Self::read_response(request).await
    }

    pub async fn post_multipart(
        &self,
        endpoint: &str,
        form: multipart::Form,
        token: Option<&str>,
    ) -> AppResult<BackendResponse> {
        let url = self.url(endpoint);
        log::debug!("POST (multipart) {}", url);
        let request = with_bearer(self.client.post(&url).multipart(form), token);
        Self::read_response(request).await
    }

    async fn read_response(request: RequestBuilder) -> AppResult<BackendResponse> {
        let response = request.send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        let result = BackendResponse { status, body };
        log::debug!("Backend response: {}", result.summary());
        Ok(result)
    }
}

fn with_bearer(request: RequestBuilder, token: Option<&str>) -> RequestBuilder {
    match token {
        Some(token) => request.bearer_auth(token),
        None => request,
    }
}

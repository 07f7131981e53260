//! HTTP client wrapper shared by every agent task.
//!
//! One reused `reqwest::Client`, bearer auth, and an exponential backoff
//! helper that honors `Retry-After` from a saturated server.

use std::time::Duration;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::trace;

/// Backoff floor and ceiling for failed pushes.
const BACKOFF_MIN: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub enum RequestError {
    /// Server asked us to slow down; wait at least this long.
    RetryAfter(Duration),
    /// Other HTTP error status with the response body.
    Status(StatusCode, String),
    /// Transport-level failure (DNS, TLS, refused, timeout).
    Transport(String),
    /// Body decoding failure.
    Decode(String),
}

impl std::fmt::Display for RequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestError::RetryAfter(d) => write!(f, "server busy, retry after {}s", d.as_secs()),
            RequestError::Status(code, body) => write!(f, "HTTP {code}: {body}"),
            RequestError::Transport(msg) => write!(f, "transport error: {msg}"),
            RequestError::Decode(msg) => write!(f, "response decode error: {msg}"),
        }
    }
}

impl std::error::Error for RequestError {}

#[derive(Clone)]
pub struct AgentClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl AgentClient {
    pub fn new(base_url: &str, insecure_tls: bool) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .danger_accept_invalid_certs(insecure_tls)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
        })
    }

    pub fn set_token(&mut self, token: String) {
        self.token = Some(token);
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// WebSocket endpoint derived from the base URL.
    pub fn stream_url(&self) -> String {
        let ws_base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            format!("ws://{}", self.base_url)
        };
        format!("{ws_base}/api/commands/stream")
    }

    pub async fn post_json<B: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, RequestError> {
        let url = format!("{}{}", self.base_url, path);
        trace!("POST {url}");

        let mut request = self.http.post(&url).json(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RequestError::Transport(e.to_string()))?;
        Self::decode(response).await
    }

    pub async fn get_json<R: DeserializeOwned>(&self, path: &str) -> Result<R, RequestError> {
        let url = format!("{}{}", self.base_url, path);
        trace!("GET {url}");

        let mut request = self.http.get(&url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RequestError::Transport(e.to_string()))?;
        Self::decode(response).await
    }

    async fn decode<R: DeserializeOwned>(response: reqwest::Response) -> Result<R, RequestError> {
        let status = response.status();

        if status == StatusCode::SERVICE_UNAVAILABLE {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(BACKOFF_MIN);
            return Err(RequestError::RetryAfter(retry_after));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RequestError::Status(status, body));
        }

        response
            .json::<R>()
            .await
            .map_err(|e| RequestError::Decode(e.to_string()))
    }
}

/// Exponential backoff: 1 s doubling to 60 s, resettable on success.
#[derive(Debug)]
pub struct Backoff {
    current: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            current: BACKOFF_MIN,
        }
    }
}

impl Backoff {
    /// Next delay, honoring a server-provided floor.
    pub fn next(&mut self, floor: Option<Duration>) -> Duration {
        let delay = self.current.max(floor.unwrap_or(Duration::ZERO));
        self.current = (self.current * 2).min(BACKOFF_MAX);
        delay
    }

    pub fn reset(&mut self) {
        self.current = BACKOFF_MIN;
    }
}

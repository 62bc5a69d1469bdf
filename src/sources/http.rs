//! HTTP transport shared by every source adapter.
//!
//! Adapters only see the [`ProviderClient`] trait: "send this query, give me
//! JSON or tell me it failed". Retries with exponential backoff happen in
//! here and are invisible to the aggregator.

use crate::error::SourceError;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// JSON-over-HTTP collaborator of an adapter.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// GET `url` with the given query parameters and decode the JSON body.
    async fn search(&self, url: &str, query: &[(&str, String)]) -> Result<Value, SourceError>;

    /// POST a JSON body to `url` and decode the JSON response.
    async fn submit(&self, url: &str, body: &Value) -> Result<Value, SourceError>;
}

/// Retry policy for transient provider failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn with_retries(retries: u32) -> Self {
        Self {
            max_attempts: retries + 1,
            ..Self::default()
        }
    }

    /// Backoff before attempt number `attempt` (0-based).
    fn backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempt - 1);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// [`ProviderClient`] backed by `reqwest`.
#[derive(Clone)]
pub struct HttpProviderClient {
    client: reqwest::Client,
    bearer_token: Option<String>,
    retry: RetryPolicy,
}

impl HttpProviderClient {
    pub fn new(timeout: Duration, retry: RetryPolicy) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .user_agent(concat!("bizintel/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SourceError::Configuration(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            bearer_token: None,
            retry,
        })
    }

    /// Send `Authorization: Bearer <token>` with every request.
    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    async fn execute(
        &self,
        build: impl Fn() -> reqwest::RequestBuilder,
        url: &str,
    ) -> Result<Value, SourceError> {
        let mut last_error = SourceError::transport(format!("no attempt made for {}", url));

        for attempt in 0..self.retry.max_attempts.max(1) {
            let backoff = self.retry.backoff(attempt);
            if !backoff.is_zero() {
                debug!("Retrying {} in {:?}", url, backoff);
                sleep(backoff).await;
            }

            let mut request = build();
            if let Some(ref token) = self.bearer_token {
                request = request.bearer_auth(token);
            }

            match self.send_once(request).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() => {
                    warn!(
                        "Attempt {}/{} for {} failed: {}",
                        attempt + 1,
                        self.retry.max_attempts,
                        url,
                        e
                    );
                    last_error = e;
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error)
    }

    async fn send_once(&self, request: reqwest::RequestBuilder) -> Result<Value, SourceError> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                SourceError::transport("request timed out")
            } else if e.is_connect() {
                SourceError::transport(format!("cannot connect: {}", e))
            } else {
                SourceError::transport(format!("request failed: {}", e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| SourceError::Parse(format!("response is not JSON: {}", e)))
    }
}

#[async_trait]
impl ProviderClient for HttpProviderClient {
    async fn search(&self, url: &str, query: &[(&str, String)]) -> Result<Value, SourceError> {
        debug!("GET {}", url);
        self.execute(|| self.client.get(url).query(query), url)
            .await
    }

    async fn submit(&self, url: &str, body: &Value) -> Result<Value, SourceError> {
        debug!("POST {}", url);
        self.execute(|| self.client.post(url).json(body), url).await
    }
}

/// Map a non-success HTTP status to the error taxonomy.
fn status_error(status: StatusCode, body: &str) -> SourceError {
    let message = extract_error_message(body);

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            SourceError::Configuration(format!("credential rejected ({}): {}", status, message))
        }
        _ => SourceError::upstream(status.as_u16().to_string(), message),
    }
}

/// Pull a readable message out of an error body, falling back to the raw text.
fn extract_error_message(body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<Value>(body) {
        let candidates = [
            &json["error"]["message"],
            &json["error_message"],
            &json["message"],
            &json["error"],
        ];
        for candidate in candidates {
            if let Some(message) = candidate.as_str() {
                return message.to_string();
            }
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        "empty response body".to_string()
    } else {
        trimmed.chars().take(300).collect()
    }
}

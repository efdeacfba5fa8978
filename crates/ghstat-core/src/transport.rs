//! HTTP transport for the GraphQL endpoint.
//!
//! [`Transport`] is the seam the query client talks through. The real
//! implementation is [`HttpTransport`]; tests substitute scripted fakes.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::error::{QueryError, QueryResult};
use crate::secret::{GitHubToken, mask};

/// Default GraphQL endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://api.github.com/graphql";

const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";
const RATE_LIMIT_RESET: &str = "x-ratelimit-reset";

/// Raw response from one POST.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,
    /// Server-directed backoff (`Retry-After`, or time until the primary
    /// rate-limit window resets).
    pub retry_after: Option<Duration>,
    /// `x-ratelimit-remaining` was `0`.
    pub quota_exhausted: bool,
    /// Parsed JSON body, or the raw text as a JSON string when the body was
    /// not JSON.
    pub body: Value,
}

impl TransportResponse {
    /// A 200 response with the given body.
    pub const fn ok(body: Value) -> Self {
        Self {
            status: 200,
            retry_after: None,
            quota_exhausted: false,
            body,
        }
    }

    /// A response with an arbitrary status.
    pub const fn with_status(status: u16, body: Value) -> Self {
        Self {
            status,
            retry_after: None,
            quota_exhausted: false,
            body,
        }
    }

    /// Attach a `Retry-After` hint.
    pub const fn retry_after(mut self, after: Duration) -> Self {
        self.retry_after = Some(after);
        self
    }

    /// Whether the remote is asking us to back off.
    ///
    /// GitHub signals primary limits with 403 + `x-ratelimit-remaining: 0`,
    /// secondary limits with 403/429 + `Retry-After`, and GraphQL cost
    /// limits with a 200 whose `errors` carry `type: RATE_LIMITED`.
    pub fn is_rate_limited(&self) -> bool {
        match self.status {
            429 => true,
            403 => self.retry_after.is_some() || self.quota_exhausted,
            200 => graphql_errors(&self.body)
                .iter()
                .any(|e| e.get("type").and_then(Value::as_str) == Some("RATE_LIMITED")),
            _ => false,
        }
    }
}

/// Error objects from a GraphQL body, if any.
pub fn graphql_errors(body: &Value) -> Vec<&Value> {
    body.get("errors")
        .and_then(Value::as_array)
        .map(|errors| errors.iter().collect())
        .unwrap_or_default()
}

/// Something that can POST a JSON body to the graph API.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one request.
    ///
    /// Connection failures map to [`QueryError::Transport`] and elapsed
    /// timeouts to [`QueryError::Timeout`]; any HTTP status is returned as a
    /// response for the caller to classify.
    async fn post(&self, body: &Value) -> QueryResult<TransportResponse>;

    /// Scrub credentials out of text before it is logged or surfaced.
    fn redact(&self, text: &str) -> String {
        text.to_string()
    }
}

/// Bearer-authenticated HTTPS transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    token: GitHubToken,
}

impl HttpTransport {
    /// Build a transport with a per-call timeout.
    pub fn new(endpoint: impl Into<String>, token: GitHubToken, timeout: Duration) -> QueryResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("ghstat/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| QueryError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            token,
        })
    }

    fn classify(&self, err: &reqwest::Error) -> QueryError {
        if err.is_timeout() {
            QueryError::Timeout
        } else {
            QueryError::Transport(self.redact(&err.to_string()))
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip_all, fields(endpoint = %self.endpoint))]
    async fn post(&self, body: &Value) -> QueryResult<TransportResponse> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.token.secret().expose())
            .json(body)
            .send()
            .await
            .map_err(|e| self.classify(&e))?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let text = response.text().await.map_err(|e| self.classify(&e))?;
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));

        let quota_exhausted = header_str(&headers, RATE_LIMIT_REMAINING) == Some("0");
        let retry_after = retry_after_from(&headers, quota_exhausted);
        debug!(status, ?retry_after, quota_exhausted, "response received");

        Ok(TransportResponse {
            status,
            retry_after,
            quota_exhausted,
            body,
        })
    }

    fn redact(&self, text: &str) -> String {
        mask(text, self.token.secret())
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

fn retry_after_from(headers: &HeaderMap, quota_exhausted: bool) -> Option<Duration> {
    if let Some(secs) = header_str(headers, RETRY_AFTER.as_str()).and_then(|v| v.parse::<u64>().ok()) {
        return Some(Duration::from_secs(secs));
    }
    if !quota_exhausted {
        return None;
    }
    let reset = header_str(headers, RATE_LIMIT_RESET)?.parse::<i64>().ok()?;
    let wait = reset.saturating_sub(Utc::now().timestamp()).max(0);
    Some(Duration::from_secs(wait.unsigned_abs()))
}

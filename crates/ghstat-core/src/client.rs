//! Paginated, retrying GraphQL query client.
//!
//! [`QueryClient::fetch`] validates its input, answers from the
//! [`QueryCache`] when it can, and otherwise walks every page of the
//! requested connection. Each page request is retried on rate limits and
//! transient transport failures up to [`ClientOptions::max_retries`] times.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::cache::{CacheStats, QueryCache, query_key};
use crate::config::ClientConfig;
use crate::error::{QueryError, QueryResult};
use crate::model::{BranchRef, CommitRecord, RepositoryRef};
use crate::query::Query;
use crate::transport::{Transport, TransportResponse, graphql_errors};

const MAX_ERROR_EXCERPT: usize = 300;

/// All nodes of one query, assembled across pages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    /// Nodes in page order.
    pub nodes: Vec<Value>,
    /// Pages fetched to assemble this result.
    pub pages: u32,
}

impl ResultSet {
    /// Wrap already-assembled nodes.
    pub const fn new(nodes: Vec<Value>, pages: u32) -> Self {
        Self { nodes, pages }
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the connection was empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Decode every node with `decode`, skipping (and logging) failures.
    pub fn decode_with<T>(&self, decode: impl Fn(&Value) -> QueryResult<T>) -> Vec<T> {
        self.nodes
            .iter()
            .filter_map(|node| {
                decode(node)
                    .inspect_err(|e| warn!(error = %e, "skipping undecodable node"))
                    .ok()
            })
            .collect()
    }

    /// Nodes as repositories.
    pub fn repositories(&self) -> Vec<RepositoryRef> {
        self.decode_with(RepositoryRef::from_node)
    }

    /// Nodes as branches.
    pub fn branches(&self) -> Vec<BranchRef> {
        self.decode_with(BranchRef::from_node)
    }

    /// Nodes as commits.
    pub fn commits(&self) -> Vec<CommitRecord> {
        self.decode_with(CommitRecord::from_node)
    }
}

/// Retry and paging knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Wait used when a rate limit names no delay.
    pub rate_limit_fallback: Duration,
    /// Base wait for timeouts and connection failures, doubled per attempt.
    pub transient_backoff: Duration,
    /// Nodes per page.
    pub page_size: u32,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            rate_limit_fallback: Duration::from_secs(60),
            transient_backoff: Duration::from_secs(1),
            page_size: 100,
        }
    }
}

impl From<&ClientConfig> for ClientOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            rate_limit_fallback: Duration::from_secs(config.rate_limit_fallback_secs),
            page_size: config.page_size.clamp(1, 100),
            ..Self::default()
        }
    }
}

impl ClientOptions {
    /// No waiting between retries. Useful in tests.
    pub const fn without_backoff(mut self) -> Self {
        self.rate_limit_fallback = Duration::ZERO;
        self.transient_backoff = Duration::ZERO;
        self
    }

    fn backoff_for(&self, err: &QueryError, attempt: u32) -> Duration {
        match err {
            QueryError::RateLimited {
                retry_after: Some(after),
            } => *after,
            QueryError::RateLimited { retry_after: None } => self.rate_limit_fallback,
            _ => self
                .transient_backoff
                .saturating_mul(1 << attempt.saturating_sub(1).min(6)),
        }
    }
}

/// Query client over a [`Transport`].
#[derive(Debug)]
pub struct QueryClient<T> {
    transport: T,
    cache: QueryCache,
    options: ClientOptions,
    requests: u64,
}

impl<T: Transport> QueryClient<T> {
    /// Client with an empty in-memory cache.
    pub fn new(transport: T, options: ClientOptions) -> Self {
        Self {
            transport,
            cache: QueryCache::new(),
            options,
            requests: 0,
        }
    }

    /// Replace the cache, e.g. with one backed by a persisted store.
    pub fn with_cache(mut self, cache: QueryCache) -> Self {
        self.cache = cache;
        self
    }

    /// Total requests sent, including retries.
    pub const fn requests_sent(&self) -> u64 {
        self.requests
    }

    /// Cache hit/miss counters.
    pub const fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// The options this client was built with.
    pub const fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Run a query by external name.
    pub async fn fetch(&mut self, name: &str, params: &BTreeMap<String, String>) -> QueryResult<ResultSet> {
        let query = Query::from_name(name, params)
            .inspect_err(|e| warn!(query = name, error = %e, "rejected query"))?;
        self.fetch_query(&query).await
    }

    /// Run a typed query, following pagination to the end.
    #[instrument(skip_all, fields(query = %query))]
    pub async fn fetch_query(&mut self, query: &Query) -> QueryResult<ResultSet> {
        let query = query.clone().validated()?;
        let key = query_key(query.kind().name(), &query.params());
        if let Some(hit) = self.cache.get(&key) {
            debug!(nodes = hit.len(), "served from cache");
            return Ok(hit);
        }

        let mut nodes = Vec::new();
        let mut after: Option<String> = None;
        let mut seen_cursors = HashSet::new();
        let mut pages = 0u32;
        loop {
            let body = query.request_body(self.options.page_size, after.as_deref());
            let data = match self.request_with_retries(&query, &body).await {
                Ok(data) => data,
                Err(e) => {
                    warn!(error = %self.transport.redact(&e.to_string()), "query failed");
                    return Err(e);
                }
            };
            let page = query.page(&data)?;
            pages += 1;
            debug!(page = pages, nodes = page.nodes.len(), "page received");
            nodes.extend(page.nodes);
            match page.next_cursor {
                Some(cursor) if !seen_cursors.insert(cursor.clone()) => {
                    warn!(page = pages, "pagination cursor repeated");
                    return Err(QueryError::Decode("cursor did not advance".into()));
                }
                Some(cursor) => after = Some(cursor),
                None => break,
            }
        }

        let result = ResultSet::new(nodes, pages);
        self.cache.insert(key, result.clone());
        Ok(result)
    }

    async fn request_with_retries(&mut self, query: &Query, body: &Value) -> QueryResult<Value> {
        let max_attempts = self.options.max_retries.saturating_add(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match self.send_once(body).await {
                Ok(data) => return Ok(data),
                Err(e) => e,
            };
            if !err.is_retryable() {
                return Err(err);
            }
            if attempt >= max_attempts {
                return Err(QueryError::ExhaustedRetries {
                    query: query.kind().name().to_string(),
                    attempts: attempt,
                    last: Box::new(err),
                });
            }
            let wait = self.options.backoff_for(&err, attempt);
            warn!(
                attempt,
                max_attempts,
                wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                error = %err,
                "retrying request"
            );
            tokio::time::sleep(wait).await;
        }
    }

    async fn send_once(&mut self, body: &Value) -> QueryResult<Value> {
        self.requests += 1;
        let response = self.transport.post(body).await?;
        if response.is_rate_limited() {
            return Err(QueryError::RateLimited {
                retry_after: response.retry_after,
            });
        }
        if !(200..300).contains(&response.status) {
            return Err(QueryError::Remote {
                status: response.status,
                message: self.transport.redact(&excerpt(&response.body)),
            });
        }
        self.extract_data(response)
    }

    fn extract_data(&self, response: TransportResponse) -> QueryResult<Value> {
        let errors = graphql_errors(&response.body);
        if !errors.is_empty() {
            let message = errors
                .iter()
                .map(|e| e.get("message").and_then(Value::as_str).unwrap_or("unknown error"))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(QueryError::Remote {
                status: response.status,
                message: self.transport.redact(&message),
            });
        }
        match response.body {
            Value::Object(mut map) => match map.remove("data") {
                Some(data) if !data.is_null() => Ok(data),
                _ => Err(QueryError::Decode("response has no data".into())),
            },
            _ => Err(QueryError::Decode("response body is not an object".into())),
        }
    }
}

fn excerpt(body: &Value) -> String {
    let text = match body {
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .map_or_else(|| body.to_string(), str::to_string),
        other => other.to_string(),
    };
    text.chars().take(MAX_ERROR_EXCERPT).collect()
}

//! Error types for ghstat-core

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur when working with configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to deserialize configuration.
    #[error("invalid configuration: {0}")]
    Deserialize(#[from] Box<figment::Error>),

    /// Configuration file not found after searching all locations.
    #[error("no configuration file found")]
    NotFound,
}

/// Result type alias using [`ConfigError`].
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors from the remote query client.
///
/// Messages carried here have already been passed through the transport's
/// redactor, so they are safe to log.
#[derive(Error, Debug)]
pub enum QueryError {
    /// Unknown query name, or a required parameter missing or empty.
    #[error("invalid query input: {0}")]
    Validation(String),

    /// The remote asked us to slow down.
    #[error("rate limited by remote (retry after {retry_after:?})")]
    RateLimited {
        /// Server-directed backoff, when one was supplied.
        retry_after: Option<Duration>,
    },

    /// Non-success status that is not a rate limit, or a GraphQL error body.
    #[error("remote returned status {status}: {message}")]
    Remote {
        /// HTTP status code.
        status: u16,
        /// Response excerpt or GraphQL error messages.
        message: String,
    },

    /// The per-call timeout elapsed.
    #[error("request timed out")]
    Timeout,

    /// Connection-level failure (DNS, TLS, reset).
    #[error("transport failed: {0}")]
    Transport(String),

    /// The response did not have the expected shape.
    #[error("malformed response: {0}")]
    Decode(String),

    /// Retry budget spent on transient failures.
    #[error("{query} gave up after {attempts} attempts: {last}")]
    ExhaustedRetries {
        /// Query name.
        query: String,
        /// Total requests issued, including the first.
        attempts: u32,
        /// The failure seen on the final attempt.
        last: Box<QueryError>,
    },
}

impl QueryError {
    /// Whether the client should retry the request that produced this error.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Timeout | Self::Transport(_)
        )
    }

    /// Whether this error should abort a whole aggregation run rather than
    /// just the branch or repository being fetched.
    pub const fn aborts_run(&self) -> bool {
        matches!(self, Self::ExhaustedRetries { .. } | Self::Validation(_))
    }
}

/// Result type alias using [`QueryError`].
pub type QueryResult<T> = Result<T, QueryError>;

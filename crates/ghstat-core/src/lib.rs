//! Core library for ghstat.
//!
//! Computes per-user contribution statistics from the GitHub GraphQL API and
//! renormalizes the WakaTime weekly activity feed. The `ghstat` CLI is a thin
//! layer over this crate.
//!
//! # Modules
//!
//! - [`aggregate`] - Commit deduplication and year/quarter/language buckets
//! - [`cache`] - Query memoization and the encrypted persisted store
//! - [`client`] - Paginated, retrying query client
//! - [`config`] - Configuration loading and management
//! - [`error`] - Error types and result aliases
//! - [`model`] - Repository, branch and commit records
//! - [`query`] - The supported GraphQL queries
//! - [`renormalize`] - Largest-remainder percentage renormalization
//! - [`run`] - One user's stats run, end to end
//! - [`secret`] - Token loading and masking
//! - [`transport`] - HTTP transport seam
//! - [`wakatime`] - WakaTime feed client
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use ghstat_core::client::{ClientOptions, QueryClient};
//! use ghstat_core::run::{RunOptions, compute_contributions};
//! use ghstat_core::cache::MemoryStore;
//! use ghstat_core::secret::GitHubToken;
//! use ghstat_core::transport::{DEFAULT_ENDPOINT, HttpTransport};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let token = GitHubToken::from_env()?;
//! let transport = HttpTransport::new(DEFAULT_ENDPOINT, token, Duration::from_secs(30))?;
//! let mut client = QueryClient::new(transport, ClientOptions::default());
//! let run = compute_contributions::<_, MemoryStore>(&mut client, "octocat", None, &RunOptions::default()).await?;
//! println!("{:?}", run.stats.totals_by_language());
//! # Ok(())
//! # }
//! ```
#![deny(unsafe_code)]

pub mod aggregate;

pub mod cache;

pub mod client;

pub mod config;

pub mod error;

pub mod model;

pub mod query;

pub mod renormalize;

pub mod run;

pub mod secret;

pub mod transport;

pub mod wakatime;

#[cfg(test)]
mod testing;

pub use config::{Config, ConfigLoader, LogLevel};

pub use error::{ConfigError, ConfigResult, QueryError, QueryResult};

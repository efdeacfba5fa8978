//! A full contribution-stats run for one user.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::aggregate::{AggregateError, ContributionStats, aggregate};
use crate::cache::{BlobStore, PersistentCache, aggregate_entry_name};
use crate::client::QueryClient;
use crate::error::{QueryError, QueryResult};
use crate::model::RepositoryRef;
use crate::query::{Query, sanitize_login};
use crate::transport::Transport;

/// Errors that end a run without a usable result.
#[derive(Error, Debug)]
pub enum RunError {
    /// The repository list itself could not be fetched.
    #[error("could not list repositories: {0}")]
    Repositories(#[source] QueryError),

    /// Aggregation stopped early.
    #[error(transparent)]
    Aggregate(#[from] AggregateError),
}

/// Knobs for [`compute_contributions`].
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Delay between branch fetches.
    pub pacing: Duration,
    /// Ignore a cached aggregate and recompute.
    pub refresh: bool,
}

/// Stats plus where they came from.
#[derive(Debug, Clone, Serialize)]
pub struct Contributions {
    /// The computed (or cached) stats.
    pub stats: ContributionStats,
    /// Whether the stats were served from the persisted aggregate.
    pub from_cache: bool,
    /// Repositories walked; zero when served from cache.
    pub repositories: usize,
    /// Remote requests issued during this run.
    pub requests: u64,
}

/// Every non-fork repository `username` owns, newest first.
pub async fn collect_repositories<T: Transport>(
    client: &mut QueryClient<T>,
    username: &str,
) -> QueryResult<Vec<RepositoryRef>> {
    let result = client
        .fetch_query(&Query::RepositoryList {
            username: username.to_string(),
        })
        .await?;
    let repositories = result.repositories();
    info!(count = repositories.len(), "repositories collected");
    Ok(repositories)
}

/// Compute `username`'s contribution stats, reusing a fresh persisted
/// aggregate when one exists.
#[instrument(skip_all, fields(username = %username, refresh = options.refresh))]
pub async fn compute_contributions<T: Transport, S: BlobStore>(
    client: &mut QueryClient<T>,
    username: &str,
    aggregate_cache: Option<&PersistentCache<S>>,
    options: &RunOptions,
) -> Result<Contributions, RunError> {
    let username = sanitize_login(username).map_err(RunError::Repositories)?;
    let username = username.as_str();
    let entry = aggregate_entry_name(username);
    if !options.refresh
        && let Some(stats) = aggregate_cache.and_then(|c| c.load::<ContributionStats>(&entry))
    {
        info!("using cached aggregate");
        return Ok(Contributions {
            stats,
            from_cache: true,
            repositories: 0,
            requests: 0,
        });
    }

    let before = client.requests_sent();
    let repositories = collect_repositories(client, username)
        .await
        .map_err(RunError::Repositories)?;
    let stats = aggregate(client, &repositories, username, options.pacing).await?;

    if let Some(cache) = aggregate_cache
        && let Err(e) = cache.store(&entry, &stats)
    {
        warn!(error = %e, "failed to persist aggregate");
    }

    Ok(Contributions {
        stats,
        from_cache: false,
        repositories: repositories.len(),
        requests: client.requests_sent() - before,
    })
}

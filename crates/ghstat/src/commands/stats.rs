//! Stats command: contribution totals by year, quarter and language.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Args;
use owo_colors::OwoColorize;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use ghstat_core::aggregate::{BucketMap, ContributionStats, LineCounts};
use ghstat_core::cache::{BlobStore, EncryptedFileStore, QueryCache, SharedPersistentCache, PersistentCache};
use ghstat_core::client::{ClientOptions, QueryClient};
use ghstat_core::config::Config;
use ghstat_core::query::sanitize_login;
use ghstat_core::run::{Contributions, RunError, RunOptions, compute_contributions};
use ghstat_core::secret::GitHubToken;
use ghstat_core::transport::HttpTransport;

use crate::redact::Redactor;

/// Arguments for the `stats` subcommand.
#[derive(Args, Debug, Default)]
pub struct StatsArgs {
    /// GitHub login to report on (defaults to `username` in config)
    pub username: Option<String>,

    /// Skip the pause between branch fetches
    #[arg(long)]
    pub fast: bool,

    /// Ignore cached results and recompute
    #[arg(long)]
    pub refresh: bool,
}

#[derive(Serialize)]
struct StatsReport<'a> {
    username: &'a str,
    from_cache: bool,
    partial: bool,
    repositories: usize,
    requests: u64,
    commits: usize,
    yearly: &'a BucketMap,
    languages: BTreeMap<String, LineCounts>,
    years: BTreeMap<i32, LineCounts>,
}

impl<'a> StatsReport<'a> {
    fn new(username: &'a str, run: &'a Contributions, partial: bool) -> Self {
        Self::from_stats(username, &run.stats, partial)
            .with_provenance(run.from_cache, run.repositories, run.requests)
    }

    fn from_stats(username: &'a str, stats: &'a ContributionStats, partial: bool) -> Self {
        Self {
            username,
            from_cache: false,
            partial,
            repositories: stats.ledger.repositories().count(),
            requests: 0,
            commits: stats.ledger.commit_count(),
            yearly: &stats.yearly,
            languages: stats.totals_by_language(),
            years: stats.yearly_totals(),
        }
    }

    fn with_provenance(mut self, from_cache: bool, repositories: usize, requests: u64) -> Self {
        self.from_cache = from_cache;
        self.repositories = repositories;
        self.requests = requests;
        self
    }
}

/// Open the persisted store when any persistence is enabled.
///
/// A store that cannot be opened disables persistence for this run.
fn open_persisted(config: &Config) -> Option<SharedPersistentCache> {
    let cache = &config.cache;
    if !cache.persist_queries && !cache.persist_aggregate {
        return None;
    }
    let Some(dir) = cache.resolved_dir() else {
        warn!("no cache directory available; persistence disabled");
        return None;
    };
    match EncryptedFileStore::open(&dir) {
        Ok(store) => {
            let store: Arc<dyn BlobStore> = Arc::new(store);
            Some(PersistentCache::new(store, cache.ttl()))
        }
        Err(e) => {
            warn!(error = %e, %dir, "could not open cache; persistence disabled");
            None
        }
    }
}

fn run_options(args: &StatsArgs, config: &Config) -> RunOptions {
    RunOptions {
        pacing: if args.fast { Duration::ZERO } else { config.pacing() },
        refresh: args.refresh,
    }
}

/// Compute and print contribution stats.
///
/// # Arguments
/// * `global_json` - Global `--json` flag from CLI
/// * `config` - Loaded configuration
/// * `redactor` - Receives the token so it never reaches the logs
#[instrument(name = "cmd_stats", skip_all, fields(json_output = global_json))]
pub fn cmd_stats(args: StatsArgs, global_json: bool, config: &Config, redactor: &Redactor) -> anyhow::Result<()> {
    let username = args
        .username
        .clone()
        .or_else(|| config.username.clone())
        .context("no username given; pass one or set `username` in config")?;
    let username = sanitize_login(&username).context("username is blank")?;

    let token = GitHubToken::from_env().context("no GitHub token available")?;
    redactor.register(token.secret());

    let transport = HttpTransport::new(&config.client.endpoint, token, config.client.timeout())
        .context("failed to build HTTP client")?;
    let persisted = open_persisted(config);

    let mut query_cache = QueryCache::new();
    if config.cache.persist_queries
        && !args.refresh
        && let Some(ref persisted) = persisted
    {
        query_cache = query_cache.with_persistence(persisted.clone());
    }
    let mut client = QueryClient::new(transport, ClientOptions::from(&config.client)).with_cache(query_cache);

    let aggregate_cache = persisted.as_ref().filter(|_| config.cache.persist_aggregate);
    let options = run_options(&args, config);
    debug!(
        %username,
        pacing_ms = u64::try_from(options.pacing.as_millis()).unwrap_or(u64::MAX),
        refresh = options.refresh,
        "starting stats run"
    );

    let spinner = super::spinner(&format!("Collecting contributions for {username}..."), !global_json);
    let outcome = super::block_on(compute_contributions(&mut client, &username, aggregate_cache, &options))?;
    spinner.finish_and_clear();

    match outcome {
        Ok(run) => {
            let stats = client.cache_stats();
            info!(
                requests = run.requests,
                cache_hits = stats.hits,
                cache_misses = stats.misses,
                from_cache = run.from_cache,
                "stats run finished"
            );
            print_report(&StatsReport::new(&username, &run, false), global_json)
        }
        Err(RunError::Aggregate(err)) => {
            warn!(error = %err, "stats run aborted; reporting partial results");
            print_report(&StatsReport::from_stats(&username, err.partial(), true), global_json)?;
            Err(err).context("stats are incomplete")
        }
        Err(err) => Err(err.into()),
    }
}

fn print_report(report: &StatsReport<'_>, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("{}", report.username.bold());
    if report.from_cache {
        println!("{}", "(cached result)".dimmed());
    } else {
        println!(
            "{}",
            format!(
                "{} repositories, {} commits, {} requests",
                report.repositories, report.commits, report.requests
            )
            .dimmed()
        );
    }
    if report.partial {
        println!("{}", "Partial result: the run stopped early".yellow());
    }

    if report.yearly.is_empty() {
        println!();
        println!("  {} No attributed commits", "○".yellow());
        return Ok(());
    }

    println!();
    println!("{}", "By quarter".bold().underline());
    for (year, quarter, language, counts) in report.yearly.cells() {
        println!(
            "  {year} Q{quarter}  {:<20} {} {}",
            language.cyan(),
            format!("+{}", counts.additions).green(),
            format!("-{}", counts.deletions).red()
        );
    }

    println!();
    println!("{}", "By year".bold().underline());
    for (year, counts) in &report.years {
        println!(
            "  {year}  {} {}",
            format!("+{}", counts.additions).green(),
            format!("-{}", counts.deletions).red()
        );
    }

    println!();
    println!("{}", "By language".bold().underline());
    for (language, counts) in &report.languages {
        println!(
            "  {:<20} {} {}",
            language.cyan(),
            format!("+{}", counts.additions).green(),
            format!("-{}", counts.deletions).red()
        );
    }
    Ok(())
}

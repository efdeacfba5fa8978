//! Cache command: inspect or clear the persisted store.

use anyhow::Context;
use camino::Utf8PathBuf;
use clap::{Args, Subcommand};
use owo_colors::OwoColorize;
use serde::Serialize;
use tracing::instrument;

use ghstat_core::cache::{BlobStore, EncryptedFileStore};
use ghstat_core::config::Config;

/// Arguments for the `cache` subcommand.
#[derive(Args, Debug)]
pub struct CacheArgs {
    /// Cache operation.
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache operations.
#[derive(Subcommand, Debug, Clone, Copy)]
pub enum CacheAction {
    /// Print the cache directory
    Path,
    /// Delete every cached entry (the encryption key is kept)
    Clear,
}

#[derive(Serialize)]
struct CacheReport {
    dir: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    removed: Option<usize>,
}

fn cache_dir(config: &Config) -> anyhow::Result<Utf8PathBuf> {
    config
        .cache
        .resolved_dir()
        .context("no cache directory available; set `cache.dir` in config")
}

/// Run a cache operation.
#[instrument(name = "cmd_cache", skip_all, fields(action = ?args.action))]
pub fn cmd_cache(args: CacheArgs, global_json: bool, config: &Config) -> anyhow::Result<()> {
    let dir = cache_dir(config)?;
    let report = match args.action {
        CacheAction::Path => CacheReport {
            dir: dir.to_string(),
            removed: None,
        },
        CacheAction::Clear => {
            let removed = if dir.exists() {
                EncryptedFileStore::open(&dir)
                    .and_then(|store| store.clear())
                    .with_context(|| format!("failed to clear cache at {dir}"))?
            } else {
                0
            };
            CacheReport {
                dir: dir.to_string(),
                removed: Some(removed),
            }
        }
    };

    if global_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if let Some(removed) = report.removed {
        println!("  {} Removed {removed} entries from {}", "✓".green(), report.dir.cyan());
    } else {
        println!("{}", report.dir);
    }
    Ok(())
}

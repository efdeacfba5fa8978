//! Info command: package metadata and the effective settings.

use clap::Args;
use owo_colors::OwoColorize;
use serde::Serialize;
use tracing::{debug, instrument};

use ghstat_core::config::{self, Config};

/// Arguments for the `info` subcommand.
#[derive(Args, Debug, Default)]
pub struct InfoArgs {
    // No subcommand-specific arguments; uses global --json flag
}

#[derive(Serialize)]
struct PackageInfo {
    name: &'static str,
    version: &'static str,
    #[serde(skip_serializing_if = "str::is_empty")]
    description: &'static str,
    #[serde(skip_serializing_if = "str::is_empty")]
    repository: &'static str,
    #[serde(skip_serializing_if = "str::is_empty")]
    homepage: &'static str,
    #[serde(skip_serializing_if = "str::is_empty")]
    license: &'static str,
}

impl PackageInfo {
    const fn new() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            description: env!("CARGO_PKG_DESCRIPTION"),
            repository: env!("CARGO_PKG_REPOSITORY"),
            homepage: env!("CARGO_PKG_HOMEPAGE"),
            license: env!("CARGO_PKG_LICENSE"),
        }
    }
}

#[derive(Serialize)]
struct ConfigInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    config_file: Option<String>,
    log_level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    log_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<String>,
    endpoint: String,
    max_retries: u32,
    page_size: u32,
    pacing_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_dir: Option<String>,
    cache_ttl_secs: u64,
    persist_queries: bool,
    persist_aggregate: bool,
    wakatime_top: usize,
}

impl ConfigInfo {
    fn from_config(config: &Config, cwd: &camino::Utf8Path) -> Self {
        Self {
            config_file: config::find_project_config(cwd).map(|p| p.to_string()),
            log_level: config.log_level.as_str().to_string(),
            log_dir: config.log_dir.as_ref().map(|p| p.to_string()),
            username: config.username.clone(),
            endpoint: config.client.endpoint.clone(),
            max_retries: config.client.max_retries,
            page_size: config.client.page_size,
            pacing_ms: u64::try_from(config.pacing().as_millis()).unwrap_or(u64::MAX),
            cache_dir: config.cache.resolved_dir().map(|p| p.to_string()),
            cache_ttl_secs: config.cache.ttl_secs,
            persist_queries: config.cache.persist_queries,
            persist_aggregate: config.cache.persist_aggregate,
            wakatime_top: config.wakatime.top,
        }
    }
}

#[derive(Serialize)]
struct FullInfo {
    #[serde(flatten)]
    package: PackageInfo,
    config: ConfigInfo,
}

/// Print package information.
///
/// # Arguments
/// * `global_json` - Global `--json` flag from CLI
/// * `config` - Loaded configuration
/// * `cwd` - Current working directory for config discovery
#[instrument(name = "cmd_info", skip_all, fields(json_output))]
pub fn cmd_info(
    _args: InfoArgs,
    global_json: bool,
    config: &Config,
    cwd: &camino::Utf8Path,
) -> anyhow::Result<()> {
    let info = PackageInfo::new();

    debug!(json_output = global_json, "executing info command");

    let full_info = FullInfo {
        package: info,
        config: ConfigInfo::from_config(config, cwd),
    };

    if global_json {
        println!("{}", serde_json::to_string_pretty(&full_info)?);
    } else {
        println!(
            "{} {}",
            full_info.package.name.bold(),
            full_info.package.version.green()
        );
        if !full_info.package.description.is_empty() {
            println!("{}", full_info.package.description);
        }
        if !full_info.package.license.is_empty() {
            println!("{}: {}", "License".dimmed(), full_info.package.license);
        }
        if !full_info.package.repository.is_empty() {
            println!(
                "{}: {}",
                "Repository".dimmed(),
                full_info.package.repository.cyan()
            );
        }
        if !full_info.package.homepage.is_empty() {
            println!(
                "{}: {}",
                "Homepage".dimmed(),
                full_info.package.homepage.cyan()
            );
        }

        // Configuration section
        println!();
        println!("{}", "Configuration".bold().underline());
        if let Some(ref path) = full_info.config.config_file {
            println!("{}: {}", "Config file".dimmed(), path.cyan());
        } else {
            println!("{}: {}", "Config file".dimmed(), "none loaded".yellow());
        }
        println!("{}: {}", "Log level".dimmed(), full_info.config.log_level);
        if let Some(ref dir) = full_info.config.log_dir {
            println!("{}: {}", "Log directory".dimmed(), dir);
        }

        let cfg = &full_info.config;
        if let Some(ref user) = cfg.username {
            println!("{}: {}", "Username".dimmed(), user.cyan());
        }

        println!();
        println!("{}", "Client".bold().underline());
        println!("{}: {}", "Endpoint".dimmed(), cfg.endpoint.cyan());
        println!("{}: {}", "Max retries".dimmed(), cfg.max_retries);
        println!("{}: {}", "Page size".dimmed(), cfg.page_size);
        println!("{}: {}ms", "Branch pacing".dimmed(), cfg.pacing_ms);

        println!();
        println!("{}", "Cache".bold().underline());
        match cfg.cache_dir {
            Some(ref dir) => println!("{}: {}", "Directory".dimmed(), dir.cyan()),
            None => println!("{}: {}", "Directory".dimmed(), "unavailable".yellow()),
        }
        println!("{}: {}s", "TTL".dimmed(), cfg.cache_ttl_secs);
        println!("{}: {}", "Persist queries".dimmed(), cfg.persist_queries);
        println!("{}: {}", "Persist aggregate".dimmed(), cfg.persist_aggregate);
        println!("{}: {}", "WakaTime entries".dimmed(), cfg.wakatime_top);
    }

    Ok(())
}

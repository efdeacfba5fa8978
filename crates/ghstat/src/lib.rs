//! Library interface for the `ghstat` CLI.
//!
//! Exposes the argument parser and command implementations so they can be
//! tested and documented. The entry point is in `main.rs`.
//!
//! # Structure
//!
//! - [`Cli`] - The root argument parser (clap derive)
//! - [`Commands`] - Available subcommands
//! - [`commands`] - Command implementations
//! - [`redact`] - Credential scrubbing shared with the log layer

pub mod commands;

pub mod redact;

use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;

/// Color output preference.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum ColorChoice {
    /// Detect terminal capabilities automatically.
    #[default]
    Auto,
    /// Always emit colors.
    Always,
    /// Never emit colors.
    Never,
}

impl ColorChoice {
    /// Configure global color output based on this choice.
    ///
    /// Call this once at startup to set the color mode.
    pub fn apply(self) {
        match self {
            Self::Auto => {} // owo-colors auto-detects by default
            Self::Always => owo_colors::set_override(true),
            Self::Never => owo_colors::set_override(false),
        }
    }
}

const ENV_HELP: &str = "\
ENVIRONMENT VARIABLES:
    GHSTAT_TOKEN        GitHub token (also GH_TOKEN, GITHUB_TOKEN, INPUT_GH_TOKEN)
    WAKATIME_API_KEY    WakaTime API key for `ghstat wakatime`
    RUST_LOG            Log filter (e.g., debug, ghstat_core=trace)
    GHSTAT_LOG_PATH     Explicit log file path
    GHSTAT_LOG_DIR      Log directory
";

/// Command-line interface definition for ghstat.
#[derive(Parser)]
#[command(name = "ghstat")]
#[command(about = "GitHub contribution statistics by year, quarter and language", long_about = None)]
#[command(version)]
#[command(after_long_help = ENV_HELP)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file (overrides discovery)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Run as if started in DIR
    #[arg(short = 'C', long, global = true)]
    pub chdir: Option<PathBuf>,

    /// Only print errors (suppresses warnings/info)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// More detail (repeatable; e.g. -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Colorize output
    #[arg(long, global = true, value_enum, default_value_t)]
    pub color: ColorChoice,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,
}

/// Available subcommands for the CLI.
#[derive(Subcommand)]
pub enum Commands {
    /// Compute contribution stats for a user
    Stats(commands::stats::StatsArgs),

    /// Show renormalized WakaTime activity for the last 7 days
    Wakatime(commands::wakatime::WakatimeArgs),

    /// Manage the persisted cache
    Cache(commands::cache::CacheArgs),

    /// Diagnose configuration and environment
    Doctor(commands::doctor::DoctorArgs),

    /// Show package information
    Info(commands::info::InfoArgs),
}

/// Returns the clap command for documentation generation
pub fn command() -> clap::Command {
    Cli::command()
}

//! Doctor command: diagnose configuration, credentials and environment.

use clap::Args;
use ghstat_core::config;
use ghstat_core::secret::{GitHubToken, TOKEN_ENV_VARS, WAKATIME_KEY_ENV, wakatime_key_from_env};
use inquire::Confirm;
use owo_colors::OwoColorize;
use serde::Serialize;
use tracing::{debug, instrument};

/// Arguments for the `doctor` subcommand.
#[derive(Args, Debug, Default)]
pub struct DoctorArgs {
    // No subcommand-specific arguments; uses global --json flag
}

#[derive(Serialize)]
struct DoctorReport {
    directories: DirectoryPaths,
    config: ConfigStatus,
    credentials: Credentials,
    environment: EnvironmentInfo,
}

#[derive(Serialize)]
struct DirectoryPaths {
    config: Option<String>,
    cache: Option<String>,
    data: Option<String>,
    data_local: Option<String>,
}

#[derive(Serialize)]
struct ConfigStatus {
    /// Path to the project config file, if any
    file: Option<String>,
    /// Path to the user config file, if any
    user_file: Option<String>,
    /// Whether any config file was found
    found: bool,
}

/// Credential presence. Values are only ever shown masked.
#[derive(Serialize)]
struct Credentials {
    github_token: Option<String>,
    wakatime_key: Option<String>,
}

#[derive(Serialize)]
struct EnvironmentInfo {
    /// Current working directory
    cwd: Option<String>,
    /// Relevant environment variables
    env_vars: Vec<EnvVar>,
}

#[derive(Serialize)]
struct EnvVar {
    name: &'static str,
    value: Option<String>,
    description: &'static str,
}

impl EnvVar {
    fn read(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            value: std::env::var(name).ok(),
            description,
        }
    }
}

impl DoctorReport {
    fn gather(cwd: &camino::Utf8Path) -> Self {
        let config_file = config::find_project_config(cwd);
        let user_file = config::ConfigLoader::new().find_user_config();

        Self {
            directories: DirectoryPaths {
                config: config::user_config_dir().map(|p| p.to_string()),
                cache: config::user_cache_dir().map(|p| p.to_string()),
                data: config::user_data_dir().map(|p| p.to_string()),
                data_local: config::user_data_local_dir().map(|p| p.to_string()),
            },
            config: ConfigStatus {
                found: config_file.is_some() || user_file.is_some(),
                file: config_file.map(|p| p.to_string()),
                user_file: user_file.map(|p| p.to_string()),
            },
            credentials: Credentials {
                github_token: GitHubToken::from_env().ok().map(|t| t.secret().masked()),
                wakatime_key: wakatime_key_from_env().map(|k| k.masked()),
            },
            environment: EnvironmentInfo {
                cwd: Some(cwd.to_string()),
                env_vars: vec![
                    EnvVar::read("XDG_CONFIG_HOME", "Override config directory"),
                    EnvVar::read("XDG_CACHE_HOME", "Override cache directory"),
                    EnvVar::read("XDG_DATA_HOME", "Override data directory"),
                    EnvVar::read("RUST_LOG", "Log filter directive"),
                    EnvVar::read("GHSTAT_LOG_PATH", "Explicit log file path"),
                    EnvVar::read("GHSTAT_LOG_DIR", "Log directory"),
                ],
            },
        }
    }
}

/// Run diagnostics and report configuration status.
///
/// # Arguments
/// * `global_json` - Global `--json` flag from CLI
/// * `cwd` - Current working directory
#[instrument(name = "cmd_doctor", skip_all, fields(json_output))]
pub fn cmd_doctor(_args: DoctorArgs, global_json: bool, cwd: &camino::Utf8Path) -> anyhow::Result<()> {
    debug!(json_output = global_json, "executing doctor command");

    let spinner = super::spinner("Gathering diagnostics...", !global_json);
    let report = DoctorReport::gather(cwd);
    spinner.finish_and_clear();

    if global_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{}", "Configuration".bold().underline());
    if report.config.found {
        for file in [&report.config.file, &report.config.user_file].into_iter().flatten() {
            println!("  {} Config file: {}", "✓".green(), file.cyan());
        }
    } else {
        println!("  {} No config file found", "○".yellow());
        offer_config_creation()?;
    }
    println!();

    println!("{}", "Credentials".bold().underline());
    match report.credentials.github_token {
        Some(ref masked) => println!("  {} GitHub token: {}", "✓".green(), masked.cyan()),
        None => println!(
            "  {} No GitHub token (set one of {})",
            "✗".red(),
            TOKEN_ENV_VARS.join(", ")
        ),
    }
    match report.credentials.wakatime_key {
        Some(ref masked) => println!("  {} WakaTime key: {}", "✓".green(), masked.cyan()),
        None => println!("  {} No WakaTime key ({WAKATIME_KEY_ENV} unset)", "○".dimmed()),
    }
    println!();

    println!("{}", "Directories".bold().underline());
    print_dir("  Config", &report.directories.config);
    print_dir("  Cache", &report.directories.cache);
    print_dir("  Data", &report.directories.data);
    print_dir("  Data (local)", &report.directories.data_local);
    println!();

    println!("{}", "Environment".bold().underline());
    println!("  {}: {}", "Working directory".dimmed(), cwd.cyan());

    let set_vars: Vec<_> = report
        .environment
        .env_vars
        .iter()
        .filter(|v| v.value.is_some())
        .collect();

    if set_vars.is_empty() {
        println!("  {} No XDG/logging overrides set", "○".dimmed());
    } else {
        for var in set_vars {
            println!(
                "  {}: {} {}",
                var.name.dimmed(),
                var.value.as_deref().unwrap_or("").cyan(),
                format!("({})", var.description).dimmed()
            );
        }
    }

    Ok(())
}

fn print_dir(label: &str, path: &Option<String>) {
    print!("{}: ", label.dimmed());
    match path {
        Some(p) => println!("{}", p.cyan()),
        None => println!("{}", "(unavailable)".yellow()),
    }
}

/// Offer to create a default config file when none exists.
fn offer_config_creation() -> anyhow::Result<()> {
    let Some(config_dir) = config::user_config_dir() else {
        return Ok(());
    };

    let config_path = config_dir.join("config.yaml");

    // Don't prompt if running non-interactively
    if !std::io::IsTerminal::is_terminal(&std::io::stdin()) {
        return Ok(());
    }

    let create = Confirm::new("Create a default config file?")
        .with_default(false)
        .with_help_message(&format!("Will create {config_path}"))
        .prompt();

    // Declined or interrupted prompts leave nothing behind.
    if let Ok(true) = create {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let default_config = config::Config::default();
        let yaml = serde_saphyr::to_string(&default_config)?;
        std::fs::write(&config_path, yaml)?;

        println!("  {} Created {}", "✓".green(), config_path.cyan());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cwd() -> camino::Utf8PathBuf {
        camino::Utf8PathBuf::from("/tmp")
    }

    #[test]
    fn test_cmd_doctor_text_succeeds() {
        assert!(cmd_doctor(DoctorArgs::default(), false, &test_cwd()).is_ok());
    }

    #[test]
    fn test_cmd_doctor_json_succeeds() {
        assert!(cmd_doctor(DoctorArgs::default(), true, &test_cwd()).is_ok());
    }

    #[test]
    fn test_doctor_report_gathers() {
        let report = DoctorReport::gather(&test_cwd());
        // On most systems, at least config dir should resolve
        assert!(report.directories.config.is_some() || report.directories.cache.is_some());
        assert!(report.environment.env_vars.iter().any(|v| v.name == "GHSTAT_LOG_DIR"));
    }

    #[test]
    fn test_credentials_never_serialize_raw_values() {
        let report = DoctorReport::gather(&test_cwd());
        let json = serde_json::to_string(&report).unwrap();
        if let Ok(token) = GitHubToken::from_env()
            && token.secret().expose().len() > 8
        {
            assert!(!json.contains(token.secret().expose()));
        }
    }
}

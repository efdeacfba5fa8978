//! WakaTime command: renormalized activity for the last seven days.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use owo_colors::OwoColorize;
use tracing::{debug, instrument};

use ghstat_core::config::Config;
use ghstat_core::secret::wakatime_key_from_env;
use ghstat_core::wakatime::{Section, SectionFlags, SectionStats, WakaTimeClient, WakaTimeStats};

use crate::redact::Redactor;

/// Arguments for the `wakatime` subcommand.
#[derive(Args, Debug, Default)]
pub struct WakatimeArgs {
    /// Read a saved API response instead of calling WakaTime
    #[arg(long, value_name = "FILE")]
    pub from_file: Option<PathBuf>,

    /// Only show these sections (repeatable; defaults to config)
    #[arg(long = "section", value_enum, value_name = "SECTION")]
    pub sections: Vec<Section>,

    /// Entries shown per section (defaults to config)
    #[arg(long, value_name = "N")]
    pub top: Option<usize>,
}

impl WakatimeArgs {
    fn flags(&self, config: &Config) -> SectionFlags {
        if self.sections.is_empty() {
            config.wakatime.sections()
        } else {
            SectionFlags::only(&self.sections)
        }
    }
}

fn load_stats(args: &WakatimeArgs, config: &Config, redactor: &Redactor) -> anyhow::Result<WakaTimeStats> {
    if let Some(ref path) = args.from_file {
        let body = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        return WakaTimeStats::from_response_body(&body).with_context(|| format!("invalid WakaTime response in {}", path.display()));
    }

    let key = wakatime_key_from_env().context("WAKATIME_API_KEY is not set")?;
    redactor.register(&key);
    let client = WakaTimeClient::new(&config.wakatime.endpoint, key, config.client.timeout())?;
    let stats = super::block_on(client.try_fetch_last_7_days())??;
    Ok(stats)
}

/// Print renormalized WakaTime sections.
///
/// # Arguments
/// * `global_json` - Global `--json` flag from CLI
/// * `config` - Loaded configuration
/// * `redactor` - Receives the API key so it never reaches the logs
#[instrument(name = "cmd_wakatime", skip_all, fields(json_output = global_json))]
pub fn cmd_wakatime(args: WakatimeArgs, global_json: bool, config: &Config, redactor: &Redactor) -> anyhow::Result<()> {
    let flags = args.flags(config);
    let top = args.top.unwrap_or(config.wakatime.top);
    debug!(?flags, top, offline = args.from_file.is_some(), "executing wakatime command");

    let spinner = super::spinner("Fetching WakaTime stats...", !global_json && args.from_file.is_none());
    let stats = load_stats(&args, config, redactor);
    spinner.finish_and_clear();

    let sections = stats?.renormalized(flags, top);
    if global_json {
        println!("{}", serde_json::to_string_pretty(&sections)?);
    } else {
        print_sections(&sections);
    }
    Ok(())
}

fn print_sections(sections: &[SectionStats]) {
    if sections.is_empty() {
        println!("  {} No WakaTime activity to show", "○".yellow());
        return;
    }
    for (i, section) in sections.iter().enumerate() {
        if i > 0 {
            println!();
        }
        println!("{}", section.title.bold().underline());
        for item in &section.items {
            let label = item.text.as_deref().unwrap_or_default();
            println!(
                "  {:<24} {:>6.2}%  {}",
                item.name.cyan(),
                item.percent,
                label.dimmed()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const BODY: &str = r#"{"data": {
        "languages": [
            {"name": "Rust", "percent": 60.0, "text": "6 hrs"},
            {"name": "Other", "percent": 20.0},
            {"name": "Go", "percent": 20.0, "text": "2 hrs"}
        ],
        "editors": [{"name": "Neovim", "percent": 100.0}]
    }}"#;

    fn saved_response() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(BODY.as_bytes()).unwrap();
        file
    }

    #[test]
    fn section_flags_default_to_config() {
        let mut config = Config::default();
        config.wakatime.show_os = false;
        let flags = WakatimeArgs::default().flags(&config);
        assert!(flags.languages);
        assert!(!flags.operating_systems);
    }

    #[test]
    fn section_flags_from_args_override_config() {
        let args = WakatimeArgs {
            sections: vec![Section::Editors],
            ..WakatimeArgs::default()
        };
        let flags = args.flags(&Config::default());
        assert!(flags.editors);
        assert!(!flags.languages);
    }

    #[test]
    fn loads_saved_response() {
        let file = saved_response();
        let args = WakatimeArgs {
            from_file: Some(file.path().to_path_buf()),
            ..WakatimeArgs::default()
        };
        let stats = load_stats(&args, &Config::default(), &Redactor::new()).unwrap();
        let languages = &stats.renormalized(SectionFlags::all(), 5)[0];
        assert_eq!(languages.section, Section::Languages);
        let percents: Vec<f64> = languages.items.iter().map(|i| i.percent).collect();
        assert_eq!(percents, [75.0, 25.0]);
    }

    #[test]
    fn command_runs_offline() {
        let file = saved_response();
        let args = WakatimeArgs {
            from_file: Some(file.path().to_path_buf()),
            top: Some(1),
            ..WakatimeArgs::default()
        };
        assert!(cmd_wakatime(args, true, &Config::default(), &Redactor::new()).is_ok());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{"errors": []}"#).unwrap();
        let args = WakatimeArgs {
            from_file: Some(file.path().to_path_buf()),
            ..WakatimeArgs::default()
        };
        let err = load_stats(&args, &Config::default(), &Redactor::new()).unwrap_err();
        assert!(format!("{err:#}").contains("data"));
    }
}

//! Configuration loading and discovery.
//!
//! Sources are merged lowest to highest:
//! 1. Built-in defaults
//! 2. User config from the XDG config directory
//! 3. Project config found by walking up from the current directory
//! 4. Files passed explicitly (`--config`)
//!
//! # Supported formats
//!
//! TOML (`.toml`), YAML (`.yaml`, `.yml`) and JSON (`.json`).
//!
//! # Config file locations (in order of precedence, highest first):
//! - `.ghstat.<ext>` in current directory or any parent
//! - `ghstat.<ext>` in current directory or any parent
//! - `~/.config/ghstat/config.<ext>` (user config)
//!
//! # Example
//! ```no_run
//! use camino::Utf8PathBuf;
//! use ghstat_core::config::{Config, ConfigLoader};
//!
//! let cwd = std::env::current_dir().unwrap();
//! let cwd = Utf8PathBuf::try_from(cwd).expect("current directory is not valid UTF-8");
//! let config = ConfigLoader::new()
//!     .with_project_search(&cwd)
//!     .load()
//!     .unwrap();
//! println!("retries: {}", config.client.max_retries);
//! ```

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use figment::Figment;
use figment::providers::{Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::transport::DEFAULT_ENDPOINT;
use crate::wakatime::{DEFAULT_WAKATIME_ENDPOINT, SectionFlags};

/// The configuration for ghstat.
///
/// Every field has a default, so an empty file (or no file) is valid.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Log level for the application (e.g., "debug", "info", "warn", "error").
    pub log_level: LogLevel,
    /// Directory for JSONL log files (falls back to platform defaults if unset).
    pub log_dir: Option<Utf8PathBuf>,
    /// Default login to compute stats for when none is given on the command line.
    pub username: Option<String>,
    /// Skip request pacing between branch fetches.
    pub debug_run: bool,
    /// Remote query client settings.
    pub client: ClientConfig,
    /// Query and aggregate cache settings.
    pub cache: CacheConfig,
    /// WakaTime feed settings.
    pub wakatime: WakaTimeConfig,
}

impl Config {
    /// Delay applied between branch fetches, or zero when `debug_run` is set.
    pub const fn pacing(&self) -> Duration {
        if self.debug_run {
            Duration::ZERO
        } else {
            Duration::from_millis(self.client.pacing_ms)
        }
    }
}

/// Settings for the GraphQL query client.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClientConfig {
    /// GraphQL endpoint URL.
    pub endpoint: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Retries after the first attempt before a query is abandoned.
    pub max_retries: u32,
    /// Backoff used when a rate-limit response names no delay.
    pub rate_limit_fallback_secs: u64,
    /// Nodes requested per page.
    pub page_size: u32,
    /// Pause between branch fetches, in milliseconds.
    pub pacing_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout_secs: 30,
            max_retries: 3,
            rate_limit_fallback_secs: 60,
            page_size: 100,
            pacing_ms: 400,
        }
    }
}

impl ClientConfig {
    /// The per-request timeout.
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Settings for persisted caches.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache directory (defaults to the XDG cache dir).
    pub dir: Option<Utf8PathBuf>,
    /// Maximum age of a persisted entry, in seconds.
    pub ttl_secs: u64,
    /// Persist individual query results across runs.
    pub persist_queries: bool,
    /// Persist the per-user aggregate across runs.
    pub persist_aggregate: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: None,
            ttl_secs: 24 * 60 * 60,
            persist_queries: false,
            persist_aggregate: true,
        }
    }
}

impl CacheConfig {
    /// The staleness bound.
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Configured directory, or the platform cache directory.
    pub fn resolved_dir(&self) -> Option<Utf8PathBuf> {
        self.dir.clone().or_else(user_cache_dir)
    }
}

/// Settings for the WakaTime feed.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct WakaTimeConfig {
    /// Stats endpoint for the last seven days.
    pub endpoint: String,
    /// Include the languages section.
    pub show_languages: bool,
    /// Include the editors section.
    pub show_editors: bool,
    /// Include the projects section.
    pub show_projects: bool,
    /// Include the operating systems section.
    pub show_os: bool,
    /// Entries kept per section.
    pub top: usize,
}

impl Default for WakaTimeConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_WAKATIME_ENDPOINT.to_string(),
            show_languages: true,
            show_editors: true,
            show_projects: true,
            show_os: true,
            top: 5,
        }
    }
}

impl WakaTimeConfig {
    /// Section toggles as flags.
    pub const fn sections(&self) -> SectionFlags {
        SectionFlags {
            languages: self.show_languages,
            editors: self.show_editors,
            projects: self.show_projects,
            operating_systems: self.show_os,
        }
    }
}

/// Log level configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Verbose output for debugging and development.
    Debug,
    /// Standard operational information (default).
    #[default]
    Info,
    /// Warnings about potential issues.
    Warn,
    /// Errors that indicate failures.
    Error,
}

impl LogLevel {
    /// Returns the log level as a lowercase string slice.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Supported configuration file extensions (in order of preference).
const CONFIG_EXTENSIONS: &[&str] = &["toml", "yaml", "yml", "json"];

/// Application name for XDG directory lookup and config file names.
const APP_NAME: &str = "ghstat";

/// Builder for loading configuration from multiple sources.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    /// Starting directory for project config search.
    project_search_root: Option<Utf8PathBuf>,
    /// Whether to include user config from XDG directory.
    include_user_config: bool,
    /// Stop searching when we hit a directory containing this file/dir.
    boundary_marker: Option<String>,
    /// Explicit config files to load (for testing or programmatic use).
    explicit_files: Vec<Utf8PathBuf>,
}

impl ConfigLoader {
    /// Create a new config loader with default settings.
    pub fn new() -> Self {
        Self {
            project_search_root: None,
            include_user_config: true,
            boundary_marker: Some(".git".to_string()),
            explicit_files: Vec::new(),
        }
    }

    /// Set the starting directory for project config search.
    ///
    /// The loader will walk up from this directory looking for config files.
    pub fn with_project_search<P: AsRef<Utf8Path>>(mut self, path: P) -> Self {
        self.project_search_root = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set whether to include user config from `~/.config/ghstat/`.
    pub const fn with_user_config(mut self, include: bool) -> Self {
        self.include_user_config = include;
        self
    }

    /// Set a boundary marker to stop directory traversal.
    ///
    /// When walking up directories, stop if we find a directory containing
    /// this file or directory name. Default is `.git`.
    pub fn with_boundary_marker<S: Into<String>>(mut self, marker: S) -> Self {
        self.boundary_marker = Some(marker.into());
        self
    }

    /// Disable boundary marker (search all the way to filesystem root).
    pub fn without_boundary_marker(mut self) -> Self {
        self.boundary_marker = None;
        self
    }

    /// Add an explicit config file to load.
    ///
    /// Files are loaded in order, with later files taking precedence.
    /// Explicit files are loaded after discovered files.
    pub fn with_file<P: AsRef<Utf8Path>>(mut self, path: P) -> Self {
        self.explicit_files.push(path.as_ref().to_path_buf());
        self
    }

    /// Load configuration, merging all discovered sources.
    ///
    /// Precedence (highest to lowest):
    /// 1. Explicit files (in order added via `with_file`)
    /// 2. Project config (closest to search root)
    /// 3. User config (`~/.config/ghstat/config.<ext>`)
    /// 4. Default values
    #[tracing::instrument(skip(self), fields(search_root = ?self.project_search_root))]
    pub fn load(self) -> ConfigResult<Config> {
        tracing::debug!("loading configuration");
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        // Start with user config (lowest precedence of file sources)
        if self.include_user_config
            && let Some(user_config) = self.find_user_config()
        {
            figment = Self::merge_file(figment, &user_config);
        }

        // Add project config
        if let Some(ref root) = self.project_search_root
            && let Some(project_config) = self.find_project_config(root)
        {
            figment = Self::merge_file(figment, &project_config);
        }

        // Add explicit files (highest precedence)
        for file in &self.explicit_files {
            figment = Self::merge_file(figment, file);
        }

        let config: Config = figment
            .extract()
            .map_err(|e| ConfigError::Deserialize(Box::new(e)))?;
        tracing::info!(
            log_level = config.log_level.as_str(),
            endpoint = %config.client.endpoint,
            max_retries = config.client.max_retries,
            "configuration loaded"
        );
        Ok(config)
    }

    /// Load configuration, returning an error if no config file is found.
    pub fn load_or_error(self) -> ConfigResult<Config> {
        let has_user = self.include_user_config && self.find_user_config().is_some();
        let has_project = self
            .project_search_root
            .as_ref()
            .and_then(|root| self.find_project_config(root))
            .is_some();
        let has_explicit = !self.explicit_files.is_empty();

        if !has_user && !has_project && !has_explicit {
            return Err(ConfigError::NotFound);
        }

        self.load()
    }

    /// Find project config by walking up from the given directory.
    fn find_project_config(&self, start: &Utf8Path) -> Option<Utf8PathBuf> {
        let mut current = Some(start.to_path_buf());

        while let Some(dir) = current {
            // Check for config files in this directory (try each extension)
            for ext in CONFIG_EXTENSIONS {
                // Try dotfile first (.ghstat.toml)
                let dotfile = dir.join(format!(".{APP_NAME}.{ext}"));
                if dotfile.is_file() {
                    return Some(dotfile);
                }

                // Then try regular name (ghstat.toml)
                let regular = dir.join(format!("{APP_NAME}.{ext}"));
                if regular.is_file() {
                    return Some(regular);
                }
            }

            // The boundary directory is searched, its parents are not
            if let Some(ref marker) = self.boundary_marker
                && dir.join(marker).exists()
            {
                break;
            }

            current = dir.parent().map(Utf8Path::to_path_buf);
        }

        None
    }

    /// Find user config in XDG config directory.
    pub fn find_user_config(&self) -> Option<Utf8PathBuf> {
        let config_dir = user_config_dir()?;
        CONFIG_EXTENSIONS
            .iter()
            .map(|ext| config_dir.join(format!("config.{ext}")))
            .find(|path| path.is_file())
    }

    /// Merge a config file into the figment, detecting format from extension.
    fn merge_file(figment: Figment, path: &Utf8Path) -> Figment {
        match path.extension() {
            Some("toml") => figment.merge(Toml::file_exact(path.as_str())),
            Some("yaml" | "yml") => figment.merge(Yaml::file_exact(path.as_str())),
            Some("json") => figment.merge(Json::file_exact(path.as_str())),
            _ => figment.merge(Toml::file_exact(path.as_str())),
        }
    }
}

/// Find the project config file path without loading it.
///
/// Useful for commands that need to know where config is located.
pub fn find_project_config<P: AsRef<Utf8Path>>(start: P) -> Option<Utf8PathBuf> {
    ConfigLoader::new()
        .with_project_search(start.as_ref())
        .without_boundary_marker()
        .find_project_config(start.as_ref())
}

/// Get the project directories for XDG-compliant path resolution.
///
/// Returns `None` if the home directory cannot be determined.
fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", APP_NAME)
}

/// Get the user config directory path.
///
/// Returns `~/.config/ghstat/` on Linux, `~/Library/Application Support/ghstat/`
/// on macOS, and equivalent on other platforms.
pub fn user_config_dir() -> Option<Utf8PathBuf> {
    let proj_dirs = project_dirs()?;
    Utf8PathBuf::from_path_buf(proj_dirs.config_dir().to_path_buf()).ok()
}

/// Get the user cache directory path.
///
/// Returns `~/.cache/ghstat/` on Linux, `~/Library/Caches/ghstat/`
/// on macOS, and equivalent on other platforms.
pub fn user_cache_dir() -> Option<Utf8PathBuf> {
    let proj_dirs = project_dirs()?;
    Utf8PathBuf::from_path_buf(proj_dirs.cache_dir().to_path_buf()).ok()
}

/// Get the user data directory path.
///
/// Returns `~/.local/share/ghstat/` on Linux, `~/Library/Application Support/ghstat/`
/// on macOS, and equivalent on other platforms.
pub fn user_data_dir() -> Option<Utf8PathBuf> {
    let proj_dirs = project_dirs()?;
    Utf8PathBuf::from_path_buf(proj_dirs.data_dir().to_path_buf()).ok()
}

/// Get the local data directory path (machine-specific, not synced).
///
/// Returns `~/.local/share/ghstat/` on Linux, `~/Library/Application Support/ghstat/`
/// on macOS, and equivalent on other platforms.
pub fn user_data_local_dir() -> Option<Utf8PathBuf> {
    let proj_dirs = project_dirs()?;
    Utf8PathBuf::from_path_buf(proj_dirs.data_local_dir().to_path_buf()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_config(tmp: &TempDir, name: &str, body: &str) -> Utf8PathBuf {
        let path = tmp.path().join(name);
        fs::write(&path, body).unwrap();
        Utf8PathBuf::try_from(path).unwrap()
    }

    fn load_file(path: &Utf8Path) -> Config {
        ConfigLoader::new()
            .with_user_config(false)
            .with_file(path)
            .load()
            .unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.log_level, LogLevel::Info);
        assert!(config.log_dir.is_none());
        assert!(config.username.is_none());
        assert_eq!(config.client.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.client.timeout(), Duration::from_secs(30));
        assert_eq!(config.client.max_retries, 3);
        assert_eq!(config.client.page_size, 100);
        assert_eq!(config.cache.ttl(), Duration::from_secs(86_400));
        assert!(!config.cache.persist_queries);
        assert!(config.cache.persist_aggregate);
        assert_eq!(config.wakatime.top, 5);
    }

    #[test]
    fn test_loader_builds_with_defaults() {
        let config = ConfigLoader::new()
            .with_user_config(false)
            .without_boundary_marker()
            .load()
            .unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_pacing_respects_debug_run() {
        let mut config = Config::default();
        assert_eq!(config.pacing(), Duration::from_millis(400));
        config.debug_run = true;
        assert_eq!(config.pacing(), Duration::ZERO);
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(
            &tmp,
            "config.toml",
            r#"
username = "octocat"

[client]
max_retries = 5
"#,
        );
        let config = load_file(&path);
        assert_eq!(config.username.as_deref(), Some("octocat"));
        assert_eq!(config.client.max_retries, 5);
        assert_eq!(config.client.timeout_secs, 30);
        assert_eq!(config.client.endpoint, DEFAULT_ENDPOINT);
    }

    #[test]
    fn test_yaml_cache_section() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(
            &tmp,
            "config.yaml",
            "cache:\n  dir: /tmp/ghstat-cache\n  ttl_secs: 60\n  persist_queries: true\n",
        );
        let config = load_file(&path);
        assert_eq!(config.cache.resolved_dir().as_deref().map(Utf8Path::as_str), Some("/tmp/ghstat-cache"));
        assert_eq!(config.cache.ttl(), Duration::from_secs(60));
        assert!(config.cache.persist_queries);
        assert!(config.cache.persist_aggregate);
    }

    #[test]
    fn test_json_wakatime_section() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(
            &tmp,
            "config.json",
            r#"{"wakatime": {"show_editors": false, "top": 3}}"#,
        );
        let config = load_file(&path);
        let flags = config.wakatime.sections();
        assert!(flags.languages);
        assert!(!flags.editors);
        assert_eq!(config.wakatime.top, 3);
    }

    #[test]
    fn test_later_file_overrides_earlier() {
        let tmp = TempDir::new().unwrap();
        let base = write_config(&tmp, "base.toml", "log_level = \"warn\"\n[client]\npage_size = 50\n");
        let over = write_config(&tmp, "override.toml", "log_level = \"error\"\n");

        let config = ConfigLoader::new()
            .with_user_config(false)
            .with_file(&base)
            .with_file(&over)
            .load()
            .unwrap();

        assert_eq!(config.log_level, LogLevel::Error);
        assert_eq!(config.client.page_size, 50);
    }

    #[test]
    fn test_project_config_discovery() {
        let tmp = TempDir::new().unwrap();
        let project_dir = tmp.path().join("project");
        let sub_dir = project_dir.join("src").join("deep");
        fs::create_dir_all(&sub_dir).unwrap();
        fs::write(project_dir.join(".ghstat.toml"), r#"log_level = "debug""#).unwrap();

        let sub_dir = Utf8PathBuf::try_from(sub_dir).unwrap();
        let config = ConfigLoader::new()
            .with_user_config(false)
            .without_boundary_marker()
            .with_project_search(&sub_dir)
            .load()
            .unwrap();

        assert_eq!(config.log_level, LogLevel::Debug);
    }

    #[test]
    fn test_boundary_marker_stops_search() {
        let tmp = TempDir::new().unwrap();
        let parent = tmp.path().join("parent");
        let child = parent.join("child");
        let work = child.join("work");
        fs::create_dir_all(&work).unwrap();
        fs::write(parent.join(".ghstat.toml"), r#"log_level = "warn""#).unwrap();
        fs::create_dir(child.join(".git")).unwrap();

        let work = Utf8PathBuf::try_from(work).unwrap();
        let config = ConfigLoader::new()
            .with_user_config(false)
            .with_boundary_marker(".git")
            .with_project_search(&work)
            .load()
            .unwrap();

        assert_eq!(config.log_level, LogLevel::Info);
    }

    #[test]
    fn test_boundary_directory_itself_is_searched() {
        let tmp = TempDir::new().unwrap();
        let repo = tmp.path().join("repo");
        let work = repo.join("src");
        fs::create_dir_all(&work).unwrap();
        fs::create_dir(repo.join(".git")).unwrap();
        fs::write(repo.join(".ghstat.toml"), r#"log_level = "error""#).unwrap();

        let work = Utf8PathBuf::try_from(work).unwrap();
        let config = ConfigLoader::new()
            .with_user_config(false)
            .with_project_search(&work)
            .load()
            .unwrap();

        assert_eq!(config.log_level, LogLevel::Error);
    }

    #[test]
    fn test_explicit_file_overrides_project_config() {
        let tmp = TempDir::new().unwrap();
        write_config(&tmp, "ghstat.toml", "username = \"from-project\"");
        let over = write_config(&tmp, "override.toml", "username = \"from-flag\"");
        let root = Utf8PathBuf::try_from(tmp.path().to_path_buf()).unwrap();

        let config = ConfigLoader::new()
            .with_user_config(false)
            .without_boundary_marker()
            .with_project_search(&root)
            .with_file(&over)
            .load()
            .unwrap();

        assert_eq!(config.username.as_deref(), Some("from-flag"));
    }

    #[test]
    fn test_load_or_error_fails_when_no_config() {
        let result = ConfigLoader::new()
            .with_user_config(false)
            .without_boundary_marker()
            .load_or_error();
        assert!(matches!(result, Err(ConfigError::NotFound)));
    }

    #[test]
    fn test_invalid_value_is_deserialize_error() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(&tmp, "config.toml", "[client]\nmax_retries = \"many\"\n");
        let result = ConfigLoader::new()
            .with_user_config(false)
            .with_file(&path)
            .load();
        assert!(matches!(result, Err(ConfigError::Deserialize(_))));
    }

    #[test]
    fn test_find_project_config_prefers_dotfile() {
        let tmp = TempDir::new().unwrap();
        write_config(&tmp, "ghstat.toml", "");
        write_config(&tmp, ".ghstat.toml", "");
        let root = Utf8PathBuf::try_from(tmp.path().to_path_buf()).unwrap();
        let found = find_project_config(&root).unwrap();
        assert_eq!(found.file_name(), Some(".ghstat.toml"));
    }

    #[test]
    fn test_user_dirs_are_namespaced() {
        for dir in [user_config_dir(), user_cache_dir()].into_iter().flatten() {
            assert!(dir.as_str().contains("ghstat"));
        }
    }
}

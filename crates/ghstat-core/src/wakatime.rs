//! WakaTime weekly activity feed.
//!
//! The feed is best-effort: [`WakaTimeClient::fetch_last_7_days`] logs a
//! warning and returns `None` on any failure rather than failing the run.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::header::{AUTHORIZATION, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::renormalize::{PercentItem, renormalize};
use crate::secret::{Secret, mask};

/// Stats endpoint for the authenticated user's last seven days.
pub const DEFAULT_WAKATIME_ENDPOINT: &str = "https://wakatime.com/api/v1/users/current/stats/last_7_days";

/// Failures fetching or reading the feed.
#[derive(Error, Debug)]
pub enum WakaTimeError {
    /// 401 from the API.
    #[error("WakaTime API key is invalid or expired")]
    Unauthorized,

    /// 402 from the API.
    #[error("WakaTime API requires a paid plan for this feature")]
    PaymentRequired,

    /// Any other non-200 status.
    #[error("WakaTime API returned status {0}")]
    Status(u16),

    /// The body had no `data` object.
    #[error("WakaTime response missing 'data' field")]
    MissingData,

    /// The body or `data` could not be parsed.
    #[error("could not read WakaTime response: {0}")]
    Decode(String),

    /// Connection-level failure, with the key masked.
    #[error("WakaTime request failed: {0}")]
    Transport(String),
}

/// A section of the weekly stats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    /// Programming languages.
    Languages,
    /// Editors and IDEs.
    Editors,
    /// Projects.
    Projects,
    /// Operating systems.
    OperatingSystems,
}

impl Section {
    /// All sections in display order.
    pub const ALL: [Self; 4] = [
        Self::Languages,
        Self::Editors,
        Self::Projects,
        Self::OperatingSystems,
    ];

    /// Display title.
    pub const fn title(self) -> &'static str {
        match self {
            Self::Languages => "Programming Languages",
            Self::Editors => "Editors",
            Self::Projects => "Projects",
            Self::OperatingSystems => "Operating System",
        }
    }
}

/// Which sections to include.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionFlags {
    /// Include languages.
    pub languages: bool,
    /// Include editors.
    pub editors: bool,
    /// Include projects.
    pub projects: bool,
    /// Include operating systems.
    pub operating_systems: bool,
}

impl Default for SectionFlags {
    fn default() -> Self {
        Self::all()
    }
}

impl SectionFlags {
    /// Every section enabled.
    pub const fn all() -> Self {
        Self {
            languages: true,
            editors: true,
            projects: true,
            operating_systems: true,
        }
    }

    /// Only the listed sections.
    pub fn only(sections: &[Section]) -> Self {
        Self {
            languages: sections.contains(&Section::Languages),
            editors: sections.contains(&Section::Editors),
            projects: sections.contains(&Section::Projects),
            operating_systems: sections.contains(&Section::OperatingSystems),
        }
    }

    /// Whether `section` is enabled.
    pub const fn enabled(&self, section: Section) -> bool {
        match section {
            Section::Languages => self.languages,
            Section::Editors => self.editors,
            Section::Projects => self.projects,
            Section::OperatingSystems => self.operating_systems,
        }
    }
}

/// The `data` object of a stats response. Unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WakaTimeStats {
    /// Time per language.
    pub languages: Vec<PercentItem>,
    /// Time per editor.
    pub editors: Vec<PercentItem>,
    /// Time per project.
    pub projects: Vec<PercentItem>,
    /// Time per operating system.
    pub operating_systems: Vec<PercentItem>,
}

/// One renormalized, truncated section.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SectionStats {
    /// Which section.
    pub section: Section,
    /// Display title.
    pub title: &'static str,
    /// Top entries, summing to 100 before truncation.
    pub items: Vec<PercentItem>,
}

impl WakaTimeStats {
    /// Items of one section.
    pub fn section(&self, section: Section) -> &[PercentItem] {
        match section {
            Section::Languages => &self.languages,
            Section::Editors => &self.editors,
            Section::Projects => &self.projects,
            Section::OperatingSystems => &self.operating_systems,
        }
    }

    /// Enabled sections in fixed order, each renormalized and cut to `top`
    /// entries. Sections left empty are omitted.
    pub fn renormalized(&self, flags: SectionFlags, top: usize) -> Vec<SectionStats> {
        Section::ALL
            .into_iter()
            .filter(|s| flags.enabled(*s))
            .filter_map(|section| {
                let mut items = renormalize(self.section(section));
                items.truncate(top);
                if items.is_empty() {
                    return None;
                }
                Some(SectionStats {
                    section,
                    title: section.title(),
                    items,
                })
            })
            .collect()
    }

    /// Parse a full stats response body (`{"data": {...}}`).
    pub fn from_response_body(body: &str) -> Result<Self, WakaTimeError> {
        let value: Value = serde_json::from_str(body).map_err(|e| WakaTimeError::Decode(e.to_string()))?;
        let data = value
            .get("data")
            .filter(|d| d.is_object())
            .ok_or(WakaTimeError::MissingData)?;
        Self::deserialize(data).map_err(|e| WakaTimeError::Decode(e.to_string()))
    }
}

/// Classify a response by status, then parse it.
pub fn parse_response(status: u16, body: &str) -> Result<WakaTimeStats, WakaTimeError> {
    match status {
        200 => WakaTimeStats::from_response_body(body),
        401 => Err(WakaTimeError::Unauthorized),
        402 => Err(WakaTimeError::PaymentRequired),
        other => Err(WakaTimeError::Status(other)),
    }
}

/// Client for the stats endpoint.
#[derive(Debug, Clone)]
pub struct WakaTimeClient {
    client: reqwest::Client,
    endpoint: String,
    key: Secret,
}

impl WakaTimeClient {
    /// Build a client with a per-request timeout.
    pub fn new(endpoint: impl Into<String>, key: Secret, timeout: Duration) -> Result<Self, WakaTimeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("ghstat/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| WakaTimeError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            key,
        })
    }

    /// Last seven days of stats, or `None` with a warning on any failure.
    pub async fn fetch_last_7_days(&self) -> Option<WakaTimeStats> {
        match self.try_fetch_last_7_days().await {
            Ok(stats) => {
                info!("WakaTime stats fetched");
                Some(stats)
            }
            Err(e) => {
                warn!(error = %mask(&e.to_string(), &self.key), "WakaTime stats unavailable");
                None
            }
        }
    }

    /// Last seven days of stats.
    #[instrument(skip_all, fields(endpoint = %self.endpoint))]
    pub async fn try_fetch_last_7_days(&self) -> Result<WakaTimeStats, WakaTimeError> {
        let response = self
            .client
            .get(&self.endpoint)
            .header(AUTHORIZATION, self.authorization()?)
            .send()
            .await
            .map_err(|e| self.transport_error(&e))?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| self.transport_error(&e))?;
        parse_response(status, &body)
    }

    fn authorization(&self) -> Result<HeaderValue, WakaTimeError> {
        let encoded = BASE64.encode(format!("{}:", self.key.expose()));
        let mut value = HeaderValue::from_str(&format!("Basic {encoded}"))
            .map_err(|e| WakaTimeError::Transport(e.to_string()))?;
        value.set_sensitive(true);
        Ok(value)
    }

    fn transport_error(&self, err: &reqwest::Error) -> WakaTimeError {
        WakaTimeError::Transport(mask(&err.to_string(), &self.key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body() -> String {
        json!({
            "data": {
                "languages": [
                    {"name": "Other", "percent": 75.98, "text": "10 hrs"},
                    {"name": "LaTeX", "percent": 7.24, "text": "1 hr"},
                    {"name": "C", "percent": 5.98, "text": "50 mins"},
                    {"name": "Markdown", "percent": 4.13, "text": "35 mins"},
                    {"name": "Python", "percent": 1.43, "text": "12 mins"}
                ],
                "editors": [{"name": "Neovim", "percent": 100.0, "text": "13 hrs"}],
                "projects": [],
                "operating_systems": [{"name": "Other", "percent": 100.0}],
                "human_readable_total": "13 hrs"
            }
        })
        .to_string()
    }

    fn unreachable_client() -> WakaTimeClient {
        WakaTimeClient::new(
            "http://127.0.0.1:1/api/v1/users/current/stats/last_7_days",
            Secret::new("waka_0123456789abcdef".to_string()),
            Duration::from_secs(2),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_best_effort_none() {
        assert!(unreachable_client().fetch_last_7_days().await.is_none());
    }

    #[tokio::test]
    async fn unreachable_endpoint_error_hides_key() {
        let err = unreachable_client().try_fetch_last_7_days().await.unwrap_err();
        assert!(matches!(err, WakaTimeError::Transport(_)));
        assert!(!err.to_string().contains("0123456789abcdef"));
    }

    #[test]
    fn status_classification() {
        assert!(matches!(parse_response(401, ""), Err(WakaTimeError::Unauthorized)));
        assert!(matches!(parse_response(402, ""), Err(WakaTimeError::PaymentRequired)));
        assert!(matches!(parse_response(500, ""), Err(WakaTimeError::Status(500))));
    }

    #[test]
    fn missing_data_field() {
        assert!(matches!(
            parse_response(200, r#"{"error": "nope"}"#),
            Err(WakaTimeError::MissingData)
        ));
    }

    #[test]
    fn non_json_body_is_decode_error() {
        assert!(matches!(parse_response(200, "<html>"), Err(WakaTimeError::Decode(_))));
    }

    #[test]
    fn sections_are_renormalized_and_ordered() {
        let stats = parse_response(200, &body()).unwrap();
        let sections = stats.renormalized(SectionFlags::all(), 5);

        let order: Vec<Section> = sections.iter().map(|s| s.section).collect();
        assert_eq!(order, [Section::Languages, Section::Editors]);
        assert_eq!(sections[0].items.len(), 4);
        assert_eq!(sections[0].items[0].name, "LaTeX");
        assert_eq!(sections[0].items[0].text.as_deref(), Some("1 hr"));
        assert_eq!(sections[1].items[0].percent, 100.0);
    }

    #[test]
    fn top_truncates_after_renormalizing() {
        let stats = parse_response(200, &body()).unwrap();
        let sections = stats.renormalized(SectionFlags::only(&[Section::Languages]), 2);
        assert_eq!(sections.len(), 1);
        let names: Vec<&str> = sections[0].items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, ["LaTeX", "C"]);
        assert!((sections[0].items[0].percent - 38.55).abs() <= 0.1);
    }

    #[test]
    fn disabled_sections_are_skipped() {
        let stats = parse_response(200, &body()).unwrap();
        let flags = SectionFlags {
            languages: false,
            ..SectionFlags::all()
        };
        let sections = stats.renormalized(flags, 5);
        assert!(sections.iter().all(|s| s.section != Section::Languages));
    }

    #[test]
    fn authorization_is_basic_with_empty_password() {
        let client = WakaTimeClient::new(
            DEFAULT_WAKATIME_ENDPOINT,
            Secret::new("waka_123".into()),
            Duration::from_secs(1),
        )
        .unwrap();
        let header = client.authorization().unwrap();
        assert_eq!(header.to_str().unwrap(), format!("Basic {}", BASE64.encode("waka_123:")));
        assert!(header.is_sensitive());
    }
}

//! Credential handling.
//!
//! Tokens are wrapped in [`Secret`] so they never show up in `Debug` or
//! `Display` output, and [`mask`] scrubs them out of free-form text such as
//! error bodies before anything is logged.

use std::fmt;

use thiserror::Error;
use tracing::debug;

/// Environment variables checked for a GitHub token, in order.
pub const TOKEN_ENV_VARS: &[&str] = &["GHSTAT_TOKEN", "GH_TOKEN", "GITHUB_TOKEN", "INPUT_GH_TOKEN"];

/// Environment variable holding the WakaTime API key.
pub const WAKATIME_KEY_ENV: &str = "WAKATIME_API_KEY";

/// Number of leading characters left visible when masking.
const VISIBLE_CHARS: usize = 4;

/// Errors from loading credentials.
#[derive(Error, Debug)]
pub enum SecretError {
    /// None of the candidate variables held a value.
    #[error("no token found; set one of {0}")]
    Missing(String),

    /// A value was found but does not look like a GitHub token.
    #[error(
        "{var} does not look like a GitHub token (expected a ghp_/gho_/ghs_/github_pat_ prefix or a 40-char hex token)"
    )]
    InvalidFormat {
        /// Variable the value came from.
        var: String,
    },
}

/// A string that must not be printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    /// Wrap a raw value.
    pub const fn new(value: String) -> Self {
        Self(value)
    }

    /// Access the raw value. Only call this at the point of use.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Masked rendering: first four characters, the rest starred.
    pub fn masked(&self) -> String {
        masked_form(&self.0)
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

fn masked_form(raw: &str) -> String {
    let len = raw.chars().count();
    let visible = if len > VISIBLE_CHARS { VISIBLE_CHARS } else { 0 };
    let head: String = raw.chars().take(visible).collect();
    format!("{head}{}", "*".repeat(len - visible))
}

/// Replace every occurrence of `secret` in `text` with its masked form.
pub fn mask(text: &str, secret: &Secret) -> String {
    if secret.0.is_empty() || !text.contains(secret.0.as_str()) {
        return text.to_string();
    }
    text.replace(secret.0.as_str(), &secret.masked())
}

/// A validated GitHub API token.
#[derive(Clone, Debug)]
pub struct GitHubToken(Secret);

impl GitHubToken {
    /// Load the token from the first non-empty variable in [`TOKEN_ENV_VARS`].
    pub fn from_env() -> Result<Self, SecretError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load using a custom variable lookup (used by tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SecretError>
    where
        F: Fn(&str) -> Option<String>,
    {
        for var in TOKEN_ENV_VARS {
            let Some(value) = lookup(var)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
            else {
                continue;
            };
            if !looks_like_token(&value) {
                return Err(SecretError::InvalidFormat {
                    var: (*var).to_string(),
                });
            }
            debug!(source = var, "loaded GitHub token");
            return Ok(Self(Secret::new(value)));
        }
        Err(SecretError::Missing(TOKEN_ENV_VARS.join(", ")))
    }

    /// Wrap a value without format validation.
    pub const fn new_unchecked(value: String) -> Self {
        Self(Secret::new(value))
    }

    /// The underlying secret.
    pub const fn secret(&self) -> &Secret {
        &self.0
    }
}

fn looks_like_token(value: &str) -> bool {
    const PREFIXES: &[&str] = &["ghp_", "gho_", "ghs_", "ghu_", "github_pat_"];
    if PREFIXES.iter().any(|p| value.starts_with(p)) {
        return value.len() >= 20;
    }
    value.len() >= 40 && value.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f'))
}

/// The WakaTime API key, if configured.
pub fn wakatime_key_from_env() -> Option<Secret> {
    std::env::var(WAKATIME_KEY_ENV)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(Secret::new)
}

//! Credential scrubbing for log output.
//!
//! A [`Redactor`] is shared between the JSONL log layer and the commands:
//! commands register credentials as they load them, and every string the
//! layer writes afterwards is masked.

use std::sync::{Arc, RwLock};

use ghstat_core::secret::{Secret, mask};

/// A shared, growable set of values to mask.
#[derive(Clone, Debug, Default)]
pub struct Redactor {
    secrets: Arc<RwLock<Vec<Secret>>>,
}

impl Redactor {
    /// An empty redactor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mask `secret` in everything scrubbed from now on.
    pub fn register(&self, secret: &Secret) {
        if secret.expose().is_empty() {
            return;
        }
        if let Ok(mut secrets) = self.secrets.write()
            && !secrets.contains(secret)
        {
            secrets.push(secret.clone());
        }
    }

    /// `text` with every registered secret masked.
    pub fn scrub(&self, text: &str) -> String {
        let Ok(secrets) = self.secrets.read() else {
            return text.to_string();
        };
        secrets
            .iter()
            .fold(text.to_string(), |acc, secret| mask(&acc, secret))
    }
}

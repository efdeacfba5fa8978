//! Query result memoization and persisted caches.
//!
//! Two layers:
//!
//! - [`QueryCache`] keeps every [`ResultSet`] fetched during a run, keyed by
//!   [`query_key`]. It can optionally write through to a persisted store so
//!   the next run reuses results within the staleness bound.
//! - [`PersistentCache`] wraps any [`BlobStore`] with a timestamped JSON
//!   envelope and a TTL. Stale, undecryptable, or unparsable entries are
//!   reported as misses; they never fail the caller.

pub mod store;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

use crate::client::ResultSet;

pub use store::{BlobStore, EncryptedFileStore, MemoryStore};

/// Default staleness bound for persisted entries: one day.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Errors from the persisted cache layer.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Filesystem failure.
    #[error("cache io failed: {0}")]
    Io(#[from] std::io::Error),

    /// Could not serialize a value for storage.
    #[error("cache serialization failed: {0}")]
    Serde(#[from] serde_json::Error),

    /// Stored bytes failed decryption or structural validation.
    #[error("cache entry corrupt: {0}")]
    Corrupt(String),

    /// Key material missing, malformed, or encryption failed.
    #[error("cache encryption error: {0}")]
    Encryption(String),

    /// Entry name is not a plain file name.
    #[error("invalid cache entry name: {0:?}")]
    InvalidName(String),
}

fn sha256_hex(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    format!("{:x}", hasher.finalize())
}

/// Deterministic key for a query name and parameter map.
///
/// `BTreeMap` iteration is sorted, so the key does not depend on the order
/// parameters were inserted. Unit/record separators keep `("ab","c")` and
/// `("a","bc")` apart.
pub fn query_key(name: &str, params: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    for (key, value) in params {
        hasher.update([0x1e]);
        hasher.update(key.as_bytes());
        hasher.update([0x1f]);
        hasher.update(value.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Persisted entry name for a query key.
pub fn query_entry_name(key: &str) -> String {
    format!("query-{key}.bin")
}

/// Persisted entry name for a user's aggregate.
pub fn aggregate_entry_name(username: &str) -> String {
    format!("commits-{}.bin", sha256_hex(&[username.as_bytes()]))
}

#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    stored_at: DateTime<Utc>,
    payload: T,
}

/// A TTL-bounded, JSON-enveloped view over a [`BlobStore`].
#[derive(Debug, Clone)]
pub struct PersistentCache<S> {
    store: S,
    ttl: Duration,
}

impl<S: BlobStore> PersistentCache<S> {
    /// Wrap `store`, treating entries older than `ttl` as misses.
    pub const fn new(store: S, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// The staleness bound.
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Load a fresh entry, or `None`.
    pub fn load<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        self.load_at(name, Utc::now())
    }

    /// Load as if the current time were `now`.
    pub fn load_at<T: DeserializeOwned>(&self, name: &str, now: DateTime<Utc>) -> Option<T> {
        let bytes = match self.store.read(name) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!(name, "persisted cache miss");
                return None;
            }
            Err(e) => {
                warn!(name, error = %e, "ignoring unreadable cache entry");
                return None;
            }
        };

        let envelope: Envelope<Value> = match serde_json::from_slice(&bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(name, error = %e, "ignoring malformed cache entry");
                return None;
            }
        };

        match now.signed_duration_since(envelope.stored_at).to_std() {
            Ok(age) if age <= self.ttl => {}
            _ => {
                debug!(name, stored_at = %envelope.stored_at, "persisted cache entry is stale");
                return None;
            }
        }

        match serde_json::from_value(envelope.payload) {
            Ok(value) => {
                debug!(name, "persisted cache hit");
                Some(value)
            }
            Err(e) => {
                warn!(name, error = %e, "cache entry failed validation");
                None
            }
        }
    }

    /// Store `value` stamped with the current time.
    pub fn store<T: Serialize>(&self, name: &str, value: &T) -> Result<(), CacheError> {
        self.store_at(name, value, Utc::now())
    }

    /// Store `value` stamped with `stored_at`.
    pub fn store_at<T: Serialize>(
        &self,
        name: &str,
        value: &T,
        stored_at: DateTime<Utc>,
    ) -> Result<(), CacheError> {
        let bytes = serde_json::to_vec(&Envelope {
            stored_at,
            payload: value,
        })?;
        self.store.write(name, &bytes)
    }

    /// Drop one entry.
    pub fn remove(&self, name: &str) -> Result<(), CacheError> {
        self.store.remove(name)
    }

    /// Drop every entry.
    pub fn clear(&self) -> Result<usize, CacheError> {
        self.store.clear()
    }
}

/// A shared, type-erased persisted cache.
pub type SharedPersistentCache = PersistentCache<Arc<dyn BlobStore>>;

/// Hit/miss counters for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Lookups answered from memory or disk.
    pub hits: u64,
    /// Lookups that required a remote fetch.
    pub misses: u64,
}

/// Per-run memo of query results, optionally backed by disk.
#[derive(Default)]
pub struct QueryCache {
    entries: HashMap<String, ResultSet>,
    persisted: Option<SharedPersistentCache>,
    stats: CacheStats,
}

impl std::fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("entries", &self.entries.len())
            .field("persisted", &self.persisted.is_some())
            .field("stats", &self.stats)
            .finish()
    }
}

impl QueryCache {
    /// Memory-only cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Also read from and write through to `persisted`.
    pub fn with_persistence(mut self, persisted: SharedPersistentCache) -> Self {
        self.persisted = Some(persisted);
        self
    }

    /// Look up a result by key, checking memory first.
    pub fn get(&mut self, key: &str) -> Option<ResultSet> {
        if let Some(hit) = self.entries.get(key) {
            self.stats.hits += 1;
            return Some(hit.clone());
        }
        let loaded = self
            .persisted
            .as_ref()
            .and_then(|p| p.load::<ResultSet>(&query_entry_name(key)));
        match loaded {
            Some(result) => {
                self.stats.hits += 1;
                self.entries.insert(key.to_string(), result.clone());
                Some(result)
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Record a result. Persistence failures are logged, not returned.
    pub fn insert(&mut self, key: String, result: ResultSet) {
        if let Some(persisted) = &self.persisted
            && let Err(e) = persisted.store(&query_entry_name(&key), &result)
        {
            warn!(error = %e, "failed to persist query result");
        }
        self.entries.insert(key, result);
    }

    /// Number of results held in memory.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been cached yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Hit/miss counters so far.
    pub const fn stats(&self) -> CacheStats {
        self.stats
    }
}

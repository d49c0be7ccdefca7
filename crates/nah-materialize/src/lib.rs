//! NAK materialization: fetch an archive, verify its digest, unpack it into a
//! content-addressed cache entry, and publish the entry with one atomic
//! rename.

pub mod fetch;
pub mod layout;
pub mod materializer;
pub mod retry;
pub mod verify;

pub use fetch::{DefaultFetcher, FetchError, Fetcher, FileFetcher, HttpFetcher};
pub use layout::{CacheLayout, CompletionMarker};
pub use materializer::Materializer;
pub use retry::{CancelToken, RetryPolicy};
pub use verify::{verify_cache, CacheFailure, CacheReport};

use nah_schema::config::{
    KEY_CACHE_ROOT, KEY_FETCH_ALLOW_INSECURE_HTTP, KEY_FETCH_INITIAL_BACKOFF_MS,
    KEY_FETCH_MAX_ATTEMPTS, KEY_FETCH_MAX_BACKOFF_MS, KEY_FETCH_MAX_BYTES, KEY_FETCH_TIMEOUT_SECS,
};
use nah_schema::{ConfigError, Digest, NakId, NakProperties, ResolvedConfig, Version};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MaterializeError {
    #[error("fetching {uri} failed after {attempts} attempt(s): {source}")]
    FetchFailed {
        uri: String,
        attempts: u32,
        #[source]
        source: FetchError,
    },
    #[error("digest mismatch for {uri}: expected {expected}, got {actual}")]
    DigestMismatch {
        uri: String,
        expected: String,
        actual: String,
    },
    #[error("failed to extract {nak}: {reason}")]
    ExtractFailed { nak: String, reason: String },
    #[error("corrupt cache entry {path}: {reason}")]
    CacheCorrupt { path: PathBuf, reason: String },
    #[error("materialization cancelled")]
    Cancelled,
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A NAK unpacked in the cache. Read-only for everyone but the materializer.
#[derive(Debug, Clone, Serialize)]
pub struct MaterializedNak {
    pub nak_id: NakId,
    pub version: Version,
    pub root_path: PathBuf,
    pub digest: Digest,
    pub properties: NakProperties,
    /// Served from an existing entry without fetching.
    pub cached: bool,
}

impl PartialEq for MaterializedNak {
    fn eq(&self, other: &Self) -> bool {
        self.nak_id == other.nak_id
            && self.version == other.version
            && self.root_path == other.root_path
            && self.digest == other.digest
            && self.properties == other.properties
    }
}

impl Eq for MaterializedNak {}

/// Startup settings for a [`Materializer`].
#[derive(Debug, Clone, PartialEq)]
pub struct MaterializerConfig {
    pub cache_root: PathBuf,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub max_bytes: u64,
    pub allow_insecure_http: bool,
}

impl MaterializerConfig {
    pub fn from_config(config: &ResolvedConfig) -> Result<Self, ConfigError> {
        let defaults = RetryPolicy::default();
        let u64_or = |key: &str, default: u64| -> Result<u64, ConfigError> {
            Ok(config.get_u64(key)?.unwrap_or(default))
        };
        let max_attempts = u64_or(KEY_FETCH_MAX_ATTEMPTS, u64::from(defaults.max_attempts))?;
        Ok(Self {
            cache_root: config
                .get_path(KEY_CACHE_ROOT)
                .unwrap_or_else(|| PathBuf::from("/nah/cache")),
            timeout: Duration::from_secs(u64_or(KEY_FETCH_TIMEOUT_SECS, 60)?),
            retry: RetryPolicy {
                max_attempts: u32::try_from(max_attempts).map_err(|_| ConfigError::InvalidValue {
                    key: KEY_FETCH_MAX_ATTEMPTS.to_owned(),
                    value: max_attempts.to_string(),
                    expected: "a 32-bit attempt count",
                })?,
                initial_backoff: Duration::from_millis(u64_or(KEY_FETCH_INITIAL_BACKOFF_MS, 200)?),
                max_backoff: Duration::from_millis(u64_or(KEY_FETCH_MAX_BACKOFF_MS, 5000)?),
                multiplier: defaults.multiplier,
            },
            max_bytes: u64_or(KEY_FETCH_MAX_BYTES, 1 << 30)?,
            allow_insecure_http: config
                .get_bool(KEY_FETCH_ALLOW_INSECURE_HTTP)?
                .unwrap_or(false),
        })
    }
}

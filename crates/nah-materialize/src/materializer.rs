use crate::fetch::{DefaultFetcher, FetchError, Fetcher};
use crate::layout::{CacheLayout, CompletionMarker, PROPERTIES_FILE, ROOT_DIR};
use crate::retry::{CancelToken, RetryPolicy};
use crate::{MaterializeError, MaterializedNak, MaterializerConfig};
use nah_package::{decode, PackageArchive, PackageFormat};
use nah_resolve::NakCandidate;
use nah_schema::{Digest, NakProperties};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Fetches, verifies and unpacks NAK archives into the content-addressed
/// cache. Safe to run from several threads or processes against one cache.
pub struct Materializer {
    layout: CacheLayout,
    fetcher: Arc<dyn Fetcher>,
    retry: RetryPolicy,
    cancel: CancelToken,
}

impl Materializer {
    pub fn new(config: &MaterializerConfig) -> Self {
        let fetcher = DefaultFetcher::new(config.timeout, config.max_bytes, config.allow_insecure_http);
        Self::with_fetcher(
            CacheLayout::new(config.cache_root.clone()),
            Arc::new(fetcher),
            config.retry.clone(),
        )
    }

    pub fn with_fetcher(layout: CacheLayout, fetcher: Arc<dyn Fetcher>, retry: RetryPolicy) -> Self {
        Self {
            layout,
            fetcher,
            retry,
            cancel: CancelToken::new(),
        }
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn layout(&self) -> &CacheLayout {
        &self.layout
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn materialize(&self, candidate: &NakCandidate) -> Result<MaterializedNak, MaterializeError> {
        let entry = self
            .layout
            .entry_dir(&candidate.nak_id, &candidate.version, &candidate.digest);

        if entry.exists() {
            debug!("cache hit for {}@{}", candidate.nak_id, candidate.version);
            return load_entry(&entry, candidate, true);
        }

        self.check_cancel()?;
        let bytes = self.fetch_with_retry(&candidate.source_uri)?;

        let actual = Digest::of(&bytes);
        if actual != candidate.digest {
            return Err(MaterializeError::DigestMismatch {
                uri: candidate.source_uri.clone(),
                expected: candidate.digest.to_string(),
                actual: actual.to_string(),
            });
        }

        self.check_cancel()?;
        self.layout.initialize()?;
        let staging = TempDir::new_in(self.layout.staging_dir())?;
        let staged = staging.path().join("entry");
        populate(&staged, &bytes, candidate)?;

        // Cancellation must happen before the rename; after it the entry is
        // public and complete.
        self.check_cancel()?;
        publish(&staged, &entry, candidate)?;
        drop(staging);

        info!(
            "materialized {}@{} ({})",
            candidate.nak_id,
            candidate.version,
            candidate.digest.short()
        );
        load_entry(&entry, candidate, false)
    }

    fn check_cancel(&self) -> Result<(), MaterializeError> {
        if self.cancel.is_cancelled() {
            return Err(MaterializeError::Cancelled);
        }
        Ok(())
    }

    fn fetch_with_retry(&self, uri: &str) -> Result<Vec<u8>, MaterializeError> {
        let attempts = self.retry.attempts();
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.check_cancel()?;
            match self.fetcher.fetch(uri) {
                Ok(bytes) => return Ok(bytes),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    let delay = self.retry.backoff_after(attempt);
                    warn!("fetch attempt {attempt}/{attempts} for {uri} failed: {e}; retrying in {delay:?}");
                    if self.cancel.sleep(delay) {
                        return Err(MaterializeError::Cancelled);
                    }
                }
                Err(source) => return Err(fetch_failed(uri, attempt, source)),
            }
        }
    }
}

fn fetch_failed(uri: &str, attempts: u32, source: FetchError) -> MaterializeError {
    MaterializeError::FetchFailed {
        uri: uri.to_owned(),
        attempts,
        source,
    }
}

fn extract_failed(candidate: &NakCandidate, reason: impl std::fmt::Display) -> MaterializeError {
    MaterializeError::ExtractFailed {
        nak: format!("{}@{}", candidate.nak_id, candidate.version),
        reason: reason.to_string(),
    }
}

/// Decode the verified bytes and build a complete entry at `staged`.
fn populate(staged: &Path, bytes: &[u8], candidate: &NakCandidate) -> Result<(), MaterializeError> {
    let archive = decode(bytes).map_err(|e| extract_failed(candidate, e))?;
    if archive.format != PackageFormat::Nak {
        return Err(extract_failed(
            candidate,
            format!("expected a nak archive, got {}", archive.format),
        ));
    }
    let props = NakProperties::from_toml_bytes(&archive.manifest_bytes)
        .map_err(|e| extract_failed(candidate, e))?;
    if props.nak.id != candidate.nak_id || props.nak.version != candidate.version {
        return Err(extract_failed(
            candidate,
            format!(
                "archive declares {}@{}",
                props.nak.id, props.nak.version
            ),
        ));
    }

    fs::create_dir_all(staged).map_err(|e| extract_failed(candidate, e))?;
    archive
        .extract_to(&staged.join(ROOT_DIR))
        .map_err(|e| extract_failed(candidate, e))?;
    fs::write(staged.join(PROPERTIES_FILE), &archive.manifest_bytes)
        .map_err(|e| extract_failed(candidate, format!("{PROPERTIES_FILE}: {e}")))?;

    CompletionMarker {
        nak_id: candidate.nak_id.clone(),
        version: candidate.version.clone(),
        digest: candidate.digest.clone(),
        files: file_digests(&archive),
        materialized_at: chrono::Utc::now().to_rfc3339(),
    }
    .write(staged)?;
    fsync_dir(staged)?;
    Ok(())
}

fn file_digests(archive: &PackageArchive) -> BTreeMap<String, Digest> {
    archive
        .entries
        .iter()
        .map(|e| (e.path.clone(), Digest::of(&e.data)))
        .collect()
}

/// Rename the staged entry into place. Losing the race to another writer
/// is success as long as the winner left a complete entry.
fn publish(staged: &Path, entry: &Path, candidate: &NakCandidate) -> Result<(), MaterializeError> {
    let parent = entry
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    fs::create_dir_all(&parent)?;
    match fs::rename(staged, entry) {
        Ok(()) => {
            fsync_dir(&parent)?;
            Ok(())
        }
        Err(e) if entry.exists() => {
            debug!(
                "lost publish race for {}@{} ({e}); using existing entry",
                candidate.nak_id, candidate.version
            );
            Ok(())
        }
        Err(e) => Err(MaterializeError::Io(e)),
    }
}

fn load_entry(
    entry: &Path,
    candidate: &NakCandidate,
    cached: bool,
) -> Result<MaterializedNak, MaterializeError> {
    let corrupt = |reason: String| MaterializeError::CacheCorrupt {
        path: entry.to_path_buf(),
        reason,
    };
    let marker = CompletionMarker::read(entry)?;
    if !marker.matches(&candidate.nak_id, &candidate.version, &candidate.digest) {
        return Err(corrupt(format!(
            "marker names {}@{} ({})",
            marker.nak_id,
            marker.version,
            marker.digest.short()
        )));
    }
    let root_path = entry.join(ROOT_DIR);
    if !root_path.is_dir() {
        return Err(corrupt("payload directory missing".to_owned()));
    }
    let props_bytes =
        fs::read(entry.join(PROPERTIES_FILE)).map_err(|e| corrupt(format!("{PROPERTIES_FILE}: {e}")))?;
    let properties =
        NakProperties::from_toml_bytes(&props_bytes).map_err(|e| corrupt(e.to_string()))?;

    Ok(MaterializedNak {
        nak_id: candidate.nak_id.clone(),
        version: candidate.version.clone(),
        root_path,
        digest: candidate.digest.clone(),
        properties,
        cached,
    })
}

fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    fs::File::open(dir)?.sync_all()
}

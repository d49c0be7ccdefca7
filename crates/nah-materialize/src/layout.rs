use crate::MaterializeError;
use nah_schema::{Digest, NakId, Version};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const MARKER_FILE: &str = ".complete";
pub const PROPERTIES_FILE: &str = "nak.toml";
pub const ROOT_DIR: &str = "root";

/// Directory layout of the NAK cache.
///
/// ```text
/// <root>/naks/<nak_id>/<version>/<digest>/
///     root/        extracted payload
///     nak.toml     published NAK properties
///     .complete    completion marker
/// <root>/staging/  per-call staging areas
/// ```
///
/// An entry directory only ever appears through a rename of a fully
/// populated staging directory.
#[derive(Debug, Clone)]
pub struct CacheLayout {
    root: PathBuf,
}

impl CacheLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn naks_dir(&self) -> PathBuf {
        self.root.join("naks")
    }

    #[inline]
    pub fn staging_dir(&self) -> PathBuf {
        self.root.join("staging")
    }

    /// Content-addressed entry for one `(nak_id, version, digest)`.
    #[inline]
    pub fn entry_dir(&self, nak_id: &NakId, version: &Version, digest: &Digest) -> PathBuf {
        self.naks_dir()
            .join(nak_id.as_str())
            .join(version.to_string())
            .join(digest.as_str())
    }

    pub fn initialize(&self) -> Result<(), MaterializeError> {
        fs::create_dir_all(self.naks_dir())?;
        fs::create_dir_all(self.staging_dir())?;
        Ok(())
    }

    /// Every entry directory under `naks/`, sorted.
    pub fn list_entries(&self) -> Result<Vec<PathBuf>, MaterializeError> {
        let mut out = Vec::new();
        let naks = self.naks_dir();
        if !naks.is_dir() {
            return Ok(out);
        }
        for id in sorted_subdirs(&naks)? {
            for version in sorted_subdirs(&id)? {
                out.extend(sorted_subdirs(&version)?);
            }
        }
        Ok(out)
    }
}

fn sorted_subdirs(dir: &Path) -> Result<Vec<PathBuf>, MaterializeError> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Written into an entry before it is published. Its presence is what makes
/// an entry complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionMarker {
    pub nak_id: NakId,
    pub version: Version,
    pub digest: Digest,
    /// Payload path -> blake3 of its contents.
    pub files: BTreeMap<String, Digest>,
    pub materialized_at: String,
}

impl CompletionMarker {
    pub fn read(entry_dir: &Path) -> Result<Self, MaterializeError> {
        let path = entry_dir.join(MARKER_FILE);
        let content = fs::read_to_string(&path).map_err(|e| MaterializeError::CacheCorrupt {
            path: entry_dir.to_path_buf(),
            reason: format!("unreadable completion marker: {e}"),
        })?;
        serde_json::from_str(&content).map_err(|e| MaterializeError::CacheCorrupt {
            path: entry_dir.to_path_buf(),
            reason: format!("invalid completion marker: {e}"),
        })
    }

    pub fn write(&self, entry_dir: &Path) -> Result<(), MaterializeError> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| MaterializeError::Io(std::io::Error::other(e)))?;
        let path = entry_dir.join(MARKER_FILE);
        fs::write(&path, content)?;
        fs::File::open(&path)?.sync_all()?;
        Ok(())
    }

    pub fn matches(&self, nak_id: &NakId, version: &Version, digest: &Digest) -> bool {
        &self.nak_id == nak_id && &self.version == version && &self.digest == digest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> (NakId, Version, Digest) {
        (
            NakId::parse("engine").unwrap(),
            Version::new(1, 0, 0),
            Digest::of(b"engine-1.0.0"),
        )
    }

    #[test]
    fn entry_path_is_content_addressed() {
        let layout = CacheLayout::new("/var/cache/nah");
        let (id, version, digest) = key();
        assert_eq!(
            layout.entry_dir(&id, &version, &digest),
            PathBuf::from(format!("/var/cache/nah/naks/engine/1.0.0/{digest}"))
        );
        let other = Digest::of(b"rebuilt");
        assert_ne!(
            layout.entry_dir(&id, &version, &digest),
            layout.entry_dir(&id, &version, &other)
        );
    }

    #[test]
    fn initialize_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let layout = CacheLayout::new(dir.path());
        layout.initialize().unwrap();
        layout.initialize().unwrap();
        assert!(layout.naks_dir().is_dir());
        assert!(layout.staging_dir().is_dir());
        assert!(layout.list_entries().unwrap().is_empty());
    }

    #[test]
    fn marker_roundtrip_and_match() {
        let dir = tempfile::tempdir().unwrap();
        let (id, version, digest) = key();
        let marker = CompletionMarker {
            nak_id: id.clone(),
            version: version.clone(),
            digest: digest.clone(),
            files: BTreeMap::from([("bin/loader".to_owned(), Digest::of(b"x"))]),
            materialized_at: "2026-01-01T00:00:00Z".to_owned(),
        };
        marker.write(dir.path()).unwrap();
        let read = CompletionMarker::read(dir.path()).unwrap();
        assert_eq!(read, marker);
        assert!(read.matches(&id, &version, &digest));
        assert!(!read.matches(&id, &Version::new(1, 0, 1), &digest));
    }

    #[test]
    fn missing_marker_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            CompletionMarker::read(dir.path()).unwrap_err(),
            MaterializeError::CacheCorrupt { .. }
        ));
    }
}

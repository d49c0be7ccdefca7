use crate::NakCandidate;
use nah_schema::{Digest, NakId, Version};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid catalog index: {0}")]
    Invalid(String),
    #[error("failed to serialize catalog index: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Source of NAK candidates for resolution.
pub trait NakCatalog {
    fn list_candidates(&self, nak_id: &NakId) -> Result<Vec<NakCandidate>, CatalogError>;
}

/// In-memory catalog.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    candidates: Vec<NakCandidate>,
}

impl StaticCatalog {
    pub fn new(candidates: Vec<NakCandidate>) -> Self {
        Self { candidates }
    }
}

impl NakCatalog for StaticCatalog {
    fn list_candidates(&self, nak_id: &NakId) -> Result<Vec<NakCandidate>, CatalogError> {
        Ok(self
            .candidates
            .iter()
            .filter(|c| &c.nak_id == nak_id)
            .cloned()
            .collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogEntry {
    pub id: NakId,
    pub version: Version,
    /// Absolute URI, or a path relative to the index file.
    pub source: String,
    pub digest: Digest,
}

/// A TOML index of published NAK archives.
///
/// ```toml
/// [[nak]]
/// id = "engine"
/// version = "1.0.0"
/// source = "engine-1.0.0.nak"
/// digest = "<64 hex chars>"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogIndex {
    #[serde(default, rename = "nak")]
    pub entries: Vec<CatalogEntry>,
    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

impl CatalogIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, CatalogError> {
        let text = std::str::from_utf8(data).map_err(|e| CatalogError::Invalid(e.to_string()))?;
        toml::from_str(text).map_err(|e| CatalogError::Invalid(e.to_string()))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CatalogError> {
        Ok(toml::to_string_pretty(self)?.into_bytes())
    }

    /// Load an index; relative sources resolve against its directory.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let data = std::fs::read(path)?;
        let mut index = Self::from_bytes(&data)?;
        index.base_dir = path.parent().map(Path::to_path_buf);
        Ok(index)
    }

    /// Atomically replace the index file at `path`.
    pub fn save(&self, path: &Path) -> Result<(), CatalogError> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(&self.to_bytes()?)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| CatalogError::Io(e.error))?;
        Ok(())
    }

    /// Insert or replace the entry with the same id, version and source.
    pub fn publish(&mut self, entry: CatalogEntry) {
        self.entries.retain(|e| {
            !(e.id == entry.id && e.version == entry.version && e.source == entry.source)
        });
        self.entries.push(entry);
        self.entries.sort_by(|a, b| {
            a.id.cmp(&b.id)
                .then_with(|| a.version.cmp(&b.version))
                .then_with(|| a.source.cmp(&b.source))
        });
    }

    fn source_uri(&self, source: &str) -> String {
        if source.contains("://") || source.starts_with("file:") {
            return source.to_owned();
        }
        let path = Path::new(source);
        let full = match (&self.base_dir, path.is_absolute()) {
            (Some(base), false) => base.join(path),
            _ => path.to_path_buf(),
        };
        format!("file:{}", full.display())
    }
}

impl NakCatalog for CatalogIndex {
    fn list_candidates(&self, nak_id: &NakId) -> Result<Vec<NakCandidate>, CatalogError> {
        Ok(self
            .entries
            .iter()
            .filter(|e| &e.id == nak_id)
            .map(|e| NakCandidate {
                nak_id: e.id.clone(),
                version: e.version.clone(),
                source_uri: self.source_uri(&e.source),
                digest: e.digest.clone(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, version: &str, source: &str) -> CatalogEntry {
        CatalogEntry {
            id: NakId::parse(id).unwrap(),
            version: Version::parse(version).unwrap(),
            source: source.to_owned(),
            digest: Digest::of(source.as_bytes()),
        }
    }

    #[test]
    fn index_roundtrip() {
        let mut index = CatalogIndex::new();
        index.publish(entry("engine", "1.0.0", "https://naks.example.com/engine-1.0.0.nak"));
        index.publish(entry("runtime", "2.0.0", "runtime-2.0.0.nak"));
        let bytes = index.to_bytes().unwrap();
        let loaded = CatalogIndex::from_bytes(&bytes).unwrap();
        assert_eq!(loaded, index);
    }

    #[test]
    fn publish_replaces_same_source() {
        let mut index = CatalogIndex::new();
        index.publish(entry("engine", "1.0.0", "a.nak"));
        let mut updated = entry("engine", "1.0.0", "a.nak");
        updated.digest = Digest::of(b"rebuilt");
        index.publish(updated.clone());
        assert_eq!(index.entries, vec![updated]);
    }

    #[test]
    fn list_filters_by_id_and_resolves_relative_sources() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.toml");
        let mut index = CatalogIndex::new();
        index.publish(entry("engine", "1.0.0", "engine-1.0.0.nak"));
        index.publish(entry("engine", "1.1.0", "https://naks.example.com/engine-1.1.0.nak"));
        index.publish(entry("other", "1.0.0", "other.nak"));
        index.save(&path).unwrap();

        let loaded = CatalogIndex::load(&path).unwrap();
        let engine = NakId::parse("engine").unwrap();
        let candidates = loaded.list_candidates(&engine).unwrap();
        assert_eq!(candidates.len(), 2);
        let local = candidates
            .iter()
            .find(|c| c.version == Version::new(1, 0, 0))
            .unwrap();
        assert_eq!(
            local.source_uri,
            format!("file:{}", dir.path().join("engine-1.0.0.nak").display())
        );
        let remote = candidates
            .iter()
            .find(|c| c.version == Version::new(1, 1, 0))
            .unwrap();
        assert_eq!(remote.source_uri, "https://naks.example.com/engine-1.1.0.nak");
    }

    #[test]
    fn invalid_index_rejected() {
        assert!(matches!(
            CatalogIndex::from_bytes(b"[[nak]]\nid = \"engine\"\n").unwrap_err(),
            CatalogError::Invalid(_)
        ));
    }

    #[test]
    fn static_catalog_filters() {
        let engine = NakId::parse("engine").unwrap();
        let c = NakCandidate {
            nak_id: engine.clone(),
            version: Version::new(1, 0, 0),
            source_uri: "file:/naks/engine.nak".to_owned(),
            digest: Digest::of(b"x"),
        };
        let catalog = StaticCatalog::new(vec![c.clone()]);
        assert_eq!(catalog.list_candidates(&engine).unwrap(), vec![c]);
        let other = NakId::parse("other").unwrap();
        assert!(catalog.list_candidates(&other).unwrap().is_empty());
    }
}

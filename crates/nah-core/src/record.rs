//! Install records: what was installed, when, and which NAK it was pinned
//! to. Written next to `nah.toml` in the app directory.

use crate::CoreError;
use nah_resolve::NakCandidate;
use nah_schema::{AppId, Manifest, Version};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const RECORD_FILE: &str = "install.toml";
pub const MANIFEST_FILE: &str = "nah.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallRecord {
    pub app_id: AppId,
    pub version: Version,
    pub installed_at: String,
    /// Payload entries unpacked at install time.
    pub files: usize,
    /// The NAK chosen at install time. Launches reuse it while it still
    /// satisfies the manifest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nak: Option<NakCandidate>,
}

impl InstallRecord {
    pub fn read(app_root: &Path) -> Result<Self, CoreError> {
        let path = app_root.join(RECORD_FILE);
        let content = fs::read_to_string(&path).map_err(|e| CoreError::InvalidRecord {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        toml::from_str(&content).map_err(|e| CoreError::InvalidRecord {
            path,
            reason: e.to_string(),
        })
    }

    /// Read the record if the app directory has one.
    pub fn read_optional(app_root: &Path) -> Result<Option<Self>, CoreError> {
        if app_root.join(RECORD_FILE).is_file() {
            Self::read(app_root).map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn write(&self, app_root: &Path) -> Result<(), CoreError> {
        let path = app_root.join(RECORD_FILE);
        let content = toml::to_string_pretty(self).map_err(|e| CoreError::InvalidRecord {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        fs::write(&path, content)?;
        Ok(())
    }

    /// The pinned NAK when it still fits `manifest`: same app version, same
    /// NAK id, and a version inside the requirement.
    pub fn pin_for(&self, manifest: &Manifest) -> Option<&NakCandidate> {
        let req = manifest.nak.as_ref()?;
        let pin = self.nak.as_ref()?;
        (self.app_id == manifest.app_id
            && self.version == manifest.version
            && pin.nak_id == req.id
            && req.version_req.matches(&pin.version))
        .then_some(pin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nah_schema::{parse_manifest, Digest, NakId};

    const APP: &str = r#"
manifest_version = 1

[app]
id = "com.example.app"
version = "1.0.0"
entry = "bin/app"

[nak]
id = "engine"
version_req = "^1.0.0"
"#;

    fn record(nak_version: Version) -> InstallRecord {
        InstallRecord {
            app_id: AppId::parse("com.example.app").unwrap(),
            version: Version::new(1, 0, 0),
            installed_at: "2026-01-01T00:00:00Z".to_owned(),
            files: 2,
            nak: Some(NakCandidate {
                nak_id: NakId::parse("engine").unwrap(),
                version: nak_version,
                source_uri: "file:/naks/engine.nak".to_owned(),
                digest: Digest::of(b"engine"),
            }),
        }
    }

    #[test]
    fn written_record_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let rec = record(Version::new(1, 2, 0));
        rec.write(dir.path()).unwrap();
        assert_eq!(InstallRecord::read(dir.path()).unwrap(), rec);
        let text = fs::read_to_string(dir.path().join(RECORD_FILE)).unwrap();
        assert!(text.contains("[nak]"), "{text}");
    }

    #[test]
    fn absent_record_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(InstallRecord::read_optional(dir.path()).unwrap().is_none());
    }

    #[test]
    fn garbage_record_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(RECORD_FILE), "app_id = 7\n").unwrap();
        assert!(matches!(
            InstallRecord::read(dir.path()).unwrap_err(),
            CoreError::InvalidRecord { .. }
        ));
    }

    #[test]
    fn pin_applies_only_while_it_fits() {
        let manifest = parse_manifest(APP.as_bytes()).unwrap();
        assert!(record(Version::new(1, 2, 0)).pin_for(&manifest).is_some());
        assert!(record(Version::new(2, 0, 0)).pin_for(&manifest).is_none());

        let upgraded = parse_manifest(APP.replace("1.0.0\"\nentry", "1.1.0\"\nentry").as_bytes()).unwrap();
        assert_eq!(upgraded.version, Version::new(1, 1, 0));
        assert!(record(Version::new(1, 2, 0)).pin_for(&upgraded).is_none());

        let mut no_pin = record(Version::new(1, 2, 0));
        no_pin.nak = None;
        assert!(no_pin.pin_for(&manifest).is_none());
    }
}

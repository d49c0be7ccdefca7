use crate::capabilities::{is_well_formed, CapabilityRegistry};
use crate::paths::check_relative;
use crate::types::{AppId, IdentifierError, NakId};
use crate::version::{parse_version, Version, VersionError, VersionRange};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use thiserror::Error;

pub const MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest file: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed manifest: {0}")]
    Malformed(String),
    #[error("manifest is missing required field '{0}'")]
    MissingField(&'static str),
    #[error("unsupported manifest_version: {0}, expected 1")]
    UnsupportedManifestVersion(u32),
    #[error("manifest {0}")]
    InvalidVersion(VersionError),
    #[error("manifest {0}")]
    InvalidRange(VersionError),
    #[error("manifest {0}")]
    InvalidIdentifier(#[from] IdentifierError),
    #[error("invalid path in {field}: '{path}' ({reason})")]
    InvalidPath {
        field: &'static str,
        path: String,
        reason: &'static str,
    },
    #[error("invalid environment variable name '{0}'")]
    InvalidEnvironment(String),
    #[error("malformed capability '{0}'")]
    MalformedCapability(String),
    #[error("unsupported capability '{0}'")]
    UnsupportedCapability(String),
    #[error("failed to serialize manifest: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// OS family and architecture allow-lists. Empty lists admit anything.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PlatformConstraint {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub os: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arch: Vec<String>,
}

impl PlatformConstraint {
    pub fn is_any(&self) -> bool {
        self.os.is_empty() && self.arch.is_empty()
    }

    pub fn admits(&self, os: &str, arch: &str) -> bool {
        let listed = |list: &[String], v: &str| {
            list.is_empty() || list.iter().any(|x| x.eq_ignore_ascii_case(v))
        };
        listed(&self.os, os) && listed(&self.arch, arch)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
}

impl Metadata {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NakRequirement {
    pub id: NakId,
    pub version_req: VersionRange,
}

/// A parsed and checked application manifest. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub app_id: AppId,
    pub version: Version,
    /// Entry point, relative to the app root.
    pub entry: String,
    pub entry_args: Vec<String>,
    pub nak: Option<NakRequirement>,
    pub capabilities: BTreeSet<String>,
    /// Default environment; never overrides a value set by the NAK.
    pub environment: BTreeMap<String, String>,
    /// Library directories relative to the app root.
    pub lib_dirs: Vec<String>,
    pub platform: PlatformConstraint,
    pub metadata: Metadata,
}

impl Manifest {
    pub fn nak_id(&self) -> Option<&NakId> {
        self.nak.as_ref().map(|n| &n.id)
    }

    pub fn nak_version_req(&self) -> Option<&VersionRange> {
        self.nak.as_ref().map(|n| &n.version_req)
    }

    /// Canonical TOML rendering; `parse_manifest(&m.to_bytes()?)` yields `m`.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ManifestError> {
        let file = ManifestFile {
            manifest_version: Some(MANIFEST_VERSION),
            app: Some(AppSection {
                id: Some(self.app_id.to_string()),
                version: Some(self.version.to_string()),
                entry: Some(self.entry.clone()),
                args: self.entry_args.clone(),
                lib_dirs: self.lib_dirs.clone(),
                capabilities: self.capabilities.iter().cloned().collect(),
            }),
            nak: self.nak.as_ref().map(|n| NakSection {
                id: Some(n.id.to_string()),
                version_req: Some(n.version_req.to_string()),
            }),
            environment: self.environment.clone(),
            platform: self.platform.clone(),
            metadata: self.metadata.clone(),
        };
        Ok(toml::to_string(&file)?.into_bytes())
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct ManifestFile {
    manifest_version: Option<u32>,
    app: Option<AppSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    nak: Option<NakSection>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    environment: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "PlatformConstraint::is_any")]
    platform: PlatformConstraint,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    metadata: Metadata,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct AppSection {
    id: Option<String>,
    version: Option<String>,
    entry: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    args: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    lib_dirs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    capabilities: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct NakSection {
    id: Option<String>,
    version_req: Option<String>,
}

pub fn parse_manifest(bytes: &[u8]) -> Result<Manifest, ManifestError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| ManifestError::Malformed(format!("not valid UTF-8: {e}")))?;
    parse_manifest_str(text)
}

pub fn parse_manifest_str(input: &str) -> Result<Manifest, ManifestError> {
    let file: ManifestFile =
        toml::from_str(input).map_err(|e| ManifestError::Malformed(e.to_string()))?;

    let manifest_version = file
        .manifest_version
        .ok_or(ManifestError::MissingField("manifest_version"))?;
    if manifest_version != MANIFEST_VERSION {
        return Err(ManifestError::UnsupportedManifestVersion(manifest_version));
    }

    let app = file.app.ok_or(ManifestError::MissingField("app.id"))?;
    let app_id = AppId::parse(app.id.ok_or(ManifestError::MissingField("app.id"))?)?;
    let version_text = app
        .version
        .ok_or(ManifestError::MissingField("app.version"))?;
    let version = parse_version(&version_text).map_err(ManifestError::InvalidVersion)?;

    let entry = app.entry.ok_or(ManifestError::MissingField("app.entry"))?;
    check_path("app.entry", &entry)?;
    for dir in &app.lib_dirs {
        check_path("app.lib_dirs", dir)?;
    }

    let nak = match file.nak {
        None => None,
        Some(section) => {
            let id = section.id.ok_or(ManifestError::MissingField("nak.id"))?;
            let req = section
                .version_req
                .ok_or(ManifestError::MissingField("nak.version_req"))?;
            Some(NakRequirement {
                id: NakId::parse(id)?,
                version_req: VersionRange::parse(&req).map_err(ManifestError::InvalidRange)?,
            })
        }
    };

    let mut capabilities = BTreeSet::new();
    for cap in app.capabilities {
        if !is_well_formed(&cap) {
            return Err(ManifestError::MalformedCapability(cap));
        }
        capabilities.insert(cap);
    }

    for key in file.environment.keys() {
        if key.is_empty() || key.contains('=') || key.contains('\0') {
            return Err(ManifestError::InvalidEnvironment(key.clone()));
        }
    }

    Ok(Manifest {
        app_id,
        version,
        entry,
        entry_args: app.args,
        nak,
        capabilities,
        environment: file.environment,
        lib_dirs: app.lib_dirs,
        platform: file.platform,
        metadata: file.metadata,
    })
}

pub fn parse_manifest_file(path: impl AsRef<Path>) -> Result<Manifest, ManifestError> {
    let content = fs::read(path)?;
    parse_manifest(&content)
}

/// Check every declared capability against what the host can grant.
pub fn validate(manifest: &Manifest, registry: &CapabilityRegistry) -> Result<(), ManifestError> {
    match manifest
        .capabilities
        .iter()
        .find(|cap| !registry.is_supported(cap))
    {
        Some(cap) => Err(ManifestError::UnsupportedCapability(cap.clone())),
        None => Ok(()),
    }
}

fn check_path(field: &'static str, path: &str) -> Result<(), ManifestError> {
    check_relative(path).map_err(|reason| ManifestError::InvalidPath {
        field,
        path: path.to_owned(),
        reason,
    })
}

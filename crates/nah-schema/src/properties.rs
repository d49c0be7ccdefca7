//! Properties a NAK publishes about itself, carried as the manifest section
//! of a NAK archive (`nak.toml` once materialized).
//!
//! ```toml
//! [nak]
//! id = "engine"
//! version = "1.0.0"
//!
//! [paths]
//! lib_dirs = ["lib"]
//! resource_root = "share"
//!
//! [environment]
//! ENGINE_HOME = "{NAH_NAK_ROOT}"
//!
//! [loader]
//! exec = "bin/engine-loader"
//! args = ["--app-entry", "{NAH_APP_ENTRY}", "--engine-root", "{NAH_NAK_ROOT}"]
//!
//! [execution]
//! cwd = "."
//! ```

use crate::manifest::PlatformConstraint;
use crate::types::NakId;
use crate::version::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PropertiesError {
    #[error("malformed NAK properties: {0}")]
    Malformed(String),
    #[error("failed to serialize NAK properties: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct NakProperties {
    pub nak: NakIdentity,
    #[serde(default, skip_serializing_if = "PlatformConstraint::is_any")]
    pub platform: PlatformConstraint,
    #[serde(default, skip_serializing_if = "PathsSection::is_empty")]
    pub paths: PathsSection,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loader: Option<LoaderSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionSection>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct NakIdentity {
    pub id: NakId,
    pub version: Version,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PathsSection {
    /// Library directories relative to the NAK root.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lib_dirs: Vec<String>,
    /// Resource directory relative to the NAK root; the root itself when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_root: Option<String>,
}

impl PathsSection {
    pub fn is_empty(&self) -> bool {
        self.lib_dirs.is_empty() && self.resource_root.is_none()
    }
}

/// A loader binary shipped by the NAK that launches the app on its behalf.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoaderSection {
    /// Executable path relative to the NAK root.
    pub exec: String,
    /// Argument templates, expanded at composition time.
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ExecutionSection {
    /// Working directory template, relative to the NAK root after expansion.
    pub cwd: String,
}

impl NakProperties {
    /// Minimal properties for a NAK that only ships libraries.
    pub fn new(id: NakId, version: Version) -> Self {
        Self {
            nak: NakIdentity { id, version },
            platform: PlatformConstraint::default(),
            paths: PathsSection::default(),
            environment: BTreeMap::new(),
            loader: None,
            execution: None,
        }
    }

    pub fn from_toml_bytes(bytes: &[u8]) -> Result<Self, PropertiesError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| PropertiesError::Malformed(format!("not valid UTF-8: {e}")))?;
        toml::from_str(text).map_err(|e| PropertiesError::Malformed(e.to_string()))
    }

    pub fn to_toml_bytes(&self) -> Result<Vec<u8>, PropertiesError> {
        Ok(toml::to_string(self)?.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENGINE: &str = r#"
[nak]
id = "engine"
version = "1.0.0"

[paths]
lib_dirs = ["lib", "lib/plugins"]

[environment]
ENGINE_HOME = "{NAH_NAK_ROOT}"

[loader]
exec = "bin/engine-loader"
args = ["--app-entry", "{NAH_APP_ENTRY}", "--engine-root", "{NAH_NAK_ROOT}"]

[execution]
cwd = "."
"#;

    #[test]
    fn parses_loader_and_execution() {
        let p = NakProperties::from_toml_bytes(ENGINE.as_bytes()).unwrap();
        assert_eq!(p.nak.id, "engine");
        assert_eq!(p.nak.version, Version::new(1, 0, 0));
        let loader = p.loader.as_ref().unwrap();
        assert_eq!(loader.exec, "bin/engine-loader");
        assert_eq!(loader.args.len(), 4);
        assert_eq!(p.execution.as_ref().unwrap().cwd, ".");
        assert_eq!(p.paths.lib_dirs, vec!["lib", "lib/plugins"]);
    }

    #[test]
    fn roundtrip() {
        let p = NakProperties::from_toml_bytes(ENGINE.as_bytes()).unwrap();
        let bytes = p.to_toml_bytes().unwrap();
        assert_eq!(NakProperties::from_toml_bytes(&bytes).unwrap(), p);
    }

    #[test]
    fn unknown_keys_rejected() {
        let extra = ENGINE.replace("[execution]", "[execution]\nshell = true");
        assert!(matches!(
            NakProperties::from_toml_bytes(extra.as_bytes()).unwrap_err(),
            PropertiesError::Malformed(_)
        ));
    }

    #[test]
    fn library_only_nak() {
        let p = NakProperties::new(NakId::parse("runtime").unwrap(), Version::new(2, 1, 0));
        let bytes = p.to_toml_bytes().unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(!text.contains("[loader]"));
        assert_eq!(NakProperties::from_toml_bytes(&bytes).unwrap(), p);
    }

    #[test]
    fn invalid_nak_id_rejected() {
        let bad = ENGINE.replace("id = \"engine\"", "id = \"../engine\"");
        assert!(NakProperties::from_toml_bytes(bad.as_bytes()).is_err());
    }
}

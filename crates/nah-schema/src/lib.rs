//! Data model for nah: application manifests, identifiers, version ranges,
//! NAK published properties, the capability registry, and layered host
//! configuration.
//!
//! Everything here is pure parsing and validation. No network access and no
//! filesystem writes.

pub mod capabilities;
pub mod config;
pub mod manifest;
pub mod paths;
pub mod properties;
pub mod types;
pub mod version;

pub use capabilities::{split_capability, CapabilityRegistry, BUILTIN_CAPABILITIES};
pub use config::{ConfigError, ConfigSource, ConfigValue, Provenance, ResolvedConfig};
pub use manifest::{
    parse_manifest, parse_manifest_file, parse_manifest_str, validate, Manifest, ManifestError,
    Metadata, NakRequirement, PlatformConstraint, MANIFEST_VERSION,
};
pub use properties::{
    ExecutionSection, LoaderSection, NakIdentity, NakProperties, PathsSection, PropertiesError,
};
pub use types::{AppId, Digest, IdentifierError, NakId};
pub use version::{cmp_precedence, parse_version, Version, VersionError, VersionRange};

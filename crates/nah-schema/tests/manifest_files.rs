//! Manifest parsing against files on disk, the way hosts load them.

use nah_schema::{
    parse_manifest, parse_manifest_file, validate, CapabilityRegistry, ManifestError, Version,
};
use std::fs;

fn write(dir: &std::path::Path, name: &str, body: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    path
}

#[test]
fn app_with_nak_dependency_loads_and_validates() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(
        dir.path(),
        "nah.toml",
        r#"
manifest_version = 1

[app]
id = "com.example.game"
version = "2.0.0-rc.1+build.5"
entry = "game.bin"
capabilities = ["filesystem.read", "filesystem.write", "network.connect"]

[nak]
id = "engine"
version_req = ">=1.2.0 <2.0.0 || ^3.0.0"
"#,
    );

    let m = parse_manifest_file(&path).unwrap();
    assert_eq!(m.version.major, 2);
    assert_eq!(m.version.pre.as_str(), "rc.1");
    let range = m.nak_version_req().unwrap();
    assert!(range.matches(&Version::new(1, 9, 0)));
    assert!(!range.matches(&Version::new(2, 5, 0)));
    assert!(range.matches(&Version::new(3, 1, 0)));
    validate(&m, &CapabilityRegistry::default()).unwrap();
}

#[test]
fn canonical_bytes_are_stable() {
    let body = r#"
manifest_version = 1

[app]
id = "tool"
version = "1.0.0"
entry = "bin/tool"
capabilities = ["network.listen:8080", "filesystem.read"]

[environment]
B = "2"
A = "1"
"#;
    let first = parse_manifest(body.as_bytes()).unwrap();
    let bytes1 = first.to_bytes().unwrap();
    let second = parse_manifest(&bytes1).unwrap();
    let bytes2 = second.to_bytes().unwrap();
    assert_eq!(first, second);
    assert_eq!(bytes1, bytes2);
}

#[test]
fn every_builtin_capability_validates() {
    for cap in nah_schema::BUILTIN_CAPABILITIES {
        let body = format!(
            "manifest_version = 1\n[app]\nid = \"a\"\nversion = \"1.0.0\"\nentry = \"a\"\ncapabilities = [\"{cap}\"]\n"
        );
        let m = parse_manifest(body.as_bytes()).unwrap();
        validate(&m, &CapabilityRegistry::default()).unwrap();
    }
}

#[test]
fn empty_file_reports_missing_version() {
    let err = parse_manifest(b"").unwrap_err();
    assert!(matches!(err, ManifestError::MissingField("manifest_version")));
}

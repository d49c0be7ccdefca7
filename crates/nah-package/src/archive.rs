use crate::PackageError;
use nah_schema::paths::{check_relative, join_within};
use serde::Serialize;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageFormat {
    /// Native Application Package.
    Nap,
    /// Native Application Kit.
    Nak,
}

impl PackageFormat {
    pub(crate) fn tag(self) -> u8 {
        match self {
            Self::Nap => 1,
            Self::Nak => 2,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Result<Self, PackageError> {
        match tag {
            1 => Ok(Self::Nap),
            2 => Ok(Self::Nak),
            other => Err(PackageError::UnknownFormat(other)),
        }
    }
}

impl fmt::Display for PackageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nap => f.write_str("nap"),
            Self::Nak => f.write_str("nak"),
        }
    }
}

/// One regular file in the payload.
#[derive(Clone, PartialEq, Eq)]
pub struct PayloadEntry {
    /// `/`-separated path relative to the package root.
    pub path: String,
    /// Permission bits (`0o7777` mask).
    pub mode: u32,
    pub data: Vec<u8>,
}

impl PayloadEntry {
    pub fn new(path: impl Into<String>, mode: u32, data: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            mode: mode & 0o7777,
            data: data.into(),
        }
    }
}

impl fmt::Debug for PayloadEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadEntry")
            .field("path", &self.path)
            .field("mode", &format_args!("{:o}", self.mode))
            .field("len", &self.data.len())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageArchive {
    pub format: PackageFormat,
    pub manifest_bytes: Vec<u8>,
    pub entries: Vec<PayloadEntry>,
}

impl PackageArchive {
    pub fn new(format: PackageFormat, manifest_bytes: Vec<u8>, entries: Vec<PayloadEntry>) -> Self {
        Self {
            format,
            manifest_bytes,
            entries,
        }
    }

    pub fn payload_size(&self) -> u64 {
        self.entries.iter().map(|e| e.data.len() as u64).sum()
    }

    /// Write every payload entry under `dest`, creating parent directories.
    ///
    /// Paths are re-checked here so archives assembled in memory get the same
    /// protection as decoded ones. Existing files are never overwritten.
    pub fn extract_to(&self, dest: &Path) -> Result<(), PackageError> {
        fs::create_dir_all(dest)?;
        for entry in &self.entries {
            check_entry_path(&entry.path)?;
            let target = join_within(dest, &entry.path).ok_or_else(|| PackageError::UnsafePath {
                path: entry.path.clone(),
                reason: "escapes destination",
            })?;
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut file = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&target)?;
            file.write_all(&entry.data)?;
            file.sync_all()?;
            set_mode(&target, entry.mode)?;
        }
        debug!(
            "extracted {} entries ({} bytes) to {}",
            self.entries.len(),
            self.payload_size(),
            dest.display()
        );
        Ok(())
    }
}

/// Sort entries into canonical (path-lexicographic) order.
pub fn canonicalize(entries: &mut [PayloadEntry]) {
    entries.sort_by(|a, b| a.path.cmp(&b.path));
}

pub(crate) fn check_entry_path(path: &str) -> Result<(), PackageError> {
    check_relative(path).map_err(|reason| PackageError::UnsafePath {
        path: path.to_owned(),
        reason,
    })
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<(), PackageError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(path: &Path, mode: u32) -> Result<(), PackageError> {
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_readonly(mode & 0o222 == 0);
    fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_sorts_by_path() {
        let mut entries = vec![
            PayloadEntry::new("z.txt", 0o644, b"z".to_vec()),
            PayloadEntry::new("a/b.txt", 0o644, b"b".to_vec()),
            PayloadEntry::new("a.txt", 0o644, b"a".to_vec()),
        ];
        canonicalize(&mut entries);
        let paths: Vec<_> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["a.txt", "a/b.txt", "z.txt"]);
    }

    #[test]
    fn mode_is_masked() {
        let e = PayloadEntry::new("x", 0o100_755, Vec::new());
        assert_eq!(e.mode, 0o755);
    }

    #[test]
    fn extract_writes_files_and_dirs() {
        let archive = PackageArchive::new(
            PackageFormat::Nak,
            Vec::new(),
            vec![
                PayloadEntry::new("bin/loader", 0o755, b"#!/bin/sh\n".to_vec()),
                PayloadEntry::new("lib/libengine.so", 0o644, vec![0u8, 1, 2]),
            ],
        );
        let dir = tempfile::tempdir().unwrap();
        archive.extract_to(dir.path()).unwrap();
        assert_eq!(
            fs::read(dir.path().join("bin/loader")).unwrap(),
            b"#!/bin/sh\n"
        );
        assert_eq!(
            fs::read(dir.path().join("lib/libengine.so")).unwrap(),
            vec![0u8, 1, 2]
        );
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(dir.path().join("bin/loader"))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }

    #[test]
    fn extract_refuses_traversal() {
        let archive = PackageArchive::new(
            PackageFormat::Nap,
            Vec::new(),
            vec![PayloadEntry::new("../../etc/passwd", 0o644, b"x".to_vec())],
        );
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out");
        let err = archive.extract_to(&dest).unwrap_err();
        assert!(matches!(err, PackageError::UnsafePath { .. }));
        assert!(!dir.path().join("etc").exists());
    }

    #[test]
    fn extract_refuses_overwrite() {
        let archive = PackageArchive::new(
            PackageFormat::Nap,
            Vec::new(),
            vec![
                PayloadEntry::new("a", 0o644, b"1".to_vec()),
                PayloadEntry::new("a", 0o644, b"2".to_vec()),
            ],
        );
        let dir = tempfile::tempdir().unwrap();
        assert!(archive.extract_to(dir.path()).is_err());
        assert_eq!(fs::read(dir.path().join("a")).unwrap(), b"1");
    }

    #[test]
    fn format_tags() {
        assert_eq!(PackageFormat::from_tag(1).unwrap(), PackageFormat::Nap);
        assert_eq!(PackageFormat::from_tag(2).unwrap(), PackageFormat::Nak);
        assert!(matches!(
            PackageFormat::from_tag(9).unwrap_err(),
            PackageError::UnknownFormat(9)
        ));
        assert_eq!(PackageFormat::Nak.to_string(), "nak");
    }
}

use crate::archive::{canonicalize, PackageArchive, PackageFormat, PayloadEntry};
use crate::codec::encode;
use crate::PackageError;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Walk `root` into canonical payload entries.
///
/// Only regular files are collected; directories are implied by file paths.
/// Symlinks and special files are rejected rather than skipped so a package
/// never silently differs from the tree it was built from.
pub fn collect_directory(root: &Path) -> Result<Vec<PayloadEntry>, PackageError> {
    let mut entries = Vec::new();
    walk(root, root, &mut entries)?;
    canonicalize(&mut entries);
    Ok(entries)
}

/// Collect `root` and encode it as a canonical archive.
pub fn pack_directory(
    format: PackageFormat,
    manifest_bytes: Vec<u8>,
    root: &Path,
) -> Result<Vec<u8>, PackageError> {
    let entries = collect_directory(root)?;
    debug!("packing {} files from {}", entries.len(), root.display());
    encode(&PackageArchive::new(format, manifest_bytes, entries))
}

fn walk(root: &Path, current: &Path, out: &mut Vec<PayloadEntry>) -> Result<(), PackageError> {
    for entry in fs::read_dir(current)? {
        let entry = entry?;
        let full = entry.path();
        let rel = relative_path(root, &full)?;

        let meta = full.symlink_metadata()?;
        let ft = meta.file_type();
        if ft.is_dir() {
            walk(root, &full, out)?;
        } else if ft.is_file() {
            let data = fs::read(&full)?;
            out.push(PayloadEntry::new(rel, file_mode(&meta), data));
        } else if ft.is_symlink() {
            return Err(PackageError::UnsupportedEntry {
                path: rel,
                kind: "symlink",
            });
        } else {
            return Err(PackageError::UnsupportedEntry {
                path: rel,
                kind: "special",
            });
        }
    }
    Ok(())
}

fn relative_path(root: &Path, full: &Path) -> Result<String, PackageError> {
    let rel = full
        .strip_prefix(root)
        .map_err(|e| PackageError::Io(std::io::Error::other(format!("path strip: {e}"))))?;
    let mut parts = Vec::new();
    for comp in rel.components() {
        let s = comp.as_os_str().to_str().ok_or_else(|| PackageError::UnsafePath {
            path: rel.to_string_lossy().into_owned(),
            reason: "path is not UTF-8",
        })?;
        parts.push(s);
    }
    Ok(parts.join("/"))
}

#[cfg(unix)]
fn file_mode(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(meta: &fs::Metadata) -> u32 {
    if meta.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode;

    fn fixture(dir: &Path) {
        fs::write(dir.join("hello.txt"), "hello world").unwrap();
        fs::write(dir.join("binary.bin"), [0u8, 1, 2, 255]).unwrap();
        fs::create_dir_all(dir.join("subdir")).unwrap();
        fs::write(dir.join("subdir").join("nested.txt"), "nested content").unwrap();
        fs::create_dir_all(dir.join("empty_dir")).unwrap();
    }

    #[test]
    fn collects_sorted_regular_files() {
        let src = tempfile::tempdir().unwrap();
        fixture(src.path());
        let entries = collect_directory(src.path()).unwrap();
        let paths: Vec<_> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["binary.bin", "hello.txt", "subdir/nested.txt"]);
    }

    #[test]
    fn pack_is_deterministic() {
        let src = tempfile::tempdir().unwrap();
        fixture(src.path());
        let a = pack_directory(PackageFormat::Nap, b"m".to_vec(), src.path()).unwrap();
        let b = pack_directory(PackageFormat::Nap, b"m".to_vec(), src.path()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn pack_then_extract_reproduces_tree() {
        let src = tempfile::tempdir().unwrap();
        fixture(src.path());
        let bytes = pack_directory(PackageFormat::Nak, b"props".to_vec(), src.path()).unwrap();
        let archive = decode(&bytes).unwrap();
        assert_eq!(archive.manifest_bytes, b"props");

        let dst = tempfile::tempdir().unwrap();
        archive.extract_to(dst.path()).unwrap();
        assert_eq!(
            fs::read_to_string(dst.path().join("hello.txt")).unwrap(),
            "hello world"
        );
        assert_eq!(
            fs::read_to_string(dst.path().join("subdir/nested.txt")).unwrap(),
            "nested content"
        );
        assert_eq!(
            fs::read(dst.path().join("binary.bin")).unwrap(),
            vec![0u8, 1, 2, 255]
        );
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_rejected() {
        let src = tempfile::tempdir().unwrap();
        fixture(src.path());
        std::os::unix::fs::symlink("hello.txt", src.path().join("link")).unwrap();
        let err = collect_directory(src.path()).unwrap_err();
        assert!(matches!(
            err,
            PackageError::UnsupportedEntry {
                kind: "symlink",
                ..
            }
        ));
    }

    #[test]
    fn different_content_different_bytes() {
        let a = tempfile::tempdir().unwrap();
        fs::write(a.path().join("a.txt"), "aaa").unwrap();
        let b = tempfile::tempdir().unwrap();
        fs::write(b.path().join("a.txt"), "bbb").unwrap();
        let pa = pack_directory(PackageFormat::Nap, Vec::new(), a.path()).unwrap();
        let pb = pack_directory(PackageFormat::Nap, Vec::new(), b.path()).unwrap();
        assert_ne!(blake3::hash(&pa), blake3::hash(&pb));
    }
}

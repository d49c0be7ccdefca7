//! Rules for relative paths carried inside manifests and archives.

use std::path::{Component, Path, PathBuf};

/// Check that `path` is a plain relative path that cannot leave its root.
///
/// Accepted: non-empty, `/`-separated, no empty, `.` or `..` components,
/// no backslashes, NUL bytes, or drive prefixes.
pub fn check_relative(path: &str) -> Result<(), &'static str> {
    if path.is_empty() {
        return Err("empty path");
    }
    if path.contains('\0') {
        return Err("NUL byte in path");
    }
    if path.contains('\\') {
        return Err("backslash in path");
    }
    if path.starts_with('/') {
        return Err("absolute path");
    }
    if path.len() >= 2 && path.as_bytes()[1] == b':' && path.as_bytes()[0].is_ascii_alphabetic() {
        return Err("drive-prefixed path");
    }
    for part in path.split('/') {
        match part {
            "" => return Err("empty path component"),
            "." => return Err("'.' path component"),
            ".." => return Err("'..' path component"),
            _ => {}
        }
    }
    Ok(())
}

/// Lexically join `rel` under `root`, refusing results outside `root`.
///
/// `.` components are dropped and `..` pops a previously pushed component;
/// popping past `root` or an absolute `rel` yields `None`. The filesystem is
/// not consulted.
pub fn join_within(root: &Path, rel: &str) -> Option<PathBuf> {
    let rel_path = Path::new(rel);
    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
    for comp in rel_path.components() {
        match comp {
            Component::Normal(p) => parts.push(p),
            Component::CurDir => {}
            Component::ParentDir => {
                parts.pop()?;
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    let mut out = root.to_path_buf();
    for p in parts {
        out.push(p);
    }
    Some(out)
}

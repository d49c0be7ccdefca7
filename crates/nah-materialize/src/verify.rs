use crate::layout::{CacheLayout, CompletionMarker, MARKER_FILE, PROPERTIES_FILE, ROOT_DIR};
use crate::MaterializeError;
use nah_schema::{Digest, NakProperties};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Serialize)]
pub struct CacheReport {
    pub checked: usize,
    pub passed: usize,
    pub files_checked: usize,
    pub failed: Vec<CacheFailure>,
}

impl CacheReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Serialize)]
pub struct CacheFailure {
    pub entry: PathBuf,
    pub reason: String,
}

/// Re-hash every file of every completed entry against its marker.
pub fn verify_cache(layout: &CacheLayout) -> Result<CacheReport, MaterializeError> {
    let entries = layout.list_entries()?;
    let mut report = CacheReport {
        checked: entries.len(),
        ..Default::default()
    };

    for entry in &entries {
        match verify_entry(entry, &mut report.files_checked) {
            Ok(()) => report.passed += 1,
            Err(reason) => report.failed.push(CacheFailure {
                entry: entry.clone(),
                reason,
            }),
        }
    }
    Ok(report)
}

fn verify_entry(entry: &Path, files_checked: &mut usize) -> Result<(), String> {
    if !entry.join(MARKER_FILE).is_file() {
        return Err("missing completion marker".to_owned());
    }
    let marker = CompletionMarker::read(entry).map_err(|e| e.to_string())?;

    let expected_dir: Option<&str> = entry.file_name().and_then(|n| n.to_str());
    if expected_dir != Some(marker.digest.as_str()) {
        return Err(format!("marker digest {} does not match directory", marker.digest.short()));
    }

    let props = fs::read(entry.join(PROPERTIES_FILE))
        .map_err(|e| format!("{PROPERTIES_FILE}: {e}"))
        .and_then(|b| NakProperties::from_toml_bytes(&b).map_err(|e| e.to_string()))?;
    if props.nak.id != marker.nak_id || props.nak.version != marker.version {
        return Err(format!(
            "{PROPERTIES_FILE} declares {}@{}",
            props.nak.id, props.nak.version
        ));
    }

    let root = entry.join(ROOT_DIR);
    for (path, digest) in &marker.files {
        *files_checked += 1;
        let data = fs::read(root.join(path)).map_err(|e| format!("{path}: {e}"))?;
        let actual = Digest::of(&data);
        if &actual != digest {
            return Err(format!("{path}: hash mismatch, got {}", actual.short()));
        }
    }

    let on_disk = list_files(&root).map_err(|e| format!("listing payload: {e}"))?;
    let recorded: BTreeSet<&str> = marker.files.keys().map(String::as_str).collect();
    if let Some(extra) = on_disk.iter().find(|p| !recorded.contains(p.as_str())) {
        return Err(format!("{extra}: not recorded in marker"));
    }
    Ok(())
}

fn list_files(root: &Path) -> std::io::Result<Vec<String>> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                stack.push(path);
            } else if let Ok(rel) = path.strip_prefix(root) {
                out.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }
    }
    out.sort();
    Ok(out)
}

use super::{json_pretty, Context, EXIT_SUCCESS};
use nah_package::{decode, PackageFormat};
use nah_resolve::{CatalogEntry, CatalogIndex};
use nah_schema::{Digest, NakProperties};
use std::path::{Path, PathBuf};

/// Store `archive` relative to the index when it lives below it.
fn source_for(index_path: &Path, archive: &Path) -> Result<String, String> {
    let archive = archive
        .canonicalize()
        .map_err(|e| format!("failed to resolve {}: {e}", archive.display()))?;
    let base = index_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    let rel = base
        .canonicalize()
        .ok()
        .and_then(|b| archive.strip_prefix(b).ok().map(Path::to_path_buf));
    Ok(rel.unwrap_or(archive).display().to_string())
}

pub fn run(ctx: &Context, path: &Path) -> Result<u8, String> {
    let index_path = ctx
        .catalog
        .as_deref()
        .ok_or_else(|| "publish needs --catalog <index.toml>".to_owned())?;

    let bytes =
        std::fs::read(path).map_err(|e| format!("failed to read {}: {e}", path.display()))?;
    let archive = decode(&bytes).map_err(|e| format!("package error: {e}"))?;
    if archive.format != PackageFormat::Nak {
        return Err(format!("expected a nak package, got {}", archive.format));
    }
    let props = NakProperties::from_toml_bytes(&archive.manifest_bytes)
        .map_err(|e| format!("manifest error: {e}"))?;

    let mut index = if index_path.exists() {
        CatalogIndex::load(index_path).map_err(|e| format!("catalog error: {e}"))?
    } else {
        CatalogIndex::new()
    };
    let entry = CatalogEntry {
        id: props.nak.id,
        version: props.nak.version,
        source: source_for(index_path, path)?,
        digest: Digest::of(&bytes),
    };
    index.publish(entry.clone());
    index
        .save(index_path)
        .map_err(|e| format!("catalog error: {e}"))?;

    if ctx.json {
        println!("{}", json_pretty(&entry)?);
    } else {
        println!(
            "published {}@{} to {}",
            entry.id,
            entry.version,
            index_path.display()
        );
        println!("source: {}", entry.source);
        println!("digest: {}", entry.digest);
    }
    Ok(EXIT_SUCCESS)
}

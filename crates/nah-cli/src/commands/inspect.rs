use super::{json_pretty, EXIT_SUCCESS};
use nah_package::{decode, PackageArchive, PackageFormat};
use nah_schema::{parse_manifest, Digest, NakProperties};
use std::path::Path;

fn describe(archive: &PackageArchive) -> Result<String, String> {
    match archive.format {
        PackageFormat::Nap => {
            let m = parse_manifest(&archive.manifest_bytes)
                .map_err(|e| format!("manifest error: {e}"))?;
            Ok(format!("{}@{}", m.app_id, m.version))
        }
        PackageFormat::Nak => {
            let p = NakProperties::from_toml_bytes(&archive.manifest_bytes)
                .map_err(|e| format!("manifest error: {e}"))?;
            Ok(format!("{}@{}", p.nak.id, p.nak.version))
        }
    }
}

pub fn run(path: &Path, json: bool) -> Result<u8, String> {
    let bytes =
        std::fs::read(path).map_err(|e| format!("failed to read {}: {e}", path.display()))?;
    let archive = decode(&bytes).map_err(|e| format!("package error: {e}"))?;
    let label = describe(&archive)?;
    let digest = Digest::of(&bytes);

    if json {
        let entries: Vec<_> = archive
            .entries
            .iter()
            .map(|e| {
                serde_json::json!({
                    "path": e.path,
                    "mode": format!("{:o}", e.mode),
                    "size": e.data.len(),
                })
            })
            .collect();
        let payload = serde_json::json!({
            "format": archive.format,
            "package": label,
            "digest": digest,
            "size": bytes.len(),
            "payload_size": archive.payload_size(),
            "manifest": String::from_utf8_lossy(&archive.manifest_bytes),
            "entries": entries,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("format:  {}", archive.format);
        println!("package: {label}");
        println!("digest:  {digest}");
        println!(
            "payload: {} file(s), {} bytes",
            archive.entries.len(),
            archive.payload_size()
        );
        for e in &archive.entries {
            println!("  {:>6o} {:>10} {}", e.mode, e.data.len(), e.path);
        }
    }
    Ok(EXIT_SUCCESS)
}

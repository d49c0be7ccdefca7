use super::{json_pretty, EXIT_SUCCESS};
use nah_package::{pack_directory, PackageFormat};
use nah_schema::{parse_manifest, validate, CapabilityRegistry, Digest, NakProperties};
use std::path::Path;

/// Canonical manifest bytes for `format`, validated before anything is packed.
fn canonical_manifest(format: PackageFormat, raw: &[u8]) -> Result<(String, Vec<u8>), String> {
    match format {
        PackageFormat::Nap => {
            let manifest = parse_manifest(raw).map_err(|e| format!("manifest error: {e}"))?;
            validate(&manifest, &CapabilityRegistry::default())
                .map_err(|e| format!("manifest error: {e}"))?;
            let bytes = manifest
                .to_bytes()
                .map_err(|e| format!("manifest error: {e}"))?;
            Ok((format!("{}@{}", manifest.app_id, manifest.version), bytes))
        }
        PackageFormat::Nak => {
            let props =
                NakProperties::from_toml_bytes(raw).map_err(|e| format!("manifest error: {e}"))?;
            let bytes = props
                .to_toml_bytes()
                .map_err(|e| format!("manifest error: {e}"))?;
            Ok((format!("{}@{}", props.nak.id, props.nak.version), bytes))
        }
    }
}

pub fn run(
    dir: &Path,
    format: PackageFormat,
    manifest: &Path,
    output: &Path,
    json: bool,
) -> Result<u8, String> {
    let raw = std::fs::read(manifest)
        .map_err(|e| format!("failed to read manifest {}: {e}", manifest.display()))?;
    let (label, manifest_bytes) = canonical_manifest(format, &raw)?;

    let bytes = pack_directory(format, manifest_bytes, dir).map_err(|e| format!("package error: {e}"))?;
    std::fs::write(output, &bytes)
        .map_err(|e| format!("failed to write {}: {e}", output.display()))?;
    let digest = Digest::of(&bytes);

    if json {
        let payload = serde_json::json!({
            "format": format,
            "package": label,
            "path": output,
            "size": bytes.len(),
            "digest": digest,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("packed {format} {label} into {}", output.display());
        println!("digest: {digest}");
    }
    Ok(EXIT_SUCCESS)
}

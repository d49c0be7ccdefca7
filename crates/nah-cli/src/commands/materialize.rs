use super::{
    colorize_origin, json_pretty, open_host, read_manifest, spin_fail, spin_ok, spinner, Context,
    EXIT_SUCCESS,
};
use std::path::Path;

pub fn run(ctx: &Context, manifest: &Path) -> Result<u8, String> {
    let host = open_host(ctx)?;
    let manifest = read_manifest(&host, manifest)?;
    let Some(candidate) = host.resolve(&manifest).map_err(|e| e.to_string())? else {
        if ctx.json {
            println!("null");
        } else {
            println!("{} declares no NAK", manifest.app_id);
        }
        return Ok(EXIT_SUCCESS);
    };

    let label = format!("{}@{}", candidate.nak_id, candidate.version);
    let pb = if ctx.json {
        None
    } else {
        Some(spinner(&format!("materializing {label}...")))
    };
    let nak = match host.materialize(&candidate) {
        Ok(n) => {
            if let Some(ref pb) = pb {
                spin_ok(pb, &format!("{label} ready"));
            }
            n
        }
        Err(e) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, &format!("{label} failed"));
            }
            return Err(e.to_string());
        }
    };

    if ctx.json {
        println!("{}", json_pretty(&nak)?);
    } else {
        println!("root: {} ({})", nak.root_path.display(), colorize_origin(nak.cached));
        println!("digest: {}", nak.digest);
    }
    Ok(EXIT_SUCCESS)
}

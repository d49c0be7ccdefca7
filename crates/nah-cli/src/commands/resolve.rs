use super::{json_pretty, open_host, read_manifest, Context, EXIT_SUCCESS};
use std::path::Path;

pub fn run(ctx: &Context, manifest: &Path) -> Result<u8, String> {
    let host = open_host(ctx)?;
    let manifest = read_manifest(&host, manifest)?;
    let chosen = host.resolve(&manifest).map_err(|e| e.to_string())?;

    if ctx.json {
        println!("{}", json_pretty(&chosen)?);
        return Ok(EXIT_SUCCESS);
    }
    match chosen {
        Some(c) => {
            println!("{}@{}", c.nak_id, c.version);
            println!("source: {}", c.source_uri);
            println!("digest: {}", c.digest);
        }
        None => println!("{} declares no NAK", manifest.app_id),
    }
    Ok(EXIT_SUCCESS)
}

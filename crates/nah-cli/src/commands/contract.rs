use super::{open_host, read_manifest, Context, EXIT_SUCCESS};
use std::path::Path;

/// Contract for a manifest file, or for an installed app when `app` is set.
pub fn run(ctx: &Context, manifest: &Path, app: Option<&str>) -> Result<u8, String> {
    let host = open_host(ctx)?;
    let contract = match app {
        Some(app_id) => host.contract_for_installed(app_id),
        None => {
            let manifest = read_manifest(&host, manifest)?;
            host.contract(&manifest)
        }
    }
    .map_err(|e| e.to_string())?;

    if ctx.json {
        let out = contract
            .to_json()
            .map_err(|e| format!("JSON serialization failed: {e}"))?;
        println!("{out}");
        return Ok(EXIT_SUCCESS);
    }

    println!("executable: {}", contract.executable_path.display());
    for (i, arg) in contract.arguments.iter().enumerate() {
        println!("arg[{i}]:     {arg}");
    }
    println!("cwd:        {}", contract.working_directory.display());
    if let Some(root) = &contract.nak_root {
        println!("nak root:   {}", root.display());
    }
    println!("environment:");
    for (k, v) in &contract.environment {
        println!("  {k}={v}");
    }
    Ok(EXIT_SUCCESS)
}

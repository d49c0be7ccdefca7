use super::{json_pretty, open_host, Context, EXIT_SUCCESS};
use std::path::Path;

pub fn run(ctx: &Context, archive: &Path) -> Result<u8, String> {
    let host = open_host(ctx)?;
    let archive = host.read_package(archive).map_err(|e| e.to_string())?;
    let installed = host.install_app(&archive).map_err(|e| e.to_string())?;

    if ctx.json {
        println!("{}", json_pretty(&installed)?);
    } else {
        println!(
            "installed {}@{} into {}",
            installed.app_id,
            installed.version,
            installed.root.display()
        );
    }
    Ok(EXIT_SUCCESS)
}

use super::{json_pretty, open_host, Context, EXIT_SUCCESS};

pub fn run(ctx: &Context, app_id: &str) -> Result<u8, String> {
    let host = open_host(ctx)?;
    let removed = host.uninstall_app(app_id).map_err(|e| e.to_string())?;

    if ctx.json {
        println!("{}", json_pretty(&removed)?);
    } else {
        println!(
            "uninstalled {}@{} from {}",
            removed.app_id,
            removed.version,
            removed.root.display()
        );
    }
    Ok(EXIT_SUCCESS)
}

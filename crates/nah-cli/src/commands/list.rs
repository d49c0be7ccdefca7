use super::{json_pretty, open_host, Context, EXIT_SUCCESS};

pub fn run(ctx: &Context) -> Result<u8, String> {
    let host = open_host(ctx)?;
    let apps = host.list_apps().map_err(|e| e.to_string())?;

    if ctx.json {
        println!("{}", json_pretty(&apps)?);
        return Ok(EXIT_SUCCESS);
    }
    if apps.is_empty() {
        println!("no apps installed under {}", host.apps_root().display());
        return Ok(EXIT_SUCCESS);
    }
    for app in &apps {
        let nak = app
            .nak
            .as_ref()
            .map_or_else(|| "-".to_owned(), |n| format!("{}@{}", n.nak_id, n.version));
        println!("{:<32} {:<12} {nak}", app.app_id, app.version);
    }
    Ok(EXIT_SUCCESS)
}

use super::{json_pretty, open_host, Context, EXIT_CACHE_ERROR, EXIT_SUCCESS};
use nah_materialize::verify_cache;

pub fn run(ctx: &Context) -> Result<u8, String> {
    let host = open_host(ctx)?;
    let report = verify_cache(host.materializer().layout()).map_err(|e| format!("cache error: {e}"))?;

    if ctx.json {
        println!("{}", json_pretty(&report)?);
    } else {
        println!(
            "cache integrity: {}/{} entries passed ({} files)",
            report.passed, report.checked, report.files_checked
        );
        for f in &report.failed {
            println!("  FAIL {}: {}", f.entry.display(), f.reason);
        }
    }

    if report.is_clean() {
        Ok(EXIT_SUCCESS)
    } else {
        Ok(EXIT_CACHE_ERROR)
    }
}

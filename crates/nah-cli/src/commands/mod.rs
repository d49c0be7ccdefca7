pub mod completions;
pub mod contract;
pub mod inspect;
pub mod install;
pub mod list;
pub mod man_pages;
pub mod materialize;
pub mod pack;
pub mod publish;
pub mod resolve;
pub mod uninstall;
pub mod verify_cache;

use indicatif::{ProgressBar, ProgressStyle};
use nah_core::{install_signal_handler, Host};
use nah_resolve::{CatalogIndex, NakCatalog, StaticCatalog};
use nah_schema::config::ENV_PREFIX;
use nah_schema::{Manifest, ResolvedConfig};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_MANIFEST_ERROR: u8 = 2;
pub const EXIT_CACHE_ERROR: u8 = 3;
pub const EXIT_CONFIG_ERROR: u8 = 4;

/// Global options shared by every host-backed command.
#[derive(Debug, Clone)]
pub struct Context {
    pub config: Option<PathBuf>,
    pub catalog: Option<PathBuf>,
    pub json: bool,
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template).unwrap_or_else(|_| ProgressStyle::default_spinner())
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        style("{spinner:.cyan} {msg}")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(style("{msg}"));
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(style("{msg}"));
    pb.finish_with_message(format!("✗ {msg}"));
}

pub fn colorize_origin(cached: bool) -> String {
    use console::Style;
    if cached {
        Style::new().blue().apply_to("cached").to_string()
    } else {
        Style::new().green().apply_to("fetched").to_string()
    }
}

/// Environment pairs that are valid UTF-8. Non-UTF-8 pairs are skipped; a
/// skipped `NAH_CONFIG_*` variable is worth a warning.
pub fn utf8_env<I>(vars: I) -> Vec<(String, String)>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    vars.into_iter()
        .filter_map(|(key, value)| match (key.into_string(), value.into_string()) {
            (Ok(k), Ok(v)) => Some((k, v)),
            (Ok(k), Err(_)) => {
                if k.starts_with(ENV_PREFIX) {
                    warn!("ignoring {k}: value is not valid UTF-8");
                }
                None
            }
            (Err(k), _) => {
                if k.to_string_lossy().starts_with(ENV_PREFIX) {
                    warn!("ignoring {}: name is not valid UTF-8", k.to_string_lossy());
                }
                None
            }
        })
        .collect()
}

pub fn load_config(path: Option<&Path>) -> Result<ResolvedConfig, String> {
    ResolvedConfig::load(path, utf8_env(std::env::vars_os()))
        .map_err(|e| format!("config error: {e}"))
}

pub fn load_catalog(path: Option<&Path>) -> Result<Box<dyn NakCatalog + Send + Sync>, String> {
    match path {
        Some(p) => {
            let index = CatalogIndex::load(p)
                .map_err(|e| format!("catalog error: {}: {e}", p.display()))?;
            Ok(Box::new(index))
        }
        None => Ok(Box::new(StaticCatalog::new(Vec::new()))),
    }
}

/// Build the host and route Ctrl-C into its cancellation token.
pub fn open_host(ctx: &Context) -> Result<Host, String> {
    let config = load_config(ctx.config.as_deref())?;
    let catalog = load_catalog(ctx.catalog.as_deref())?;
    let host = Host::new(config, catalog).map_err(|e| e.to_string())?;
    debug!(
        "apps root {}, cache root {}",
        host.apps_root().display(),
        host.materializer().layout().root().display()
    );
    install_signal_handler(host.cancel_token());
    Ok(host)
}

pub fn read_manifest(host: &Host, path: &Path) -> Result<Manifest, String> {
    let bytes = std::fs::read(path)
        .map_err(|e| format!("failed to read manifest {}: {e}", path.display()))?;
    host.load_manifest_bytes(&bytes).map_err(|e| e.to_string())
}

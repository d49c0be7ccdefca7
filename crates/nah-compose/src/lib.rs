//! Launch contract composition.
//!
//! [`compose`] turns a manifest, host configuration, a platform description
//! and an optional materialized NAK into the exact executable, arguments,
//! environment and working directory a launcher should use. It is a pure
//! function: the same inputs always give a byte-identical contract.

pub mod expand;
pub mod platform;

pub use expand::{expand, MAX_EXPANDED_LEN, MAX_PLACEHOLDERS};
pub use platform::{HostPlatform, Platform, StaticPlatform};

use nah_materialize::MaterializedNak;
use nah_schema::config::{ENV_OVERRIDE_PREFIX, KEY_APPS_ROOT, VARS_PREFIX};
use nah_schema::paths::join_within;
use nah_schema::{ConfigSource, Manifest};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

const DEFAULT_APPS_ROOT: &str = "/nah/apps";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContractError {
    #[error("unresolved placeholder {{{name}}} in {location}")]
    UnresolvedVariable { name: String, location: String },
    #[error("{subject} does not support {os}/{arch}")]
    IncompatiblePlatform {
        subject: String,
        os: String,
        arch: String,
    },
    #[error("{field} '{path}' escapes its root {root}")]
    PathEscape {
        field: String,
        path: String,
        root: PathBuf,
    },
    #[error("expansion limit hit in {location}: {reason}")]
    ExpansionLimit { location: String, reason: String },
    #[error("manifest requires {expected}, but {actual} was supplied")]
    NakMismatch { expected: String, actual: String },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Everything a launcher needs to start the app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchContract {
    pub app_id: String,
    pub app_version: String,
    pub app_root: PathBuf,
    pub executable_path: PathBuf,
    pub arguments: Vec<String>,
    pub environment: BTreeMap<String, String>,
    pub working_directory: PathBuf,
    pub nak_root: Option<PathBuf>,
    /// Search directories in priority order; also folded into
    /// `environment[library_path_var]`.
    pub library_paths: Vec<PathBuf>,
    pub library_path_var: String,
}

impl LaunchContract {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

pub fn compose(
    manifest: &Manifest,
    config: &dyn ConfigSource,
    platform: &dyn Platform,
    nak: Option<&MaterializedNak>,
) -> Result<LaunchContract, ContractError> {
    check_platform(manifest, platform, nak)?;
    check_binding(manifest, nak)?;

    let apps_root = config.get(KEY_APPS_ROOT).unwrap_or(DEFAULT_APPS_ROOT);
    if !Path::new(apps_root).is_absolute() {
        return Err(ContractError::InvalidConfig(format!(
            "{KEY_APPS_ROOT} must be absolute, got '{apps_root}'"
        )));
    }
    let app_root = Path::new(apps_root).join(manifest.app_id.as_str());

    let standard = standard_vars(manifest, &app_root, nak)?;
    let mut vars = config.with_prefix(VARS_PREFIX);
    vars.extend(standard.clone());

    let mut environment = BTreeMap::new();
    if let Some(nak) = nak {
        for (k, v) in &nak.properties.environment {
            environment.insert(k.clone(), expand(v, &vars, &format!("nak.environment.{k}"))?);
        }
    }
    for (k, v) in &manifest.environment {
        if !environment.contains_key(k) {
            let value = expand(v, &vars, &format!("environment.{k}"))?;
            environment.insert(k.clone(), value);
        }
    }
    for (k, v) in config.with_prefix(ENV_OVERRIDE_PREFIX) {
        let value = expand(&v, &vars, &format!("{ENV_OVERRIDE_PREFIX}{k}"))?;
        environment.insert(k, value);
    }
    environment.extend(standard.clone());

    // Later templates may also reference the composed environment.
    let mut scope = config.with_prefix(VARS_PREFIX);
    scope.extend(environment.clone());
    scope.extend(standard);

    let loader = nak.and_then(|n| n.properties.loader.as_ref().map(|l| (n, l)));
    let executable_path = match loader {
        Some((nak, loader)) => {
            let exec = expand(&loader.exec, &scope, "loader.exec")?;
            resolve_under(&nak.root_path, &exec, "loader.exec")?
        }
        None => {
            let entry = expand(&manifest.entry, &scope, "entry")?;
            resolve_under(&app_root, &entry, "entry")?
        }
    };
    let executable_path = with_exec_suffix(executable_path, platform.exec_suffix());

    let mut arguments = Vec::new();
    if let Some((_, loader)) = loader {
        for (i, arg) in loader.args.iter().enumerate() {
            arguments.push(expand(arg, &scope, &format!("loader.args[{i}]"))?);
        }
    }
    for (i, arg) in manifest.entry_args.iter().enumerate() {
        arguments.push(expand(arg, &scope, &format!("entry_args[{i}]"))?);
    }

    let working_directory = match nak.and_then(|n| n.properties.execution.as_ref().map(|e| (n, e))) {
        Some((nak, execution)) => {
            let cwd = expand(&execution.cwd, &scope, "execution.cwd")?;
            if Path::new(&cwd).is_absolute() {
                PathBuf::from(cwd)
            } else {
                resolve_under(&nak.root_path, &cwd, "execution.cwd")?
            }
        }
        None => app_root.clone(),
    };

    let mut library_paths = Vec::new();
    if let Some(nak) = nak {
        for (i, dir) in nak.properties.paths.lib_dirs.iter().enumerate() {
            let dir = expand(dir, &scope, &format!("nak.lib_dirs[{i}]"))?;
            library_paths.push(resolve_under(&nak.root_path, &dir, "nak.lib_dirs")?);
        }
    }
    for (i, dir) in manifest.lib_dirs.iter().enumerate() {
        let dir = expand(dir, &scope, &format!("lib_dirs[{i}]"))?;
        library_paths.push(resolve_under(&app_root, &dir, "lib_dirs")?);
    }
    let library_path_var = platform.library_path_var().to_owned();
    if !library_paths.is_empty() {
        let sep = platform.path_separator().to_string();
        let mut parts: Vec<String> = library_paths
            .iter()
            .map(|p| p.display().to_string())
            .collect();
        if let Some(existing) = platform.env_get(&library_path_var).filter(|v| !v.is_empty()) {
            parts.push(existing);
        }
        environment.insert(library_path_var.clone(), parts.join(&sep));
    }

    debug!(
        "composed contract for {}: {} ({} args, {} env)",
        manifest.app_id,
        executable_path.display(),
        arguments.len(),
        environment.len()
    );

    Ok(LaunchContract {
        app_id: manifest.app_id.to_string(),
        app_version: manifest.version.to_string(),
        app_root,
        executable_path,
        arguments,
        environment,
        working_directory,
        nak_root: nak.map(|n| n.root_path.clone()),
        library_paths,
        library_path_var,
    })
}

fn check_platform(
    manifest: &Manifest,
    platform: &dyn Platform,
    nak: Option<&MaterializedNak>,
) -> Result<(), ContractError> {
    let (os, arch) = (platform.os_family(), platform.arch());
    let incompatible = |subject: String| ContractError::IncompatiblePlatform {
        subject,
        os: os.to_owned(),
        arch: arch.to_owned(),
    };
    if !manifest.platform.admits(os, arch) {
        return Err(incompatible(format!("app {}", manifest.app_id)));
    }
    if let Some(nak) = nak {
        if !nak.properties.platform.admits(os, arch) {
            return Err(incompatible(format!("nak {}@{}", nak.nak_id, nak.version)));
        }
    }
    Ok(())
}

/// The supplied NAK must be exactly what the manifest asks for, including
/// none at all.
fn check_binding(manifest: &Manifest, nak: Option<&MaterializedNak>) -> Result<(), ContractError> {
    let actual = nak.map_or_else(
        || "no nak".to_owned(),
        |n| format!("{}@{}", n.nak_id, n.version),
    );
    match (&manifest.nak, nak) {
        (None, None) => Ok(()),
        (Some(req), Some(n)) if req.id == n.nak_id && req.version_req.matches(&n.version) => Ok(()),
        (Some(req), _) => Err(ContractError::NakMismatch {
            expected: format!("{} {}", req.id, req.version_req),
            actual,
        }),
        (None, Some(_)) => Err(ContractError::NakMismatch {
            expected: "no nak".to_owned(),
            actual,
        }),
    }
}

fn standard_vars(
    manifest: &Manifest,
    app_root: &Path,
    nak: Option<&MaterializedNak>,
) -> Result<BTreeMap<String, String>, ContractError> {
    let mut vars = BTreeMap::from([
        ("NAH_APP_ID".to_owned(), manifest.app_id.to_string()),
        ("NAH_APP_VERSION".to_owned(), manifest.version.to_string()),
        ("NAH_APP_ROOT".to_owned(), app_root.display().to_string()),
        ("NAH_APP_ENTRY".to_owned(), manifest.entry.clone()),
    ]);
    if let Some(nak) = nak {
        let root = nak.root_path.display().to_string();
        let resource_root = match nak.properties.paths.resource_root.as_deref() {
            Some(r) => resolve_under(&nak.root_path, r, "paths.resource_root")?
                .display()
                .to_string(),
            None => root.clone(),
        };
        vars.insert("NAH_NAK_ID".to_owned(), nak.nak_id.to_string());
        vars.insert("NAH_NAK_VERSION".to_owned(), nak.version.to_string());
        vars.insert("NAH_NAK_ROOT".to_owned(), root);
        vars.insert("NAH_NAK_RESOURCE_ROOT".to_owned(), resource_root);
    }
    Ok(vars)
}

/// Resolve `value` under `root`. Absolute values must already lie inside it.
fn resolve_under(root: &Path, value: &str, field: &str) -> Result<PathBuf, ContractError> {
    let path = Path::new(value);
    let escape = || ContractError::PathEscape {
        field: field.to_owned(),
        path: value.to_owned(),
        root: root.to_path_buf(),
    };
    let rel = if path.is_absolute() {
        path.strip_prefix(root).map_err(|_| escape())?
    } else {
        path
    };
    let rel = rel.to_str().ok_or_else(escape)?;
    if rel.is_empty() {
        return Err(escape());
    }
    join_within(root, rel).ok_or_else(escape)
}

fn with_exec_suffix(path: PathBuf, suffix: &str) -> PathBuf {
    if suffix.is_empty() || path.extension().is_some() {
        return path;
    }
    let mut s = path.into_os_string();
    s.push(suffix);
    PathBuf::from(s)
}

//! Layered host configuration: built-in defaults, then a TOML file, then
//! `NAH_CONFIG_*` environment variables. Later layers win; every value keeps
//! a record of where it came from.
//!
//! Environment variables map onto dotted keys by splitting on a double
//! underscore: `NAH_CONFIG_FETCH__TIMEOUT_SECS` is `fetch.timeout_secs`.
//! Section names and fixed keys are lowercased; names under `vars.` and
//! `env.` keep their case (`NAH_CONFIG_ENV__RUST_LOG` is `env.RUST_LOG`).

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

pub const ENV_PREFIX: &str = "NAH_CONFIG_";

pub const KEY_APPS_ROOT: &str = "paths.apps_root";
pub const KEY_CACHE_ROOT: &str = "paths.cache_root";
pub const KEY_FETCH_TIMEOUT_SECS: &str = "fetch.timeout_secs";
pub const KEY_FETCH_MAX_ATTEMPTS: &str = "fetch.max_attempts";
pub const KEY_FETCH_INITIAL_BACKOFF_MS: &str = "fetch.initial_backoff_ms";
pub const KEY_FETCH_MAX_BACKOFF_MS: &str = "fetch.max_backoff_ms";
pub const KEY_FETCH_MAX_BYTES: &str = "fetch.max_bytes";
pub const KEY_FETCH_ALLOW_INSECURE_HTTP: &str = "fetch.allow_insecure_http";

/// Template variables made available to placeholder expansion.
pub const VARS_PREFIX: &str = "vars.";
/// Environment overrides applied on top of NAK and manifest values.
pub const ENV_OVERRIDE_PREFIX: &str = "env.";

const DEFAULTS: &[(&str, &str)] = &[
    (KEY_APPS_ROOT, "/nah/apps"),
    (KEY_CACHE_ROOT, "/nah/cache"),
    (KEY_FETCH_TIMEOUT_SECS, "60"),
    (KEY_FETCH_MAX_ATTEMPTS, "3"),
    (KEY_FETCH_INITIAL_BACKOFF_MS, "200"),
    (KEY_FETCH_MAX_BACKOFF_MS, "5000"),
    (KEY_FETCH_MAX_BYTES, "1073741824"),
    (KEY_FETCH_ALLOW_INSECURE_HTTP, "false"),
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("unknown config key '{key}' (from {provenance})")]
    UnknownKey { key: String, provenance: Provenance },
    #[error("config key '{key}' has invalid value '{value}': expected {expected}")]
    InvalidValue {
        key: String,
        value: String,
        expected: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "source", rename_all = "snake_case")]
pub enum Provenance {
    Default,
    File(PathBuf),
    Env(String),
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => f.write_str("default"),
            Self::File(p) => write!(f, "file {}", p.display()),
            Self::Env(var) => write!(f, "env {var}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigValue {
    pub value: String,
    pub provenance: Provenance,
}

/// Read-only view of configuration, as consumed by the composer.
pub trait ConfigSource {
    fn get(&self, key: &str) -> Option<&str>;

    /// All keys in ascending order.
    fn keys(&self) -> Vec<&str>;

    /// `(suffix, value)` pairs for every key starting with `prefix`.
    fn with_prefix(&self, prefix: &str) -> BTreeMap<String, String> {
        self.keys()
            .into_iter()
            .filter_map(|k| {
                let suffix = k.strip_prefix(prefix)?;
                let value = self.get(k)?;
                Some((suffix.to_owned(), value.to_owned()))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolvedConfig {
    values: BTreeMap<String, ConfigValue>,
}

impl ConfigSource for ResolvedConfig {
    fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|v| v.value.as_str())
    }

    fn keys(&self) -> Vec<&str> {
        self.values.keys().map(String::as_str).collect()
    }
}

impl ResolvedConfig {
    pub fn defaults() -> Self {
        let mut cfg = Self::default();
        for (k, v) in DEFAULTS {
            cfg.values.insert(
                (*k).to_owned(),
                ConfigValue {
                    value: (*v).to_owned(),
                    provenance: Provenance::Default,
                },
            );
        }
        cfg
    }

    /// Defaults, then `file` when given, then matching entries of `env`.
    pub fn load<I>(file: Option<&Path>, env: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut cfg = Self::defaults();
        if let Some(path) = file {
            cfg.merge_file(path)?;
        }
        cfg.merge_env(env)?;
        Ok(cfg)
    }

    pub fn merge_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.merge_toml_str(&text, path)
    }

    pub fn merge_toml_str(&mut self, text: &str, origin: &Path) -> Result<(), ConfigError> {
        let table: toml::Table = toml::from_str(text).map_err(|e| ConfigError::Parse {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })?;
        let mut flat = BTreeMap::new();
        flatten("", &table, &mut flat).map_err(|key| ConfigError::Parse {
            path: origin.to_path_buf(),
            message: format!("'{key}' must be a string, integer, or boolean"),
        })?;
        for (key, value) in flat {
            self.set(key, value, Provenance::File(origin.to_path_buf()))?;
        }
        debug!("merged config file {}", origin.display());
        Ok(())
    }

    /// Merge `NAH_CONFIG_*` pairs; other variables are ignored.
    pub fn merge_env<I>(&mut self, env: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (var, value) in env {
            let Some(rest) = var.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let key = env_var_to_key(rest).ok_or_else(|| ConfigError::UnknownKey {
                key: rest.to_owned(),
                provenance: Provenance::Env(var.clone()),
            })?;
            self.set(key, value, Provenance::Env(var))?;
        }
        Ok(())
    }

    /// Set one value, rejecting keys nah does not recognise.
    pub fn set(
        &mut self,
        key: String,
        value: String,
        provenance: Provenance,
    ) -> Result<(), ConfigError> {
        if !is_known_key(&key) {
            return Err(ConfigError::UnknownKey { key, provenance });
        }
        self.values.insert(key, ConfigValue { value, provenance });
        Ok(())
    }

    pub fn entry(&self, key: &str) -> Option<&ConfigValue> {
        self.values.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConfigValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn get_u64(&self, key: &str) -> Result<Option<u64>, ConfigError> {
        self.get(key)
            .map(|v| {
                v.trim().parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                    key: key.to_owned(),
                    value: v.to_owned(),
                    expected: "an unsigned integer",
                })
            })
            .transpose()
    }

    pub fn get_bool(&self, key: &str) -> Result<Option<bool>, ConfigError> {
        self.get(key)
            .map(|v| match v.trim() {
                "true" | "1" | "yes" => Ok(true),
                "false" | "0" | "no" => Ok(false),
                _ => Err(ConfigError::InvalidValue {
                    key: key.to_owned(),
                    value: v.to_owned(),
                    expected: "a boolean",
                }),
            })
            .transpose()
    }

    pub fn get_path(&self, key: &str) -> Option<PathBuf> {
        self.get(key).map(PathBuf::from)
    }
}

fn is_known_key(key: &str) -> bool {
    if DEFAULTS.iter().any(|(k, _)| *k == key) {
        return true;
    }
    [VARS_PREFIX, ENV_OVERRIDE_PREFIX].iter().any(|prefix| {
        key.strip_prefix(prefix)
            .is_some_and(|name| !name.is_empty() && !name.contains('=') && !name.contains('\0'))
    })
}

fn env_var_to_key(rest: &str) -> Option<String> {
    let (section, name) = rest.split_once("__")?;
    if section.is_empty() || name.is_empty() {
        return None;
    }
    let section = section.to_ascii_lowercase();
    let name = match section.as_str() {
        "vars" | "env" => name.to_owned(),
        _ => name.to_ascii_lowercase(),
    };
    Some(format!("{section}.{name}"))
}

/// Flatten nested tables into dotted keys. Returns the offending key for
/// values that are not scalars.
fn flatten(
    prefix: &str,
    table: &toml::Table,
    out: &mut BTreeMap<String, String>,
) -> Result<(), String> {
    for (k, v) in table {
        let key = if prefix.is_empty() {
            k.clone()
        } else {
            format!("{prefix}.{k}")
        };
        match v {
            toml::Value::Table(inner) => flatten(&key, inner, out)?,
            toml::Value::String(s) => {
                out.insert(key, s.clone());
            }
            toml::Value::Integer(i) => {
                out.insert(key, i.to_string());
            }
            toml::Value::Boolean(b) => {
                out.insert(key, b.to_string());
            }
            _ => return Err(key),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn defaults_have_provenance() {
        let cfg = ResolvedConfig::defaults();
        assert_eq!(cfg.get(KEY_APPS_ROOT), Some("/nah/apps"));
        assert_eq!(cfg.entry(KEY_APPS_ROOT).unwrap().provenance, Provenance::Default);
        assert_eq!(cfg.get_u64(KEY_FETCH_MAX_ATTEMPTS).unwrap(), Some(3));
        assert_eq!(cfg.get_bool(KEY_FETCH_ALLOW_INSECURE_HTTP).unwrap(), Some(false));
    }

    #[test]
    fn file_then_env_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nah.toml");
        std::fs::write(
            &path,
            r#"
[paths]
apps_root = "/srv/apps"
cache_root = "/srv/cache"

[fetch]
timeout_secs = 10

[vars]
MODE = "release"
"#,
        )
        .unwrap();

        let cfg = ResolvedConfig::load(
            Some(&path),
            env(&[
                ("NAH_CONFIG_PATHS__CACHE_ROOT", "/tmp/cache"),
                ("NAH_CONFIG_ENV__RUST_LOG", "debug"),
                ("HOME", "/root"),
            ]),
        )
        .unwrap();

        assert_eq!(cfg.get(KEY_APPS_ROOT), Some("/srv/apps"));
        assert_eq!(
            cfg.entry(KEY_APPS_ROOT).unwrap().provenance,
            Provenance::File(path.clone())
        );
        assert_eq!(cfg.get(KEY_CACHE_ROOT), Some("/tmp/cache"));
        assert_eq!(
            cfg.entry(KEY_CACHE_ROOT).unwrap().provenance,
            Provenance::Env("NAH_CONFIG_PATHS__CACHE_ROOT".to_owned())
        );
        assert_eq!(cfg.get_u64(KEY_FETCH_TIMEOUT_SECS).unwrap(), Some(10));
        assert_eq!(cfg.get("vars.MODE"), Some("release"));
        assert_eq!(cfg.get("env.RUST_LOG"), Some("debug"));
    }

    #[test]
    fn unknown_file_key_rejected() {
        let mut cfg = ResolvedConfig::defaults();
        let err = cfg
            .merge_toml_str("[paths]\nhome = \"/x\"\n", Path::new("nah.toml"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownKey { ref key, .. } if key == "paths.home"));
    }

    #[test]
    fn unknown_env_key_rejected() {
        let err = ResolvedConfig::load(None, env(&[("NAH_CONFIG_BOGUS", "1")])).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownKey { .. }));
        let err =
            ResolvedConfig::load(None, env(&[("NAH_CONFIG_FETCH__RETRIES", "1")])).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownKey { ref key, .. } if key == "fetch.retries"));
    }

    #[test]
    fn non_scalar_values_rejected() {
        let mut cfg = ResolvedConfig::defaults();
        let err = cfg
            .merge_toml_str("[vars]\nLIST = [1, 2]\n", Path::new("nah.toml"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn typed_getters_report_bad_values() {
        let mut cfg = ResolvedConfig::defaults();
        cfg.set(
            KEY_FETCH_MAX_ATTEMPTS.to_owned(),
            "many".to_owned(),
            Provenance::Default,
        )
        .unwrap();
        assert!(matches!(
            cfg.get_u64(KEY_FETCH_MAX_ATTEMPTS).unwrap_err(),
            ConfigError::InvalidValue { .. }
        ));
    }

    #[test]
    fn with_prefix_strips_prefix() {
        let cfg = ResolvedConfig::load(
            None,
            env(&[("NAH_CONFIG_VARS__A", "1"), ("NAH_CONFIG_VARS__B", "2")]),
        )
        .unwrap();
        let vars = cfg.with_prefix(VARS_PREFIX);
        assert_eq!(vars.len(), 2);
        assert_eq!(vars["A"], "1");
        assert_eq!(vars["B"], "2");
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = ResolvedConfig::load(Some(Path::new("/nonexistent/nah.toml")), Vec::new())
            .unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}

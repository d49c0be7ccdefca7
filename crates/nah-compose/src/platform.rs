use std::collections::BTreeMap;
use std::sync::RwLock;

/// What the composer needs to know about the host it targets.
pub trait Platform {
    /// `linux`, `macos`, `windows`, ...
    fn os_family(&self) -> &str;
    /// `x86_64`, `aarch64`, ...
    fn arch(&self) -> &str;
    /// Appended to executables that have no extension (`.exe` on Windows).
    fn exec_suffix(&self) -> &str;
    /// Separator for search-path lists.
    fn path_separator(&self) -> char;
    /// Environment variable the dynamic loader searches.
    fn library_path_var(&self) -> &str;
    fn env_get(&self, key: &str) -> Option<String>;
    /// Record a value visible to later `env_get` calls. Never touches the
    /// real process environment.
    fn env_set(&self, key: &str, value: &str);
}

fn library_path_var_for(os: &str) -> &'static str {
    match os {
        "macos" => "DYLD_LIBRARY_PATH",
        "windows" => "PATH",
        _ => "LD_LIBRARY_PATH",
    }
}

/// The machine nah runs on.
#[derive(Debug, Default)]
pub struct HostPlatform {
    overrides: RwLock<BTreeMap<String, String>>,
}

impl HostPlatform {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Platform for HostPlatform {
    fn os_family(&self) -> &str {
        std::env::consts::OS
    }

    fn arch(&self) -> &str {
        std::env::consts::ARCH
    }

    fn exec_suffix(&self) -> &str {
        std::env::consts::EXE_SUFFIX
    }

    fn path_separator(&self) -> char {
        if cfg!(windows) {
            ';'
        } else {
            ':'
        }
    }

    fn library_path_var(&self) -> &str {
        library_path_var_for(std::env::consts::OS)
    }

    fn env_get(&self, key: &str) -> Option<String> {
        if let Ok(overrides) = self.overrides.read() {
            if let Some(v) = overrides.get(key) {
                return Some(v.clone());
            }
        }
        std::env::var(key).ok()
    }

    fn env_set(&self, key: &str, value: &str) {
        if let Ok(mut overrides) = self.overrides.write() {
            overrides.insert(key.to_owned(), value.to_owned());
        }
    }
}

/// A fixed platform description with its own environment. Used for
/// composing contracts for another host, and in tests.
#[derive(Debug)]
pub struct StaticPlatform {
    os: String,
    arch: String,
    exec_suffix: String,
    separator: char,
    env: RwLock<BTreeMap<String, String>>,
}

impl StaticPlatform {
    pub fn new(os: &str, arch: &str) -> Self {
        let windows = os == "windows";
        Self {
            os: os.to_owned(),
            arch: arch.to_owned(),
            exec_suffix: if windows { ".exe" } else { "" }.to_owned(),
            separator: if windows { ';' } else { ':' },
            env: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn linux_x86_64() -> Self {
        Self::new("linux", "x86_64")
    }

    #[must_use]
    pub fn with_env(self, key: &str, value: &str) -> Self {
        self.env_set(key, value);
        self
    }
}

impl Platform for StaticPlatform {
    fn os_family(&self) -> &str {
        &self.os
    }

    fn arch(&self) -> &str {
        &self.arch
    }

    fn exec_suffix(&self) -> &str {
        &self.exec_suffix
    }

    fn path_separator(&self) -> char {
        self.separator
    }

    fn library_path_var(&self) -> &str {
        library_path_var_for(&self.os)
    }

    fn env_get(&self, key: &str) -> Option<String> {
        self.env.read().ok().and_then(|env| env.get(key).cloned())
    }

    fn env_set(&self, key: &str, value: &str) {
        if let Ok(mut env) = self.env.write() {
            env.insert(key.to_owned(), value.to_owned());
        }
    }
}

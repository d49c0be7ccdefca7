//! Capability names an app may declare, and the registry of names a host
//! knows how to grant.
//!
//! A capability is `<key>` or `<key>:<selector>`, e.g. `filesystem.read` or
//! `network.connect:api.example.com:443`. Only the key is checked against the
//! registry; the selector is opaque to the host.

use std::collections::BTreeSet;

pub const BUILTIN_CAPABILITIES: &[&str] = &[
    "filesystem.read",
    "filesystem.write",
    "filesystem.execute",
    "network.connect",
    "network.listen",
    "network.bind",
];

/// Split a capability string into its key and optional selector.
pub fn split_capability(cap: &str) -> (&str, Option<&str>) {
    match cap.split_once(':') {
        Some((key, selector)) => (key, Some(selector)),
        None => (cap, None),
    }
}

/// Syntax check only: a non-empty dotted key of `[a-z0-9_]` segments.
pub fn is_well_formed(cap: &str) -> bool {
    let (key, selector) = split_capability(cap);
    if selector.is_some_and(str::is_empty) {
        return false;
    }
    !key.is_empty()
        && key.split('.').all(|seg| {
            !seg.is_empty()
                && seg
                    .bytes()
                    .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
        })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityRegistry {
    keys: BTreeSet<String>,
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self {
            keys: BUILTIN_CAPABILITIES.iter().map(|k| (*k).to_owned()).collect(),
        }
    }
}

impl CapabilityRegistry {
    pub fn empty() -> Self {
        Self {
            keys: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, key: &str) -> Self {
        self.keys.insert(key.to_owned());
        self
    }

    pub fn is_supported(&self, cap: &str) -> bool {
        let (key, _) = split_capability(cap);
        self.keys.contains(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }
}

//! Validated newtype wrappers for identifiers and content digests.
//!
//! All newtypes serialize as plain strings and re-validate on deserialization.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {kind} '{value}': {reason}")]
pub struct IdentifierError {
    pub kind: &'static str,
    pub value: String,
    pub reason: String,
}

macro_rules! validated_newtype {
    ($(#[$meta:meta])* $name:ident, $kind:literal, $check:path) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Validate and wrap a string.
            pub fn parse(s: impl Into<String>) -> Result<Self, IdentifierError> {
                let s = s.into();
                match $check(&s) {
                    Ok(()) => Ok(Self(s)),
                    Err(reason) => Err(IdentifierError {
                        kind: $kind,
                        value: s,
                        reason: reason.to_owned(),
                    }),
                }
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<std::path::Path> for $name {
            fn as_ref(&self) -> &std::path::Path {
                std::path::Path::new(&self.0)
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdentifierError;
            fn try_from(s: String) -> Result<Self, Self::Error> {
                Self::parse(s)
            }
        }

        impl TryFrom<&str> for $name {
            type Error = IdentifierError;
            fn try_from(s: &str) -> Result<Self, Self::Error> {
                Self::parse(s)
            }
        }

        impl From<$name> for String {
            fn from(v: $name) -> String {
                v.0
            }
        }
    };
}

const MAX_ID_LEN: usize = 128;

/// App and NAK identifiers double as directory names in the app and cache
/// roots, so they are restricted to a path-safe alphabet.
fn check_identifier(s: &str) -> Result<(), &'static str> {
    if s.is_empty() {
        return Err("must not be empty");
    }
    if s.len() > MAX_ID_LEN {
        return Err("longer than 128 characters");
    }
    if s == "." || s == ".." {
        return Err("reserved name");
    }
    if !s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err("only [A-Za-z0-9._-] allowed");
    }
    Ok(())
}

fn check_digest(s: &str) -> Result<(), &'static str> {
    if s.len() != 64 {
        return Err("expected 64 hex characters");
    }
    if !s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
        return Err("expected lowercase hex");
    }
    Ok(())
}

validated_newtype!(
    /// Application identifier, e.g. `com.example.app`.
    AppId,
    "app id",
    check_identifier
);

validated_newtype!(
    /// NAK (SDK/engine) identifier.
    NakId,
    "nak id",
    check_identifier
);

validated_newtype!(
    /// Blake3 digest rendered as 64 lowercase hex characters.
    Digest,
    "digest",
    check_digest
);

impl Digest {
    /// Hash `data` with blake3.
    pub fn of(data: &[u8]) -> Self {
        Self(blake3::hash(data).to_hex().to_string())
    }

    pub fn from_hash(hash: &blake3::Hash) -> Self {
        Self(hash.to_hex().to_string())
    }

    /// Twelve-character prefix used for display.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

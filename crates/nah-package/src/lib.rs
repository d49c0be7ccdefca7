//! Package archives for nah.
//!
//! A NAP (application package) or NAK (SDK/engine kit) archive is a small
//! fixed header, the manifest bytes, a gzip-compressed deterministic tar
//! payload, and a trailing blake3 digest over everything before it. See
//! [`codec`] for the byte layout.
//!
//! Decoding never trusts the payload: the digest is checked before the
//! payload is decompressed, and every entry path is validated so that
//! extraction cannot write outside its destination.

pub mod archive;
pub mod codec;
pub mod collect;

pub use archive::{canonicalize, PackageArchive, PackageFormat, PayloadEntry};
pub use codec::{decode, encode, FORMAT_VERSION, HEADER_LEN, MAGIC, TRAILER_LEN};
pub use collect::{collect_directory, pack_directory};

use thiserror::Error;

/// Upper bound on entries in one archive.
pub const MAX_ENTRIES: usize = 100_000;
/// Upper bound on the uncompressed payload size.
pub const MAX_PAYLOAD_BYTES: u64 = 4 * 1024 * 1024 * 1024;
/// Upper bound on manifest bytes.
pub const MAX_MANIFEST_BYTES: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum PackageError {
    #[error("archive truncated: {len} bytes is shorter than the {min}-byte minimum")]
    TruncatedHeader { len: usize, min: usize },
    #[error("not a nah package (bad magic)")]
    BadMagic,
    #[error("unsupported package format version {0}")]
    UnsupportedFormatVersion(u16),
    #[error("unknown package format tag {0}")]
    UnknownFormat(u8),
    #[error("package digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },
    #[error("package payload could not be decompressed: {0}")]
    DecompressionFailed(String),
    #[error("malformed package: {0}")]
    Malformed(String),
    #[error("unsafe entry path '{path}': {reason}")]
    UnsafePath { path: String, reason: &'static str },
    #[error("unsupported {kind} entry '{path}'")]
    UnsupportedEntry { path: String, kind: &'static str },
    #[error("duplicate entry '{0}'")]
    DuplicateEntry(String),
    #[error("package too large: {0}")]
    TooLarge(String),
    #[error("package I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_digest_mismatch() {
        let e = PackageError::DigestMismatch {
            expected: "aaa".to_owned(),
            actual: "bbb".to_owned(),
        };
        let msg = e.to_string();
        assert!(msg.contains("aaa"));
        assert!(msg.contains("bbb"));
    }

    #[test]
    fn error_display_unsafe_path() {
        let e = PackageError::UnsafePath {
            path: "../x".to_owned(),
            reason: "'..' path component",
        };
        assert!(e.to_string().contains("../x"));
    }

    #[test]
    fn error_display_truncated() {
        let e = PackageError::TruncatedHeader { len: 3, min: 56 };
        let msg = e.to_string();
        assert!(msg.contains('3'));
        assert!(msg.contains("56"));
    }
}

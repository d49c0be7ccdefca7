//! Archive byte layout, format version 1. Integers are little endian.
//!
//! ```text
//! offset  size  field
//!      0     8  magic  b"NAHPKG\0\n"
//!      8     2  format_version (1)
//!     10     1  format tag (1 = NAP, 2 = NAK)
//!     11     1  reserved, zero
//!     12     4  manifest_len
//!     16     8  payload_len
//!     24     -  manifest bytes
//!      -     -  payload: gzip of a tar stream (regular files only,
//!               mtime 0, uid/gid 0, entries in archive order)
//!      -    32  blake3 digest of every preceding byte
//! ```

use crate::archive::{check_entry_path, PackageArchive, PackageFormat, PayloadEntry};
use crate::{PackageError, MAX_ENTRIES, MAX_MANIFEST_BYTES, MAX_PAYLOAD_BYTES};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::HashSet;
use std::io::{Read, Write};
use tracing::debug;

pub const MAGIC: &[u8; 8] = b"NAHPKG\0\n";
pub const FORMAT_VERSION: u16 = 1;
pub const HEADER_LEN: usize = 24;
pub const TRAILER_LEN: usize = 32;

/// Serialize an archive. Entries are written in the order given; call
/// [`canonicalize`](crate::canonicalize) first for canonical archives.
pub fn encode(archive: &PackageArchive) -> Result<Vec<u8>, PackageError> {
    if archive.manifest_bytes.len() > MAX_MANIFEST_BYTES {
        return Err(PackageError::TooLarge(format!(
            "manifest is {} bytes",
            archive.manifest_bytes.len()
        )));
    }
    if archive.entries.len() > MAX_ENTRIES {
        return Err(PackageError::TooLarge(format!(
            "{} entries",
            archive.entries.len()
        )));
    }
    if archive.payload_size() > MAX_PAYLOAD_BYTES {
        return Err(PackageError::TooLarge(format!(
            "payload is {} bytes",
            archive.payload_size()
        )));
    }

    let mut seen = HashSet::new();
    for entry in &archive.entries {
        check_entry_path(&entry.path)?;
        if !seen.insert(entry.path.as_str()) {
            return Err(PackageError::DuplicateEntry(entry.path.clone()));
        }
    }

    let tar_bytes = build_tar(&archive.entries)?;
    let payload = compress(&tar_bytes)?;
    Ok(frame(archive.format.tag(), &archive.manifest_bytes, &payload))
}

/// Parse and verify an archive.
pub fn decode(bytes: &[u8]) -> Result<PackageArchive, PackageError> {
    let min = HEADER_LEN + TRAILER_LEN;
    if bytes.len() < min {
        return Err(PackageError::TruncatedHeader {
            len: bytes.len(),
            min,
        });
    }
    if &bytes[0..8] != MAGIC {
        return Err(PackageError::BadMagic);
    }
    let version = u16::from_le_bytes([bytes[8], bytes[9]]);
    if version != FORMAT_VERSION {
        return Err(PackageError::UnsupportedFormatVersion(version));
    }

    let (body, trailer) = bytes.split_at(bytes.len() - TRAILER_LEN);
    let actual = blake3::hash(body);
    if actual.as_bytes() != trailer {
        return Err(PackageError::DigestMismatch {
            expected: hex(trailer),
            actual: actual.to_hex().to_string(),
        });
    }

    let format = PackageFormat::from_tag(bytes[10])?;
    if bytes[11] != 0 {
        return Err(PackageError::Malformed("reserved header byte is not zero".into()));
    }
    let manifest_len = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]) as usize;
    let mut payload_len_bytes = [0u8; 8];
    payload_len_bytes.copy_from_slice(&bytes[16..24]);
    let payload_len = u64::from_le_bytes(payload_len_bytes);

    let expected_len = (HEADER_LEN as u64)
        .checked_add(manifest_len as u64)
        .and_then(|n| n.checked_add(payload_len))
        .and_then(|n| n.checked_add(TRAILER_LEN as u64));
    if expected_len != Some(bytes.len() as u64) {
        return Err(PackageError::Malformed(format!(
            "section lengths (manifest {manifest_len}, payload {payload_len}) do not match archive size {}",
            bytes.len()
        )));
    }
    if manifest_len > MAX_MANIFEST_BYTES {
        return Err(PackageError::TooLarge(format!(
            "manifest is {manifest_len} bytes"
        )));
    }

    let manifest_end = HEADER_LEN + manifest_len;
    let manifest_bytes = body[HEADER_LEN..manifest_end].to_vec();
    let payload = &body[manifest_end..];

    let entries = read_payload(payload)?;
    debug!(
        "decoded {format} archive: {} entries, manifest {} bytes",
        entries.len(),
        manifest_bytes.len()
    );
    Ok(PackageArchive {
        format,
        manifest_bytes,
        entries,
    })
}

pub(crate) fn frame(tag: u8, manifest: &[u8], payload: &[u8]) -> Vec<u8> {
    let mut out =
        Vec::with_capacity(HEADER_LEN + manifest.len() + payload.len() + TRAILER_LEN);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.push(tag);
    out.push(0);
    out.extend_from_slice(&(manifest.len() as u32).to_le_bytes());
    out.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    out.extend_from_slice(manifest);
    out.extend_from_slice(payload);
    let digest = blake3::hash(&out);
    out.extend_from_slice(digest.as_bytes());
    out
}

pub(crate) fn compress(data: &[u8]) -> Result<Vec<u8>, PackageError> {
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data)?;
    Ok(enc.finish()?)
}

fn build_tar(entries: &[PayloadEntry]) -> Result<Vec<u8>, PackageError> {
    let mut ar = tar::Builder::new(Vec::new());
    for entry in entries {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        header.set_mode(entry.mode & 0o7777);
        header.set_size(entry.data.len() as u64);
        header.set_cksum();
        ar.append_data(&mut header, &entry.path, entry.data.as_slice())?;
    }
    Ok(ar.into_inner()?)
}

fn read_payload(payload: &[u8]) -> Result<Vec<PayloadEntry>, PackageError> {
    let decompress_err = |e: std::io::Error| PackageError::DecompressionFailed(e.to_string());

    // One byte past the limit so an oversized payload is detectable.
    let decoder = GzDecoder::new(payload).take(MAX_PAYLOAD_BYTES + 1);
    let mut ar = tar::Archive::new(decoder);
    let mut entries = Vec::new();
    let mut seen = HashSet::new();
    let mut total: u64 = 0;

    for item in ar.entries().map_err(decompress_err)? {
        let mut item = item.map_err(decompress_err)?;
        let raw_path = String::from_utf8(item.path_bytes().into_owned()).map_err(|_| {
            PackageError::UnsafePath {
                path: String::from_utf8_lossy(&item.path_bytes()).into_owned(),
                reason: "path is not UTF-8",
            }
        })?;

        let kind = item.header().entry_type();
        if kind.is_dir() {
            check_entry_path(raw_path.trim_end_matches('/'))?;
            continue;
        }
        if !kind.is_file() {
            return Err(PackageError::UnsupportedEntry {
                path: raw_path,
                kind: entry_kind_name(kind),
            });
        }
        check_entry_path(&raw_path)?;
        if !seen.insert(raw_path.clone()) {
            return Err(PackageError::DuplicateEntry(raw_path));
        }
        if entries.len() >= MAX_ENTRIES {
            return Err(PackageError::TooLarge(format!("more than {MAX_ENTRIES} entries")));
        }

        let size = item.header().size().map_err(decompress_err)?;
        total = total.saturating_add(size);
        if total > MAX_PAYLOAD_BYTES {
            return Err(PackageError::TooLarge(format!(
                "payload exceeds {MAX_PAYLOAD_BYTES} bytes"
            )));
        }
        let mode = item.header().mode().map_err(decompress_err)?;
        let mut data = Vec::new();
        item.read_to_end(&mut data).map_err(decompress_err)?;

        entries.push(PayloadEntry::new(raw_path, mode, data));
    }
    Ok(entries)
}

fn entry_kind_name(kind: tar::EntryType) -> &'static str {
    if kind.is_symlink() {
        "symlink"
    } else if kind.is_hard_link() {
        "hardlink"
    } else if kind.is_character_special() || kind.is_block_special() {
        "device"
    } else if kind.is_fifo() {
        "fifo"
    } else {
        "special"
    }
}

fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}

//! Filesystem utilities.
//!
//! Crash-tolerant writes for disk cache units and stored configs, and a
//! reversible encoding that turns arbitrary key segments into safe
//! directory names.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::core::{CoreError, CoreResult};

/// Encoded segments longer than this are replaced by a digest
pub const MAX_SEGMENT_LEN: usize = 96;

/// Prefix marking a digest-shortened segment
pub const HASHED_SEGMENT_PREFIX: char = '#';

// =============================================================================
// Path Segment Encoding
// =============================================================================

/// Validates that a name is usable as a single path component.
///
/// Rejects empty names, traversal sequences, separators, drive markers and
/// control characters.
pub fn validate_path_component(name: &str, label: &str) -> Result<(), String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(format!("{label} is empty or contains only whitespace"));
    }
    if trimmed == "."
        || trimmed.contains("..")
        || trimmed.contains('/')
        || trimmed.contains('\\')
        || trimmed.contains(':')
    {
        return Err(format!("Invalid {label}: contains path traversal characters"));
    }
    if trimmed.chars().any(|c| c.is_control()) {
        return Err(format!("Invalid {label}: contains control characters"));
    }
    Ok(())
}

/// Encodes a key segment into a directory name.
///
/// Bytes outside `[A-Za-z0-9_-]` become `%XX`; the empty segment becomes `%`.
/// Results longer than [`MAX_SEGMENT_LEN`] are replaced by `#<sha256>`, so
/// distinct inputs never share an encoding and the output is always a
/// valid component.
pub fn encode_path_segment(segment: &str) -> String {
    if segment.is_empty() {
        return "%".to_string();
    }

    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }

    if out.len() > MAX_SEGMENT_LEN {
        let digest = Sha256::digest(segment.as_bytes());
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        return format!("{HASHED_SEGMENT_PREFIX}{hex}");
    }
    out
}

/// Reverses [`encode_path_segment`]. Digest-shortened segments return `None`.
pub fn decode_path_segment(encoded: &str) -> Option<String> {
    if encoded == "%" {
        return Some(String::new());
    }
    if encoded.starts_with(HASHED_SEGMENT_PREFIX) {
        return None;
    }

    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = encoded.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

// =============================================================================
// Atomic Writes
// =============================================================================

/// Write bytes to `path` using an atomic replace pattern.
///
/// Writes a uniquely named sibling temp file, syncs it, then renames it
/// over the destination. Readers observe either the old or the new content.
pub fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> CoreResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = tmp_path_for(path);
    let written = (|| -> CoreResult<()> {
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(bytes)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    })();

    if let Err(e) = written {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(e);
    }

    atomic_replace(path, &tmp_path)
}

/// Write a JSON file atomically with pretty formatting.
pub fn atomic_write_json_pretty<T: serde::Serialize>(path: &Path, value: &T) -> CoreResult<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    atomic_write_bytes(path, &bytes)
}

/// Write a compact JSON file atomically.
pub fn atomic_write_json<T: serde::Serialize>(path: &Path, value: &T) -> CoreResult<()> {
    let bytes = serde_json::to_vec(value)?;
    atomic_write_bytes(path, &bytes)
}

/// Whether a file name belongs to an in-flight atomic write
pub fn is_temp_file_name(name: &str) -> bool {
    name.ends_with(".tmp") || name.ends_with(".bak")
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.to_path_buf();
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "tmp".to_string());
    // Unique per writer so concurrent writes of one unit never share a temp file.
    tmp.set_file_name(format!("{file_name}.{}.tmp", ulid::Ulid::new()));
    tmp
}

#[cfg(windows)]
fn bak_path_for(path: &Path) -> PathBuf {
    let mut bak = path.to_path_buf();
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "bak".to_string());
    bak.set_file_name(format!("{file_name}.{}.bak", ulid::Ulid::new()));
    bak
}

#[cfg(not(windows))]
fn atomic_replace(dest: &Path, src_tmp: &Path) -> CoreResult<()> {
    // POSIX rename replaces an existing destination atomically.
    std::fs::rename(src_tmp, dest).map_err(|e| {
        let _ = std::fs::remove_file(src_tmp);
        CoreError::IoError(e)
    })
}

#[cfg(windows)]
fn atomic_replace(dest: &Path, src_tmp: &Path) -> CoreResult<()> {
    if !dest.exists() {
        std::fs::rename(src_tmp, dest)?;
        return Ok(());
    }

    // Rename-over-existing may fail on Windows; swap through a backup.
    let bak = bak_path_for(dest);
    std::fs::rename(dest, &bak)?;
    match std::fs::rename(src_tmp, dest) {
        Ok(()) => {
            let _ = std::fs::remove_file(&bak);
            Ok(())
        }
        Err(e) => {
            let _ = std::fs::rename(&bak, dest);
            let _ = std::fs::remove_file(src_tmp);
            Err(CoreError::IoError(e))
        }
    }
}

//! On-disk snapshot file format.
//!
//! A snapshot file is a 4-byte little-endian header length, a bincode-encoded
//! [`SnapshotHeader`], then the bincode-encoded [`CacheSnapshot`] payload.
//! The header carries magic bytes, the format version, the tool version and
//! a checksum of the payload, so a truncated or foreign file is detected
//! before the payload is decoded.

use std::path::Path;

use kiln_common::ContentHash;
use serde::{Deserialize, Serialize};

use crate::error::CacheError;
use crate::snapshot::CacheSnapshot;

/// Magic bytes identifying a Kiln snapshot file.
const SNAPSHOT_MAGIC: [u8; 4] = *b"KILN";

/// Current snapshot format version. Increment on breaking changes to
/// the header or payload format.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 2;

/// Header prepended to every snapshot file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotHeader {
    /// Magic bytes: must be `b"KILN"`.
    pub magic: [u8; 4],
    /// Snapshot format version.
    pub format_version: u32,
    /// Kiln version that wrote the file.
    pub tool_version: String,
    /// Content hash of the payload bytes.
    pub checksum: ContentHash,
}

/// Encodes a snapshot with its header.
pub fn encode_snapshot(snapshot: &CacheSnapshot, tool_version: &str) -> Result<Vec<u8>, CacheError> {
    let payload = bincode::serde::encode_to_vec(snapshot, bincode::config::standard())
        .map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })?;

    let header = SnapshotHeader {
        magic: SNAPSHOT_MAGIC,
        format_version: SNAPSHOT_FORMAT_VERSION,
        tool_version: tool_version.to_string(),
        checksum: ContentHash::from_bytes(&payload),
    };
    let header_bytes = bincode::serde::encode_to_vec(&header, bincode::config::standard())
        .map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })?;

    let header_len = header_bytes.len() as u32;
    let mut output = Vec::with_capacity(4 + header_bytes.len() + payload.len());
    output.extend_from_slice(&header_len.to_le_bytes());
    output.extend_from_slice(&header_bytes);
    output.extend_from_slice(&payload);
    Ok(output)
}

/// Decodes and validates a snapshot file read from `path`.
///
/// `path` is only used in error messages.
pub fn decode_snapshot(path: &Path, raw: &[u8], tool_version: &str) -> Result<CacheSnapshot, CacheError> {
    let invalid = |reason: &str| CacheError::InvalidHeader {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    let len_bytes: [u8; 4] = raw
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| invalid("file shorter than header length"))?;
    let header_len = u32::from_le_bytes(len_bytes) as usize;
    let header_bytes = raw
        .get(4..4 + header_len)
        .ok_or_else(|| invalid("truncated header"))?;

    let (header, _): (SnapshotHeader, usize) =
        bincode::serde::decode_from_slice(header_bytes, bincode::config::standard())
            .map_err(|e| invalid(&e.to_string()))?;

    if header.magic != SNAPSHOT_MAGIC {
        return Err(invalid("bad magic bytes"));
    }
    if header.format_version != SNAPSHOT_FORMAT_VERSION {
        return Err(CacheError::VersionMismatch {
            path: path.to_path_buf(),
            expected: SNAPSHOT_FORMAT_VERSION,
            actual: header.format_version,
        });
    }
    if header.tool_version != tool_version {
        return Err(CacheError::ToolMismatch {
            path: path.to_path_buf(),
            expected: tool_version.to_string(),
            actual: header.tool_version,
        });
    }

    let payload = &raw[4 + header_len..];
    let actual = ContentHash::from_bytes(payload);
    if actual != header.checksum {
        return Err(CacheError::ChecksumMismatch {
            path: path.to_path_buf(),
            expected: header.checksum.to_string(),
            actual: actual.to_string(),
        });
    }

    let (snapshot, _): (CacheSnapshot, usize) =
        bincode::serde::decode_from_slice(payload, bincode::config::standard()).map_err(|e| {
            CacheError::Serialization {
                reason: e.to_string(),
            }
        })?;
    Ok(snapshot)
}

//! Error types for cache operations.

use std::path::PathBuf;

/// What can go wrong reading or writing the build cache.
///
/// Reads are fail-safe: [`CacheStore::load`](crate::CacheStore::load) turns
/// every one of these into a cache miss. Writes, invalidation and garbage
/// collection report them to the caller.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// A cache file or directory could not be accessed.
    #[error("cache I/O error at {path}: {source}")]
    Io {
        /// File or directory being accessed.
        path: PathBuf,
        /// Cause.
        source: std::io::Error,
    },

    /// The header length or header bytes of a snapshot are unusable.
    #[error("invalid snapshot header in {path}: {reason}")]
    InvalidHeader {
        /// Snapshot file.
        path: PathBuf,
        /// What is wrong with the header.
        reason: String,
    },

    /// The payload was modified or truncated after it was written.
    #[error("checksum mismatch in {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Snapshot file.
        path: PathBuf,
        /// Checksum recorded in the header.
        expected: String,
        /// Checksum of the payload as read.
        actual: String,
    },

    /// The snapshot uses another on-disk layout.
    #[error("version mismatch in {path}: expected {expected}, got {actual}")]
    VersionMismatch {
        /// Snapshot file.
        path: PathBuf,
        /// Layout this build reads.
        expected: u32,
        /// Layout recorded in the file.
        actual: u32,
    },

    /// The snapshot was written by a different tool version.
    #[error("{path} was written by kiln {actual}, this is kiln {expected}")]
    ToolMismatch {
        /// Snapshot file.
        path: PathBuf,
        /// Version of the running tool.
        expected: String,
        /// Version recorded in the snapshot.
        actual: String,
    },

    /// A snapshot or the index could not be encoded or decoded.
    #[error("serialization error: {reason}")]
    Serialization {
        /// Encoder or decoder message.
        reason: String,
    },
}

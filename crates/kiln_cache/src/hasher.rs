//! Content hashing of source and output files.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use kiln_common::ContentHash;

use crate::error::CacheError;

/// Digests of a set of files.
#[derive(Debug, Clone, Default)]
pub struct HashedFiles {
    /// Digest of every file that could be read.
    pub digests: BTreeMap<PathBuf, ContentHash>,
    /// Files that could not be read, sorted.
    pub unreadable: Vec<PathBuf>,
}

/// Computes the content hash of a single file.
pub fn hash_file(path: &Path) -> Result<ContentHash, CacheError> {
    ContentHash::from_file(path).map_err(|e| CacheError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Computes content hashes for multiple files.
///
/// Files that cannot be read are collected in [`HashedFiles::unreadable`]
/// instead of failing the whole batch.
pub fn hash_files<'a>(paths: impl IntoIterator<Item = &'a PathBuf>) -> HashedFiles {
    let mut hashed = HashedFiles::default();
    for path in paths {
        match hash_file(path) {
            Ok(hash) => {
                hashed.digests.insert(path.clone(), hash);
            }
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "file not hashable");
                hashed.unreadable.push(path.clone());
            }
        }
    }
    hashed.unreadable.sort();
    hashed.unreadable.dedup();
    hashed
}

//! The cache index listing every stored target snapshot.
//!
//! The index is stored as `index.json` in the cache directory. It maps each
//! snapshot's storage key to the target it belongs to, so stale snapshot
//! files can be garbage collected and tooling can list cached targets without
//! decoding every snapshot.

use std::collections::BTreeMap;
use std::path::Path;

use kiln_common::TargetId;
use serde::{Deserialize, Serialize};

use crate::error::CacheError;
use crate::store::write_atomic;

/// Name of the index file within the cache directory.
pub const INDEX_FILE: &str = "index.json";

/// Top-level cache index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheIndex {
    /// Kiln version that produced this cache. Invalidate on version change.
    pub tool_version: String,
    /// Stored snapshots, keyed by [`TargetId::storage_key`].
    pub entries: BTreeMap<String, IndexEntry>,
}

/// Summary of one stored snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// The target owning the snapshot.
    pub target: TargetId,
    /// Number of source files recorded.
    pub sources: usize,
    /// Number of output files recorded.
    pub outputs: usize,
}

impl CacheIndex {
    /// Creates a new, empty index for the given Kiln version.
    pub fn new(tool_version: &str) -> Self {
        Self {
            tool_version: tool_version.to_string(),
            entries: BTreeMap::new(),
        }
    }

    /// Loads the index from the cache directory, returning `None` if the file
    /// doesn't exist or can't be parsed.
    pub fn load(cache_dir: &Path) -> Option<Self> {
        let path = cache_dir.join(INDEX_FILE);
        let content = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&content) {
            Ok(index) => Some(index),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable cache index");
                None
            }
        }
    }

    /// Saves the index to the cache directory through a temporary file.
    pub fn save(&self, cache_dir: &Path) -> Result<(), CacheError> {
        let json = serde_json::to_string_pretty(self).map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })?;
        write_atomic(&cache_dir.join(INDEX_FILE), json.as_bytes())
    }

    /// Returns `true` if this index was produced by a compatible Kiln version.
    pub fn is_compatible(&self, current_version: &str) -> bool {
        self.tool_version == current_version
    }

    /// Targets with a stored snapshot, sorted.
    pub fn targets(&self) -> Vec<&TargetId> {
        let mut targets: Vec<_> = self.entries.values().map(|e| &e.target).collect();
        targets.sort();
        targets
    }
}

//! The cached state of one build target.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use kiln_common::ContentHash;
use serde::{Deserialize, Serialize};

/// State of a target after its last successful compile.
///
/// An empty snapshot means the target has never been built (or its cache was
/// lost), which makes every source file dirty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSnapshot {
    /// Digest of every source file at the time it was last compiled.
    pub sources: BTreeMap<PathBuf, ContentHash>,
    /// Digest of every output file the target owns.
    pub outputs: BTreeMap<PathBuf, ContentHash>,
    /// Outputs produced by each source file.
    pub associations: BTreeMap<PathBuf, Vec<PathBuf>>,
    /// Fingerprint of the upstream outputs the target was last compiled
    /// against. A different current fingerprint makes every file dirty.
    pub upstream: Option<ContentHash>,
}

impl CacheSnapshot {
    /// Creates an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
            && self.outputs.is_empty()
            && self.associations.is_empty()
            && self.upstream.is_none()
    }

    /// The recorded digest of a source file.
    pub fn source_digest(&self, path: &Path) -> Option<&ContentHash> {
        self.sources.get(path)
    }

    /// The outputs recorded for a source file, empty if none.
    pub fn outputs_of(&self, source: &Path) -> &[PathBuf] {
        self.associations
            .get(source)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Records that `output` was produced from `source`.
    pub fn associate(&mut self, source: PathBuf, output: PathBuf) {
        let outputs = self.associations.entry(source).or_default();
        if !outputs.contains(&output) {
            outputs.push(output);
            outputs.sort();
        }
    }

    /// Removes a source file together with its associations.
    ///
    /// Returns the outputs that were associated with it. Output digests are
    /// kept; callers decide whether the files themselves are stale.
    pub fn forget_source(&mut self, source: &Path) -> Vec<PathBuf> {
        self.sources.remove(source);
        self.associations.remove(source).unwrap_or_default()
    }

    /// Outputs still referenced by at least one source association.
    pub fn referenced_outputs(&self) -> BTreeSet<&Path> {
        self.associations
            .values()
            .flatten()
            .map(PathBuf::as_path)
            .collect()
    }
}

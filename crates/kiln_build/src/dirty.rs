//! Dirty-file tracking.
//!
//! Classification compares the current content digests of a target's source
//! files against the target's cached snapshot. It reads files but never
//! writes anything, so the same snapshot and file system state always give
//! the same answer.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use kiln_cache::{hash_files, CacheSnapshot};
use kiln_common::{ContentHash, TargetId};
use kiln_config::ResolvedKind;
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

/// Why a source file has to be recompiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirtyReason {
    /// Content differs from the cached digest.
    Modified,
    /// Not in the cache, while the cache has other files.
    Added,
    /// The target has no cached state at all.
    NoPriorBuild,
    /// Unchanged, but something the target depends on was recompiled.
    UpstreamRebuilt,
}

impl fmt::Display for DirtyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DirtyReason::Modified => "modified",
            DirtyReason::Added => "added",
            DirtyReason::NoPriorBuild => "no prior build",
            DirtyReason::UpstreamRebuilt => "upstream rebuilt",
        };
        f.write_str(s)
    }
}

/// A source file that must be recompiled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirtyFile {
    /// The file.
    pub path: PathBuf,
    /// Why it is dirty.
    pub reason: DirtyReason,
}

/// Classification of one chunk member's source files.
#[derive(Debug, Clone)]
pub struct MemberFiles {
    /// The member.
    pub target: TargetId,
    /// Files to recompile, sorted by path.
    pub dirty: Vec<DirtyFile>,
    /// Files in the snapshot that are gone or unreadable, sorted.
    pub removed: Vec<PathBuf>,
    /// Files that need no recompilation, sorted.
    pub clean: Vec<PathBuf>,
    /// Current digest of every readable source file.
    pub digests: BTreeMap<PathBuf, ContentHash>,
}

impl MemberFiles {
    /// Returns `true` if nothing is dirty or removed.
    pub fn is_clean(&self) -> bool {
        self.dirty.is_empty() && self.removed.is_empty()
    }

    /// Paths of the dirty files.
    pub fn dirty_paths(&self) -> Vec<PathBuf> {
        self.dirty.iter().map(|d| d.path.clone()).collect()
    }

    /// Every current source file, sorted.
    pub fn all_files(&self) -> Vec<PathBuf> {
        self.digests.keys().cloned().collect()
    }
}

/// The dirty state of every member of a chunk for one pass.
#[derive(Debug, Clone, Default)]
pub struct DirtyFilesHolder {
    members: Vec<MemberFiles>,
}

impl DirtyFilesHolder {
    /// Wraps per-member classifications.
    pub fn new(members: Vec<MemberFiles>) -> Self {
        Self { members }
    }

    /// Per-member classifications.
    pub fn members(&self) -> &[MemberFiles] {
        &self.members
    }

    /// The classification of `id`.
    pub fn member(&self, id: &TargetId) -> Option<&MemberFiles> {
        self.members.iter().find(|m| &m.target == id)
    }

    /// Returns `true` if no member has dirty or removed files.
    pub fn is_clean(&self) -> bool {
        self.members.iter().all(MemberFiles::is_clean)
    }

    /// Total number of dirty files.
    pub fn dirty_count(&self) -> usize {
        self.members.iter().map(|m| m.dirty.len()).sum()
    }

    /// Total number of removed files.
    pub fn removed_count(&self) -> usize {
        self.members.iter().map(|m| m.removed.len()).sum()
    }
}

/// Classifies the current source `files` of `target` against its snapshot.
///
/// With `upstream_rebuilt` every otherwise clean file becomes dirty. Snapshot
/// files that are no longer among `files`, or can no longer be read, are
/// reported as removed. Unreadable files that were never compiled are left
/// out entirely.
pub fn classify(
    target: &TargetId,
    files: &[PathBuf],
    snapshot: &CacheSnapshot,
    upstream_rebuilt: bool,
) -> MemberFiles {
    let hashed = hash_files(files);
    let first_build = snapshot.sources.is_empty();

    let mut dirty = Vec::new();
    let mut clean = Vec::new();
    for (path, digest) in &hashed.digests {
        let reason = match snapshot.source_digest(path) {
            _ if first_build => Some(DirtyReason::NoPriorBuild),
            None => Some(DirtyReason::Added),
            Some(cached) if cached != digest => Some(DirtyReason::Modified),
            Some(_) if upstream_rebuilt => Some(DirtyReason::UpstreamRebuilt),
            Some(_) => None,
        };
        match reason {
            Some(reason) => dirty.push(DirtyFile {
                path: path.clone(),
                reason,
            }),
            None => clean.push(path.clone()),
        }
    }

    let removed: Vec<PathBuf> = snapshot
        .sources
        .keys()
        .filter(|p| !hashed.digests.contains_key(*p))
        .cloned()
        .collect();

    for path in &hashed.unreadable {
        if snapshot.source_digest(path).is_none() {
            debug!(target_id = %target, path = %path.display(), "skipping unreadable new file");
        }
    }

    debug!(
        target_id = %target,
        dirty = dirty.len(),
        removed = removed.len(),
        clean = clean.len(),
        "classified sources"
    );

    MemberFiles {
        target: target.clone(),
        dirty,
        removed,
        clean,
        digests: hashed.digests,
    }
}

/// Lists the source files under `roots` that `policy` accepts.
///
/// Directories are walked recursively, skipping hidden entries. A root that
/// is a file is taken as is. Missing roots contribute nothing. The result is
/// sorted and free of duplicates.
pub fn discover_sources(roots: &[PathBuf], policy: &ResolvedKind) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for root in roots {
        if root.is_file() {
            if policy.accepts(root) {
                files.push(root.clone());
            }
            continue;
        }
        if !root.exists() {
            debug!(root = %root.display(), "source root does not exist");
            continue;
        }
        let walker = WalkDir::new(root)
            .follow_links(true)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e));
        for entry in walker.filter_map(|e| e.ok()) {
            if entry.file_type().is_file() && policy.accepts(entry.path()) {
                files.push(entry.into_path());
            }
        }
    }
    files.sort();
    files.dedup();
    files
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .is_some_and(|name| name.starts_with('.'))
}

/// Returns `true` if `path` lies inside `dir`.
pub(crate) fn is_within(path: &Path, dir: &Path) -> bool {
    path.starts_with(dir)
}

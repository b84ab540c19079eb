//! The cache store: per-target snapshot persistence.
//!
//! Snapshots live at `<cache_dir>/targets/<storage key>.snap`, next to the
//! shared `index.json`. Every write goes to a temporary file first and is
//! renamed into place, so a crash never leaves a half-written snapshot
//! behind. Writes of one target are serialized by a per-target lock and the
//! index is rewritten under its own lock.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use kiln_common::TargetId;
use tracing::{debug, warn};

use crate::error::CacheError;
use crate::format::{decode_snapshot, encode_snapshot};
use crate::index::{CacheIndex, IndexEntry};
use crate::snapshot::CacheSnapshot;

/// Subdirectory holding the snapshot files.
const TARGETS_SUBDIR: &str = "targets";

/// File extension of snapshot files.
const SNAPSHOT_EXT: &str = "snap";

/// Persistent storage of target snapshots.
///
/// All reads are fail-safe: a missing, corrupt or incompatible snapshot
/// loads as an empty one, which makes the target rebuild from scratch.
pub struct CacheStore {
    cache_dir: PathBuf,
    tool_version: String,
    index_lock: Mutex<()>,
    target_locks: Mutex<HashMap<TargetId, Arc<Mutex<()>>>>,
}

impl CacheStore {
    /// Opens the store rooted at `cache_dir`. Nothing is created on disk
    /// until the first write.
    pub fn open(cache_dir: &Path, tool_version: &str) -> Self {
        Self {
            cache_dir: cache_dir.to_path_buf(),
            tool_version: tool_version.to_string(),
            index_lock: Mutex::new(()),
            target_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Root directory of the cache.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// The file holding the snapshot of `id`.
    pub fn snapshot_path(&self, id: &TargetId) -> PathBuf {
        self.cache_dir
            .join(TARGETS_SUBDIR)
            .join(format!("{}.{SNAPSHOT_EXT}", id.storage_key()))
    }

    /// Loads the snapshot of `id`, or an empty snapshot when there is no
    /// usable one.
    pub fn load(&self, id: &TargetId) -> CacheSnapshot {
        let lock = self.target_lock(id);
        let _guard = lock_ignoring_poison(&lock);

        let path = self.snapshot_path(id);
        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(target_id = %id, "no cached snapshot");
                return CacheSnapshot::new();
            }
            Err(e) => {
                warn!(target_id = %id, path = %path.display(), error = %e, "cannot read snapshot, rebuilding");
                return CacheSnapshot::new();
            }
        };

        match decode_snapshot(&path, &raw, &self.tool_version) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(target_id = %id, error = %e, "discarding cached snapshot");
                CacheSnapshot::new()
            }
        }
    }

    /// Replaces the snapshot of `id` and records it in the index.
    pub fn update(&self, id: &TargetId, snapshot: &CacheSnapshot) -> Result<(), CacheError> {
        let bytes = encode_snapshot(snapshot, &self.tool_version)?;
        {
            let lock = self.target_lock(id);
            let _guard = lock_ignoring_poison(&lock);
            write_atomic(&self.snapshot_path(id), &bytes)?;
        }

        self.edit_index(|index| {
            index.entries.insert(
                id.storage_key(),
                IndexEntry {
                    target: id.clone(),
                    sources: snapshot.sources.len(),
                    outputs: snapshot.outputs.len(),
                },
            );
        })?;
        debug!(
            target_id = %id,
            sources = snapshot.sources.len(),
            outputs = snapshot.outputs.len(),
            "snapshot written"
        );
        Ok(())
    }

    /// Removes the snapshot of `id`. Returns `true` if one existed.
    pub fn invalidate(&self, id: &TargetId) -> Result<bool, CacheError> {
        let existed = {
            let lock = self.target_lock(id);
            let _guard = lock_ignoring_poison(&lock);
            remove_if_exists(&self.snapshot_path(id))?
        };
        self.edit_index(|index| {
            index.entries.remove(&id.storage_key());
        })?;
        Ok(existed)
    }

    /// Removes every snapshot and clears the index. Returns the number of
    /// snapshot files removed.
    pub fn invalidate_all(&self) -> Result<usize, CacheError> {
        let _guard = lock_ignoring_poison(&self.index_lock);
        let mut removed = 0;
        for path in self.snapshot_files()? {
            if remove_if_exists(&path)? {
                removed += 1;
            }
        }
        CacheIndex::new(&self.tool_version).save(&self.cache_dir)?;
        Ok(removed)
    }

    /// Removes snapshot files that the index does not list, along with
    /// leftover temporary files. Returns the number of files removed.
    pub fn gc(&self) -> Result<usize, CacheError> {
        let _guard = lock_ignoring_poison(&self.index_lock);
        let index = self.read_index();
        let dir = self.cache_dir.join(TARGETS_SUBDIR);
        if !dir.exists() {
            return Ok(0);
        }

        let entries = std::fs::read_dir(&dir).map_err(|e| CacheError::Io {
            path: dir.clone(),
            source: e,
        })?;

        let mut removed = 0;
        for entry in entries {
            let entry = entry.map_err(|e| CacheError::Io {
                path: dir.clone(),
                source: e,
            })?;
            let path = entry.path();
            let live = match path.extension().and_then(|e| e.to_str()) {
                Some(SNAPSHOT_EXT) => path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .is_some_and(|stem| index.entries.contains_key(stem)),
                Some("tmp") => false,
                _ => true,
            };
            if !live && remove_if_exists(&path)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// The current index. An unreadable or incompatible index reads as empty.
    pub fn index(&self) -> CacheIndex {
        let _guard = lock_ignoring_poison(&self.index_lock);
        self.read_index()
    }

    fn read_index(&self) -> CacheIndex {
        CacheIndex::load(&self.cache_dir)
            .filter(|index| index.is_compatible(&self.tool_version))
            .unwrap_or_else(|| CacheIndex::new(&self.tool_version))
    }

    fn edit_index(&self, edit: impl FnOnce(&mut CacheIndex)) -> Result<(), CacheError> {
        let _guard = lock_ignoring_poison(&self.index_lock);
        let mut index = self.read_index();
        edit(&mut index);
        index.save(&self.cache_dir)
    }

    fn snapshot_files(&self) -> Result<Vec<PathBuf>, CacheError> {
        let dir = self.cache_dir.join(TARGETS_SUBDIR);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let entries = std::fs::read_dir(&dir).map_err(|e| CacheError::Io {
            path: dir.clone(),
            source: e,
        })?;
        let mut files = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| CacheError::Io {
                    path: dir.clone(),
                    source: e,
                })?
                .path();
            if path.extension().and_then(|e| e.to_str()) == Some(SNAPSHOT_EXT) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    fn target_lock(&self, id: &TargetId) -> Arc<Mutex<()>> {
        let mut locks = lock_ignoring_poison(&self.target_locks);
        Arc::clone(locks.entry(id.clone()).or_default())
    }
}

fn lock_ignoring_poison<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Writes `bytes` to a sibling temporary file and renames it over `path`.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| CacheError::Io {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    std::fs::write(&tmp, bytes).map_err(|e| CacheError::Io {
        path: tmp.clone(),
        source: e,
    })?;
    std::fs::rename(&tmp, path).map_err(|e| CacheError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

fn remove_if_exists(path: &Path) -> Result<bool, CacheError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(CacheError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_common::ContentHash;

    fn make_store() -> (tempfile::TempDir, CacheStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path(), "0.1.0");
        (dir, store)
    }

    fn sample() -> CacheSnapshot {
        let mut snap = CacheSnapshot::new();
        snap.sources
            .insert(PathBuf::from("core/src/A.kt"), ContentHash::from_bytes(b"A"));
        snap.outputs
            .insert(PathBuf::from("out/A.class"), ContentHash::from_bytes(b"cafe"));
        snap.associate(PathBuf::from("core/src/A.kt"), PathBuf::from("out/A.class"));
        snap
    }

    #[test]
    fn load_missing_is_empty() {
        let (_dir, store) = make_store();
        assert!(store.load(&TargetId::production("core")).is_empty());
    }

    #[test]
    fn update_then_load() {
        let (_dir, store) = make_store();
        let id = TargetId::production("core");
        store.update(&id, &sample()).unwrap();

        assert_eq!(store.load(&id), sample());
        assert!(store.load(&id.with_role(true)).is_empty());

        let index = store.index();
        assert_eq!(index.entries[&id.storage_key()].sources, 1);
        assert_eq!(index.entries[&id.storage_key()].outputs, 1);
    }

    #[test]
    fn update_leaves_no_temp_file() {
        let (_dir, store) = make_store();
        let id = TargetId::production("core");
        store.update(&id, &sample()).unwrap();
        let names: Vec<_> = std::fs::read_dir(store.cache_dir().join(TARGETS_SUBDIR))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![format!("{}.snap", id.storage_key())]);
    }

    #[test]
    fn corrupt_snapshot_loads_empty() {
        let (_dir, store) = make_store();
        let id = TargetId::production("core");
        store.update(&id, &sample()).unwrap();
        std::fs::write(store.snapshot_path(&id), b"garbage").unwrap();
        assert!(store.load(&id).is_empty());
    }

    #[test]
    fn other_tool_version_loads_empty() {
        let (dir, store) = make_store();
        let id = TargetId::production("core");
        store.update(&id, &sample()).unwrap();

        let newer = CacheStore::open(dir.path(), "0.2.0");
        assert!(newer.load(&id).is_empty());
        assert!(newer.index().entries.is_empty());
    }

    #[test]
    fn invalidate_removes_snapshot_and_entry() {
        let (_dir, store) = make_store();
        let id = TargetId::test("core");
        store.update(&id, &sample()).unwrap();

        assert!(store.invalidate(&id).unwrap());
        assert!(store.load(&id).is_empty());
        assert!(store.index().entries.is_empty());
        assert!(!store.invalidate(&id).unwrap());
    }

    #[test]
    fn invalidate_all_clears_everything() {
        let (_dir, store) = make_store();
        store.update(&TargetId::production("a"), &sample()).unwrap();
        store.update(&TargetId::production("b"), &sample()).unwrap();
        assert_eq!(store.invalidate_all().unwrap(), 2);
        assert!(store.load(&TargetId::production("a")).is_empty());
        assert!(store.index().entries.is_empty());
    }

    #[test]
    fn gc_removes_unindexed_files() {
        let (_dir, store) = make_store();
        let kept = TargetId::production("kept");
        store.update(&kept, &sample()).unwrap();
        let targets = store.cache_dir().join(TARGETS_SUBDIR);
        std::fs::write(targets.join("orphan.production.00000000.snap"), b"x").unwrap();
        std::fs::write(targets.join("half.snap.tmp"), b"x").unwrap();

        assert_eq!(store.gc().unwrap(), 2);
        assert_eq!(store.load(&kept), sample());
    }

    #[test]
    fn gc_on_fresh_cache() {
        let (_dir, store) = make_store();
        assert_eq!(store.gc().unwrap(), 0);
    }

    #[test]
    fn concurrent_updates_keep_every_index_entry() {
        let (_dir, store) = make_store();
        std::thread::scope(|s| {
            for i in 0..8 {
                let store = &store;
                s.spawn(move || {
                    store
                        .update(&TargetId::production(format!("m{i}")), &sample())
                        .unwrap()
                });
            }
        });
        assert_eq!(store.index().entries.len(), 8);
    }

    fn numbered(n: usize) -> CacheSnapshot {
        let mut snap = CacheSnapshot::new();
        for i in 0..=n * 16 {
            let source = PathBuf::from(format!("core/src/F{i}.kt"));
            let output = PathBuf::from(format!("out/F{i}.class"));
            snap.sources
                .insert(source.clone(), ContentHash::from_bytes(format!("{n}:{i}").as_bytes()));
            snap.outputs
                .insert(output.clone(), ContentHash::from_bytes(&[n as u8, i as u8]));
            snap.associate(source, output);
        }
        snap
    }

    // Renaming over a file another handle has open fails on Windows.
    #[cfg(unix)]
    #[test]
    fn loads_during_updates_see_whole_snapshots() {
        let (dir, writer) = make_store();
        // A second handle on the same directory shares no locks with the
        // writer, so only the rename keeps reads consistent.
        let reader = CacheStore::open(dir.path(), "0.1.0");
        let id = TargetId::production("core");
        let versions: Vec<CacheSnapshot> = (0..6).map(numbered).collect();

        std::thread::scope(|s| {
            s.spawn(|| {
                for round in 0..20 {
                    for snap in &versions {
                        writer.update(&id, snap).unwrap();
                    }
                    if round % 5 == 0 {
                        writer.invalidate(&id).unwrap();
                    }
                }
            });
            for store in [&writer, &reader] {
                let (id, versions) = (&id, &versions);
                s.spawn(move || {
                    for _ in 0..300 {
                        let loaded = store.load(id);
                        assert!(
                            loaded.is_empty() || versions.contains(&loaded),
                            "load returned a partial snapshot with {} sources",
                            loaded.sources.len()
                        );
                    }
                });
            }
        });
        assert_eq!(reader.load(&id), versions[5]);
    }
}

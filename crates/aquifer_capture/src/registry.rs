//! Authoritative collection of candidate datasets.
//!
//! The registry is the only component that creates or destroys entries.
//! The watcher and sweeper feed it paths, pipelines mutate individual
//! entries through their handles, and removal happens only on explicit
//! user request.

use crate::dataset::{CandidateDataset, DatasetHandle};
use crate::metrics::{incr, METRICS};
use crate::resolver::resolve_metadata;
use aquifer_protocol::{DatasetId, DatasetSource, WatchConfig};
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Strip `.` components and trailing separators so path identity is stable
/// across event sources.
pub fn normalize_path(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

struct RegistryInner {
    by_path: HashMap<PathBuf, DatasetId>,
    entries: HashMap<DatasetId, DatasetHandle>,
    next_id: u64,
}

/// Owns every [`CandidateDataset`]. Mutations are scoped per entry; the
/// collection lock is held only for map bookkeeping.
pub struct DatasetRegistry {
    inner: Mutex<RegistryInner>,
    config: Arc<WatchConfig>,
}

impl DatasetRegistry {
    pub fn new(config: Arc<WatchConfig>) -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                by_path: HashMap::new(),
                entries: HashMap::new(),
                next_id: 1,
            }),
            config,
        }
    }

    /// Create, refresh, or relocate the entry for a path.
    ///
    /// When `old_path` names an existing entry this is a rename: the entry
    /// keeps its id and accumulated metadata and moves to the new path.
    /// Otherwise an existing entry for `path` gets its run-finish advanced
    /// (a change notification), and a brand-new path creates an entry with
    /// watcher-default metadata.
    pub fn upsert(
        &self,
        path: &Path,
        is_directory: bool,
        capture_subdirectory: &str,
        source: DatasetSource,
        old_path: Option<&Path>,
    ) -> DatasetHandle {
        let path = normalize_path(path);
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(old_path) = old_path {
            let old_path = normalize_path(old_path);
            let relocated = inner
                .by_path
                .get(&old_path)
                .and_then(|id| inner.entries.get(id))
                .map(Arc::clone);
            if let Some(handle) = relocated {
                let id = handle.lock().unwrap_or_else(|e| e.into_inner()).id;
                inner.by_path.remove(&old_path);
                inner.by_path.insert(path.clone(), id);
                drop(inner);
                {
                    let mut entry = handle.lock().unwrap_or_else(|e| e.into_inner());
                    debug!(
                        id = %entry.id,
                        from = %old_path.display(),
                        to = %path.display(),
                        "Dataset renamed"
                    );
                    entry.relocate(path, capture_subdirectory.to_string());
                }
                incr(&METRICS.renames_applied);
                return handle;
            }
            // Old path unknown: fall through and treat as a fresh creation.
        }

        if let Some(&id) = inner.by_path.get(&path) {
            let handle = Arc::clone(&inner.entries[&id]);
            drop(inner);
            let mut entry = handle.lock().unwrap_or_else(|e| e.into_inner());
            entry.run_finish = Utc::now();
            drop(entry);
            return handle;
        }

        let id = DatasetId::new(inner.next_id);
        inner.next_id += 1;
        let mut dataset = CandidateDataset::new(
            id,
            path.clone(),
            is_directory,
            capture_subdirectory.to_string(),
            source,
        );
        let metadata = resolve_metadata(
            &dataset.metadata,
            false,
            &self.config.default_metadata,
            None,
        );
        dataset.metadata = metadata;
        info!(id = %id, path = %path.display(), source = %source, "Dataset discovered");
        let handle: DatasetHandle = Arc::new(Mutex::new(dataset));
        inner.by_path.insert(path, id);
        inner.entries.insert(id, Arc::clone(&handle));
        incr(&METRICS.datasets_discovered);
        handle
    }

    pub fn find_by_path(&self, path: &Path) -> Option<DatasetHandle> {
        let path = normalize_path(path);
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .by_path
            .get(&path)
            .and_then(|id| inner.entries.get(id))
            .map(Arc::clone)
    }

    pub fn get(&self, id: DatasetId) -> Option<DatasetHandle> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.entries.get(&id).map(Arc::clone)
    }

    /// User-invoked removal.
    pub fn remove(&self, id: DatasetId) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.entries.remove(&id) {
            Some(handle) => {
                let path = handle.lock().unwrap_or_else(|e| e.into_inner()).path.clone();
                inner.by_path.remove(&path);
                info!(id = %id, "Dataset removed");
                true
            }
            None => false,
        }
    }

    /// User-invoked wholesale clear.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let count = inner.entries.len();
        inner.entries.clear();
        inner.by_path.clear();
        info!(count, "Registry cleared");
    }

    /// Stable-order snapshot of every entry.
    pub fn snapshot(&self) -> Vec<DatasetHandle> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<DatasetId> = inner.entries.keys().copied().collect();
        ids.sort();
        ids.iter().map(|id| Arc::clone(&inner.entries[id])).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aquifer_protocol::DatasetMetadata;

    fn registry() -> DatasetRegistry {
        let config = WatchConfig {
            base_path: PathBuf::from("/watch"),
            default_metadata: DatasetMetadata {
                instrument: Some("Exactive01".into()),
                operator: Some("Ops".into()),
                ..DatasetMetadata::default()
            },
            ..WatchConfig::default()
        };
        DatasetRegistry::new(Arc::new(config))
    }

    #[test]
    fn one_entry_per_path() {
        let reg = registry();
        let a = reg.upsert(Path::new("/watch/run.raw"), false, "", DatasetSource::Watcher, None);
        let b = reg.upsert(Path::new("/watch/run.raw"), false, "", DatasetSource::Watcher, None);
        assert_eq!(reg.len(), 1);
        let (a, b) = (a.lock().unwrap(), b.lock().unwrap());
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn new_entries_get_watcher_defaults() {
        let reg = registry();
        let handle =
            reg.upsert(Path::new("/watch/run.raw"), false, "", DatasetSource::Watcher, None);
        let entry = handle.lock().unwrap();
        assert_eq!(entry.metadata.instrument.as_deref(), Some("Exactive01"));
        assert_eq!(entry.metadata.operator.as_deref(), Some("Ops"));
    }

    #[test]
    fn rename_transfers_identity_and_metadata() {
        let reg = registry();
        let original =
            reg.upsert(Path::new("/watch/old.raw"), false, "", DatasetSource::Watcher, None);
        let id = {
            let mut entry = original.lock().unwrap();
            entry.metadata.experiment = Some("Exp_7".into());
            entry.id
        };

        let renamed = reg.upsert(
            Path::new("/watch/new.raw"),
            false,
            "",
            DatasetSource::Watcher,
            Some(Path::new("/watch/old.raw")),
        );

        assert_eq!(reg.len(), 1);
        assert!(reg.find_by_path(Path::new("/watch/old.raw")).is_none());
        let entry = renamed.lock().unwrap();
        assert_eq!(entry.id, id);
        assert_eq!(entry.name, "new");
        assert_eq!(entry.metadata.experiment.as_deref(), Some("Exp_7"));
    }

    #[test]
    fn rename_of_unknown_path_creates_fresh_entry() {
        let reg = registry();
        let handle = reg.upsert(
            Path::new("/watch/new.raw"),
            false,
            "",
            DatasetSource::Watcher,
            Some(Path::new("/watch/never-seen.raw")),
        );
        assert_eq!(reg.len(), 1);
        assert_eq!(handle.lock().unwrap().name, "new");
    }

    #[test]
    fn remove_and_clear_are_explicit() {
        let reg = registry();
        let handle =
            reg.upsert(Path::new("/watch/a.raw"), false, "", DatasetSource::Watcher, None);
        reg.upsert(Path::new("/watch/b.raw"), false, "", DatasetSource::Watcher, None);
        let id = handle.lock().unwrap().id;

        assert!(reg.remove(id));
        assert!(!reg.remove(id));
        assert_eq!(reg.len(), 1);

        reg.clear();
        assert!(reg.is_empty());
    }
}

//! Candidate dataset model.
//!
//! One entry per physical file or directory discovered on the watched
//! path. Entries are owned by the registry and shared as per-entry
//! `Arc<Mutex<_>>` handles so pipelines can mutate one dataset without
//! locking the whole collection.

use aquifer_protocol::{
    DatasetId, DatasetMetadata, DatasetSource, DatasetStatus, PathStats,
};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Shared per-entry handle. Lock scope is one dataset, never the registry.
pub type DatasetHandle = Arc<Mutex<CandidateDataset>>;

static QC_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^QC[-_]").unwrap());
static BLANK_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^BLANK([-_]|$)").unwrap());

/// Dataset name derived from a path: file stem for files, directory name
/// without extension for directory datasets (`Sample_01.d` -> `Sample_01`).
pub fn dataset_name_from_path(path: &Path) -> String {
    path.file_stem()
        .or_else(|| path.file_name())
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// One candidate dataset.
#[derive(Debug, Clone)]
pub struct CandidateDataset {
    pub id: DatasetId,
    pub path: PathBuf,
    pub is_directory: bool,
    /// Derived dataset name; replaced on rename.
    pub name: String,
    /// Relative directory under the watch root the capture came from.
    pub capture_subdirectory: String,
    pub source: DatasetSource,
    pub status: DatasetStatus,
    pub metadata: DatasetMetadata,
    /// Metadata came from a confirmed reference match; watcher defaults
    /// must not overwrite it.
    pub matched: bool,
    pub is_qc: bool,
    pub is_blank: bool,
    pub run_start: DateTime<Utc>,
    /// Advanced on every change notification for the path.
    pub run_finish: DateTime<Utc>,
    pub last_resolved: Option<DateTime<Utc>>,
    /// Snapshot from the last stability check.
    pub cached_stats: Option<PathStats>,
    /// Human-readable detail for the current status, when there is one.
    pub warning: Option<String>,
}

impl CandidateDataset {
    pub fn new(
        id: DatasetId,
        path: PathBuf,
        is_directory: bool,
        capture_subdirectory: String,
        source: DatasetSource,
    ) -> Self {
        let name = dataset_name_from_path(&path);
        let now = Utc::now();
        // QC/blank classification happens once, at creation.
        let is_qc = QC_NAME.is_match(&name);
        let is_blank = BLANK_NAME.is_match(&name);
        Self {
            id,
            path,
            is_directory,
            name,
            capture_subdirectory,
            source,
            status: DatasetStatus::Pending,
            metadata: DatasetMetadata::default(),
            matched: false,
            is_qc,
            is_blank,
            run_start: now,
            run_finish: now,
            last_resolved: None,
            cached_stats: None,
            warning: None,
        }
    }

    /// Apply a rename: new identity on disk, same registry identity.
    pub fn relocate(&mut self, new_path: PathBuf, capture_subdirectory: String) {
        self.name = dataset_name_from_path(&new_path);
        self.path = new_path;
        self.capture_subdirectory = capture_subdirectory;
        self.run_finish = Utc::now();
    }

    pub fn set_status(&mut self, status: DatasetStatus) {
        self.status = status;
        self.warning = None;
    }

    pub fn set_failure(&mut self, status: DatasetStatus, warning: impl Into<String>) {
        self.status = status;
        self.warning = Some(warning.into());
    }

    /// Seconds since the last change notification.
    pub fn seconds_since_finish(&self, now: DateTime<Utc>) -> i64 {
        (now - self.run_finish).num_seconds()
    }
}

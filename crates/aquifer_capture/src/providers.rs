//! External collaborator interfaces.
//!
//! The scheduling database and the downstream archive are consumed only
//! through these traits; the engine never talks to either directly. The
//! CLI ships file-backed implementations, tests use in-memory stubs.

use aquifer_protocol::{FileHashRecord, HashMatchInfo, ReferenceRunRecord, TriggerPayload};
use std::path::Path;

/// Read-side view of the scheduling database.
pub trait ReferenceProvider: Send + Sync {
    /// All currently requested runs. The result replaces the matcher index
    /// wholesale.
    fn load_reference_runs(&self) -> anyhow::Result<Vec<ReferenceRunRecord>>;

    /// Whether a dataset of this name has already been ingested.
    fn dataset_name_exists(&self, name: &str) -> anyhow::Result<bool>;

    /// Already-ingested files whose content hash matches one of the given
    /// records.
    fn matching_file_hashes(
        &self,
        hashes: &[FileHashRecord],
    ) -> anyhow::Result<Vec<HashMatchInfo>>;

    /// Cart configuration names registered for a cart.
    fn cart_config_names(&self, cart_name: &str) -> anyhow::Result<Vec<String>>;
}

/// Write-side hand-off to the downstream archive.
pub trait TriggerSink: Send + Sync {
    /// Whether a trigger artifact for this dataset already exists at the
    /// destination.
    fn trigger_exists(&self, dataset_name: &str) -> anyhow::Result<bool>;

    /// Write the durable trigger artifact. Failures are surfaced to the
    /// operator; the engine never retries a write automatically.
    fn send_trigger(&self, payload: &TriggerPayload) -> anyhow::Result<()>;
}

/// Detects acquisition software still holding a candidate open.
pub trait LockProbe: Send + Sync {
    /// Name of a blocking process currently locking the candidate, if any.
    fn lock_holder(&self, dataset_path: &Path, is_directory: bool) -> Option<String>;
}

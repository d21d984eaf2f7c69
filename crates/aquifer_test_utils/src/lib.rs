//! Test doubles for the capture engine's external collaborators, plus
//! scratch filesystem helpers.
//!
//! Everything is in-memory and configurable after construction so tests
//! can flip provider state mid-scenario (e.g. a dataset becoming
//! "already ingested" between two pipeline passes).

use aquifer_capture::providers::{LockProbe, ReferenceProvider, TriggerSink};
use aquifer_protocol::{FileHashRecord, HashMatchInfo, ReferenceRunRecord, TriggerPayload};
use sha1::{Digest, Sha1};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Hex SHA-1 of a byte slice; matches the engine's file hashing.
pub fn sha1_hex(data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// In-memory scheduling database.
#[derive(Default)]
pub struct StubReferenceProvider {
    runs: Mutex<Vec<ReferenceRunRecord>>,
    existing_names: Mutex<HashSet<String>>,
    /// sha1 -> dataset name it was ingested under.
    known_hashes: Mutex<HashMap<String, String>>,
    cart_configs: Mutex<HashMap<String, Vec<String>>>,
    unreachable: AtomicBool,
}

impl StubReferenceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_runs(runs: Vec<ReferenceRunRecord>) -> Self {
        let provider = Self::default();
        *provider.runs.lock().unwrap() = runs;
        provider
    }

    pub fn set_runs(&self, runs: Vec<ReferenceRunRecord>) {
        *self.runs.lock().unwrap() = runs;
    }

    pub fn add_existing_name(&self, name: &str) {
        self.existing_names.lock().unwrap().insert(name.to_lowercase());
    }

    pub fn add_known_hash(&self, sha1: &str, dataset_name: &str) {
        self.known_hashes
            .lock()
            .unwrap()
            .insert(sha1.to_string(), dataset_name.to_string());
    }

    pub fn add_cart_config(&self, cart: &str, configs: Vec<String>) {
        self.cart_configs.lock().unwrap().insert(cart.to_string(), configs);
    }

    /// Simulate a provider outage for every subsequent call.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    fn check_reachable(&self) -> anyhow::Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            anyhow::bail!("reference provider unreachable");
        }
        Ok(())
    }
}

impl ReferenceProvider for StubReferenceProvider {
    fn load_reference_runs(&self) -> anyhow::Result<Vec<ReferenceRunRecord>> {
        self.check_reachable()?;
        Ok(self.runs.lock().unwrap().clone())
    }

    fn dataset_name_exists(&self, name: &str) -> anyhow::Result<bool> {
        self.check_reachable()?;
        Ok(self.existing_names.lock().unwrap().contains(&name.to_lowercase()))
    }

    fn matching_file_hashes(
        &self,
        hashes: &[FileHashRecord],
    ) -> anyhow::Result<Vec<HashMatchInfo>> {
        self.check_reachable()?;
        let known = self.known_hashes.lock().unwrap();
        Ok(hashes
            .iter()
            .filter_map(|record| {
                known.get(&record.sha1).map(|dataset_name| HashMatchInfo {
                    sha1: record.sha1.clone(),
                    dataset_name: dataset_name.clone(),
                    stored_path: None,
                })
            })
            .collect())
    }

    fn cart_config_names(&self, cart_name: &str) -> anyhow::Result<Vec<String>> {
        self.check_reachable()?;
        Ok(self
            .cart_configs
            .lock()
            .unwrap()
            .get(cart_name)
            .cloned()
            .unwrap_or_default())
    }
}

/// Sink that records payloads instead of writing artifacts.
#[derive(Default)]
pub struct CollectingSink {
    sent: Mutex<Vec<TriggerPayload>>,
    preexisting: Mutex<HashSet<String>>,
    fail_writes: AtomicBool,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend an artifact for this dataset already exists downstream.
    pub fn add_preexisting(&self, dataset_name: &str) {
        self.preexisting.lock().unwrap().insert(dataset_name.to_string());
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<TriggerPayload> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_names(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|p| p.dataset_name.clone()).collect()
    }
}

impl TriggerSink for CollectingSink {
    fn trigger_exists(&self, dataset_name: &str) -> anyhow::Result<bool> {
        if self.preexisting.lock().unwrap().contains(dataset_name) {
            return Ok(true);
        }
        Ok(self.sent.lock().unwrap().iter().any(|p| p.dataset_name == dataset_name))
    }

    fn send_trigger(&self, payload: &TriggerPayload) -> anyhow::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            anyhow::bail!("destination unavailable");
        }
        self.sent.lock().unwrap().push(payload.clone());
        Ok(())
    }
}

/// Probe with a fixed (settable) answer.
#[derive(Default)]
pub struct StaticLockProbe {
    holder: Mutex<Option<String>>,
}

impl StaticLockProbe {
    pub fn unlocked() -> Self {
        Self::default()
    }

    pub fn set_holder(&self, holder: Option<&str>) {
        *self.holder.lock().unwrap() = holder.map(str::to_string);
    }
}

impl LockProbe for StaticLockProbe {
    fn lock_holder(&self, _dataset_path: &Path, _is_directory: bool) -> Option<String> {
        self.holder.lock().unwrap().clone()
    }
}

/// A requested-run record with only the interesting fields set.
pub fn reference_run(request_id: u64, dataset_name: &str, instrument: &str) -> ReferenceRunRecord {
    ReferenceRunRecord {
        request_id,
        dataset_name: dataset_name.to_string(),
        instrument: Some(instrument.to_string()),
        cart_name: Some("Cart_01".to_string()),
        experiment: Some("Exp_Default".to_string()),
        work_package: Some("WP-100".to_string()),
        eus_usage_type: Some("USER".to_string()),
        eus_proposal_id: Some("P-7".to_string()),
        eus_users: vec!["operator".to_string()],
    }
}

/// Scratch watch root.
pub fn scratch_root() -> tempfile::TempDir {
    tempfile::tempdir().expect("failed to create scratch watch root")
}

/// Drop a dataset file into the watch root and return its path.
pub fn write_dataset_file(root: &Path, name: &str, contents: &[u8]) -> PathBuf {
    let path = root.join(name);
    std::fs::write(&path, contents).expect("failed to write dataset file");
    path
}

/// Build a directory dataset with the given (relative-name, contents)
/// files.
pub fn write_dataset_dir(root: &Path, name: &str, files: &[(&str, &[u8])]) -> PathBuf {
    let dir = root.join(name);
    std::fs::create_dir_all(&dir).expect("failed to create dataset dir");
    for (file_name, contents) in files {
        let path = dir.join(file_name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("failed to create dataset subdir");
        }
        std::fs::write(path, contents).expect("failed to write dataset member");
    }
    dir
}

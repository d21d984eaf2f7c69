//! File-backed reference provider.
//!
//! Stands in for the scheduling database: a JSON snapshot exported from
//! the source of truth, reloaded from disk on every `load_reference_runs`
//! call so a refreshed export is picked up without restarting.

use anyhow::Context;
use aquifer_capture::providers::ReferenceProvider;
use aquifer_protocol::{FileHashRecord, HashMatchInfo, ReferenceRunRecord};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone, Default, Deserialize)]
struct ReferenceSnapshot {
    #[serde(default)]
    requested_runs: Vec<ReferenceRunRecord>,
    /// Names of datasets already ingested.
    #[serde(default)]
    ingested_datasets: Vec<String>,
    /// Content hashes of already-ingested files.
    #[serde(default)]
    ingested_file_hashes: Vec<IngestedHash>,
    #[serde(default)]
    cart_configs: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
struct IngestedHash {
    sha1: String,
    dataset_name: String,
}

/// Provider reading a JSON snapshot file.
pub struct SnapshotReferenceProvider {
    path: PathBuf,
    snapshot: Mutex<ReferenceSnapshot>,
}

impl SnapshotReferenceProvider {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let snapshot = Self::read(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            snapshot: Mutex::new(snapshot),
        })
    }

    fn read(path: &Path) -> anyhow::Result<ReferenceSnapshot> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read reference snapshot {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid reference snapshot {}", path.display()))
    }
}

impl ReferenceProvider for SnapshotReferenceProvider {
    fn load_reference_runs(&self) -> anyhow::Result<Vec<ReferenceRunRecord>> {
        let fresh = Self::read(&self.path)?;
        let runs = fresh.requested_runs.clone();
        *self.snapshot.lock().unwrap() = fresh;
        Ok(runs)
    }

    fn dataset_name_exists(&self, name: &str) -> anyhow::Result<bool> {
        let snapshot = self.snapshot.lock().unwrap();
        let name = name.to_lowercase();
        Ok(snapshot
            .ingested_datasets
            .iter()
            .any(|existing| existing.to_lowercase() == name))
    }

    fn matching_file_hashes(
        &self,
        hashes: &[FileHashRecord],
    ) -> anyhow::Result<Vec<HashMatchInfo>> {
        let snapshot = self.snapshot.lock().unwrap();
        Ok(hashes
            .iter()
            .filter_map(|record| {
                snapshot
                    .ingested_file_hashes
                    .iter()
                    .find(|known| known.sha1.eq_ignore_ascii_case(&record.sha1))
                    .map(|known| HashMatchInfo {
                        sha1: record.sha1.clone(),
                        dataset_name: known.dataset_name.clone(),
                        stored_path: None,
                    })
            })
            .collect())
    }

    fn cart_config_names(&self, cart_name: &str) -> anyhow::Result<Vec<String>> {
        let snapshot = self.snapshot.lock().unwrap();
        Ok(snapshot.cart_configs.get(cart_name).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs.json");
        std::fs::write(
            &path,
            r#"{
                "requested_runs": [
                    {"request_id": 7, "dataset_name": "Sample_A_01", "instrument": "Exactive01"}
                ],
                "ingested_datasets": ["Old_Run_99"],
                "ingested_file_hashes": [
                    {"sha1": "da39a3ee5e6b4b0d3255bfef95601890afd80709", "dataset_name": "Old_Run_99"}
                ],
                "cart_configs": {"Cart_01": ["Cart_01_A"]}
            }"#,
        )
        .unwrap();

        let provider = SnapshotReferenceProvider::open(&path).unwrap();
        let runs = provider.load_reference_runs().unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].request_id, 7);
        assert!(provider.dataset_name_exists("old_run_99").unwrap());
        assert!(!provider.dataset_name_exists("Sample_A_01").unwrap());
        assert_eq!(provider.cart_config_names("Cart_01").unwrap(), vec!["Cart_01_A"]);

        let probe = vec![FileHashRecord {
            path: PathBuf::from("/x"),
            sha1: "DA39A3EE5E6B4B0D3255BFEF95601890AFD80709".to_string(),
        }];
        let matches = provider.matching_file_hashes(&probe).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].dataset_name, "Old_Run_99");
    }
}

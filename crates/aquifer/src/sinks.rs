//! File-backed trigger sink.
//!
//! Writes one JSON artifact per dataset into the destination directory.
//! The downstream archive owns the real artifact contract; this sink is
//! the shipped default collaborator, not a normative format.

use anyhow::Context;
use aquifer_capture::providers::TriggerSink;
use aquifer_protocol::TriggerPayload;
use std::path::{Path, PathBuf};

pub struct FileTriggerSink {
    destination: PathBuf,
}

impl FileTriggerSink {
    pub fn new(destination: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(destination).with_context(|| {
            format!("Failed to create trigger destination {}", destination.display())
        })?;
        Ok(Self {
            destination: destination.to_path_buf(),
        })
    }

    fn artifact_path(&self, dataset_name: &str) -> PathBuf {
        let safe: String = dataset_name
            .chars()
            .map(|ch| {
                if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || ch == '.' {
                    ch
                } else {
                    '_'
                }
            })
            .collect();
        self.destination.join(format!("{safe}.trigger.json"))
    }
}

impl TriggerSink for FileTriggerSink {
    fn trigger_exists(&self, dataset_name: &str) -> anyhow::Result<bool> {
        Ok(self.artifact_path(dataset_name).exists())
    }

    fn send_trigger(&self, payload: &TriggerPayload) -> anyhow::Result<()> {
        let path = self.artifact_path(&payload.dataset_name);
        let content = serde_json::to_vec_pretty(payload)
            .context("Failed to serialize trigger payload")?;
        // Write to a temp name first so a half-written artifact is never
        // visible under the final name.
        let staging = path.with_extension("tmp");
        std::fs::write(&staging, content)
            .with_context(|| format!("Failed to write trigger {}", staging.display()))?;
        std::fs::rename(&staging, &path)
            .with_context(|| format!("Failed to publish trigger {}", path.display()))?;
        Ok(())
    }
}

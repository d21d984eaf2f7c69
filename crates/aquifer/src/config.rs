//! Top-level CLI configuration: the watch-session config plus the paths
//! of the two file-backed collaborators.

use anyhow::{Context, Result};
use aquifer_protocol::WatchConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct AquiferConfig {
    /// Requested-run snapshot (JSON) standing in for the scheduling
    /// database.
    pub reference_snapshot: PathBuf,

    /// Directory trigger artifacts are written to.
    pub trigger_destination: PathBuf,

    pub watch: WatchConfig,
}

impl AquiferConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: AquiferConfig =
            toml::from_str(&content).with_context(|| format!("Invalid config {}", path.display()))?;
        config
            .watch
            .validate()
            .map_err(|message| anyhow::anyhow!("Invalid config {}: {}", path.display(), message))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_config_parses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aquifer.toml");
        std::fs::write(
            &path,
            r#"
reference_snapshot = "runs.json"
trigger_destination = "/srv/triggers"

[watch]
base_path = "/instrument/output"
extensions = [".raw"]
trigger_wait_minutes = 15

[watch.default_metadata]
instrument = "Exactive01"
operator = "Ops"

[[watch.qc_rules]]
pattern = "QC-Shew"
experiment = "QC_Shewanella"

[[watch.qc_rules]]
pattern = "*"
experiment = "QC_Standard"
"#,
        )
        .unwrap();

        let config = AquiferConfig::load(&path).unwrap();
        assert_eq!(config.watch.trigger_wait_minutes, 15);
        assert_eq!(config.watch.qc_rules.len(), 2);
        assert_eq!(
            config.watch.default_metadata.instrument.as_deref(),
            Some("Exactive01")
        );
    }
}

//! Watch-session configuration.
//!
//! Loaded from a TOML file by the CLI; every field has a serde default so a
//! minimal config (just `base_path`) is valid.

use crate::defaults;
use crate::types::DatasetMetadata;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// What a filesystem event must look like to become a candidate dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WatchMatchMode {
    /// Candidates are single files matched by extension (e.g. `.raw`).
    #[default]
    Extension,
    /// Candidates are directories matched by a name pattern (e.g. `*.d`).
    Directory,
}

/// How deep below the watch root candidates may live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SearchDepth {
    /// Only entries directly under the watch root; deeper events roll up
    /// to their top-level ancestor.
    #[default]
    TopLevelOnly,
    /// Entries anywhere under the watch root.
    Recursive,
}

/// Auto-population rule for quality-control/blank datasets.
///
/// Patterns are compared with digits stripped and `-` folded to `_`; the
/// single allowed `*` pattern matches any QC/blank name and is consulted
/// only after every specific pattern has failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QcMonitorRule {
    pub pattern: String,
    pub experiment: String,
    #[serde(default)]
    pub metadata: DatasetMetadata,
}

impl QcMonitorRule {
    pub fn is_wildcard(&self) -> bool {
        self.pattern.trim() == "*"
    }
}

/// Configuration for one watch session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Directory the watcher and sweeper operate on.
    pub base_path: PathBuf,

    #[serde(default)]
    pub match_mode: WatchMatchMode,

    /// Extensions (with or without leading dot) accepted in extension mode.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Directory-name pattern accepted in directory mode. A leading `*`
    /// matches any prefix (`*.d` accepts `Sample_01.d`).
    #[serde(default)]
    pub directory_pattern: Option<String>,

    #[serde(default)]
    pub search_depth: SearchDepth,

    #[serde(default = "default_minimum_file_size_kb")]
    pub minimum_file_size_kb: u64,

    /// Minutes after run-finish before the scheduler auto-creates a trigger.
    #[serde(default = "default_trigger_wait_minutes")]
    pub trigger_wait_minutes: i64,

    #[serde(default = "default_resolve_throttle_minutes")]
    pub resolve_throttle_minutes: i64,

    #[serde(default = "default_stability_window_secs")]
    pub stability_window_secs: u64,

    /// Failed-lookup depth at which a miss counts as ambiguous.
    #[serde(default = "default_ambiguity_depth")]
    pub ambiguity_depth: usize,

    /// Allow trigger creation for datasets without a confirmed reference
    /// match.
    #[serde(default)]
    pub trigger_on_no_match: bool,

    /// Independent toggle for QC/blank datasets.
    #[serde(default = "default_true")]
    pub trigger_on_qc_no_match: bool,

    /// Metadata applied to newly discovered datasets until a reference
    /// match locks them.
    #[serde(default)]
    pub default_metadata: DatasetMetadata,

    #[serde(default)]
    pub qc_rules: Vec<QcMonitorRule>,
}

fn default_extensions() -> Vec<String> {
    vec![".raw".to_string()]
}

fn default_minimum_file_size_kb() -> u64 {
    defaults::DEFAULT_MINIMUM_FILE_SIZE_KB
}

fn default_trigger_wait_minutes() -> i64 {
    defaults::DEFAULT_TRIGGER_WAIT_MINUTES
}

fn default_resolve_throttle_minutes() -> i64 {
    defaults::DEFAULT_RESOLVE_THROTTLE_MINUTES
}

fn default_stability_window_secs() -> u64 {
    defaults::DEFAULT_STABILITY_WINDOW_SECS
}

fn default_ambiguity_depth() -> usize {
    defaults::DEFAULT_AMBIGUITY_DEPTH
}

fn default_true() -> bool {
    true
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::new(),
            match_mode: WatchMatchMode::default(),
            extensions: default_extensions(),
            directory_pattern: None,
            search_depth: SearchDepth::default(),
            minimum_file_size_kb: default_minimum_file_size_kb(),
            trigger_wait_minutes: default_trigger_wait_minutes(),
            resolve_throttle_minutes: default_resolve_throttle_minutes(),
            stability_window_secs: default_stability_window_secs(),
            ambiguity_depth: default_ambiguity_depth(),
            trigger_on_no_match: false,
            trigger_on_qc_no_match: true,
            default_metadata: DatasetMetadata::default(),
            qc_rules: Vec::new(),
        }
    }
}

impl WatchConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config {}: {}", path.display(), e))?;
        let config: WatchConfig =
            toml::from_str(&content).map_err(|e| format!("Invalid config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<(), String> {
        let content =
            toml::to_string_pretty(self).map_err(|e| format!("Serialize config: {}", e))?;
        std::fs::write(path, content)
            .map_err(|e| format!("Failed to write config {}: {}", path.display(), e))
    }

    /// Structural checks that serde cannot express.
    pub fn validate(&self) -> Result<(), String> {
        if self.base_path.as_os_str().is_empty() {
            return Err("base_path must be set".to_string());
        }
        let wildcards = self.qc_rules.iter().filter(|r| r.is_wildcard()).count();
        if wildcards > 1 {
            return Err(format!(
                "At most one wildcard QC rule is allowed, found {}",
                wildcards
            ));
        }
        if self.match_mode == WatchMatchMode::Directory && self.directory_pattern.is_none() {
            return Err("directory match mode requires directory_pattern".to_string());
        }
        Ok(())
    }

    /// Extensions normalized to lowercase with a leading dot.
    pub fn normalized_extensions(&self) -> Vec<String> {
        self.extensions
            .iter()
            .map(|ext| {
                let ext = ext.trim().to_lowercase();
                if ext.starts_with('.') {
                    ext
                } else {
                    format!(".{ext}")
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_toml_config_fills_defaults() {
        let config: WatchConfig = toml::from_str(r#"base_path = "/data/instrument""#).unwrap();
        assert_eq!(config.match_mode, WatchMatchMode::Extension);
        assert_eq!(config.stability_window_secs, 30);
        assert_eq!(config.ambiguity_depth, 5);
        assert!(!config.trigger_on_no_match);
        assert!(config.trigger_on_qc_no_match);
        config.validate().unwrap();
    }

    #[test]
    fn two_wildcard_qc_rules_rejected() {
        let mut config = WatchConfig {
            base_path: PathBuf::from("/data"),
            ..WatchConfig::default()
        };
        config.qc_rules = vec![
            QcMonitorRule {
                pattern: "*".into(),
                experiment: "QC_A".into(),
                metadata: DatasetMetadata::default(),
            },
            QcMonitorRule {
                pattern: " * ".into(),
                experiment: "QC_B".into(),
                metadata: DatasetMetadata::default(),
            },
        ];
        assert!(config.validate().is_err());
    }

    #[test]
    fn directory_mode_requires_pattern() {
        let config = WatchConfig {
            base_path: PathBuf::from("/data"),
            match_mode: WatchMatchMode::Directory,
            ..WatchConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn extensions_are_normalized() {
        let config = WatchConfig {
            base_path: PathBuf::from("/data"),
            extensions: vec!["RAW".into(), ".mzML".into()],
            ..WatchConfig::default()
        };
        assert_eq!(config.normalized_extensions(), vec![".raw", ".mzml"]);
    }
}

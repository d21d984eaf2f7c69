//! Acquisition-software lock detection.
//!
//! Instrument control software holds dataset files open for the whole run
//! and sometimes well past it. Triggering while such a process is alive
//! risks archiving a half-written dataset, so the scheduler consults a
//! static allow-list of blocking process names before creating anything.
//! Some vendors only lock directory datasets that contain a specific
//! companion file; those rules carry a filename pattern that must also be
//! present for the process to count as blocking.

use crate::providers::LockProbe;
use std::path::Path;
use std::sync::Mutex;
use sysinfo::System;
use tracing::debug;

/// One entry of the blocking-process allow-list.
#[derive(Debug, Clone, Copy)]
pub struct LockRule {
    /// Case-insensitive substring of the process name.
    pub process_pattern: &'static str,
    /// When set, the rule applies only to directory candidates containing
    /// a file whose name includes this (case-insensitive) fragment.
    pub companion_file_pattern: Option<&'static str>,
}

/// Processes known to hold writer locks on in-progress datasets.
pub const BLOCKING_PROCESSES: &[LockRule] = &[
    LockRule { process_pattern: "xcalibur", companion_file_pattern: None },
    LockRule { process_pattern: "homequeue", companion_file_pattern: None },
    LockRule { process_pattern: "masshunter", companion_file_pattern: Some("acqdata") },
    LockRule { process_pattern: "hystar", companion_file_pattern: Some(".baf") },
    LockRule { process_pattern: "otofcontrol", companion_file_pattern: Some(".baf") },
    LockRule { process_pattern: "analyst", companion_file_pattern: Some(".wiff") },
    LockRule { process_pattern: "chemstation", companion_file_pattern: None },
];

/// Whether a directory candidate contains a file matching the companion
/// pattern (top-level entries only; vendors put the marker at the root of
/// the dataset directory).
fn has_companion_file(dir: &Path, pattern: &str) -> bool {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return false;
    };
    let pattern = pattern.to_lowercase();
    entries
        .flatten()
        .any(|entry| entry.file_name().to_string_lossy().to_lowercase().contains(&pattern))
}

/// Match the allow-list against a set of running process names.
///
/// Split out from the probe so tests can exercise the rule logic without a
/// live process table.
pub fn find_blocking_process(
    process_names: &[String],
    dataset_path: &Path,
    is_directory: bool,
) -> Option<String> {
    for rule in BLOCKING_PROCESSES {
        let holder = process_names
            .iter()
            .find(|name| name.to_lowercase().contains(rule.process_pattern));
        let Some(holder) = holder else {
            continue;
        };
        match rule.companion_file_pattern {
            None => return Some(holder.clone()),
            Some(pattern) => {
                if is_directory && has_companion_file(dataset_path, pattern) {
                    return Some(holder.clone());
                }
            }
        }
    }
    None
}

/// Probe backed by the live process table.
pub struct SysinfoLockProbe {
    system: Mutex<System>,
}

impl SysinfoLockProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SysinfoLockProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl LockProbe for SysinfoLockProbe {
    fn lock_holder(&self, dataset_path: &Path, is_directory: bool) -> Option<String> {
        let mut system = self.system.lock().unwrap_or_else(|e| e.into_inner());
        system.refresh_processes();
        let names: Vec<String> = system
            .processes()
            .values()
            .map(|process| process.name().to_string())
            .collect();
        let holder = find_blocking_process(&names, dataset_path, is_directory);
        if let Some(ref name) = holder {
            debug!(process = %name, path = %dataset_path.display(), "Acquisition lock detected");
        }
        holder
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_process_rule_blocks_without_companion() {
        let names = vec!["explorer".to_string(), "Xcalibur".to_string()];
        let holder = find_blocking_process(&names, Path::new("/data/run.raw"), false);
        assert_eq!(holder.as_deref(), Some("Xcalibur"));
    }

    #[test]
    fn companion_rule_needs_marker_file() {
        let dir = tempfile::tempdir().unwrap();
        let names = vec!["HyStar".to_string()];

        // No marker file yet: not blocking.
        assert!(find_blocking_process(&names, dir.path(), true).is_none());

        std::fs::write(dir.path().join("analysis.baf"), b"x").unwrap();
        let holder = find_blocking_process(&names, dir.path(), true);
        assert_eq!(holder.as_deref(), Some("HyStar"));
    }

    #[test]
    fn companion_rule_never_blocks_file_candidates() {
        let names = vec!["Analyst".to_string()];
        assert!(find_blocking_process(&names, Path::new("/data/a.wiff"), false).is_none());
    }

    #[test]
    fn no_match_means_no_holder() {
        let names = vec!["bash".to_string(), "sshd".to_string()];
        assert!(find_blocking_process(&names, Path::new("/data/run.raw"), false).is_none());
    }
}

//! Dataset stability verification.
//!
//! Acquisition software may hold a file open and append to it for an
//! unbounded period, so a candidate only counts as safe to archive after
//! its size and entry count hold perfectly still for a full window. The
//! window is a heuristic lower bound, not a guarantee.

use crate::cancel::CancelToken;
use crate::dataset::DatasetHandle;
use aquifer_protocol::{DatasetStatus, PathStats};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Poll increment inside the wait window; cancellation is observed at
/// roughly this granularity.
const POLL_INCREMENT: Duration = Duration::from_millis(100);

/// How often to log progress during the wait.
const PROGRESS_INTERVAL: Duration = Duration::from_secs(2);

/// How the wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StabilityOutcome {
    /// The window ran to completion; per-dataset results are on the
    /// datasets themselves.
    Completed,
    /// Cancelled mid-window; no dataset was classified.
    Cancelled,
}

/// Size/entry-count snapshot for a file or (recursively) a directory.
///
/// A missing or unreadable path reports `exists: false` rather than an
/// error; stability classification needs the distinction, not the cause.
pub fn capture_stats(path: &Path) -> PathStats {
    let Ok(metadata) = std::fs::metadata(path) else {
        return PathStats::default();
    };

    if metadata.is_file() {
        return PathStats {
            exists: true,
            size_bytes: metadata.len(),
            file_count: 1,
        };
    }

    let mut size_bytes = 0u64;
    let mut file_count = 0u64;
    for entry in walkdir::WalkDir::new(path).into_iter().flatten() {
        if entry.file_type().is_file() {
            file_count += 1;
            if let Ok(meta) = entry.metadata() {
                size_bytes += meta.len();
            }
        }
    }
    PathStats {
        exists: true,
        size_bytes,
        file_count,
    }
}

/// Verify a batch of datasets holds still for the whole window.
///
/// Runs once for the batch so total wait time is bounded by one window.
/// Every dataset is snapshotted up front, the worker sleeps through the
/// window in small increments (checking `cancel` each one), then each
/// dataset is re-captured and compared. Any difference, however small,
/// marks the dataset unstable; a vanished path gets its own status.
pub fn verify_stable(
    handles: &[DatasetHandle],
    window: Duration,
    cancel: &CancelToken,
) -> StabilityOutcome {
    for handle in handles {
        let mut entry = handle.lock().unwrap_or_else(|e| e.into_inner());
        if !entry.status.is_in_flight() {
            continue;
        }
        entry.set_status(DatasetStatus::ValidatingStable);
        entry.cached_stats = Some(capture_stats(&entry.path));
    }

    let start = Instant::now();
    let mut last_progress = Instant::now();
    while start.elapsed() < window {
        if cancel.is_cancelled() {
            return StabilityOutcome::Cancelled;
        }
        let remaining = window.saturating_sub(start.elapsed());
        std::thread::sleep(POLL_INCREMENT.min(remaining));
        if last_progress.elapsed() >= PROGRESS_INTERVAL {
            last_progress = Instant::now();
            info!(
                seconds_remaining = window.saturating_sub(start.elapsed()).as_secs(),
                datasets = handles.len(),
                "Waiting for datasets to stabilize"
            );
        }
    }
    if cancel.is_cancelled() {
        return StabilityOutcome::Cancelled;
    }

    for handle in handles {
        let mut entry = handle.lock().unwrap_or_else(|e| e.into_inner());
        if entry.status != DatasetStatus::ValidatingStable {
            continue;
        }
        let before = entry.cached_stats.unwrap_or_default();
        let after = capture_stats(&entry.path);
        entry.cached_stats = Some(after);

        if !after.exists {
            entry.set_failure(
                DatasetStatus::FailedFileMissing,
                "Dataset vanished during the stability window",
            );
        } else if after != before {
            entry.set_failure(
                DatasetStatus::FailedSizeChanged,
                format!(
                    "Dataset changed during the stability window ({} -> {} bytes, {} -> {} files)",
                    before.size_bytes, after.size_bytes, before.file_count, after.file_count
                ),
            );
        } else {
            debug!(dataset = %entry.name, size = after.size_bytes, "Dataset stable");
        }
    }
    StabilityOutcome::Completed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::CandidateDataset;
    use aquifer_protocol::{DatasetId, DatasetSource};
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    fn handle_for(path: &Path) -> DatasetHandle {
        Arc::new(Mutex::new(CandidateDataset::new(
            DatasetId::new(1),
            path.to_path_buf(),
            path.is_dir(),
            String::new(),
            DatasetSource::Watcher,
        )))
    }

    #[test]
    fn directory_stats_are_recursive() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("inner")).unwrap();
        std::fs::write(dir.path().join("a.bin"), [0u8; 10]).unwrap();
        std::fs::write(dir.path().join("inner/b.bin"), [0u8; 5]).unwrap();

        let stats = capture_stats(dir.path());
        assert!(stats.exists);
        assert_eq!(stats.size_bytes, 15);
        assert_eq!(stats.file_count, 2);
    }

    #[test]
    fn missing_path_reports_not_exists() {
        let stats = capture_stats(Path::new("/definitely/not/here.raw"));
        assert!(!stats.exists);
    }

    #[test]
    fn quiet_file_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("run.raw");
        std::fs::write(&file, b"settled").unwrap();

        let handle = handle_for(&file);
        let outcome =
            verify_stable(&[handle.clone()], Duration::from_millis(300), &CancelToken::new());
        assert_eq!(outcome, StabilityOutcome::Completed);
        assert_eq!(handle.lock().unwrap().status, DatasetStatus::ValidatingStable);
    }

    #[test]
    fn any_growth_is_unstable() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("run.raw");
        std::fs::write(&file, b"start").unwrap();

        let handle = handle_for(&file);
        let writer_path = file.clone();
        let writer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            let mut f = std::fs::OpenOptions::new().append(true).open(writer_path).unwrap();
            // One byte is enough to fail the window.
            f.write_all(b"x").unwrap();
        });

        let outcome =
            verify_stable(&[handle.clone()], Duration::from_millis(400), &CancelToken::new());
        writer.join().unwrap();
        assert_eq!(outcome, StabilityOutcome::Completed);
        assert_eq!(handle.lock().unwrap().status, DatasetStatus::FailedSizeChanged);
    }

    #[test]
    fn vanished_file_gets_missing_status() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("run.raw");
        std::fs::write(&file, b"data").unwrap();

        let handle = handle_for(&file);
        std::fs::remove_file(&file).unwrap();
        let outcome =
            verify_stable(&[handle.clone()], Duration::from_millis(150), &CancelToken::new());
        assert_eq!(outcome, StabilityOutcome::Completed);
        assert_eq!(handle.lock().unwrap().status, DatasetStatus::FailedFileMissing);
    }

    #[test]
    fn cancellation_is_observed_within_the_window() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("run.raw");
        std::fs::write(&file, b"data").unwrap();

        let handle = handle_for(&file);
        let cancel = CancelToken::new();
        cancel.cancel();
        let start = Instant::now();
        let outcome = verify_stable(&[handle], Duration::from_secs(30), &cancel);
        assert_eq!(outcome, StabilityOutcome::Cancelled);
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}

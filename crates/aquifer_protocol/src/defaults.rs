//! Canonical default values shared across the capture engine.

/// Dataset-name prefix applied by the archive once data is captured.
pub const ARCHIVAL_PREFIX: &str = "x_";

/// Interest rating assigned to auto-populated QC/blank datasets.
pub const QC_INTEREST_RATING: &str = "Released";

/// Minimum minutes between reference resolutions of the same dataset.
pub const DEFAULT_RESOLVE_THROTTLE_MINUTES: i64 = 2;

/// Seconds the size/entry-count snapshot must hold for a dataset to count
/// as stable.
pub const DEFAULT_STABILITY_WINDOW_SECS: u64 = 30;

/// Trie depth at and beyond which a failed lookup counts as ambiguous
/// rather than a plain miss.
pub const DEFAULT_AMBIGUITY_DEPTH: usize = 5;

/// Minutes to wait after run-finish before auto-creating a trigger.
pub const DEFAULT_TRIGGER_WAIT_MINUTES: i64 = 10;

/// Smallest file size (KB) the scheduler will consider for triggering.
pub const DEFAULT_MINIMUM_FILE_SIZE_KB: u64 = 100;

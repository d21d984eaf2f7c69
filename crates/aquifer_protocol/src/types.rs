//! Canonical data types shared across the capture engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

// ============================================================================
// Identifiers
// ============================================================================

/// Registry-wide identity of a candidate dataset.
///
/// Identity survives renames: a rename transfers the id from the old path to
/// the new path instead of minting a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetId(u64);

impl DatasetId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Canonical Enums (used across all crates)
// ============================================================================

/// How a candidate dataset entered the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatasetSource {
    /// Discovered by the live filesystem watcher; subject to the
    /// auto-trigger wait period.
    #[default]
    Watcher,
    /// Discovered by a one-off directory sweep; triggered without waiting.
    Searcher,
}

impl DatasetSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetSource::Watcher => "watcher",
            DatasetSource::Searcher => "searcher",
        }
    }
}

impl fmt::Display for DatasetSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle state of a candidate dataset.
/// This is the CANONICAL definition - use this everywhere.
///
/// Terminal states exclude the dataset from all further automatic
/// processing; failure states are retried on the normal resolve cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DatasetStatus {
    /// Discovered, not yet through a trigger pipeline
    #[default]
    Pending,
    /// Inside a stability-verification window
    ValidatingStable,
    /// Trigger artifact written; the dataset is handed off
    TriggerFileSent,
    /// File I/O failed (unreadable file, artifact write failure)
    FailedFileError,
    /// Name lookup found no plausible reference record
    FailedNoReferenceMatch,
    /// Name lookup matched several reference records at significant depth
    FailedAmbiguousReferenceMatch,
    /// Size or entry count changed during the stability window
    FailedSizeChanged,
    /// Path vanished during the stability window
    FailedFileMissing,
    /// Unclassified failure
    FailedUnknown,
    /// Reference name is already an ingested dataset
    DatasetAlreadyInSystem,
    /// Name carries the archival prefix; captured in a previous pass
    DatasetAlreadyCaptured,
    /// Trigger simulation found required metadata missing
    MissingRequiredInfo,
    /// User aborted the pipeline before this dataset finalized
    TriggerAborted,
    /// Content hash collided with already-ingested data
    TriggerAbortedDuplicateFiles,
    /// Declared instrument inconsistent with the on-disk layout
    TriggerAbortedInstrumentMismatch,
    /// User-requested: skip this dataset entirely
    Ignored,
}

impl DatasetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetStatus::Pending => "PENDING",
            DatasetStatus::ValidatingStable => "VALIDATING_STABLE",
            DatasetStatus::TriggerFileSent => "TRIGGER_FILE_SENT",
            DatasetStatus::FailedFileError => "FAILED_FILE_ERROR",
            DatasetStatus::FailedNoReferenceMatch => "FAILED_NO_REFERENCE_MATCH",
            DatasetStatus::FailedAmbiguousReferenceMatch => "FAILED_AMBIGUOUS_REFERENCE_MATCH",
            DatasetStatus::FailedSizeChanged => "FAILED_SIZE_CHANGED",
            DatasetStatus::FailedFileMissing => "FAILED_FILE_MISSING",
            DatasetStatus::FailedUnknown => "FAILED_UNKNOWN",
            DatasetStatus::DatasetAlreadyInSystem => "DATASET_ALREADY_IN_SYSTEM",
            DatasetStatus::DatasetAlreadyCaptured => "DATASET_ALREADY_CAPTURED",
            DatasetStatus::MissingRequiredInfo => "MISSING_REQUIRED_INFO",
            DatasetStatus::TriggerAborted => "TRIGGER_ABORTED",
            DatasetStatus::TriggerAbortedDuplicateFiles => "TRIGGER_ABORTED_DUPLICATE_FILES",
            DatasetStatus::TriggerAbortedInstrumentMismatch => {
                "TRIGGER_ABORTED_INSTRUMENT_MISMATCH"
            }
            DatasetStatus::Ignored => "IGNORED",
        }
    }

    /// No further automatic processing for this dataset.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DatasetStatus::TriggerFileSent
                | DatasetStatus::DatasetAlreadyInSystem
                | DatasetStatus::DatasetAlreadyCaptured
                | DatasetStatus::TriggerAborted
                | DatasetStatus::TriggerAbortedDuplicateFiles
                | DatasetStatus::TriggerAbortedInstrumentMismatch
                | DatasetStatus::Ignored
        )
    }

    /// Recoverable failure; retried on the normal resolve/re-evaluation cadence.
    pub fn is_retryable_failure(&self) -> bool {
        matches!(
            self,
            DatasetStatus::FailedFileError
                | DatasetStatus::FailedNoReferenceMatch
                | DatasetStatus::FailedAmbiguousReferenceMatch
                | DatasetStatus::FailedSizeChanged
                | DatasetStatus::FailedFileMissing
                | DatasetStatus::FailedUnknown
        )
    }

    /// Still moving through a pipeline (abort flips these to `TriggerAborted`).
    pub fn is_in_flight(&self) -> bool {
        matches!(self, DatasetStatus::Pending | DatasetStatus::ValidatingStable)
    }
}

impl fmt::Display for DatasetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DatasetStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(DatasetStatus::Pending),
            "VALIDATING_STABLE" => Ok(DatasetStatus::ValidatingStable),
            "TRIGGER_FILE_SENT" => Ok(DatasetStatus::TriggerFileSent),
            "FAILED_FILE_ERROR" => Ok(DatasetStatus::FailedFileError),
            "FAILED_NO_REFERENCE_MATCH" => Ok(DatasetStatus::FailedNoReferenceMatch),
            "FAILED_AMBIGUOUS_REFERENCE_MATCH" => Ok(DatasetStatus::FailedAmbiguousReferenceMatch),
            "FAILED_SIZE_CHANGED" => Ok(DatasetStatus::FailedSizeChanged),
            "FAILED_FILE_MISSING" => Ok(DatasetStatus::FailedFileMissing),
            "FAILED_UNKNOWN" => Ok(DatasetStatus::FailedUnknown),
            "DATASET_ALREADY_IN_SYSTEM" => Ok(DatasetStatus::DatasetAlreadyInSystem),
            "DATASET_ALREADY_CAPTURED" => Ok(DatasetStatus::DatasetAlreadyCaptured),
            "MISSING_REQUIRED_INFO" => Ok(DatasetStatus::MissingRequiredInfo),
            "TRIGGER_ABORTED" => Ok(DatasetStatus::TriggerAborted),
            "TRIGGER_ABORTED_DUPLICATE_FILES" => Ok(DatasetStatus::TriggerAbortedDuplicateFiles),
            "TRIGGER_ABORTED_INSTRUMENT_MISMATCH" => {
                Ok(DatasetStatus::TriggerAbortedInstrumentMismatch)
            }
            "IGNORED" => Ok(DatasetStatus::Ignored),
            _ => Err(format!("Invalid dataset status: '{}'", s)),
        }
    }
}

// ============================================================================
// Metadata
// ============================================================================

/// Dataset metadata bundle.
///
/// Fields default from the watch configuration at discovery time and are
/// overwritten by a confirmed reference match, with the exception of
/// locally-set cart identity which always wins.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DatasetMetadata {
    #[serde(default)]
    pub instrument: Option<String>,
    #[serde(default)]
    pub cart_name: Option<String>,
    #[serde(default)]
    pub cart_config_name: Option<String>,
    #[serde(default)]
    pub operator: Option<String>,
    #[serde(default)]
    pub experiment: Option<String>,
    #[serde(default)]
    pub work_package: Option<String>,
    #[serde(default)]
    pub lc_column: Option<String>,
    #[serde(default)]
    pub dataset_type: Option<String>,
    #[serde(default)]
    pub interest_rating: Option<String>,
    #[serde(default)]
    pub eus_usage_type: Option<String>,
    #[serde(default)]
    pub eus_proposal_id: Option<String>,
    #[serde(default)]
    pub eus_users: Vec<String>,
    /// Request id of the matched reference run, when one exists.
    #[serde(default)]
    pub request_id: Option<u64>,
}

// ============================================================================
// Reference data
// ============================================================================

/// Pre-registered requested-run record from the scheduling database.
///
/// Immutable once retrieved; a refreshed snapshot replaces the whole
/// matcher index rather than patching individual records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceRunRecord {
    pub request_id: u64,
    pub dataset_name: String,
    #[serde(default)]
    pub instrument: Option<String>,
    #[serde(default)]
    pub cart_name: Option<String>,
    #[serde(default)]
    pub experiment: Option<String>,
    #[serde(default)]
    pub work_package: Option<String>,
    #[serde(default)]
    pub eus_usage_type: Option<String>,
    #[serde(default)]
    pub eus_proposal_id: Option<String>,
    #[serde(default)]
    pub eus_users: Vec<String>,
}

// ============================================================================
// Hashes
// ============================================================================

/// Content hash of one constituent file of a candidate dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHashRecord {
    pub path: PathBuf,
    /// Lowercase hex digest.
    pub sha1: String,
}

impl FileHashRecord {
    /// Hash algorithm spoken by the reference hash provider.
    pub const ALGORITHM: &'static str = "sha1";
}

/// An already-ingested file reported by the provider as carrying the same
/// content hash as a candidate's file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashMatchInfo {
    pub sha1: String,
    pub dataset_name: String,
    #[serde(default)]
    pub stored_path: Option<String>,
}

// ============================================================================
// Stability
// ============================================================================

/// Size/entry-count snapshot of a file or directory.
///
/// Two equal snapshots taken across the stability window define "stable".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PathStats {
    pub exists: bool,
    pub size_bytes: u64,
    pub file_count: u64,
}

// ============================================================================
// Trigger payload
// ============================================================================

/// Fully-resolved trigger content, built in memory before any artifact is
/// written so validation errors surface without side effects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerPayload {
    pub dataset_name: String,
    pub instrument: String,
    #[serde(default)]
    pub cart_name: Option<String>,
    #[serde(default)]
    pub cart_config_name: Option<String>,
    #[serde(default)]
    pub operator: Option<String>,
    #[serde(default)]
    pub request_id: Option<u64>,
    #[serde(default)]
    pub experiment: Option<String>,
    #[serde(default)]
    pub work_package: Option<String>,
    #[serde(default)]
    pub lc_column: Option<String>,
    #[serde(default)]
    pub dataset_type: Option<String>,
    #[serde(default)]
    pub interest_rating: Option<String>,
    #[serde(default)]
    pub eus_usage_type: Option<String>,
    #[serde(default)]
    pub eus_proposal_id: Option<String>,
    #[serde(default)]
    pub eus_users: Vec<String>,
    pub capture_subdirectory: String,
    pub source_path: PathBuf,
    pub run_start: DateTime<Utc>,
    pub run_finish: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrips_through_str() {
        for status in [
            DatasetStatus::Pending,
            DatasetStatus::TriggerFileSent,
            DatasetStatus::FailedAmbiguousReferenceMatch,
            DatasetStatus::TriggerAbortedDuplicateFiles,
            DatasetStatus::Ignored,
        ] {
            let parsed: DatasetStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("NOT_A_STATUS".parse::<DatasetStatus>().is_err());
    }

    #[test]
    fn terminal_and_retryable_are_disjoint() {
        let all = [
            DatasetStatus::Pending,
            DatasetStatus::ValidatingStable,
            DatasetStatus::TriggerFileSent,
            DatasetStatus::FailedFileError,
            DatasetStatus::FailedNoReferenceMatch,
            DatasetStatus::FailedAmbiguousReferenceMatch,
            DatasetStatus::FailedSizeChanged,
            DatasetStatus::FailedFileMissing,
            DatasetStatus::FailedUnknown,
            DatasetStatus::DatasetAlreadyInSystem,
            DatasetStatus::DatasetAlreadyCaptured,
            DatasetStatus::MissingRequiredInfo,
            DatasetStatus::TriggerAborted,
            DatasetStatus::TriggerAbortedDuplicateFiles,
            DatasetStatus::TriggerAbortedInstrumentMismatch,
            DatasetStatus::Ignored,
        ];
        for status in all {
            assert!(
                !(status.is_terminal() && status.is_retryable_failure()),
                "{status} is both terminal and retryable"
            );
        }
    }

    #[test]
    fn path_stats_equality_is_exact() {
        let a = PathStats { exists: true, size_bytes: 1024, file_count: 3 };
        let b = PathStats { exists: true, size_bytes: 1025, file_count: 3 };
        assert_ne!(a, b);
        assert_eq!(a, a);
    }
}

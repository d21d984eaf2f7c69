//! Shared types for Aquifer Capture.
//!
//! Canonical enums and data carriers used across the capture engine,
//! the CLI, and external collaborators (reference provider, trigger sink).
//! Everything here is plain data; behavior lives in `aquifer_capture`.

pub mod config;
pub mod defaults;
pub mod types;

// Re-export types for convenience
pub use config::{QcMonitorRule, SearchDepth, WatchConfig, WatchMatchMode};
pub use types::{
    // Canonical enums (use these everywhere)
    DatasetId,
    DatasetMetadata,
    DatasetSource,
    DatasetStatus,
    FileHashRecord,
    HashMatchInfo,
    PathStats,
    ReferenceRunRecord,
    TriggerPayload,
};

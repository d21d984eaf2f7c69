//! Error types for the capture engine.
//!
//! Per-dataset problems are never surfaced here - they are absorbed into
//! the dataset's status and warning string. `CaptureError` is reserved for
//! conditions that make a whole operation impossible (provider unreachable,
//! watch setup failure, broken configuration).

use std::io;
use thiserror::Error;

/// Capture engine error type
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Reference provider error: {0}")]
    Provider(String),

    #[error("Trigger sink error: {0}")]
    Sink(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

pub type Result<T> = std::result::Result<T, CaptureError>;

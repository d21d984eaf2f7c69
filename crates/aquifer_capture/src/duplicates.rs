//! Content-hash duplicate detection.
//!
//! A dataset that passed stability may still be a re-capture of data the
//! archive already holds under another name or location. Constituent files
//! are hashed and the digests checked against the provider's record of
//! ingested files. Detection is per dataset so one slow hash never delays
//! the rest of a batch.

use crate::error::{CaptureError, Result};
use crate::providers::ReferenceProvider;
use aquifer_protocol::{FileHashRecord, HashMatchInfo};
use sha1::{Digest, Sha1};
use std::io;
use std::path::Path;
use tracing::debug;

/// Outcome of a duplicate check for one dataset.
#[derive(Debug, Clone, PartialEq)]
pub enum DuplicateVerdict {
    Unique,
    /// At least one constituent file's hash is already ingested.
    Duplicate(Vec<HashMatchInfo>),
    /// A file could not be read while hashing (moved, locked, permission).
    ReadError(String),
}

fn hash_file(path: &Path) -> io::Result<FileHashRecord> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha1::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(FileHashRecord {
        path: path.to_path_buf(),
        sha1: format!("{:x}", hasher.finalize()),
    })
}

/// Hash every constituent file of a candidate: the file itself, or every
/// file under a directory dataset.
pub fn hash_constituents(path: &Path, is_directory: bool) -> io::Result<Vec<FileHashRecord>> {
    if !is_directory {
        return Ok(vec![hash_file(path)?]);
    }

    let mut records = Vec::new();
    for entry in walkdir::WalkDir::new(path) {
        let entry = entry.map_err(io::Error::other)?;
        if entry.file_type().is_file() {
            records.push(hash_file(entry.path())?);
        }
    }
    Ok(records)
}

/// Check one dataset against the provider's ingested-hash records.
///
/// Read problems while hashing are a per-dataset verdict, not an error;
/// only a provider outage escapes as `Err`.
pub fn check_duplicates(
    provider: &dyn ReferenceProvider,
    path: &Path,
    is_directory: bool,
) -> Result<DuplicateVerdict> {
    let hashes = match hash_constituents(path, is_directory) {
        Ok(hashes) => hashes,
        Err(e) => return Ok(DuplicateVerdict::ReadError(e.to_string())),
    };
    if hashes.is_empty() {
        return Ok(DuplicateVerdict::Unique);
    }

    let matches = provider
        .matching_file_hashes(&hashes)
        .map_err(|e| CaptureError::Provider(e.to_string()))?;
    if matches.is_empty() {
        Ok(DuplicateVerdict::Unique)
    } else {
        debug!(path = %path.display(), matches = matches.len(), "Duplicate content detected");
        Ok(DuplicateVerdict::Duplicate(matches))
    }
}

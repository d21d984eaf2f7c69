//! Trigger creation pipeline.
//!
//! resolve -> simulate -> instrument match -> stability -> duplicates ->
//! finalize. Failures are per dataset: a dataset that cannot proceed ends
//! in a named status with a human-readable warning and the rest of the
//! batch keeps going. The whole batch stops early only when every
//! selected dataset is already in the system, or on an abort request.
//!
//! Stability runs once over the surviving batch so total wait time is
//! bounded by one window; duplicate checks stream, handing each passing
//! dataset straight to finalization so a slow hash never delays the rest.

use crate::cancel::CancelToken;
use crate::dataset::{CandidateDataset, DatasetHandle};
use crate::duplicates::{check_duplicates, DuplicateVerdict};
use crate::error::Result;
use crate::metrics::{incr, METRICS};
use crate::providers::{ReferenceProvider, TriggerSink};
use crate::resolver::RunResolver;
use crate::stability::{verify_stable, StabilityOutcome};
use aquifer_protocol::{DatasetStatus, TriggerPayload, WatchConfig};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// On-disk layout an instrument family produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InstrumentLayout {
    SingleFile,
    DatasetDirectory,
}

/// Naming-convention table: instrument-name fragment -> expected layout.
/// Instruments absent from the table are not checked.
const INSTRUMENT_LAYOUTS: &[(&str, InstrumentLayout)] = &[
    ("exactive", InstrumentLayout::SingleFile),
    ("orbitrap", InstrumentLayout::SingleFile),
    ("lumos", InstrumentLayout::SingleFile),
    ("eclipse", InstrumentLayout::SingleFile),
    ("velos", InstrumentLayout::SingleFile),
    ("ltq", InstrumentLayout::SingleFile),
    ("tsq", InstrumentLayout::SingleFile),
    ("agilent", InstrumentLayout::DatasetDirectory),
    ("qtof", InstrumentLayout::DatasetDirectory),
    ("timstof", InstrumentLayout::DatasetDirectory),
    ("bruker", InstrumentLayout::DatasetDirectory),
];

fn expected_layout(instrument: &str) -> Option<InstrumentLayout> {
    let instrument = instrument.to_lowercase();
    INSTRUMENT_LAYOUTS
        .iter()
        .find(|(fragment, _)| instrument.contains(fragment))
        .map(|(_, layout)| *layout)
}

/// Per-batch result counts; per-dataset detail lives on the datasets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
    pub aborted: usize,
}

/// Drives the trigger pipeline over a selected batch.
pub struct TriggerOrchestrator {
    resolver: Arc<RunResolver>,
    provider: Arc<dyn ReferenceProvider>,
    sink: Arc<dyn TriggerSink>,
    config: Arc<WatchConfig>,
}

impl TriggerOrchestrator {
    pub fn new(
        resolver: Arc<RunResolver>,
        provider: Arc<dyn ReferenceProvider>,
        sink: Arc<dyn TriggerSink>,
        config: Arc<WatchConfig>,
    ) -> Self {
        Self {
            resolver,
            provider,
            sink,
            config,
        }
    }

    /// Build the trigger content in memory, surfacing validation problems
    /// without side effects.
    pub fn simulate(&self, entry: &CandidateDataset) -> std::result::Result<TriggerPayload, String> {
        if entry.name.trim().is_empty() {
            return Err("Dataset name is empty".to_string());
        }
        let instrument = entry
            .metadata
            .instrument
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| format!("Dataset '{}' has no instrument assigned", entry.name))?;

        Ok(TriggerPayload {
            dataset_name: entry.name.clone(),
            instrument: instrument.to_string(),
            cart_name: entry.metadata.cart_name.clone(),
            cart_config_name: entry.metadata.cart_config_name.clone(),
            operator: entry.metadata.operator.clone(),
            request_id: entry.metadata.request_id,
            experiment: entry.metadata.experiment.clone(),
            work_package: entry.metadata.work_package.clone(),
            lc_column: entry.metadata.lc_column.clone(),
            dataset_type: entry.metadata.dataset_type.clone(),
            interest_rating: entry.metadata.interest_rating.clone(),
            eus_usage_type: entry.metadata.eus_usage_type.clone(),
            eus_proposal_id: entry.metadata.eus_proposal_id.clone(),
            eus_users: entry.metadata.eus_users.clone(),
            capture_subdirectory: entry.capture_subdirectory.clone(),
            source_path: entry.path.clone(),
            run_start: entry.run_start,
            run_finish: entry.run_finish,
            created_at: Utc::now(),
        })
    }

    /// Run the full pipeline over a batch.
    pub fn create_triggers(
        &self,
        batch: &[DatasetHandle],
        cancel: &CancelToken,
    ) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        if batch.is_empty() {
            return Ok(outcome);
        }

        // Stage 1: resolve everything lacking a confirmed match.
        if self.check_abort(batch, cancel, &mut outcome) {
            return Ok(outcome);
        }
        for handle in batch {
            let needs_resolve = {
                let entry = handle.lock().unwrap_or_else(|e| e.into_inner());
                !entry.matched && !entry.status.is_terminal()
            };
            if needs_resolve {
                self.resolver.resolve(handle, true)?;
            }
        }

        let all_in_system = batch.iter().all(|handle| {
            handle.lock().unwrap_or_else(|e| e.into_inner()).status
                == DatasetStatus::DatasetAlreadyInSystem
        });
        if all_in_system {
            info!(datasets = batch.len(), "Every selected dataset already exists; nothing to do");
            outcome.skipped = batch.len();
            return Ok(outcome);
        }

        // Stage 2: simulate.
        if self.check_abort(batch, cancel, &mut outcome) {
            return Ok(outcome);
        }
        let mut survivors: Vec<(DatasetHandle, TriggerPayload)> = Vec::new();
        for handle in batch {
            let mut entry = handle.lock().unwrap_or_else(|e| e.into_inner());
            if entry.status.is_terminal() {
                outcome.skipped += 1;
                continue;
            }
            match self.simulate(&entry) {
                Ok(payload) => {
                    // Passing simulation re-enters the pipeline, clearing
                    // any earlier retryable failure.
                    entry.set_status(DatasetStatus::Pending);
                    drop(entry);
                    survivors.push((Arc::clone(handle), payload));
                }
                Err(message) => {
                    warn!(dataset = %entry.name, %message, "Trigger simulation failed");
                    entry.set_failure(DatasetStatus::MissingRequiredInfo, message);
                    outcome.failed += 1;
                }
            }
        }

        // Stage 3: instrument naming conventions.
        survivors.retain(|(handle, payload)| {
            let mut entry = handle.lock().unwrap_or_else(|e| e.into_inner());
            match expected_layout(&payload.instrument) {
                Some(InstrumentLayout::SingleFile) if entry.is_directory => {
                    entry.set_failure(
                        DatasetStatus::TriggerAbortedInstrumentMismatch,
                        format!("{} datasets are single files, found a directory", payload.instrument),
                    );
                    outcome.failed += 1;
                    false
                }
                Some(InstrumentLayout::DatasetDirectory) if !entry.is_directory => {
                    entry.set_failure(
                        DatasetStatus::TriggerAbortedInstrumentMismatch,
                        format!("{} datasets are directories, found a file", payload.instrument),
                    );
                    outcome.failed += 1;
                    false
                }
                _ => true,
            }
        });

        // Stage 4: one stability window for the whole batch.
        if self.check_abort(batch, cancel, &mut outcome) {
            return Ok(outcome);
        }
        let stability_handles: Vec<DatasetHandle> =
            survivors.iter().map(|(handle, _)| Arc::clone(handle)).collect();
        let window = Duration::from_secs(self.config.stability_window_secs);
        if verify_stable(&stability_handles, window, cancel) == StabilityOutcome::Cancelled {
            outcome.aborted += abort_in_flight(batch);
            return Ok(outcome);
        }
        survivors.retain(|(handle, _)| {
            let stable = handle.lock().unwrap_or_else(|e| e.into_inner()).status
                == DatasetStatus::ValidatingStable;
            if !stable {
                outcome.failed += 1;
            }
            stable
        });

        // Stages 5+6: duplicate check and finalization, streamed per
        // dataset.
        for (handle, payload) in survivors {
            if self.check_abort(batch, cancel, &mut outcome) {
                return Ok(outcome);
            }
            let (path, is_directory) = {
                let entry = handle.lock().unwrap_or_else(|e| e.into_inner());
                (entry.path.clone(), entry.is_directory)
            };
            match check_duplicates(self.provider.as_ref(), &path, is_directory)? {
                DuplicateVerdict::Unique => self.finalize(&handle, &payload, &mut outcome),
                DuplicateVerdict::Duplicate(matches) => {
                    let mut entry = handle.lock().unwrap_or_else(|e| e.into_inner());
                    let names: Vec<&str> =
                        matches.iter().map(|m| m.dataset_name.as_str()).collect();
                    entry.set_failure(
                        DatasetStatus::TriggerAbortedDuplicateFiles,
                        format!("Content already ingested as: {}", names.join(", ")),
                    );
                    incr(&METRICS.duplicates_detected);
                    outcome.failed += 1;
                }
                DuplicateVerdict::ReadError(message) => {
                    let mut entry = handle.lock().unwrap_or_else(|e| e.into_inner());
                    entry.set_failure(
                        DatasetStatus::FailedFileError,
                        format!("Hashing failed: {}", message),
                    );
                    outcome.failed += 1;
                }
            }
        }

        Ok(outcome)
    }

    /// Auto-trigger entry point: one dataset, no batch dialogs.
    pub fn create_single(
        &self,
        handle: &DatasetHandle,
        cancel: &CancelToken,
    ) -> Result<BatchOutcome> {
        self.create_triggers(std::slice::from_ref(handle), cancel)
    }

    fn finalize(&self, handle: &DatasetHandle, payload: &TriggerPayload, outcome: &mut BatchOutcome) {
        match self.sink.send_trigger(payload) {
            Ok(()) => {
                let mut entry = handle.lock().unwrap_or_else(|e| e.into_inner());
                entry.set_status(DatasetStatus::TriggerFileSent);
                info!(dataset = %entry.name, "Trigger sent");
                incr(&METRICS.triggers_sent);
                outcome.sent += 1;
            }
            Err(e) => {
                let mut entry = handle.lock().unwrap_or_else(|e| e.into_inner());
                // Surfaced to the operator; no automatic retry.
                entry.set_failure(
                    DatasetStatus::FailedFileError,
                    format!("Trigger write failed: {:#}", e),
                );
                warn!(dataset = %entry.name, error = %e, "Trigger write failed");
                incr(&METRICS.trigger_failures);
                outcome.failed += 1;
            }
        }
    }

    /// Observe the abort flag at a stage boundary.
    fn check_abort(
        &self,
        batch: &[DatasetHandle],
        cancel: &CancelToken,
        outcome: &mut BatchOutcome,
    ) -> bool {
        if cancel.is_cancelled() {
            outcome.aborted += abort_in_flight(batch);
            true
        } else {
            false
        }
    }
}

/// Mark every still-in-flight dataset aborted. Finalized datasets and
/// per-dataset failures recorded earlier keep their statuses.
fn abort_in_flight(batch: &[DatasetHandle]) -> usize {
    let mut aborted = 0;
    for handle in batch {
        let mut entry = handle.lock().unwrap_or_else(|e| e.into_inner());
        if entry.status.is_in_flight() {
            entry.set_status(DatasetStatus::TriggerAborted);
            incr(&METRICS.triggers_aborted);
            aborted += 1;
        }
    }
    aborted
}

//! Reference resolution.
//!
//! Correlates candidate datasets with requested-run records and computes
//! their effective metadata. All metadata precedence lives in one pure
//! function, `resolve_metadata`; nothing else conditionally mutates fields.
//!
//! Precedence rule: a locally-set cart or cart-config value always wins
//! over the reference-supplied value. Every other field prefers the
//! reference value when a confirmed match exists, then the locally-set
//! value, then the watcher default (defaults are skipped entirely once a
//! match has locked the entry).

use crate::dataset::DatasetHandle;
use crate::error::{CaptureError, Result};
use crate::metrics::{incr, METRICS};
use crate::providers::ReferenceProvider;
use crate::trie::{RunMatcher, TrieLookup};
use aquifer_protocol::defaults::{ARCHIVAL_PREFIX, QC_INTEREST_RATING};
use aquifer_protocol::{
    DatasetMetadata, DatasetStatus, QcMonitorRule, ReferenceRunRecord, WatchConfig,
};
use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

/// Compute a dataset's effective metadata from the three possible sources.
pub fn resolve_metadata(
    existing: &DatasetMetadata,
    locked: bool,
    defaults: &DatasetMetadata,
    reference: Option<&ReferenceRunRecord>,
) -> DatasetMetadata {
    let mut resolved = existing.clone();

    if let Some(reference) = reference {
        resolved.instrument = reference.instrument.clone().or(resolved.instrument);
        // Local cart identity always wins over the reference record.
        if resolved.cart_name.is_none() {
            resolved.cart_name = reference.cart_name.clone();
        }
        resolved.experiment = reference.experiment.clone().or(resolved.experiment);
        resolved.work_package = reference.work_package.clone().or(resolved.work_package);
        resolved.eus_usage_type = reference.eus_usage_type.clone().or(resolved.eus_usage_type);
        resolved.eus_proposal_id =
            reference.eus_proposal_id.clone().or(resolved.eus_proposal_id);
        if !reference.eus_users.is_empty() {
            resolved.eus_users = reference.eus_users.clone();
        }
        resolved.request_id = Some(reference.request_id);
        return resolved;
    }

    if locked {
        // A confirmed match owns this entry; defaults must not touch it.
        return resolved;
    }

    resolved.instrument = resolved.instrument.or_else(|| defaults.instrument.clone());
    resolved.cart_name = resolved.cart_name.or_else(|| defaults.cart_name.clone());
    resolved.cart_config_name =
        resolved.cart_config_name.or_else(|| defaults.cart_config_name.clone());
    resolved.operator = resolved.operator.or_else(|| defaults.operator.clone());
    resolved.experiment = resolved.experiment.or_else(|| defaults.experiment.clone());
    resolved.work_package = resolved.work_package.or_else(|| defaults.work_package.clone());
    resolved.lc_column = resolved.lc_column.or_else(|| defaults.lc_column.clone());
    resolved.dataset_type = resolved.dataset_type.or_else(|| defaults.dataset_type.clone());
    resolved.interest_rating =
        resolved.interest_rating.or_else(|| defaults.interest_rating.clone());
    resolved.eus_usage_type =
        resolved.eus_usage_type.or_else(|| defaults.eus_usage_type.clone());
    resolved.eus_proposal_id =
        resolved.eus_proposal_id.or_else(|| defaults.eus_proposal_id.clone());
    if resolved.eus_users.is_empty() {
        resolved.eus_users = defaults.eus_users.clone();
    }
    resolved
}

/// QC pattern comparison form: digits stripped, dashes folded to
/// underscores, lowercased. `QC-Shew_24_01` and `QC_Shew` both normalize
/// onto `qc_shew`.
fn normalize_qc_name(name: &str) -> String {
    name.chars()
        .filter(|ch| !ch.is_ascii_digit())
        .map(|ch| if ch == '-' { '_' } else { ch.to_ascii_lowercase() })
        .collect()
}

/// Pick the monitor rule for a QC/blank dataset name. Specific patterns
/// take priority over the single allowed wildcard.
pub fn qc_rule_for<'a>(name: &str, rules: &'a [QcMonitorRule]) -> Option<&'a QcMonitorRule> {
    let normalized = normalize_qc_name(name);
    rules
        .iter()
        .filter(|rule| !rule.is_wildcard())
        .find(|rule| normalized.starts_with(&normalize_qc_name(&rule.pattern)))
        .or_else(|| rules.iter().find(|rule| rule.is_wildcard()))
}

/// Correlates candidates with the requested-run index.
pub struct RunResolver {
    matcher: Arc<RunMatcher>,
    provider: Arc<dyn ReferenceProvider>,
    config: Arc<WatchConfig>,
}

impl RunResolver {
    pub fn new(
        matcher: Arc<RunMatcher>,
        provider: Arc<dyn ReferenceProvider>,
        config: Arc<WatchConfig>,
    ) -> Self {
        Self { matcher, provider, config }
    }

    /// Pull a fresh requested-run snapshot and rebuild the index.
    pub fn refresh(&self) -> Result<usize> {
        let records = self
            .provider
            .load_reference_runs()
            .map_err(|e| CaptureError::Provider(e.to_string()))?;
        let count = records.len();
        self.matcher.rebuild(records);
        Ok(count)
    }

    /// Resolve one dataset against the reference index.
    ///
    /// Throttled per dataset unless `force`; failures are recorded on the
    /// dataset and retried on the next cadence. Only a provider outage
    /// escapes as an error.
    pub fn resolve(&self, handle: &DatasetHandle, force: bool) -> Result<()> {
        let (name, parent_name, is_qc_or_blank, locked) = {
            let mut entry = handle.lock().unwrap_or_else(|e| e.into_inner());
            if entry.status.is_terminal() {
                return Ok(());
            }
            let now = Utc::now();
            if !force {
                let throttle = Duration::minutes(self.config.resolve_throttle_minutes);
                if let Some(last) = entry.last_resolved {
                    if now - last < throttle {
                        return Ok(());
                    }
                }
            }
            entry.last_resolved = Some(now);

            if entry.name.to_lowercase().starts_with(ARCHIVAL_PREFIX) {
                entry.set_status(DatasetStatus::DatasetAlreadyCaptured);
                return Ok(());
            }

            let parent_name = entry
                .path
                .parent()
                .filter(|parent| *parent != self.config.base_path.as_path())
                .and_then(|parent| parent.file_name())
                .map(|name| name.to_string_lossy().to_string());
            (
                entry.name.clone(),
                parent_name,
                entry.is_qc || entry.is_blank,
                entry.matched,
            )
        };

        incr(&METRICS.resolutions);

        let already_ingested = self
            .provider
            .dataset_name_exists(&name)
            .map_err(|e| CaptureError::Provider(e.to_string()))?;
        if already_ingested {
            let mut entry = handle.lock().unwrap_or_else(|e| e.into_inner());
            entry.set_failure(
                DatasetStatus::DatasetAlreadyInSystem,
                format!("Dataset '{}' already exists in the system", name),
            );
            return Ok(());
        }

        // File-name lookup first; fall back to the parent directory name
        // for instruments that write multi-file dataset directories.
        let mut deepest_failure = 0usize;
        let mut matched_record = None;
        match self.matcher.find(&name) {
            TrieLookup::Exact(record) => matched_record = Some(record),
            TrieLookup::Ambiguous { depth } | TrieLookup::NoMatch { depth } => {
                deepest_failure = depth;
            }
        }
        if matched_record.is_none() {
            if let Some(parent_name) = parent_name {
                match self.matcher.find(&parent_name) {
                    TrieLookup::Exact(record) => matched_record = Some(record),
                    TrieLookup::Ambiguous { depth } | TrieLookup::NoMatch { depth } => {
                        deepest_failure = deepest_failure.max(depth);
                    }
                }
            }
        }

        match matched_record {
            Some(record) => self.apply_match(handle, locked, record),
            None => self.record_failure(handle, is_qc_or_blank, deepest_failure),
        }
        Ok(())
    }

    fn apply_match(&self, handle: &DatasetHandle, locked: bool, record: ReferenceRunRecord) {
        // Cart config lookup happens outside the entry lock.
        let cart_config = {
            let entry = handle.lock().unwrap_or_else(|e| e.into_inner());
            let needs_config =
                entry.metadata.cart_config_name.is_none() && record.cart_name.is_some();
            let cart = record.cart_name.clone();
            drop(entry);
            if needs_config {
                cart.and_then(|cart| match self.provider.cart_config_names(&cart) {
                    Ok(names) => names.into_iter().next(),
                    Err(e) => {
                        warn!(cart = %cart, error = %e, "Cart config lookup failed");
                        None
                    }
                })
            } else {
                None
            }
        };

        let mut entry = handle.lock().unwrap_or_else(|e| e.into_inner());
        debug!(
            id = %entry.id,
            dataset = %entry.name,
            request_id = record.request_id,
            "Reference match confirmed"
        );
        let resolved = resolve_metadata(
            &entry.metadata,
            locked,
            &self.config.default_metadata,
            Some(&record),
        );
        entry.metadata = resolved;
        if entry.metadata.cart_config_name.is_none() {
            entry.metadata.cart_config_name = cart_config;
        }
        entry.matched = true;
        if entry.status.is_retryable_failure() {
            entry.set_status(DatasetStatus::Pending);
        }
    }

    fn record_failure(&self, handle: &DatasetHandle, is_qc_or_blank: bool, depth: usize) {
        let mut entry = handle.lock().unwrap_or_else(|e| e.into_inner());

        if is_qc_or_blank {
            // QC/blank datasets are expected to miss the reference index;
            // a monitor rule supplies their metadata instead.
            if let Some(rule) = qc_rule_for(&entry.name, &self.config.qc_rules) {
                debug!(dataset = %entry.name, pattern = %rule.pattern, "QC monitor rule applied");
                entry.metadata.experiment = Some(rule.experiment.clone());
                let resolved = resolve_metadata(&entry.metadata, false, &rule.metadata, None);
                entry.metadata = resolved;
                entry.metadata.interest_rating = Some(QC_INTEREST_RATING.to_string());
            }
            return;
        }

        incr(&METRICS.resolution_failures);
        if depth >= self.config.ambiguity_depth {
            entry.set_failure(
                DatasetStatus::FailedAmbiguousReferenceMatch,
                format!("Several requested runs share a {}-character prefix", depth),
            );
        } else {
            entry.set_failure(
                DatasetStatus::FailedNoReferenceMatch,
                format!("No requested run matches (search depth {})", depth),
            );
        }
    }
}

//! Background auto-trigger scheduling.
//!
//! Two independent periodic loops. The re-evaluation loop walks every
//! watcher-sourced registry entry through an ordered gate (already
//! ingested, artifact exists, present and big enough, not recently
//! written, no acquisition lock) and either fires a single-dataset
//! trigger pipeline or parks the entry in the countdown set. The
//! countdown loop runs at sub-second cadence purely to keep remaining
//! wait / percent-elapsed numbers fresh for display.
//!
//! Each tick runs to completion before its next sleep is armed, so ticks
//! never overlap. The scheduler has no external cancellation; it stops
//! with the session.

use crate::cancel::CancelToken;
use crate::orchestrator::TriggerOrchestrator;
use crate::providers::{LockProbe, ReferenceProvider, TriggerSink};
use crate::registry::DatasetRegistry;
use crate::resolver::RunResolver;
use crate::stability::capture_stats;
use aquifer_protocol::{DatasetId, DatasetSource, DatasetStatus, WatchConfig};
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Re-evaluation cadence.
pub const REEVALUATE_INTERVAL: Duration = Duration::from_secs(15);

/// Countdown display cadence.
pub const COUNTDOWN_INTERVAL: Duration = Duration::from_millis(250);

/// A change notification younger than this means the instrument is still
/// writing; hold off regardless of the configured wait.
const RECENT_WRITE_GRACE_SECS: i64 = 60;

/// Display state for a dataset waiting out its trigger delay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Countdown {
    pub total_secs: i64,
    pub remaining_secs: i64,
    pub percent_elapsed: f64,
}

/// Owns the re-evaluation and countdown loops.
pub struct AutoTriggerScheduler {
    registry: Arc<DatasetRegistry>,
    resolver: Arc<RunResolver>,
    orchestrator: Arc<TriggerOrchestrator>,
    provider: Arc<dyn ReferenceProvider>,
    sink: Arc<dyn TriggerSink>,
    probe: Arc<dyn LockProbe>,
    config: Arc<WatchConfig>,
    /// Keyed by dataset identity; read concurrently by display code while
    /// the loops mutate it.
    countdown: DashMap<DatasetId, Countdown>,
}

impl AutoTriggerScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<DatasetRegistry>,
        resolver: Arc<RunResolver>,
        orchestrator: Arc<TriggerOrchestrator>,
        provider: Arc<dyn ReferenceProvider>,
        sink: Arc<dyn TriggerSink>,
        probe: Arc<dyn LockProbe>,
        config: Arc<WatchConfig>,
    ) -> Self {
        Self {
            registry,
            resolver,
            orchestrator,
            provider,
            sink,
            probe,
            config,
            countdown: DashMap::new(),
        }
    }

    /// Current countdown display state.
    pub fn countdown_snapshot(&self) -> Vec<(DatasetId, Countdown)> {
        self.countdown
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect()
    }

    /// One pass of the re-evaluation gate over the registry.
    pub fn reevaluate_once(&self) {
        for handle in self.registry.snapshot() {
            let (id, name, path, is_directory, source, status, run_finish) = {
                let entry = handle.lock().unwrap_or_else(|e| e.into_inner());
                (
                    entry.id,
                    entry.name.clone(),
                    entry.path.clone(),
                    entry.is_directory,
                    entry.source,
                    entry.status,
                    entry.run_finish,
                )
            };

            if source != DatasetSource::Watcher || status.is_terminal() {
                self.countdown.remove(&id);
                continue;
            }

            // Gate 1: name already ingested.
            match self.provider.dataset_name_exists(&name) {
                Ok(true) => {
                    let mut entry = handle.lock().unwrap_or_else(|e| e.into_inner());
                    entry.set_failure(
                        DatasetStatus::DatasetAlreadyInSystem,
                        format!("Dataset '{}' already exists in the system", name),
                    );
                    self.countdown.remove(&id);
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(dataset = %name, error = %e, "Ingest check failed; will retry");
                    continue;
                }
            }

            // Gate 2: trigger artifact already at the destination.
            match self.sink.trigger_exists(&name) {
                Ok(true) => {
                    let mut entry = handle.lock().unwrap_or_else(|e| e.into_inner());
                    info!(dataset = %name, "Trigger artifact already present; marking sent");
                    entry.set_status(DatasetStatus::TriggerFileSent);
                    self.countdown.remove(&id);
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(dataset = %name, error = %e, "Trigger lookup failed; will retry");
                    continue;
                }
            }

            // Gate 3: still on disk and above the size floor.
            let stats = capture_stats(&path);
            if !stats.exists {
                let mut entry = handle.lock().unwrap_or_else(|e| e.into_inner());
                entry.set_failure(
                    DatasetStatus::FailedFileMissing,
                    "Dataset no longer present on the watched path",
                );
                self.countdown.remove(&id);
                continue;
            }
            if stats.size_bytes < self.config.minimum_file_size_kb * 1024 {
                debug!(dataset = %name, size = stats.size_bytes, "Below minimum size; waiting");
                continue;
            }

            // Gate 4: not recently written and not locked by acquisition
            // software.
            let now = Utc::now();
            let since_finish = (now - run_finish).num_seconds();
            if since_finish < RECENT_WRITE_GRACE_SECS {
                continue;
            }
            if let Some(holder) = self.probe.lock_holder(&path, is_directory) {
                debug!(dataset = %name, process = %holder, "Acquisition lock held; waiting");
                continue;
            }

            // Gate 5: configured wait elapsed since run-finish.
            let wait_secs = self.config.trigger_wait_minutes.max(0) * 60;
            if since_finish >= wait_secs {
                self.countdown.remove(&id);
                self.auto_create(&handle, &name);
            } else {
                let remaining = wait_secs - since_finish;
                self.countdown.insert(
                    id,
                    Countdown {
                        total_secs: wait_secs,
                        remaining_secs: remaining,
                        percent_elapsed: percent_elapsed(wait_secs, remaining),
                    },
                );
            }
        }
    }

    /// One pass of the countdown display refresh.
    pub fn countdown_once(&self) {
        let now = Utc::now();
        self.countdown.retain(|id, countdown| {
            let Some(handle) = self.registry.get(*id) else {
                return false;
            };
            let entry = handle.lock().unwrap_or_else(|e| e.into_inner());
            if entry.status.is_terminal() || entry.source == DatasetSource::Searcher {
                return false;
            }
            let since_finish = (now - entry.run_finish).num_seconds();
            let remaining = countdown.total_secs - since_finish;
            if remaining <= 0 {
                // Wait has elapsed; the re-evaluation loop takes it from
                // here.
                return false;
            }
            countdown.remaining_secs = remaining;
            countdown.percent_elapsed = percent_elapsed(countdown.total_secs, remaining);
            true
        });
    }

    /// Single-dataset auto-creation: full resolve -> simulate -> finalize,
    /// no batch dialogs, gated by the no-match toggles.
    fn auto_create(&self, handle: &crate::dataset::DatasetHandle, name: &str) {
        if let Err(e) = self.resolver.resolve(handle, false) {
            warn!(dataset = %name, error = %e, "Resolution failed before auto-trigger");
            return;
        }

        let allowed = {
            let entry = handle.lock().unwrap_or_else(|e| e.into_inner());
            if entry.status.is_terminal() {
                return;
            }
            if entry.matched {
                true
            } else if entry.is_qc || entry.is_blank {
                self.config.trigger_on_qc_no_match
            } else {
                self.config.trigger_on_no_match
            }
        };
        if !allowed {
            debug!(dataset = %name, "No reference match and auto-trigger on failure is disabled");
            return;
        }

        match self.orchestrator.create_single(handle, &CancelToken::new()) {
            Ok(outcome) => {
                debug!(dataset = %name, sent = outcome.sent, failed = outcome.failed, "Auto-trigger finished")
            }
            Err(e) => warn!(dataset = %name, error = %e, "Auto-trigger failed"),
        }
    }

    /// Start both loops; they stop when `shutdown` fires.
    pub fn spawn(self: &Arc<Self>, shutdown: &CancelToken) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(2);

        let scheduler = Arc::clone(self);
        let stop = shutdown.clone();
        handles.push(
            std::thread::Builder::new()
                .name("auto-trigger-reevaluate".to_string())
                .spawn(move || {
                    while !stop.is_cancelled() {
                        scheduler.reevaluate_once();
                        sleep_responsive(REEVALUATE_INTERVAL, &stop);
                    }
                })
                .expect("failed to spawn re-evaluation thread"),
        );

        let scheduler = Arc::clone(self);
        let stop = shutdown.clone();
        handles.push(
            std::thread::Builder::new()
                .name("auto-trigger-countdown".to_string())
                .spawn(move || {
                    while !stop.is_cancelled() {
                        scheduler.countdown_once();
                        sleep_responsive(COUNTDOWN_INTERVAL, &stop);
                    }
                })
                .expect("failed to spawn countdown thread"),
        );

        handles
    }
}

fn percent_elapsed(total_secs: i64, remaining_secs: i64) -> f64 {
    if total_secs <= 0 {
        return 100.0;
    }
    let elapsed = (total_secs - remaining_secs).max(0) as f64;
    (elapsed / total_secs as f64 * 100.0).min(100.0)
}

/// Sleep in small slices so shutdown is observed promptly.
fn sleep_responsive(total: Duration, stop: &CancelToken) {
    let slice = Duration::from_millis(50);
    let mut slept = Duration::ZERO;
    while slept < total && !stop.is_cancelled() {
        let step = slice.min(total - slept);
        std::thread::sleep(step);
        slept += step;
    }
}

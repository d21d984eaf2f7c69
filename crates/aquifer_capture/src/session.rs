//! Capture session composition root.
//!
//! One session owns one watch root: it constructs every component with
//! explicit dependency injection, wires the OS watcher into the event
//! router, and runs the background loops on its own threads. Dropping
//! into `shutdown` stops the watcher, fires the shared cancel token, and
//! joins every thread.

use crate::cancel::CancelToken;
use crate::dataset::DatasetHandle;
use crate::error::{CaptureError, Result};
use crate::orchestrator::{BatchOutcome, TriggerOrchestrator};
use crate::providers::{LockProbe, ReferenceProvider, TriggerSink};
use crate::registry::DatasetRegistry;
use crate::resolver::RunResolver;
use crate::scheduler::AutoTriggerScheduler;
use crate::trie::RunMatcher;
use crate::watcher::{
    accept_entry, spawn_event_loop, start_os_watcher, FsEventRouter, EVENT_CHANNEL_CAPACITY,
};
use aquifer_protocol::{DatasetSource, SearchDepth, WatchConfig, WatchMatchMode};
use notify::RecommendedWatcher;
use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::info;

/// External collaborators a session is built from.
pub struct SessionDeps {
    pub config: Arc<WatchConfig>,
    pub provider: Arc<dyn ReferenceProvider>,
    pub sink: Arc<dyn TriggerSink>,
    pub probe: Arc<dyn LockProbe>,
}

/// A running (or buildable) capture composition over one watch root.
pub struct CaptureSession {
    pub registry: Arc<DatasetRegistry>,
    pub matcher: Arc<RunMatcher>,
    pub resolver: Arc<RunResolver>,
    pub orchestrator: Arc<TriggerOrchestrator>,
    pub scheduler: Arc<AutoTriggerScheduler>,
    pub router: Arc<FsEventRouter>,
    config: Arc<WatchConfig>,
    shutdown: CancelToken,
    threads: Vec<JoinHandle<()>>,
    /// Keeps the OS watch registration alive; `None` for sweep-only
    /// sessions.
    os_watcher: Option<RecommendedWatcher>,
}

impl CaptureSession {
    /// Construct every component without starting any background work.
    ///
    /// Loads the initial requested-run snapshot; an unreachable provider
    /// is the one failure worth surfacing this early.
    pub fn build(deps: SessionDeps) -> Result<Self> {
        let SessionDeps {
            config,
            provider,
            sink,
            probe,
        } = deps;
        config.validate().map_err(CaptureError::Config)?;

        let registry = Arc::new(DatasetRegistry::new(Arc::clone(&config)));
        let matcher = Arc::new(RunMatcher::new(config.ambiguity_depth));
        let resolver = Arc::new(RunResolver::new(
            Arc::clone(&matcher),
            Arc::clone(&provider),
            Arc::clone(&config),
        ));
        let orchestrator = Arc::new(TriggerOrchestrator::new(
            Arc::clone(&resolver),
            Arc::clone(&provider),
            Arc::clone(&sink),
            Arc::clone(&config),
        ));
        let scheduler = Arc::new(AutoTriggerScheduler::new(
            Arc::clone(&registry),
            Arc::clone(&resolver),
            Arc::clone(&orchestrator),
            Arc::clone(&provider),
            Arc::clone(&sink),
            probe,
            Arc::clone(&config),
        ));
        let router = Arc::new(FsEventRouter::new(
            Arc::clone(&registry),
            Arc::clone(&config),
        ));

        let runs = resolver.refresh()?;
        info!(requested_runs = runs, root = %config.base_path.display(), "Capture session built");

        Ok(Self {
            registry,
            matcher,
            resolver,
            orchestrator,
            scheduler,
            router,
            config,
            shutdown: CancelToken::new(),
            threads: Vec::new(),
            os_watcher: None,
        })
    }

    /// Build and start the live watch: OS watcher, event router loop, and
    /// both scheduler loops.
    pub fn start(deps: SessionDeps) -> Result<Self> {
        let mut session = Self::build(deps)?;

        let (tx, rx) = mpsc::sync_channel(EVENT_CHANNEL_CAPACITY);
        session.os_watcher = Some(start_os_watcher(&session.config, tx)?);
        session.threads.push(spawn_event_loop(
            Arc::clone(&session.router),
            rx,
            session.shutdown.clone(),
        ));
        session
            .threads
            .extend(session.scheduler.spawn(&session.shutdown));

        info!(root = %session.config.base_path.display(), "Watch session started");
        Ok(session)
    }

    /// One-off sweep of the watch root (or a subdirectory of it). Entries
    /// are registered with source `Searcher` and are exempt from the
    /// auto-trigger wait.
    pub fn sweep(&self, subpath: Option<&Path>) -> Result<usize> {
        let root = match subpath {
            Some(sub) => {
                let sub = if sub.is_absolute() {
                    sub.to_path_buf()
                } else {
                    self.config.base_path.join(sub)
                };
                if !sub.starts_with(&self.config.base_path) {
                    return Err(CaptureError::Config(format!(
                        "Sweep path {} is outside the watch root",
                        sub.display()
                    )));
                }
                sub
            }
            None => self.config.base_path.clone(),
        };

        let mut found = 0usize;
        let max_depth = match self.config.search_depth {
            SearchDepth::TopLevelOnly => 1,
            SearchDepth::Recursive => usize::MAX,
        };
        for entry in walkdir::WalkDir::new(&root)
            .min_depth(1)
            .max_depth(max_depth)
            .into_iter()
            .flatten()
        {
            let path = entry.path();
            let is_directory = entry.file_type().is_dir();
            let wanted = match self.config.match_mode {
                WatchMatchMode::Extension => !is_directory,
                WatchMatchMode::Directory => is_directory,
            };
            if !wanted || !accept_entry(&self.config, path) {
                continue;
            }
            let capture_subdirectory = path
                .parent()
                .and_then(|parent| parent.strip_prefix(&self.config.base_path).ok())
                .map(|sub| sub.to_string_lossy().to_string())
                .unwrap_or_default();
            self.registry.upsert(
                path,
                is_directory,
                &capture_subdirectory,
                DatasetSource::Searcher,
                None,
            );
            found += 1;
        }
        info!(found, root = %root.display(), "Sweep finished");
        Ok(found)
    }

    /// Bulk trigger creation over every non-terminal registry entry.
    pub fn trigger_all(&self, cancel: &CancelToken) -> Result<BatchOutcome> {
        let batch: Vec<DatasetHandle> = self
            .registry
            .snapshot()
            .into_iter()
            .filter(|handle| {
                !handle
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .status
                    .is_terminal()
            })
            .collect();
        self.orchestrator.create_triggers(&batch, cancel)
    }

    /// Stop the watcher and background loops and wait for them to exit.
    pub fn shutdown(mut self) {
        // Dropping the watcher first stops new events at the source.
        self.os_watcher.take();
        self.shutdown.cancel();
        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }
        info!("Capture session stopped");
    }
}

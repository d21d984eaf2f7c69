//! Filesystem event routing.
//!
//! The OS watcher callback does one thing: map the notification to a
//! [`RawEvent`] and push it into a bounded channel. A single consumer
//! loop owns everything else - coalescing, capture-entry resolution, and
//! registry forwarding - so no watcher thread ever touches shared state.
//!
//! Watch mechanisms can emit many change notifications per second for a
//! single growing file; pending work is therefore keyed by path (at most
//! one pending entry per path) and drained on a timer rather than per
//! event. The drain timer is only re-armed after a drain completes, so
//! drains never overlap.

use crate::cancel::CancelToken;
use crate::metrics::{incr, METRICS};
use crate::registry::DatasetRegistry;
use aquifer_protocol::{DatasetSource, SearchDepth, WatchConfig, WatchMatchMode};
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// How often the pending queue is drained.
pub const DRAIN_INTERVAL: Duration = Duration::from_secs(1);

/// Bound on the watcher-to-consumer channel. When full, events are
/// dropped and counted; a later change notification or a manual sweep
/// picks the path up again.
pub const EVENT_CHANNEL_CAPACITY: usize = 512;

/// Normalized filesystem notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawEvent {
    Created(PathBuf),
    Changed(PathBuf),
    Renamed { from: PathBuf, to: PathBuf },
}

#[derive(Debug, Clone)]
enum PendingKind {
    Create,
    Change,
    Rename { from: PathBuf },
}

#[derive(Default)]
struct PendingQueue {
    /// First-enqueue order; stale entries (coalesced away) are skipped at
    /// drain time.
    order: Vec<PathBuf>,
    map: HashMap<PathBuf, PendingKind>,
}

/// Consumes raw events, resolves them to capture entries, forwards them
/// to the registry.
pub struct FsEventRouter {
    registry: Arc<DatasetRegistry>,
    config: Arc<WatchConfig>,
    pending: Mutex<PendingQueue>,
}

impl FsEventRouter {
    pub fn new(registry: Arc<DatasetRegistry>, config: Arc<WatchConfig>) -> Self {
        Self {
            registry,
            config,
            pending: Mutex::new(PendingQueue::default()),
        }
    }

    /// Queue one event, coalescing repeats for the same path.
    pub fn enqueue(&self, event: RawEvent) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        match event {
            RawEvent::Created(path) => match pending.map.get_mut(&path) {
                Some(kind) => {
                    *kind = PendingKind::Create;
                    incr(&METRICS.events_coalesced);
                }
                None => {
                    pending.order.push(path.clone());
                    pending.map.insert(path, PendingKind::Create);
                }
            },
            RawEvent::Changed(path) => {
                if pending.map.contains_key(&path) {
                    // A create or earlier change is already queued; one
                    // pending entry per path is the invariant.
                    incr(&METRICS.events_coalesced);
                } else {
                    pending.order.push(path.clone());
                    pending.map.insert(path, PendingKind::Change);
                }
            }
            RawEvent::Renamed { from, to } => {
                // Anything queued for the old path is superseded.
                if pending.map.remove(&from).is_some() {
                    incr(&METRICS.events_coalesced);
                }
                if !pending.map.contains_key(&to) {
                    pending.order.push(to.clone());
                }
                pending.map.insert(to, PendingKind::Rename { from });
            }
        }
    }

    /// Number of queued (un-coalesced) entries.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).map.len()
    }

    /// Empty the pending queue and forward surviving events, in enqueue
    /// order, to the registry.
    pub fn drain(&self) {
        let (order, mut map) = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            (
                std::mem::take(&mut pending.order),
                std::mem::take(&mut pending.map),
            )
        };
        if order.is_empty() {
            return;
        }
        trace!(events = map.len(), "Draining filesystem events");

        for path in order {
            let Some(kind) = map.remove(&path) else {
                continue;
            };
            match kind {
                PendingKind::Create | PendingKind::Change => {
                    self.forward(&path, None);
                }
                PendingKind::Rename { from } => {
                    self.forward(&path, Some(&from));
                }
            }
        }
    }

    fn forward(&self, path: &Path, old_path: Option<&Path>) {
        let Some(entry) = self.resolve_capture_entry(path) else {
            incr(&METRICS.events_dropped);
            return;
        };

        // A rename is matched against the registry (via the resolved old
        // entry) before being treated as a fresh creation.
        let old_entry = old_path.and_then(|old| self.resolve_capture_entry(old));
        let old_entry_path = match old_entry {
            Some(old) if old.path != entry.path => Some(old.path),
            // Renames inside a dataset directory resolve to the same
            // capture entry; they are just a change to that entry.
            _ => None,
        };

        self.registry.upsert(
            &entry.path,
            entry.is_directory,
            &entry.capture_subdirectory,
            DatasetSource::Watcher,
            old_entry_path.as_deref(),
        );
    }

    /// Resolve an event path to the entry that represents the dataset,
    /// walking down from the watch root only as deep as configured.
    /// Returns `None` when the path falls outside the root or fails the
    /// configured match.
    fn resolve_capture_entry(&self, path: &Path) -> Option<CaptureEntry> {
        let rel = path.strip_prefix(&self.config.base_path).ok()?;
        let first = rel.components().next()?;

        let entry_path = match self.config.search_depth {
            SearchDepth::TopLevelOnly => {
                // Deeper events roll up to their top-level ancestor.
                self.config.base_path.join(first)
            }
            SearchDepth::Recursive => match self.config.match_mode {
                WatchMatchMode::Extension => path.to_path_buf(),
                WatchMatchMode::Directory => self.matching_ancestor(path)?,
            },
        };

        if !self.accept(&entry_path) {
            return None;
        }

        let capture_subdirectory = entry_path
            .parent()
            .and_then(|parent| parent.strip_prefix(&self.config.base_path).ok())
            .map(|sub| sub.to_string_lossy().to_string())
            .unwrap_or_default();

        let is_directory = match self.config.match_mode {
            WatchMatchMode::Directory => true,
            // Some vendors write "files" that are really directories;
            // trust the filesystem when the entry still exists.
            WatchMatchMode::Extension => entry_path.is_dir(),
        };

        Some(CaptureEntry {
            path: entry_path,
            is_directory,
            capture_subdirectory,
        })
    }

    /// Walk down from the watch root and return the shallowest ancestor
    /// (or the path itself) matching the configured directory pattern.
    fn matching_ancestor(&self, path: &Path) -> Option<PathBuf> {
        let pattern = self.config.directory_pattern.as_deref()?;
        let rel = path.strip_prefix(&self.config.base_path).ok()?;
        let mut candidate = self.config.base_path.clone();
        for component in rel.components() {
            candidate.push(component);
            if matches_pattern(&component.as_os_str().to_string_lossy(), pattern) {
                return Some(candidate);
            }
        }
        None
    }

    fn accept(&self, entry_path: &Path) -> bool {
        accept_entry(&self.config, entry_path)
    }
}

/// Whether an entry name passes the configured extension/directory match.
/// Shared by the event router and the directory sweeper.
pub(crate) fn accept_entry(config: &WatchConfig, entry_path: &Path) -> bool {
    let Some(name) = entry_path.file_name().map(|n| n.to_string_lossy().to_lowercase()) else {
        return false;
    };
    match config.match_mode {
        WatchMatchMode::Extension => config
            .normalized_extensions()
            .iter()
            .any(|ext| name.ends_with(ext.as_str())),
        WatchMatchMode::Directory => config
            .directory_pattern
            .as_deref()
            .map(|pattern| matches_pattern(&name, pattern))
            .unwrap_or(false),
    }
}

struct CaptureEntry {
    path: PathBuf,
    is_directory: bool,
    capture_subdirectory: String,
}

/// Case-insensitive name match with a single `*` wildcard.
fn matches_pattern(name: &str, pattern: &str) -> bool {
    let name = name.to_lowercase();
    let pattern = pattern.to_lowercase();
    match pattern.split_once('*') {
        None => name == pattern,
        Some((prefix, suffix)) => {
            name.len() >= prefix.len() + suffix.len()
                && name.starts_with(prefix)
                && name.ends_with(suffix)
        }
    }
}

/// Start the OS-level watcher. The callback body stays minimal: map the
/// notification and try-send it into the bounded channel.
pub fn start_os_watcher(
    config: &WatchConfig,
    tx: SyncSender<RawEvent>,
) -> crate::error::Result<RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
        let event = match result {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Watch notification error");
                return;
            }
        };
        for raw in raw_events(event) {
            if tx.try_send(raw).is_err() {
                incr(&METRICS.events_dropped);
            }
        }
    })?;
    watcher.watch(&config.base_path, RecursiveMode::Recursive)?;
    Ok(watcher)
}

fn raw_events(event: notify::Event) -> Vec<RawEvent> {
    match event.kind {
        EventKind::Create(_) => event.paths.into_iter().map(RawEvent::Created).collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => {
            let mut paths = event.paths.into_iter();
            let from = paths.next().unwrap_or_default();
            let to = paths.next().unwrap_or_default();
            vec![RawEvent::Renamed { from, to }]
        }
        // Platforms that split renames: the destination half is a
        // creation, the source half carries no usable information
        // (registry removal is user-only).
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            event.paths.into_iter().map(RawEvent::Created).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Vec::new(),
        EventKind::Modify(_) => event.paths.into_iter().map(RawEvent::Changed).collect(),
        EventKind::Remove(_) | EventKind::Access(_) | EventKind::Any | EventKind::Other => {
            Vec::new()
        }
    }
}

/// Run the consumer loop: receive until the next drain tick, drain, re-arm.
pub fn spawn_event_loop(
    router: Arc<FsEventRouter>,
    rx: Receiver<RawEvent>,
    shutdown: CancelToken,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("fs-event-router".to_string())
        .spawn(move || {
            let mut next_drain = Instant::now() + DRAIN_INTERVAL;
            loop {
                if shutdown.is_cancelled() {
                    break;
                }
                let timeout = next_drain.saturating_duration_since(Instant::now());
                match rx.recv_timeout(timeout) {
                    Ok(event) => router.enqueue(event),
                    Err(RecvTimeoutError::Timeout) => {
                        // Timer is conceptually disabled here; it is only
                        // re-armed once the drain has finished.
                        router.drain();
                        next_drain = Instant::now() + DRAIN_INTERVAL;
                    }
                    Err(RecvTimeoutError::Disconnected) => {
                        router.drain();
                        break;
                    }
                }
            }
            debug!("Event router stopped");
        })
        .expect("failed to spawn fs-event-router thread")
}

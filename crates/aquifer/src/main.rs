//! Aquifer Capture CLI
//!
//! Watches an instrument output directory and hands validated datasets to
//! the downstream archive as trigger artifacts.
//!
//! Usage:
//!     aquifer --config aquifer.toml watch
//!     aquifer --config aquifer.toml sweep --send

mod config;
mod reference;
mod sinks;

use anyhow::{Context, Result};
use aquifer_capture::cancel::CancelToken;
use aquifer_capture::locks::SysinfoLockProbe;
use aquifer_capture::providers::{LockProbe, ReferenceProvider, TriggerSink};
use aquifer_capture::session::{CaptureSession, SessionDeps};
use aquifer_capture::METRICS;
use aquifer_logging::{init_logging, LogConfig};
use clap::{Parser, Subcommand};
use config::AquiferConfig;
use reference::SnapshotReferenceProvider;
use sinks::FileTriggerSink;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "aquifer", about = "Instrument dataset capture and trigger creation")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long, short, default_value = "aquifer.toml")]
    config: PathBuf,

    /// Mirror the full log stream to stderr
    #[arg(long, short)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Watch the configured root and auto-create triggers
    Watch,
    /// One-off sweep of the watch root (or a subdirectory of it)
    Sweep {
        /// Sweep only this subdirectory of the watch root
        #[arg(long)]
        path: Option<PathBuf>,

        /// Run trigger creation over the swept datasets
        #[arg(long)]
        send: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(LogConfig {
        app_name: "aquifer",
        verbose: args.verbose,
    })?;

    let config = AquiferConfig::load(&args.config)?;
    info!(root = %config.watch.base_path.display(), "Starting Aquifer Capture");

    let provider: Arc<dyn ReferenceProvider> =
        Arc::new(SnapshotReferenceProvider::open(&config.reference_snapshot)?);
    let sink: Arc<dyn TriggerSink> = Arc::new(FileTriggerSink::new(&config.trigger_destination)?);
    let probe: Arc<dyn LockProbe> = Arc::new(SysinfoLockProbe::new());
    let deps = SessionDeps {
        config: Arc::new(config.watch),
        provider,
        sink,
        probe,
    };

    match args.command {
        Command::Watch => watch(deps),
        Command::Sweep { path, send } => sweep(deps, path, send),
    }
}

fn watch(deps: SessionDeps) -> Result<()> {
    let session = CaptureSession::start(deps)?;

    let stop = register_shutdown_flag()?;
    while !stop.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(200));
    }
    info!("Shutdown requested");
    session.shutdown();

    let metrics = METRICS.snapshot();
    println!(
        "discovered {} datasets, sent {} triggers ({} failed, {} duplicates)",
        metrics.datasets_discovered,
        metrics.triggers_sent,
        metrics.trigger_failures,
        metrics.duplicates_detected
    );
    Ok(())
}

fn sweep(deps: SessionDeps, path: Option<PathBuf>, send: bool) -> Result<()> {
    let session = CaptureSession::build(deps)?;
    let found = session.sweep(path.as_deref())?;
    println!("swept {} candidate dataset(s)", found);

    if send {
        let outcome = session.trigger_all(&CancelToken::new())?;
        println!(
            "triggers: {} sent, {} failed, {} skipped",
            outcome.sent, outcome.failed, outcome.skipped
        );
    }
    Ok(())
}

/// Flip an atomic flag on SIGINT/SIGTERM (Unix) or Ctrl-C (Windows).
fn register_shutdown_flag() -> Result<Arc<AtomicBool>> {
    let stop = Arc::new(AtomicBool::new(false));

    #[cfg(unix)]
    {
        signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&stop))
            .context("Failed to register SIGINT handler")?;
        signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&stop))
            .context("Failed to register SIGTERM handler")?;
    }

    #[cfg(windows)]
    {
        let flag = Arc::clone(&stop);
        ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
            .context("Failed to register Ctrl-C handler")?;
    }

    Ok(stop)
}

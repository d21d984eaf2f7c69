//! End-to-end pipeline tests over real scratch directories and stub
//! collaborators.

use aquifer_capture::cancel::CancelToken;
use aquifer_capture::dataset::DatasetHandle;
use aquifer_capture::orchestrator::TriggerOrchestrator;
use aquifer_capture::providers::{LockProbe, ReferenceProvider, TriggerSink};
use aquifer_capture::registry::DatasetRegistry;
use aquifer_capture::resolver::RunResolver;
use aquifer_capture::scheduler::AutoTriggerScheduler;
use aquifer_capture::session::{CaptureSession, SessionDeps};
use aquifer_capture::trie::RunMatcher;
use aquifer_capture::watcher::{FsEventRouter, RawEvent};
use aquifer_protocol::{
    DatasetMetadata, DatasetSource, DatasetStatus, QcMonitorRule, TriggerPayload, WatchConfig,
};
use aquifer_test_utils::{
    reference_run, scratch_root, sha1_hex, write_dataset_file, CollectingSink, StaticLockProbe,
    StubReferenceProvider,
};
use chrono::{Duration as ChronoDuration, Utc};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    config: Arc<WatchConfig>,
    provider: Arc<StubReferenceProvider>,
    sink: Arc<CollectingSink>,
    probe: Arc<StaticLockProbe>,
    registry: Arc<DatasetRegistry>,
    resolver: Arc<RunResolver>,
    orchestrator: Arc<TriggerOrchestrator>,
    scheduler: Arc<AutoTriggerScheduler>,
    router: FsEventRouter,
}

fn harness(root: &Path, mutate: impl FnOnce(&mut WatchConfig)) -> Harness {
    let mut config = WatchConfig {
        base_path: root.to_path_buf(),
        extensions: vec![".raw".into()],
        minimum_file_size_kb: 0,
        trigger_wait_minutes: 0,
        stability_window_secs: 0,
        default_metadata: DatasetMetadata {
            instrument: Some("Exactive01".into()),
            operator: Some("Ops".into()),
            ..DatasetMetadata::default()
        },
        ..WatchConfig::default()
    };
    mutate(&mut config);
    let config = Arc::new(config);

    let provider = Arc::new(StubReferenceProvider::new());
    let sink = Arc::new(CollectingSink::new());
    let probe = Arc::new(StaticLockProbe::unlocked());

    let registry = Arc::new(DatasetRegistry::new(Arc::clone(&config)));
    let matcher = Arc::new(RunMatcher::new(config.ambiguity_depth));
    let resolver = Arc::new(RunResolver::new(
        Arc::clone(&matcher),
        provider.clone() as Arc<dyn ReferenceProvider>,
        Arc::clone(&config),
    ));
    let orchestrator = Arc::new(TriggerOrchestrator::new(
        Arc::clone(&resolver),
        provider.clone() as Arc<dyn ReferenceProvider>,
        sink.clone() as Arc<dyn TriggerSink>,
        Arc::clone(&config),
    ));
    let scheduler = Arc::new(AutoTriggerScheduler::new(
        Arc::clone(&registry),
        Arc::clone(&resolver),
        Arc::clone(&orchestrator),
        provider.clone() as Arc<dyn ReferenceProvider>,
        sink.clone() as Arc<dyn TriggerSink>,
        probe.clone() as Arc<dyn LockProbe>,
        Arc::clone(&config),
    ));
    let router = FsEventRouter::new(Arc::clone(&registry), Arc::clone(&config));

    Harness {
        config,
        provider,
        sink,
        probe,
        registry,
        resolver,
        orchestrator,
        scheduler,
        router,
    }
}

impl Harness {
    fn register(&self, path: &Path) -> DatasetHandle {
        self.registry
            .upsert(path, path.is_dir(), "", DatasetSource::Watcher, None)
    }

    /// Backdate a dataset's run-finish so wait/grace gates pass.
    fn backdate(&self, handle: &DatasetHandle, minutes: i64) {
        handle.lock().unwrap().run_finish = Utc::now() - ChronoDuration::minutes(minutes);
    }

    fn status(&self, handle: &DatasetHandle) -> DatasetStatus {
        handle.lock().unwrap().status
    }
}

#[test]
fn matched_dataset_gets_reference_metadata_and_triggers() {
    let root = scratch_root();
    let h = harness(root.path(), |_| {});
    h.provider
        .set_runs(vec![reference_run(42, "Sample_B_01", "Exactive01")]);
    h.provider.add_cart_config(
        "Cart_01",
        vec!["Cart_01_Config_A".into(), "Cart_01_Config_B".into()],
    );
    h.resolver.refresh().unwrap();

    let path = write_dataset_file(root.path(), "Sample_B_01.raw", b"run data");
    let handle = h.register(&path);

    let outcome = h
        .orchestrator
        .create_triggers(&[handle.clone()], &CancelToken::new())
        .unwrap();

    assert_eq!(outcome.sent, 1);
    assert_eq!(h.status(&handle), DatasetStatus::TriggerFileSent);
    let entry = handle.lock().unwrap();
    assert!(entry.matched);
    assert_eq!(entry.metadata.request_id, Some(42));
    assert_eq!(entry.metadata.experiment.as_deref(), Some("Exp_Default"));
    assert_eq!(
        entry.metadata.cart_config_name.as_deref(),
        Some("Cart_01_Config_A")
    );
    let sent = h.sink.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].dataset_name, "Sample_B_01");
    assert_eq!(sent[0].request_id, Some(42));
}

#[test]
fn qc_dataset_with_wildcard_rule_auto_triggers() {
    let root = scratch_root();
    let h = harness(root.path(), |config| {
        config.trigger_on_qc_no_match = true;
        config.qc_rules = vec![QcMonitorRule {
            pattern: "*".into(),
            experiment: "QC_Standard".into(),
            metadata: DatasetMetadata::default(),
        }];
    });
    h.resolver.refresh().unwrap();

    let path = write_dataset_file(root.path(), "QC-Shew_24_01.raw", b"qc run");
    let handle = h.register(&path);
    h.backdate(&handle, 5);

    h.scheduler.reevaluate_once();

    let entry = handle.lock().unwrap();
    assert!(entry.is_qc);
    assert_eq!(entry.status, DatasetStatus::TriggerFileSent);
    assert_eq!(entry.metadata.experiment.as_deref(), Some("QC_Standard"));
    assert_eq!(entry.metadata.interest_rating.as_deref(), Some("Released"));
    assert_eq!(h.sink.sent_names(), vec!["QC-Shew_24_01"]);
}

#[test]
fn unmatched_dataset_is_gated_until_toggle_allows() {
    let root = scratch_root();
    let h = harness(root.path(), |config| {
        config.trigger_on_no_match = false;
    });
    h.resolver.refresh().unwrap();

    let path = write_dataset_file(root.path(), "Mystery_Run_01.raw", b"data");
    let handle = h.register(&path);
    h.backdate(&handle, 5);

    h.scheduler.reevaluate_once();
    assert!(h.sink.sent().is_empty());
    assert_eq!(h.status(&handle), DatasetStatus::FailedNoReferenceMatch);
}

#[test]
fn already_ingested_name_goes_terminal_without_artifact() {
    let root = scratch_root();
    let h = harness(root.path(), |_| {});
    h.provider.add_existing_name("Sample_Dup_01");
    h.resolver.refresh().unwrap();

    let path = write_dataset_file(root.path(), "Sample_Dup_01.raw", b"data");
    let handle = h.register(&path);

    // Even when explicitly selected for bulk creation.
    let outcome = h
        .orchestrator
        .create_triggers(&[handle.clone()], &CancelToken::new())
        .unwrap();

    assert_eq!(h.status(&handle), DatasetStatus::DatasetAlreadyInSystem);
    assert_eq!(outcome.sent, 0);
    assert!(h.sink.sent().is_empty());
}

#[test]
fn archival_prefix_means_already_captured() {
    let root = scratch_root();
    let h = harness(root.path(), |_| {});
    h.resolver.refresh().unwrap();

    let path = write_dataset_file(root.path(), "x_Sample_Old.raw", b"data");
    let handle = h.register(&path);
    h.resolver.resolve(&handle, true).unwrap();

    assert_eq!(h.status(&handle), DatasetStatus::DatasetAlreadyCaptured);
}

#[test]
fn duplicate_content_is_excluded_in_the_same_pass() {
    let root = scratch_root();
    let h = harness(root.path(), |config| {
        config.trigger_on_no_match = true;
    });
    h.provider
        .set_runs(vec![
            reference_run(1, "Fresh_Run_01", "Exactive01"),
            reference_run(2, "Copied_Run_01", "Exactive01"),
        ]);
    h.resolver.refresh().unwrap();

    let fresh = write_dataset_file(root.path(), "Fresh_Run_01.raw", b"unique bytes");
    let copied = write_dataset_file(root.path(), "Copied_Run_01.raw", b"already archived");
    h.provider
        .add_known_hash(&sha1_hex(b"already archived"), "Old_Name_03");

    let fresh = h.register(&fresh);
    let copied = h.register(&copied);

    let outcome = h
        .orchestrator
        .create_triggers(&[fresh.clone(), copied.clone()], &CancelToken::new())
        .unwrap();

    assert_eq!(outcome.sent, 1);
    assert_eq!(h.status(&fresh), DatasetStatus::TriggerFileSent);
    assert_eq!(h.status(&copied), DatasetStatus::TriggerAbortedDuplicateFiles);
    assert_eq!(h.sink.sent_names(), vec!["Fresh_Run_01"]);
    let warning = copied.lock().unwrap().warning.clone().unwrap();
    assert!(warning.contains("Old_Name_03"));
}

#[test]
fn instrument_layout_mismatch_is_terminal_for_that_dataset() {
    let root = scratch_root();
    let h = harness(root.path(), |config| {
        config.trigger_on_no_match = true;
        // Declared instrument writes directory datasets.
        config.default_metadata.instrument = Some("Agilent_QTOF_04".into());
    });
    h.resolver.refresh().unwrap();

    let path = write_dataset_file(root.path(), "Wrong_Layout_01.raw", b"data");
    let handle = h.register(&path);

    let outcome = h
        .orchestrator
        .create_triggers(&[handle.clone()], &CancelToken::new())
        .unwrap();

    assert_eq!(outcome.sent, 0);
    assert_eq!(
        h.status(&handle),
        DatasetStatus::TriggerAbortedInstrumentMismatch
    );
}

#[test]
fn abort_before_any_finalization_aborts_all_five() {
    let root = scratch_root();
    let h = harness(root.path(), |config| {
        config.trigger_on_no_match = true;
        config.stability_window_secs = 10;
    });
    h.resolver.refresh().unwrap();

    let batch: Vec<DatasetHandle> = (0..5)
        .map(|i| {
            let path =
                write_dataset_file(root.path(), &format!("Batch_Run_{i:02}.raw"), b"data");
            h.register(&path)
        })
        .collect();

    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    let canceller = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(300));
        trigger.cancel();
    });

    let outcome = h.orchestrator.create_triggers(&batch, &cancel).unwrap();
    canceller.join().unwrap();

    assert_eq!(outcome.sent, 0);
    assert_eq!(outcome.aborted, 5);
    for handle in &batch {
        assert_eq!(h.status(handle), DatasetStatus::TriggerAborted);
    }
    assert!(h.sink.sent().is_empty());
}

/// Sink that fires a cancel token once it has accepted `after` triggers.
struct CancelAfterSink {
    inner: CollectingSink,
    cancel: CancelToken,
    after: usize,
}

impl TriggerSink for CancelAfterSink {
    fn trigger_exists(&self, dataset_name: &str) -> anyhow::Result<bool> {
        self.inner.trigger_exists(dataset_name)
    }

    fn send_trigger(&self, payload: &TriggerPayload) -> anyhow::Result<()> {
        self.inner.send_trigger(payload)?;
        if self.inner.sent().len() >= self.after {
            self.cancel.cancel();
        }
        Ok(())
    }
}

#[test]
fn abort_after_two_finalized_keeps_them_and_aborts_the_rest() {
    let root = scratch_root();
    let base = harness(root.path(), |config| {
        config.trigger_on_no_match = true;
    });
    base.resolver.refresh().unwrap();

    let cancel = CancelToken::new();
    let sink = Arc::new(CancelAfterSink {
        inner: CollectingSink::new(),
        cancel: cancel.clone(),
        after: 2,
    });
    let orchestrator = TriggerOrchestrator::new(
        Arc::clone(&base.resolver),
        base.provider.clone() as Arc<dyn ReferenceProvider>,
        sink.clone() as Arc<dyn TriggerSink>,
        Arc::clone(&base.config),
    );

    let batch: Vec<DatasetHandle> = (0..5)
        .map(|i| {
            let path =
                write_dataset_file(root.path(), &format!("Stream_Run_{i:02}.raw"), b"data");
            base.register(&path)
        })
        .collect();

    let outcome = orchestrator.create_triggers(&batch, &cancel).unwrap();

    assert_eq!(outcome.sent, 2);
    assert_eq!(outcome.aborted, 3);
    let statuses: Vec<DatasetStatus> = batch.iter().map(|h| base.status(h)).collect();
    assert_eq!(
        statuses.iter().filter(|s| **s == DatasetStatus::TriggerFileSent).count(),
        2
    );
    assert_eq!(
        statuses.iter().filter(|s| **s == DatasetStatus::TriggerAborted).count(),
        3
    );
}

#[test]
fn sink_write_failure_is_per_dataset_and_reported() {
    let root = scratch_root();
    let h = harness(root.path(), |config| {
        config.trigger_on_no_match = true;
    });
    h.resolver.refresh().unwrap();
    h.sink.set_fail_writes(true);

    let a = h.register(&write_dataset_file(root.path(), "Fail_A.raw", b"a"));
    let b = h.register(&write_dataset_file(root.path(), "Fail_B.raw", b"b"));

    let outcome = h
        .orchestrator
        .create_triggers(&[a.clone(), b.clone()], &CancelToken::new())
        .unwrap();

    // Both datasets were attempted; neither failure stopped the batch.
    assert_eq!(outcome.failed, 2);
    assert_eq!(h.status(&a), DatasetStatus::FailedFileError);
    assert_eq!(h.status(&b), DatasetStatus::FailedFileError);
    assert!(a.lock().unwrap().warning.clone().unwrap().contains("destination unavailable"));
}

#[test]
fn preexisting_trigger_artifact_marks_dataset_sent() {
    let root = scratch_root();
    let h = harness(root.path(), |_| {});
    h.resolver.refresh().unwrap();
    h.sink.add_preexisting("Seen_Before_01");

    let path = write_dataset_file(root.path(), "Seen_Before_01.raw", b"data");
    let handle = h.register(&path);
    h.backdate(&handle, 5);

    h.scheduler.reevaluate_once();
    assert_eq!(h.status(&handle), DatasetStatus::TriggerFileSent);
    // Marked from the destination check, not a fresh write.
    assert!(h.sink.sent().is_empty());
}

#[test]
fn locked_dataset_is_skipped_until_released() {
    let root = scratch_root();
    let h = harness(root.path(), |config| {
        config.trigger_on_no_match = true;
    });
    h.resolver.refresh().unwrap();

    let path = write_dataset_file(root.path(), "Locked_Run_01.raw", b"data");
    let handle = h.register(&path);
    h.backdate(&handle, 5);

    h.probe.set_holder(Some("Xcalibur"));
    h.scheduler.reevaluate_once();
    assert!(h.sink.sent().is_empty());
    assert_eq!(h.status(&handle), DatasetStatus::Pending);

    h.probe.set_holder(None);
    h.scheduler.reevaluate_once();
    assert_eq!(h.status(&handle), DatasetStatus::TriggerFileSent);
}

#[test]
fn waiting_dataset_lands_in_the_countdown_set() {
    let root = scratch_root();
    let h = harness(root.path(), |config| {
        config.trigger_wait_minutes = 30;
    });
    h.resolver.refresh().unwrap();

    let path = write_dataset_file(root.path(), "Waiting_Run_01.raw", b"data");
    let handle = h.register(&path);
    // Past the write grace but well inside the 30 minute wait.
    h.backdate(&handle, 5);

    h.scheduler.reevaluate_once();
    let countdown = h.scheduler.countdown_snapshot();
    assert_eq!(countdown.len(), 1);
    let (_, state) = countdown[0];
    assert!(state.remaining_secs > 0 && state.remaining_secs <= 25 * 60);
    assert!(state.percent_elapsed > 0.0 && state.percent_elapsed < 100.0);

    // Display refresh keeps it, termination removes it.
    h.scheduler.countdown_once();
    assert_eq!(h.scheduler.countdown_snapshot().len(), 1);
    handle.lock().unwrap().set_status(DatasetStatus::Ignored);
    h.scheduler.countdown_once();
    assert!(h.scheduler.countdown_snapshot().is_empty());
}

#[test]
fn watcher_events_flow_into_the_registry() {
    let root = scratch_root();
    let h = harness(root.path(), |_| {});

    let path = root.path().join("Streamed_01.raw");
    h.router.enqueue(RawEvent::Created(path.clone()));
    h.router.enqueue(RawEvent::Changed(path.clone()));
    h.router.drain();

    assert_eq!(h.registry.len(), 1);
    let handle = h.registry.find_by_path(&path).unwrap();
    assert_eq!(handle.lock().unwrap().source, DatasetSource::Watcher);
}

#[test]
fn session_sweep_registers_searcher_datasets_and_bulk_triggers() {
    let root = scratch_root();
    write_dataset_file(root.path(), "Swept_01.raw", b"one");
    write_dataset_file(root.path(), "Swept_02.raw", b"two");
    write_dataset_file(root.path(), "ignore.txt", b"nope");

    let config = Arc::new(WatchConfig {
        base_path: root.path().to_path_buf(),
        extensions: vec![".raw".into()],
        minimum_file_size_kb: 0,
        stability_window_secs: 0,
        trigger_on_no_match: true,
        default_metadata: DatasetMetadata {
            instrument: Some("Exactive01".into()),
            ..DatasetMetadata::default()
        },
        ..WatchConfig::default()
    });
    let provider = Arc::new(StubReferenceProvider::new());
    let sink = Arc::new(CollectingSink::new());
    let session = CaptureSession::build(SessionDeps {
        config,
        provider: provider.clone() as Arc<dyn ReferenceProvider>,
        sink: sink.clone() as Arc<dyn TriggerSink>,
        probe: Arc::new(StaticLockProbe::unlocked()) as Arc<dyn LockProbe>,
    })
    .unwrap();

    let found = session.sweep(None).unwrap();
    assert_eq!(found, 2);
    for handle in session.registry.snapshot() {
        assert_eq!(handle.lock().unwrap().source, DatasetSource::Searcher);
    }

    let outcome = session.trigger_all(&CancelToken::new()).unwrap();
    assert_eq!(outcome.sent, 2);
    let mut names = sink.sent_names();
    names.sort();
    assert_eq!(names, vec!["Swept_01", "Swept_02"]);
}

#[test]
fn provider_outage_propagates_without_discarding_finalized_work() {
    let root = scratch_root();
    let h = harness(root.path(), |config| {
        config.trigger_on_no_match = true;
    });
    h.resolver.refresh().unwrap();

    let path = write_dataset_file(root.path(), "Outage_Run_01.raw", b"data");
    let handle = h.register(&path);

    h.provider.set_unreachable(true);
    let result = h
        .orchestrator
        .create_triggers(&[handle.clone()], &CancelToken::new());
    assert!(result.is_err());
}

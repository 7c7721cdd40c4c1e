//! Single-flight coordination and scheduling.

use calsync_core::EventPatch;
use calsync_sync_engine::{
    CoordinatorState, LockManager, SyncConfig, SyncCoordinator, SyncEngine, SyncError,
    SyncResult, SyncScheduler, SyncStatus, SyncStatusHandle, SyncTransport, SyncTrigger,
};
use calsync_sync_protocol::{RecoveryFetchRequest, RecoveryFetchResponse, SyncRequest, SyncResponse};
use calsync_testkit::prelude::*;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn passes_never_overlap() {
    let harness = Harness::with_config(|config| config.with_lock_timeout(Duration::from_millis(5)));
    harness.server.set_latency(Duration::from_millis(60));

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let coordinator = Arc::clone(&harness.coordinator);
            thread::spawn(move || coordinator.request(SyncTrigger::Manual).unwrap())
        })
        .collect();
    let summaries: Vec<_> = handles
        .into_iter()
        .filter_map(|h| h.join().unwrap())
        .collect();

    assert_eq!(harness.server.max_in_flight(), 1);
    let passes: usize = summaries.iter().map(|s| s.passes.len()).sum();
    assert_eq!(passes, harness.server.sync_calls());
    assert_eq!(harness.coordinator.state(), CoordinatorState::Idle);
}

#[test]
fn trigger_during_pass_runs_exactly_once_more() {
    let harness = Harness::with_config(|config| config.with_lock_timeout(Duration::from_millis(1)));
    harness.server.set_latency(Duration::from_millis(150));

    let runner = {
        let coordinator = Arc::clone(&harness.coordinator);
        thread::spawn(move || coordinator.request(SyncTrigger::Manual).unwrap())
    };
    thread::sleep(Duration::from_millis(40));
    assert_eq!(harness.coordinator.state(), CoordinatorState::Running);

    for _ in 0..3 {
        assert!(harness
            .coordinator
            .request(SyncTrigger::LocalChange)
            .unwrap()
            .is_none());
    }
    assert_eq!(harness.coordinator.state(), CoordinatorState::RerunQueued);

    let summary = runner.join().unwrap().expect("runner held the lock");
    assert_eq!(summary.passes.len(), 2);
    assert_eq!(summary.reruns(), 1);
    assert_eq!(harness.server.sync_calls(), 2);
    assert_eq!(harness.coordinator.state(), CoordinatorState::Idle);
}

#[test]
fn startup_steals_stale_lock() {
    let harness = Harness::new();
    let name = harness.engine().config().lock_name.clone();
    let stale = harness.locks.acquire(&name, Duration::ZERO).unwrap();
    std::mem::forget(stale);

    assert!(harness.coordinator.request(SyncTrigger::Manual).unwrap().is_none());
    let summary = harness.coordinator.startup().unwrap().expect("lock stolen");
    assert_eq!(summary.passes[0].trigger, SyncTrigger::Startup);
    assert!(!harness.locks.is_held(&name));
}

/// Fails its first sync slowly, then defers to the server.
struct FailsFirstSync {
    inner: Arc<FakeServer>,
    failed: AtomicBool,
}

impl SyncTransport for FailsFirstSync {
    fn sync(&self, request: &SyncRequest) -> SyncResult<SyncResponse> {
        if !self.failed.swap(true, Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(150));
            return Err(SyncError::transport_fatal("certificate rejected"));
        }
        self.inner.sync(request)
    }

    fn fetch_events(&self, request: &RecoveryFetchRequest) -> SyncResult<RecoveryFetchResponse> {
        self.inner.fetch_events(request)
    }
}

#[test]
fn failed_pass_still_runs_deferred_trigger() {
    let server = Arc::new(FakeServer::new());
    let transport = FailsFirstSync {
        inner: Arc::clone(&server),
        failed: AtomicBool::new(false),
    };
    let engine = SyncEngine::new(
        SyncConfig::new(CALENDAR_ID).with_lock_timeout(Duration::from_millis(1)),
        memory_store(),
        transport,
        Arc::new(PassthroughCrypto::new()),
    );
    let coordinator = Arc::new(SyncCoordinator::new(engine, LockManager::new()));

    let runner = {
        let coordinator = Arc::clone(&coordinator);
        thread::spawn(move || coordinator.request(SyncTrigger::Manual))
    };
    thread::sleep(Duration::from_millis(40));
    assert!(coordinator
        .request(SyncTrigger::LocalChange)
        .unwrap()
        .is_none());

    let summary = runner
        .join()
        .unwrap()
        .unwrap()
        .expect("runner held the lock");
    assert_eq!(summary.passes.len(), 1);
    assert_eq!(summary.reruns(), 1);
    assert_eq!(server.sync_calls(), 1);
    assert_eq!(coordinator.state(), CoordinatorState::Idle);
}

#[test]
fn failed_pass_without_deferred_trigger_reports_error() {
    let server = Arc::new(FakeServer::new());
    let engine = SyncEngine::new(
        SyncConfig::new(CALENDAR_ID),
        memory_store(),
        FailsFirstSync {
            inner: Arc::clone(&server),
            failed: AtomicBool::new(false),
        },
        Arc::new(PassthroughCrypto::new()),
    );
    let coordinator = SyncCoordinator::new(engine, LockManager::new());

    assert!(coordinator.request(SyncTrigger::Manual).is_err());
    assert_eq!(server.sync_calls(), 0);
    assert_eq!(coordinator.state(), CoordinatorState::Idle);
    assert!(coordinator.request(SyncTrigger::Manual).unwrap().is_some());
    assert_eq!(server.sync_calls(), 1);
}

/// Records the status seen while a request is in flight.
struct StatusRecorder {
    inner: Arc<FakeServer>,
    status: SyncStatusHandle,
    seen: Mutex<Vec<SyncStatus>>,
}

impl SyncTransport for StatusRecorder {
    fn sync(&self, request: &SyncRequest) -> SyncResult<SyncResponse> {
        self.seen.lock().push(self.status.status());
        self.inner.sync(request)
    }

    fn fetch_events(&self, request: &RecoveryFetchRequest) -> SyncResult<RecoveryFetchResponse> {
        self.inner.fetch_events(request)
    }
}

#[test]
fn interval_passes_stay_quiet() {
    let status = SyncStatusHandle::new();
    let recorder = StatusRecorder {
        inner: Arc::new(FakeServer::new()),
        status: status.clone(),
        seen: Mutex::new(Vec::new()),
    };
    let engine = SyncEngine::new(
        SyncConfig::new(CALENDAR_ID),
        memory_store(),
        recorder,
        Arc::new(PassthroughCrypto::new()),
    )
    .with_status(status);

    engine.run_pass(SyncTrigger::Interval).unwrap();
    engine.run_pass(SyncTrigger::Manual).unwrap();
    assert_eq!(
        *engine.transport().seen.lock(),
        vec![SyncStatus::Synced, SyncStatus::Syncing]
    );
}

fn scheduled(
    configure: impl FnOnce(SyncConfig) -> SyncConfig,
) -> (Harness, std::sync::mpsc::Receiver<calsync_core::StoreChange>) {
    let harness = Harness::with_config(configure);
    let changes = harness.store.subscribe().unwrap();
    (harness, changes)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn local_writes_are_debounced_into_one_pass() {
    let (harness, changes) = scheduled(|config| config.with_debounce(Duration::from_millis(50)));
    let scheduler = SyncScheduler::spawn(
        Arc::clone(&harness.coordinator),
        changes,
        harness.engine().config(),
    );

    for i in 0..3 {
        harness.store.put(event(&format!("burst {i}"), at(i, 0), 30)).unwrap();
    }
    tokio::time::sleep(Duration::from_millis(600)).await;

    assert_eq!(harness.server.sync_calls(), 1);
    assert_eq!(harness.server.stored_count(), 3);
    assert_eq!(harness.store.unsynced_events(10).unwrap().len(), 0);
    scheduler.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sync_writes_do_not_retrigger() {
    let (harness, changes) = scheduled(|config| config);
    harness.server.publish(&event("remote", t0(), 30));
    let scheduler = SyncScheduler::spawn(
        Arc::clone(&harness.coordinator),
        changes,
        harness.engine().config(),
    );

    scheduler.sync_now();
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(harness.server.sync_calls(), 1);
    assert_eq!(harness.store.all_events().unwrap().len(), 1);
    scheduler.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn interval_triggers_background_passes() {
    let (harness, changes) =
        scheduled(|config| config.with_sync_interval(Duration::from_millis(40)));
    let scheduler = SyncScheduler::spawn(
        Arc::clone(&harness.coordinator),
        changes,
        harness.engine().config(),
    );

    tokio::time::sleep(Duration::from_millis(300)).await;
    scheduler.shutdown().await;
    assert!(harness.server.sync_calls() >= 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn local_edit_after_sync_is_pushed() {
    let (harness, changes) = scheduled(|config| config.with_debounce(Duration::from_millis(30)));
    let e = event("planning", t0(), 30);
    harness.store.put(e.clone()).unwrap();
    harness.sync(SyncTrigger::Manual);
    assert_eq!(harness.server.sync_calls(), 1);

    let scheduler = SyncScheduler::spawn(
        Arc::clone(&harness.coordinator),
        changes,
        harness.engine().config(),
    );
    harness
        .store
        .update(e.id(), EventPatch::new().location("room 4"))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(
        harness.server.stored(e.id()).unwrap().content.location,
        "room 4"
    );
    scheduler.shutdown().await;
}

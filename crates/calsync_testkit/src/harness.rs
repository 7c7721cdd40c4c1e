//! A coordinator wired to the fake server, for cross-crate tests.

use crate::crypto::PassthroughCrypto;
use crate::fixtures::{memory_store, CALENDAR_ID};
use crate::server::FakeServer;
use crate::sink::RecordingSink;
use calsync_core::EventStore;
use calsync_sync_engine::{
    AttendeeResolver, LockManager, RunSummary, SyncConfig, SyncCoordinator, SyncEngine,
    SyncStatusHandle, SyncTrigger,
};
use std::sync::Arc;
use std::time::Duration;

/// Store, server, crypto and sink behind one coordinator.
pub struct Harness {
    /// The replica.
    pub store: Arc<EventStore>,
    /// The server.
    pub server: Arc<FakeServer>,
    /// The crypto.
    pub crypto: Arc<PassthroughCrypto>,
    /// The notification sink.
    pub sink: Arc<RecordingSink>,
    /// The status container.
    pub status: SyncStatusHandle,
    /// The lock registry.
    pub locks: Arc<LockManager>,
    /// The coordinator.
    pub coordinator: Arc<SyncCoordinator<Arc<FakeServer>>>,
}

impl Harness {
    /// A harness with the default configuration, interval disabled.
    pub fn new() -> Self {
        Self::with_config(|config| config)
    }

    /// A harness whose configuration is adjusted by `configure`.
    pub fn with_config(configure: impl FnOnce(SyncConfig) -> SyncConfig) -> Self {
        Self::build(configure, None)
    }

    /// A harness with a custom attendee resolver.
    pub fn with_resolver(resolver: Arc<dyn AttendeeResolver>) -> Self {
        Self::build(|config| config, Some(resolver))
    }

    fn build(
        configure: impl FnOnce(SyncConfig) -> SyncConfig,
        resolver: Option<Arc<dyn AttendeeResolver>>,
    ) -> Self {
        let store = memory_store();
        let server = Arc::new(FakeServer::new());
        let crypto = Arc::new(PassthroughCrypto::new());
        let sink = Arc::new(RecordingSink::new());
        let status = SyncStatusHandle::new();
        let locks = LockManager::new();

        let config = configure(
            SyncConfig::new(CALENDAR_ID)
                .without_sync_interval()
                .with_debounce(Duration::from_millis(20)),
        );
        let mut engine = SyncEngine::new(config, Arc::clone(&store), Arc::clone(&server), crypto.clone())
            .with_sink(sink.clone())
            .with_status(status.clone());
        if let Some(resolver) = resolver {
            engine = engine.with_resolver(resolver);
        }
        let coordinator = Arc::new(SyncCoordinator::new(engine, Arc::clone(&locks)));

        Self {
            store,
            server,
            crypto,
            sink,
            status,
            locks,
            coordinator,
        }
    }

    /// Runs a trigger to completion and returns its passes.
    pub fn sync(&self, trigger: SyncTrigger) -> RunSummary {
        self.coordinator
            .request(trigger)
            .expect("sync failed")
            .expect("lock unexpectedly busy")
    }

    /// The engine behind the coordinator.
    pub fn engine(&self) -> &SyncEngine<Arc<FakeServer>> {
        self.coordinator.engine()
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

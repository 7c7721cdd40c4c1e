//! One sync pass: push the unsynced backlog, then pull and merge.

use crate::config::SyncConfig;
use crate::crypto::{AttendeeResolver, EventCrypto, NoAttendees};
use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::notification::{NotificationSink, NullSink};
use crate::status::{SyncNotice, SyncStatus, SyncStatusHandle};
use crate::transport::SyncTransport;
use crate::{pull, push};
use calsync_core::{EventStore, FieldMerger, TimestampMerger};
use calsync_sync_protocol::{ServerSyncState, SyncRequest};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What started a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// A local write, after debouncing.
    LocalChange,
    /// The background interval.
    Interval,
    /// An explicit request.
    Manual,
    /// Replica startup.
    Startup,
    /// A previous pass left a backlog.
    Backlog,
    /// A trigger arrived while a pass was running.
    Rerun,
}

impl SyncTrigger {
    /// Returns true if the pass should show `Syncing` while it runs.
    #[must_use]
    pub fn is_visible(self) -> bool {
        !matches!(self, SyncTrigger::Interval)
    }
}

/// Step of the pass currently running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PassPhase {
    /// No pass is running.
    #[default]
    Idle,
    /// Preparing and sending local changes.
    Pushing,
    /// Applying remote changes.
    Pulling,
}

/// Result of one pass.
#[derive(Debug, Clone, PartialEq)]
pub struct PassOutcome {
    /// What started the pass.
    pub trigger: SyncTrigger,
    /// Events sent to the server.
    pub pushed: usize,
    /// Events isolated as poison before sending.
    pub isolated: usize,
    /// Remote events applied.
    pub pulled: usize,
    /// Recovery entries resolved.
    pub recovered: usize,
    /// Pushed events marked `Done`.
    pub marked_done: usize,
    /// Checkpoint after the pass.
    pub checkpoint: u64,
    /// Batch-level failure the pass absorbed.
    pub failure: Option<ErrorKind>,
    /// True if another pass should run right away.
    pub more_pending: bool,
    /// Wall time of the pass.
    pub duration: Duration,
}

impl PassOutcome {
    fn new(trigger: SyncTrigger, checkpoint: u64) -> Self {
        Self {
            trigger,
            pushed: 0,
            isolated: 0,
            pulled: 0,
            recovered: 0,
            marked_done: 0,
            checkpoint,
            failure: None,
            more_pending: false,
            duration: Duration::ZERO,
        }
    }
}

/// Counters over the lifetime of an engine.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Passes that completed, including absorbed batch failures.
    pub passes_completed: u64,
    /// Passes that failed.
    pub passes_failed: u64,
    /// Events pushed.
    pub events_pushed: u64,
    /// Remote events applied.
    pub events_pulled: u64,
    /// Events isolated as poison.
    pub events_isolated: u64,
    /// When the last pass finished.
    pub last_pass_at: Option<DateTime<Utc>>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Runs sync passes for one replica.
///
/// The engine itself is not single-flight; [`SyncCoordinator`](crate::SyncCoordinator)
/// serializes passes through a named lock.
pub struct SyncEngine<T: SyncTransport> {
    pub(crate) config: SyncConfig,
    pub(crate) store: Arc<EventStore>,
    pub(crate) transport: T,
    pub(crate) crypto: Arc<dyn EventCrypto>,
    pub(crate) resolver: Arc<dyn AttendeeResolver>,
    pub(crate) merger: Arc<dyn FieldMerger>,
    pub(crate) sink: Arc<dyn NotificationSink>,
    status: SyncStatusHandle,
    phase: RwLock<PassPhase>,
    stats: RwLock<SyncStats>,
}

impl<T: SyncTransport> SyncEngine<T> {
    /// Creates an engine with no attendee keys, timestamp merging and a
    /// sink that drops deliveries.
    pub fn new(
        config: SyncConfig,
        store: Arc<EventStore>,
        transport: T,
        crypto: Arc<dyn EventCrypto>,
    ) -> Self {
        Self {
            config,
            store,
            transport,
            crypto,
            resolver: Arc::new(NoAttendees),
            merger: Arc::new(TimestampMerger),
            sink: Arc::new(NullSink),
            status: SyncStatusHandle::new(),
            phase: RwLock::new(PassPhase::Idle),
            stats: RwLock::new(SyncStats::default()),
        }
    }

    /// Sets the attendee resolver.
    pub fn with_resolver(mut self, resolver: Arc<dyn AttendeeResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Sets the field merger.
    pub fn with_merger(mut self, merger: Arc<dyn FieldMerger>) -> Self {
        self.merger = merger;
        self
    }

    /// Sets the notification sink.
    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Shares an existing status container.
    pub fn with_status(mut self, status: SyncStatusHandle) -> Self {
        self.status = status;
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the store.
    pub fn store(&self) -> &Arc<EventStore> {
        &self.store
    }

    /// Returns the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Returns the status container.
    pub fn status(&self) -> &SyncStatusHandle {
        &self.status
    }

    /// Returns the running step.
    pub fn phase(&self) -> PassPhase {
        *self.phase.read()
    }

    /// Returns the counters.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    fn set_phase(&self, phase: PassPhase) {
        *self.phase.write() = phase;
    }

    /// Runs one pass.
    ///
    /// Network failures and rejections are absorbed into the outcome; only
    /// unexpected conditions return an error. Either way the status
    /// container reflects the result.
    pub fn run_pass(&self, trigger: SyncTrigger) -> SyncResult<PassOutcome> {
        let started = Instant::now();
        if trigger.is_visible() {
            self.status.set_status(SyncStatus::Syncing);
        }
        tracing::debug!(?trigger, calendar = %self.config.calendar_id, "sync pass started");

        let result = self.pass(trigger);
        self.set_phase(PassPhase::Idle);

        match result {
            Ok(mut outcome) => {
                outcome.duration = started.elapsed();
                self.record_outcome(&outcome);
                tracing::info!(
                    ?trigger,
                    pushed = outcome.pushed,
                    pulled = outcome.pulled,
                    isolated = outcome.isolated,
                    checkpoint = outcome.checkpoint,
                    failure = ?outcome.failure,
                    elapsed_ms = outcome.duration.as_millis() as u64,
                    "sync pass finished"
                );
                Ok(outcome)
            }
            Err(err) => {
                tracing::error!(?trigger, error = %err, "sync pass failed");
                self.status.set_error(err.to_string());
                let mut stats = self.stats.write();
                stats.passes_failed += 1;
                stats.last_error = Some(err.to_string());
                Err(err)
            }
        }
    }

    fn pass(&self, trigger: SyncTrigger) -> SyncResult<PassOutcome> {
        let metadata = self.store.metadata()?.ok_or(SyncError::MissingMetadata)?;
        let mut outcome = PassOutcome::new(trigger, metadata.checkpoint);

        self.set_phase(PassPhase::Pushing);
        let prepared = push::prepare(self, &metadata)?;
        outcome.pushed = prepared.payloads.len();
        outcome.isolated = prepared.isolated;

        let request = SyncRequest {
            calendar_id: metadata.calendar_id.clone(),
            checkpoint: metadata.checkpoint,
            events: prepared.payloads,
        };
        let response = match self.transport.sync(&request) {
            Ok(response) => response,
            Err(err) => {
                let kind = push::handle_batch_failure(self, &prepared.gathered, err)?;
                outcome.pushed = 0;
                outcome.failure = Some(kind);
                return Ok(outcome);
            }
        };

        self.set_phase(PassPhase::Pulling);
        let recovery = pull::fetch_recovery(self)?;
        let pending = response.state == ServerSyncState::PendingChanges;
        let report = pull::apply(self, &prepared.gathered, response, recovery)?;

        outcome.pulled = report.pulled;
        outcome.recovered = report.recovered;
        outcome.marked_done = report.marked_done;
        outcome.checkpoint = report.checkpoint;
        outcome.more_pending = prepared.backlog || pending;
        Ok(outcome)
    }

    fn record_outcome(&self, outcome: &PassOutcome) {
        let now = Utc::now();
        match outcome.failure {
            Some(ErrorKind::TransientNetwork) => {
                self.status.set_offline("server unreachable");
            }
            Some(ErrorKind::ServerRejection) => {
                self.status.set_status(SyncStatus::Syncing);
                self.status.raise_notice(SyncNotice::Resyncing);
            }
            _ => {
                self.status.mark_synced(now);
                self.refresh_notice();
            }
        }

        let mut stats = self.stats.write();
        stats.passes_completed += 1;
        stats.events_pushed += outcome.pushed as u64;
        stats.events_pulled += outcome.pulled as u64;
        stats.events_isolated += outcome.isolated as u64;
        stats.last_pass_at = Some(now);
    }

    fn refresh_notice(&self) {
        let queue = self.store.recovery_queue();
        match (queue.get(1), queue.exhausted()) {
            (Ok(active), Ok(exhausted)) => {
                if !exhausted.is_empty() {
                    self.status.raise_notice(SyncNotice::RecoveryExhausted);
                } else if active.is_empty() {
                    self.status.clear_notice();
                }
            }
            (Err(err), _) | (_, Err(err)) => {
                tracing::warn!(error = %err, "cannot read recovery queue");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::EncryptionContext;
    use crate::transport::MockTransport;
    use calsync_core::{CalendarMetadata, Event, SyncState};
    use calsync_sync_protocol::{EncryptedEvent, RemoteEvent, SyncResponse};
    use chrono::Duration as ChronoDuration;

    struct PlainCrypto;

    impl EventCrypto for PlainCrypto {
        fn encrypt(
            &self,
            event: &Event,
            _context: &EncryptionContext<'_>,
        ) -> SyncResult<EncryptedEvent> {
            Ok(EncryptedEvent {
                parent_event_id: *event.id().as_uuid(),
                parent_recurrence_id: None,
                recurrence_date: None,
                start_date: event.plain.start_date,
                end_date: event.plain.end_date,
                deleted: event.plain.deleted,
                sequence: event.plain.sequence,
                content: event.content.title.clone().into_bytes(),
                preferences: None,
                session_keys: Vec::new(),
            })
        }

        fn decrypt(&self, remote: &RemoteEvent) -> SyncResult<Event> {
            let title = String::from_utf8_lossy(&remote.event.content).into_owned();
            let mut event = Event::new(title, remote.event.start_date, remote.event.end_date);
            event.parent_event_id = calsync_core::EventId::from_uuid(remote.event.parent_event_id);
            Ok(event)
        }
    }

    fn engine(with_metadata: bool) -> SyncEngine<MockTransport> {
        let store = Arc::new(EventStore::open_in_memory().unwrap());
        if with_metadata {
            store.set_metadata(CalendarMetadata::new("cal")).unwrap();
        }
        SyncEngine::new(
            SyncConfig::new("cal"),
            store,
            MockTransport::new(),
            Arc::new(PlainCrypto),
        )
    }

    fn put_event(engine: &SyncEngine<MockTransport>, title: &str) -> Event {
        let start = Utc::now();
        let event = Event::new(title, start, start + ChronoDuration::minutes(30));
        engine.store().put(event.clone()).unwrap();
        event
    }

    #[test]
    fn trigger_visibility() {
        assert!(SyncTrigger::Manual.is_visible());
        assert!(SyncTrigger::LocalChange.is_visible());
        assert!(!SyncTrigger::Interval.is_visible());
    }

    #[test]
    fn successful_pass_marks_events_done() {
        let engine = engine(true);
        let event = put_event(&engine, "standup");
        engine.transport().push_sync_response(SyncResponse::synced(4));

        let outcome = engine.run_pass(SyncTrigger::Manual).unwrap();
        assert_eq!(outcome.pushed, 1);
        assert_eq!(outcome.marked_done, 1);
        assert_eq!(outcome.checkpoint, 4);
        assert!(!outcome.more_pending);

        let stored = engine.store().get(event.id()).unwrap().unwrap();
        assert_eq!(stored.local.sync_state, SyncState::Done);
        assert!(stored.local.update_types.is_empty());
        assert_eq!(engine.status().status(), SyncStatus::Synced);
        assert_eq!(engine.phase(), PassPhase::Idle);

        let stats = engine.stats();
        assert_eq!(stats.passes_completed, 1);
        assert_eq!(stats.events_pushed, 1);
    }

    #[test]
    fn missing_metadata_fails_pass() {
        let engine = engine(false);
        let err = engine.run_pass(SyncTrigger::Manual).unwrap_err();
        assert!(matches!(err, SyncError::MissingMetadata));
        assert_eq!(engine.status().status(), SyncStatus::Error);
        assert_eq!(engine.stats().passes_failed, 1);
    }

    #[test]
    fn transient_failure_keeps_local_events() {
        let engine = engine(true);
        let event = put_event(&engine, "offline edit");
        engine
            .transport()
            .push_sync_error(SyncError::transport_retryable("connection refused"));

        let outcome = engine.run_pass(SyncTrigger::Manual).unwrap();
        assert_eq!(outcome.failure, Some(ErrorKind::TransientNetwork));
        assert_eq!(outcome.pushed, 0);

        let stored = engine.store().get(event.id()).unwrap().unwrap();
        assert_eq!(stored.local.sync_state, SyncState::Waiting);
        assert_eq!(engine.store().recovery_queue().all().unwrap().len(), 1);
        assert_eq!(engine.store().error_log().get_all().unwrap().len(), 1);
        assert_eq!(engine.status().status(), SyncStatus::Offline);
    }

    #[test]
    fn pending_server_state_requests_another_pass() {
        let engine = engine(true);
        put_event(&engine, "a");
        engine.transport().push_sync_response(SyncResponse {
            checkpoint: 1,
            events: Vec::new(),
            state: ServerSyncState::PendingChanges,
        });

        let outcome = engine.run_pass(SyncTrigger::Manual).unwrap();
        assert!(outcome.more_pending);
        assert_eq!(outcome.marked_done, 0);
    }

    #[test]
    fn request_carries_checkpoint_and_calendar() {
        let engine = engine(true);
        engine.store().set_checkpoint(9).unwrap();
        engine.run_pass(SyncTrigger::Interval).unwrap();

        let requests = engine.transport().sync_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].calendar_id, "cal");
        assert_eq!(requests[0].checkpoint, 9);
        assert!(requests[0].events.is_empty());
    }
}

//! In-memory sync server.

use crate::crypto::PassthroughCrypto;
use calsync_core::{Event, EventId};
use calsync_sync_engine::{
    HttpFailure, LoopbackServer, SyncError, SyncResult, SyncTransport, FETCH_ENDPOINT,
    SYNC_ENDPOINT,
};
use calsync_sync_protocol::{
    decode, encode, ErrorCode, ErrorResponse, RecoveryFetchRequest, RecoveryFetchResponse,
    RemoteEvent, ServerSyncState, SyncRequest, SyncResponse,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;
use uuid::Uuid;

enum Scripted {
    Reject(String),
    Unreachable(String),
}

#[derive(Default)]
struct ServerState {
    checkpoint: u64,
    events: BTreeMap<Uuid, (u64, RemoteEvent)>,
}

/// A sync server holding one calendar in memory.
///
/// Every stored write advances the checkpoint. A sync response carries the
/// events changed after the request checkpoint, except the ones pushed by
/// that request.
#[derive(Default)]
pub struct FakeServer {
    state: Mutex<ServerState>,
    script: Mutex<VecDeque<Scripted>>,
    latency: Mutex<Duration>,
    pending_rounds: AtomicUsize,
    sync_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    requests: Mutex<Vec<SyncRequest>>,
}

impl FakeServer {
    /// Creates an empty server.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects the next sync request with a sync conflict.
    pub fn reject_next(&self, message: &str) {
        self.script
            .lock()
            .push_back(Scripted::Reject(message.to_string()));
    }

    /// Fails the next sync request as unreachable.
    pub fn fail_next(&self, message: &str) {
        self.script
            .lock()
            .push_back(Scripted::Unreachable(message.to_string()));
    }

    /// Delays every sync request.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Answers the next `rounds` sync requests with `PendingChanges`.
    pub fn set_pending_rounds(&self, rounds: usize) {
        self.pending_rounds.store(rounds, Ordering::SeqCst);
    }

    /// Stores a write made by another client. Returns the new checkpoint.
    pub fn publish(&self, event: &Event) -> u64 {
        let remote = PassthroughCrypto::remote(event);
        let mut state = self.state.lock();
        state.checkpoint += 1;
        let checkpoint = state.checkpoint;
        state
            .events
            .insert(remote.event.parent_event_id, (checkpoint, remote));
        checkpoint
    }

    /// Opens the stored copy of `id`.
    pub fn stored(&self, id: EventId) -> Option<Event> {
        let state = self.state.lock();
        let (_, remote) = state.events.get(id.as_uuid())?;
        PassthroughCrypto::open(&remote.event).ok()
    }

    /// Number of stored events.
    pub fn stored_count(&self) -> usize {
        self.state.lock().events.len()
    }

    /// Current checkpoint.
    pub fn checkpoint(&self) -> u64 {
        self.state.lock().checkpoint
    }

    /// Sync requests served, including failed ones.
    pub fn sync_calls(&self) -> usize {
        self.sync_calls.load(Ordering::SeqCst)
    }

    /// Recovery fetches served.
    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// Highest number of sync requests handled at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Every sync request received.
    pub fn requests(&self) -> Vec<SyncRequest> {
        self.requests.lock().clone()
    }

    fn enter(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlight(&self.in_flight)
    }

    fn next_state(&self) -> ServerSyncState {
        let pending = self
            .pending_rounds
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |rounds| {
                rounds.checked_sub(1)
            })
            .is_ok();
        if pending {
            ServerSyncState::PendingChanges
        } else {
            ServerSyncState::Synced
        }
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl SyncTransport for FakeServer {
    fn sync(&self, request: &SyncRequest) -> SyncResult<SyncResponse> {
        let _in_flight = self.enter();
        self.sync_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());

        let latency = *self.latency.lock();
        if !latency.is_zero() {
            thread::sleep(latency);
        }

        match self.script.lock().pop_front() {
            Some(Scripted::Reject(message)) => return Err(SyncError::Rejected(message)),
            Some(Scripted::Unreachable(message)) => {
                return Err(SyncError::transport_retryable(message))
            }
            None => {}
        }

        let mut state = self.state.lock();
        let mut pushed = HashSet::new();
        for payload in &request.events {
            state.checkpoint += 1;
            let checkpoint = state.checkpoint;
            let id = payload.event.parent_event_id;
            pushed.insert(id);
            state.events.insert(
                id,
                (
                    checkpoint,
                    RemoteEvent {
                        event: payload.event.clone(),
                        session_key: Vec::new(),
                        preferences_session_key: None,
                    },
                ),
            );
        }

        let mut changed: Vec<&(u64, RemoteEvent)> = state
            .events
            .iter()
            .filter(|(id, (at, _))| *at > request.checkpoint && !pushed.contains(*id))
            .map(|(_, entry)| entry)
            .collect();
        changed.sort_by_key(|(at, _)| *at);

        Ok(SyncResponse {
            checkpoint: state.checkpoint,
            events: changed.into_iter().map(|(_, remote)| remote.clone()).collect(),
            state: self.next_state(),
        })
    }

    fn fetch_events(&self, request: &RecoveryFetchRequest) -> SyncResult<RecoveryFetchResponse> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock();
        Ok(RecoveryFetchResponse {
            events: request
                .event_ids
                .iter()
                .filter_map(|id| state.events.get(id).map(|(_, remote)| remote.clone()))
                .collect(),
        })
    }
}

impl LoopbackServer for FakeServer {
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, HttpFailure> {
        let result = match path {
            SYNC_ENDPOINT => decode::<SyncRequest>(body)
                .map_err(SyncError::from)
                .and_then(|request| self.sync(&request))
                .and_then(|response| Ok(encode(&response)?)),
            FETCH_ENDPOINT => decode::<RecoveryFetchRequest>(body)
                .map_err(SyncError::from)
                .and_then(|request| self.fetch_events(&request))
                .and_then(|response| Ok(encode(&response)?)),
            _ => return Err(HttpFailure::response(404, Vec::new())),
        };
        result.map_err(|err| match err {
            SyncError::Rejected(message) => HttpFailure::response(
                409,
                encode(&ErrorResponse::new(ErrorCode::SyncConflict, message)).unwrap_or_default(),
            ),
            err if err.is_retryable() => HttpFailure::network(err.to_string()),
            err => HttpFailure::response(
                400,
                encode(&ErrorResponse::new(ErrorCode::BadRequest, err.to_string()))
                    .unwrap_or_default(),
            ),
        })
    }
}

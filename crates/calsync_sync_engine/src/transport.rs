//! Transport abstraction for sync operations.

use crate::error::{SyncError, SyncResult};
use calsync_sync_protocol::{RecoveryFetchRequest, RecoveryFetchResponse, SyncRequest, SyncResponse};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Transport used by sync passes.
///
/// Implementations handle the wire exchange with the calendar server.
pub trait SyncTransport: Send + Sync {
    /// Pushes local changes and pulls remote changes since the request
    /// checkpoint.
    fn sync(&self, request: &SyncRequest) -> SyncResult<SyncResponse>;

    /// Re-fetches specific events. Unknown ids are omitted from the response.
    fn fetch_events(&self, request: &RecoveryFetchRequest) -> SyncResult<RecoveryFetchResponse>;
}

impl<T: SyncTransport + ?Sized> SyncTransport for Arc<T> {
    fn sync(&self, request: &SyncRequest) -> SyncResult<SyncResponse> {
        (**self).sync(request)
    }

    fn fetch_events(&self, request: &RecoveryFetchRequest) -> SyncResult<RecoveryFetchResponse> {
        (**self).fetch_events(request)
    }
}

/// A scripted transport for testing.
///
/// Scripted results are consumed in order. Once the script is empty, `sync`
/// answers `Synced` at the request checkpoint and `fetch_events` answers an
/// empty list.
#[derive(Default)]
pub struct MockTransport {
    sync_script: Mutex<VecDeque<SyncResult<SyncResponse>>>,
    fetch_script: Mutex<VecDeque<SyncResult<RecoveryFetchResponse>>>,
    sync_requests: Mutex<Vec<SyncRequest>>,
    fetch_requests: Mutex<Vec<RecoveryFetchRequest>>,
}

impl MockTransport {
    /// Creates a mock with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a sync response.
    pub fn push_sync_response(&self, response: SyncResponse) {
        self.sync_script.lock().push_back(Ok(response));
    }

    /// Queues a sync failure.
    pub fn push_sync_error(&self, error: SyncError) {
        self.sync_script.lock().push_back(Err(error));
    }

    /// Queues a recovery fetch response.
    pub fn push_fetch_response(&self, response: RecoveryFetchResponse) {
        self.fetch_script.lock().push_back(Ok(response));
    }

    /// Queues a recovery fetch failure.
    pub fn push_fetch_error(&self, error: SyncError) {
        self.fetch_script.lock().push_back(Err(error));
    }

    /// Returns every sync request received so far.
    pub fn sync_requests(&self) -> Vec<SyncRequest> {
        self.sync_requests.lock().clone()
    }

    /// Returns every recovery fetch request received so far.
    pub fn fetch_requests(&self) -> Vec<RecoveryFetchRequest> {
        self.fetch_requests.lock().clone()
    }
}

impl SyncTransport for MockTransport {
    fn sync(&self, request: &SyncRequest) -> SyncResult<SyncResponse> {
        self.sync_requests.lock().push(request.clone());
        self.sync_script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(SyncResponse::synced(request.checkpoint)))
    }

    fn fetch_events(&self, request: &RecoveryFetchRequest) -> SyncResult<RecoveryFetchResponse> {
        self.fetch_requests.lock().push(request.clone());
        self.fetch_script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(RecoveryFetchResponse::default()))
    }
}

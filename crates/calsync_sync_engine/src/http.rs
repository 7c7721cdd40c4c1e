//! HTTP transport implementation.
//!
//! The HTTP client itself is abstracted behind [`HttpClient`] so the engine
//! does not depend on a particular HTTP library. Bodies are CBOR envelopes
//! from `calsync_sync_protocol`.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use calsync_sync_protocol::{
    decode, encode, peek_kind, ErrorCode, ErrorResponse, Message, MessageKind,
    RecoveryFetchRequest, RecoveryFetchResponse, SyncRequest, SyncResponse,
};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;

/// Endpoint of the sync RPC.
pub const SYNC_ENDPOINT: &str = "/calendar/sync";

/// Endpoint of the recovery fetch RPC.
pub const FETCH_ENDPOINT: &str = "/calendar/events";

/// A failed HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpFailure {
    /// HTTP status, or `None` when no response arrived.
    pub status: Option<u16>,
    /// Response body, possibly an encoded [`ErrorResponse`].
    pub body: Vec<u8>,
    /// Description of the failure.
    pub message: String,
}

impl HttpFailure {
    /// A failure without a response (connection refused, DNS, timeout).
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            status: None,
            body: Vec::new(),
            message: message.into(),
        }
    }

    /// A non-success response.
    pub fn response(status: u16, body: Vec<u8>) -> Self {
        Self {
            status: Some(status),
            body,
            message: format!("HTTP {status}"),
        }
    }
}

/// HTTP client abstraction.
pub trait HttpClient: Send + Sync {
    /// Sends a POST request and returns the body of a success response.
    fn post(&self, url: &str, body: Vec<u8>, timeout: Duration) -> Result<Vec<u8>, HttpFailure>;
}

/// HTTP-based sync transport.
pub struct HttpTransport<C: HttpClient> {
    base_url: String,
    client: C,
    timeout: Duration,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a transport with a 30 second request timeout.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            timeout: Duration::from_secs(30),
            last_error: RwLock::new(None),
        }
    }

    /// Creates a transport using the request timeout of `config`.
    pub fn from_config(base_url: impl Into<String>, client: C, config: &SyncConfig) -> Self {
        Self::new(base_url, client).with_timeout(config.timeout)
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn post_message<Req: Message, Res: Message>(
        &self,
        endpoint: &str,
        request: &Req,
    ) -> SyncResult<Res> {
        let body = encode(request)?;
        let url = format!("{}{}", self.base_url, endpoint);

        let result = self
            .client
            .post(&url, body, self.timeout)
            .map_err(classify_failure)
            .and_then(|bytes| {
                if peek_kind(&bytes)? == MessageKind::Error {
                    let error: ErrorResponse = decode(&bytes)?;
                    return Err(classify_error_response(&error));
                }
                Ok(decode::<Res>(&bytes)?)
            });

        match &result {
            Ok(_) => *self.last_error.write() = None,
            Err(e) => {
                tracing::debug!(%url, error = %e, "sync request failed");
                *self.last_error.write() = Some(e.to_string());
            }
        }
        result
    }
}

impl<C: HttpClient> SyncTransport for HttpTransport<C> {
    fn sync(&self, request: &SyncRequest) -> SyncResult<SyncResponse> {
        self.post_message(SYNC_ENDPOINT, request)
    }

    fn fetch_events(&self, request: &RecoveryFetchRequest) -> SyncResult<RecoveryFetchResponse> {
        self.post_message(FETCH_ENDPOINT, request)
    }
}

fn classify_failure(failure: HttpFailure) -> SyncError {
    if let Ok(error) = decode::<ErrorResponse>(&failure.body) {
        return classify_error_response(&error);
    }
    match failure.status {
        None => SyncError::transport_retryable(failure.message),
        Some(400 | 409) => SyncError::Rejected(failure.message),
        Some(408 | 429) => SyncError::transport_retryable(failure.message),
        Some(status) if status >= 500 => SyncError::transport_retryable(failure.message),
        Some(_) => SyncError::transport_fatal(failure.message),
    }
}

fn classify_error_response(error: &ErrorResponse) -> SyncError {
    match error.code {
        ErrorCode::SyncConflict | ErrorCode::BadRequest => SyncError::Rejected(error.message.clone()),
        ErrorCode::Unauthorized => SyncError::transport_fatal(error.message.clone()),
        ErrorCode::Internal => SyncError::transport_retryable(error.message.clone()),
    }
}

/// Trait for servers that can handle loopback requests.
pub trait LoopbackServer: Send + Sync {
    /// Handles a POST to `path` and returns the response body.
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, HttpFailure>;
}

impl<S: LoopbackServer + ?Sized> LoopbackServer for Arc<S> {
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, HttpFailure> {
        (**self).handle_post(path, body)
    }
}

/// A loopback HTTP client that routes requests directly to a server.
///
/// Useful for testing without network overhead.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer> LoopbackClient<S> {
    /// Creates a loopback client connected to `server`.
    pub fn new(server: S) -> Self {
        Self { server }
    }

    /// Returns the server.
    pub fn server(&self) -> &S {
        &self.server
    }
}

impl<S: LoopbackServer> HttpClient for LoopbackClient<S> {
    fn post(&self, url: &str, body: Vec<u8>, _timeout: Duration) -> Result<Vec<u8>, HttpFailure> {
        let path = url.find("/calendar/").map(|i| &url[i..]).unwrap_or(url);
        self.server.handle_post(path, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct TestClient {
        response: Mutex<Option<Result<Vec<u8>, HttpFailure>>>,
        urls: Mutex<Vec<String>>,
        timeouts: Mutex<Vec<Duration>>,
    }

    impl TestClient {
        fn new() -> Self {
            Self {
                response: Mutex::new(None),
                urls: Mutex::new(Vec::new()),
                timeouts: Mutex::new(Vec::new()),
            }
        }

        fn set_response(&self, response: Result<Vec<u8>, HttpFailure>) {
            *self.response.lock() = Some(response);
        }
    }

    impl HttpClient for TestClient {
        fn post(
            &self,
            url: &str,
            _body: Vec<u8>,
            timeout: Duration,
        ) -> Result<Vec<u8>, HttpFailure> {
            self.urls.lock().push(url.to_string());
            self.timeouts.lock().push(timeout);
            self.response
                .lock()
                .clone()
                .unwrap_or_else(|| Err(HttpFailure::network("no response set")))
        }
    }

    fn request() -> SyncRequest {
        SyncRequest {
            calendar_id: "cal".into(),
            checkpoint: 3,
            events: Vec::new(),
        }
    }

    #[test]
    fn transport_sync_success() {
        let client = TestClient::new();
        client.set_response(Ok(encode(&SyncResponse::synced(42)).unwrap()));
        let transport = HttpTransport::new("https://cal.example.com/", client);

        let response = transport.sync(&request()).unwrap();
        assert_eq!(response.checkpoint, 42);
        assert_eq!(transport.base_url(), "https://cal.example.com");
        assert_eq!(
            transport.client.urls.lock().as_slice(),
            ["https://cal.example.com/calendar/sync"]
        );
        assert!(transport.last_error().is_none());
    }

    #[test]
    fn config_timeout_reaches_the_client() {
        let client = TestClient::new();
        client.set_response(Ok(encode(&SyncResponse::synced(1)).unwrap()));
        let config = SyncConfig::new("cal").with_timeout(Duration::from_secs(7));
        let transport = HttpTransport::from_config("https://cal.example.com", client, &config);

        transport.sync(&request()).unwrap();
        transport
            .fetch_events(&RecoveryFetchRequest {
                calendar_id: "cal".into(),
                event_ids: Vec::new(),
            })
            .unwrap_err();
        assert_eq!(
            transport.client.timeouts.lock().as_slice(),
            [Duration::from_secs(7), Duration::from_secs(7)]
        );
    }

    #[test]
    fn network_failure_is_retryable() {
        let client = TestClient::new();
        client.set_response(Err(HttpFailure::network("connection refused")));
        let transport = HttpTransport::new("https://cal.example.com", client);

        let err = transport.sync(&request()).unwrap_err();
        assert!(err.is_retryable());
        assert!(transport.last_error().is_some());
    }

    #[test]
    fn bad_request_is_rejection() {
        let client = TestClient::new();
        client.set_response(Err(HttpFailure::response(400, Vec::new())));
        let transport = HttpTransport::new("https://cal.example.com", client);

        assert!(matches!(
            transport.sync(&request()),
            Err(SyncError::Rejected(_))
        ));
    }

    #[test]
    fn error_body_drives_classification() {
        let client = TestClient::new();
        let body = encode(&ErrorResponse::new(ErrorCode::SyncConflict, "stale batch")).unwrap();
        client.set_response(Err(HttpFailure::response(500, body)));
        let transport = HttpTransport::new("https://cal.example.com", client);

        match transport.sync(&request()) {
            Err(SyncError::Rejected(message)) => assert_eq!(message, "stale batch"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn error_envelope_in_success_body() {
        let client = TestClient::new();
        let body = encode(&ErrorResponse::new(ErrorCode::Unauthorized, "expired")).unwrap();
        client.set_response(Ok(body));
        let transport = HttpTransport::new("https://cal.example.com", client);

        let err = transport.sync(&request()).unwrap_err();
        assert!(!err.is_retryable());
        assert!(matches!(err, SyncError::Transport { retryable: false, .. }));
    }

    #[test]
    fn server_errors_are_retryable() {
        for status in [408, 429, 502, 503] {
            let client = TestClient::new();
            client.set_response(Err(HttpFailure::response(status, Vec::new())));
            let transport = HttpTransport::new("https://cal.example.com", client);
            assert!(transport.sync(&request()).unwrap_err().is_retryable());
        }
    }

    struct EchoServer;

    impl LoopbackServer for EchoServer {
        fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, HttpFailure> {
            assert_eq!(path, FETCH_ENDPOINT);
            let request: RecoveryFetchRequest =
                decode(body).map_err(|e| HttpFailure::response(400, e.to_string().into_bytes()))?;
            assert_eq!(request.event_ids.len(), 1);
            Ok(encode(&RecoveryFetchResponse::default()).unwrap())
        }
    }

    #[test]
    fn loopback_routes_by_path() {
        let transport = HttpTransport::new(
            "http://localhost:8080",
            LoopbackClient::new(EchoServer),
        );
        let response = transport
            .fetch_events(&RecoveryFetchRequest {
                calendar_id: "cal".into(),
                event_ids: vec![uuid::Uuid::new_v4()],
            })
            .unwrap();
        assert!(response.events.is_empty());
    }
}

//! # calsync sync protocol
//!
//! Wire types of the calendar sync RPCs and their CBOR codec.
//!
//! This crate provides:
//! - the sync RPC (`POST /calendar/sync`): [`SyncRequest`] → [`SyncResponse`]
//! - the recovery fetch RPC (`POST /calendar/events`):
//!   [`RecoveryFetchRequest`] → [`RecoveryFetchResponse`]
//! - [`ErrorResponse`] bodies for failed requests
//! - a versioned envelope ([`encode`], [`decode`], [`PROTOCOL_VERSION`])
//!
//! This is a pure protocol crate with no I/O.
//!
//! ```rust
//! use calsync_sync_protocol::{decode, encode, SyncResponse};
//!
//! let bytes = encode(&SyncResponse::synced(12)).unwrap();
//! let response: SyncResponse = decode(&bytes).unwrap();
//! assert_eq!(response.checkpoint, 12);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod envelope;
mod error;
mod messages;

pub use envelope::{decode, encode, peek_kind, Message, MessageKind, PROTOCOL_VERSION};
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{
    AttendeeKey, EncryptedEvent, ErrorCode, ErrorResponse, PushPayload, PushUpdateType,
    RecoveryFetchRequest, RecoveryFetchResponse, RemoteEvent, ServerSyncState, SyncRequest,
    SyncResponse, WrappedKey,
};

//! # calsync Sync Engine
//!
//! Keeps a local calendar replica in step with the server.
//!
//! This crate provides:
//! - Push pipeline: unsynced events, oldest first, encrypted per event
//! - Pull pipeline: checkpointed deltas, field-level merge, recovery fetch
//! - Single-flight coordination through a named lock with deferred reruns
//! - A tokio scheduler for debounced local writes and periodic passes
//! - An HTTP transport abstraction with a loopback client for tests
//! - An observable status container
//!
//! ## Architecture
//!
//! A pass is **push-then-pull** in a single request:
//! 1. Gather up to `push_batch_size` unsynced events and encrypt them
//! 2. Send them with the last checkpoint; the server answers with its deltas
//! 3. Persist the new checkpoint
//! 4. Merge deltas and recovered events in one store transaction
//! 5. Mark acknowledged events `Done` if they were not edited meanwhile
//!
//! ## Failure handling
//!
//! - One event that cannot be encrypted is isolated; the rest of the batch
//!   is pushed
//! - A rejected batch is purged locally and re-fetched from the server
//! - An unreachable server leaves local data untouched
//! - Only unexpected conditions fail a pass; the lock is released anyway

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod coordinator;
mod crypto;
mod engine;
mod error;
mod http;
mod lock;
mod notification;
mod pull;
mod push;
mod scheduler;
mod status;
mod transport;

pub use config::SyncConfig;
pub use coordinator::{CoordinatorState, RunSummary, SyncCoordinator};
pub use crypto::{AttendeeResolver, EncryptionContext, EventCrypto, NoAttendees};
pub use engine::{PassOutcome, PassPhase, SyncEngine, SyncStats, SyncTrigger};
pub use error::{ErrorKind, SyncError, SyncResult};
pub use http::{
    HttpClient, HttpFailure, HttpTransport, LoopbackClient, LoopbackServer, FETCH_ENDPOINT,
    SYNC_ENDPOINT,
};
pub use lock::{LockGuard, LockManager};
pub use notification::{DeltaKind, EventDelta, NotificationSink, NullSink};
pub use scheduler::SyncScheduler;
pub use status::{StatusSnapshot, SyncNotice, SyncStatus, SyncStatusHandle};
pub use transport::{MockTransport, SyncTransport};

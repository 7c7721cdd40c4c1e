//! # calsync Testkit
//!
//! Test utilities for calsync.
//!
//! This crate provides:
//! - Fixtures: fixed instants, events, series and seeded stores
//! - A reversible [`PassthroughCrypto`] and a [`StaticResolver`]
//! - [`FakeServer`], an in-memory sync server usable directly as a
//!   transport or behind the loopback HTTP client
//! - [`RecordingSink`] for asserting notifications
//! - [`Harness`], wiring all of the above into a coordinator
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust
//! use calsync_testkit::prelude::*;
//! use calsync_sync_engine::SyncTrigger;
//!
//! let harness = Harness::new();
//! let start = t0();
//! harness.store.put(event("standup", start, 15)).unwrap();
//!
//! harness.sync(SyncTrigger::Manual);
//! assert_eq!(harness.server.stored_count(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crypto;
pub mod fixtures;
pub mod generators;
pub mod harness;
pub mod server;
pub mod sink;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crypto::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::harness::*;
    pub use crate::server::*;
    pub use crate::sink::*;
}

pub use crypto::*;
pub use fixtures::*;
pub use generators::*;
pub use harness::*;
pub use server::*;
pub use sink::*;

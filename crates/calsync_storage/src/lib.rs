//! # calsync storage
//!
//! Lowest-level persistence for a calsync replica.
//!
//! Backends are **opaque byte journals**: they append bytes, hand the whole
//! journal back on open, and can atomically replace it during compaction.
//! Everything above that (what a frame contains, which table a record belongs
//! to) is owned by `calsync_core`.
//!
//! ## Pieces
//!
//! - [`StorageBackend`] - the journal trait
//! - [`InMemoryBackend`] - ephemeral journal for tests
//! - [`FileBackend`] - durable journal on the local filesystem
//! - [`frame`] - length-prefixed, CRC-checked framing
//! - [`Sealer`] / [`SealingKey`] - AES-256-GCM sealing of frame payloads
//!
//! ## Example
//!
//! ```rust
//! use calsync_storage::{frame, InMemoryBackend, StorageBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! backend.append(&frame::encode(b"hello")).unwrap();
//! let frames = frame::decode_all(&backend.read_all().unwrap()).unwrap();
//! assert_eq!(frames.frames, vec![b"hello".to_vec()]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
pub mod frame;
mod memory;
mod sealed;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
pub use sealed::{Sealer, SealingKey, KEY_SIZE, NONCE_SIZE, TAG_SIZE};

//! Storage backend trait definition.

use crate::error::StorageResult;

/// An append-only journal backend.
///
/// Backends never interpret the bytes they hold. The event store appends one
/// frame per committed transaction and replays the whole journal on open.
///
/// # Invariants
///
/// - `append` writes after every previously appended byte and returns the
///   offset it wrote at
/// - `read_all` returns exactly the bytes appended (or last `replace`d)
/// - `replace` is atomic: a crash leaves either the old or the new journal
/// - Backends must be `Send + Sync` so a store can be shared across threads
pub trait StorageBackend: Send + Sync {
    /// Returns the entire journal contents.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is closed or an I/O error occurs.
    fn read_all(&self) -> StorageResult<Vec<u8>>;

    /// Appends bytes to the end of the journal, returning their offset.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is closed or an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Atomically replaces the journal with `data`.
    ///
    /// Used by compaction to swap a long journal for a single snapshot frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is closed or an I/O error occurs.
    fn replace(&mut self, data: &[u8]) -> StorageResult<()>;

    /// Makes every appended byte durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Returns the current journal size in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;
}

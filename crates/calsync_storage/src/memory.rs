//! In-memory journal backend.

use crate::backend::StorageBackend;
use crate::error::StorageResult;
use parking_lot::RwLock;

/// An in-memory journal.
///
/// Suitable for unit tests and for replicas that never need to outlive the
/// process. [`with_data`](Self::with_data) and [`data`](Self::data) let tests
/// simulate a restart by moving the journal bytes into a fresh backend.
///
/// # Example
///
/// ```rust
/// use calsync_storage::{StorageBackend, InMemoryBackend};
///
/// let mut backend = InMemoryBackend::new();
/// assert_eq!(backend.append(b"abc").unwrap(), 0);
/// assert_eq!(backend.size().unwrap(), 3);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    data: RwLock<Vec<u8>>,
}

impl InMemoryBackend {
    /// Creates an empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend preloaded with journal bytes.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    /// Returns a copy of the journal bytes.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        Ok(self.data.read().clone())
    }

    fn append(&mut self, new_data: &[u8]) -> StorageResult<u64> {
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(new_data);
        Ok(offset)
    }

    fn replace(&mut self, new_data: &[u8]) -> StorageResult<()> {
        *self.data.write() = new_data.to_vec();
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_returns_offsets() {
        let mut backend = InMemoryBackend::new();
        assert_eq!(backend.append(b"hello").unwrap(), 0);
        assert_eq!(backend.append(b" world").unwrap(), 5);
        assert_eq!(backend.read_all().unwrap(), b"hello world");
    }

    #[test]
    fn replace_swaps_contents() {
        let mut backend = InMemoryBackend::new();
        backend.append(b"a long journal").unwrap();
        backend.replace(b"snap").unwrap();
        assert_eq!(backend.size().unwrap(), 4);
        assert_eq!(backend.data(), b"snap");
    }

    #[test]
    fn with_data_survives_handoff() {
        let mut first = InMemoryBackend::new();
        first.append(b"state").unwrap();

        let second = InMemoryBackend::with_data(first.data());
        assert_eq!(second.read_all().unwrap(), b"state");
    }
}

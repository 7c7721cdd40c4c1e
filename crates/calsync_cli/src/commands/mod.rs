//! CLI command implementations.

pub mod compact;
pub mod errors;
pub mod events;
pub mod inspect;
pub mod recovery;

use calsync_core::{EventStore, StoreConfig};
use calsync_storage::SealingKey;
use serde::Serialize;
use std::fs;
use std::path::Path;

/// Opens an existing replica, unsealing it when a key file is given.
pub fn open_store(
    path: &Path,
    key_file: Option<&Path>,
) -> Result<EventStore, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No replica found at {:?}", path).into());
    }
    let mut config = StoreConfig::new().sync_on_commit(true);
    if let Some(key_file) = key_file {
        let bytes = fs::read(key_file)?;
        config = config.sealing_key(SealingKey::from_bytes(&bytes)?);
    }
    Ok(EventStore::open_path(path, config)?)
}

/// Prints `value` as pretty JSON.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Formats a byte count for humans.
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} bytes", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use calsync_core::{CalendarMetadata, EventStore, StoreConfig};
    use tempfile::TempDir;

    /// A file-backed replica with metadata, plus its directory.
    pub fn replica() -> (TempDir, EventStore) {
        let dir = tempfile::tempdir().unwrap();
        let store =
            EventStore::open_path(&dir.path().join("replica.journal"), StoreConfig::new()).unwrap();
        let mut metadata = CalendarMetadata::new("cal-cli");
        metadata.owner_address = Some("owner@example.com".into());
        store.set_metadata(metadata).unwrap();
        (dir, store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_replica_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = open_store(&dir.path().join("absent.journal"), None).unwrap_err();
        assert!(err.to_string().contains("No replica found"));
    }

    #[test]
    fn sizes_are_humanized() {
        assert_eq!(format_size(512), "512 bytes");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MB");
    }
}

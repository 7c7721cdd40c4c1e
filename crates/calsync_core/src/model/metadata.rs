//! Calendar-wide singleton record.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque key material owned by the crypto collaborator.
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KeyMaterial {
    /// Public key of the calendar.
    #[serde(default)]
    pub calendar_public_key: Vec<u8>,
    /// Encrypted private key of the local user.
    #[serde(default)]
    pub own_private_key: Vec<u8>,
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("calendar_public_key", &self.calendar_public_key.len())
            .field("own_private_key", &"[REDACTED]")
            .finish()
    }
}

/// Per-calendar sync bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarMetadata {
    /// Remote calendar identifier.
    pub calendar_id: String,
    /// Last server checkpoint applied to this replica.
    pub checkpoint: u64,
    /// Mail address of the local user.
    #[serde(default)]
    pub owner_address: Option<String>,
    /// Key material for the crypto collaborator.
    #[serde(default)]
    pub key_material: KeyMaterial,
}

impl CalendarMetadata {
    /// Creates metadata for a calendar that has never synced.
    pub fn new(calendar_id: impl Into<String>) -> Self {
        Self {
            calendar_id: calendar_id.into(),
            checkpoint: 0,
            owner_address: None,
            key_material: KeyMaterial::default(),
        }
    }

    /// Sets the owner address.
    #[must_use]
    pub fn with_owner(mut self, address: impl Into<String>) -> Self {
        self.owner_address = Some(address.into());
        self
    }

    /// Advances the checkpoint; older values are ignored.
    ///
    /// Returns true if the checkpoint moved.
    pub fn advance_checkpoint(&mut self, checkpoint: u64) -> bool {
        if checkpoint > self.checkpoint {
            self.checkpoint = checkpoint;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_never_regresses() {
        let mut meta = CalendarMetadata::new("cal");
        assert!(meta.advance_checkpoint(10));
        assert!(!meta.advance_checkpoint(4));
        assert!(!meta.advance_checkpoint(10));
        assert_eq!(meta.checkpoint, 10);
    }

    #[test]
    fn debug_redacts_private_key() {
        let keys = KeyMaterial {
            calendar_public_key: vec![1, 2, 3],
            own_private_key: vec![9; 32],
        };
        let debug = format!("{keys:?}");
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains('9'));
    }
}

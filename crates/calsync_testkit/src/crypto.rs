//! Reversible crypto and a fixed attendee resolver.
//!
//! [`PassthroughCrypto`] does not encrypt anything: it CBOR-encodes the
//! private fields of an event so a server copy can be opened again. Tests
//! can mark titles that fail to encrypt and ids that fail to decrypt.

use calsync_core::{
    Event, EventContent, EventField, EventId, EventPreferences, LocalMetadata, PlainContent,
    RecurrenceRule,
};
use calsync_sync_engine::{
    AttendeeResolver, EncryptionContext, EventCrypto, SyncError, SyncResult,
};
use calsync_sync_protocol::{AttendeeKey, EncryptedEvent, RemoteEvent, WrappedKey};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

#[derive(Serialize, Deserialize)]
struct SealedContent {
    content: EventContent,
    recurrence_rule: Option<RecurrenceRule>,
    last_update_key_map: BTreeMap<EventField, DateTime<Utc>>,
}

/// Crypto that round-trips events without encrypting them.
#[derive(Default)]
pub struct PassthroughCrypto {
    poisoned_titles: Mutex<HashSet<String>>,
    undecryptable: Mutex<HashSet<EventId>>,
}

impl PassthroughCrypto {
    /// Creates a crypto that never fails.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes encryption fail for events titled `title`.
    pub fn poison_title(&self, title: &str) {
        self.poisoned_titles.lock().insert(title.to_string());
    }

    /// Makes decryption fail for `id`.
    pub fn fail_decrypt(&self, id: EventId) {
        self.undecryptable.lock().insert(id);
    }

    /// Encodes `event` as the server would store it.
    pub fn seal(event: &Event, session_keys: Vec<WrappedKey>) -> SyncResult<EncryptedEvent> {
        let sealed = SealedContent {
            content: event.content.clone(),
            recurrence_rule: event.plain.recurrence_rule.clone(),
            last_update_key_map: event.last_update_key_map.clone(),
        };
        let id = event.id();
        Ok(EncryptedEvent {
            parent_event_id: *id.as_uuid(),
            parent_recurrence_id: event.plain.parent_recurrence_id.map(|p| *p.as_uuid()),
            recurrence_date: event.plain.recurrence_date,
            start_date: event.plain.start_date,
            end_date: event.plain.end_date,
            deleted: event.plain.deleted,
            sequence: event.plain.sequence,
            content: to_cbor(id, &sealed)?,
            preferences: Some(to_cbor(id, &event.preferences)?),
            session_keys,
        })
    }

    /// Decodes a server copy.
    pub fn open(encrypted: &EncryptedEvent) -> SyncResult<Event> {
        let id = EventId::from_uuid(encrypted.parent_event_id);
        let sealed: SealedContent = from_cbor(id, &encrypted.content)?;
        let preferences: EventPreferences = match &encrypted.preferences {
            Some(bytes) => from_cbor(id, bytes)?,
            None => EventPreferences::default(),
        };
        Ok(Event {
            parent_event_id: id,
            content: sealed.content,
            plain: PlainContent {
                start_date: encrypted.start_date,
                end_date: encrypted.end_date,
                recurrence_rule: sealed.recurrence_rule,
                recurrence_date: encrypted.recurrence_date,
                parent_recurrence_id: encrypted.parent_recurrence_id.map(EventId::from_uuid),
                deleted: encrypted.deleted,
                sequence: encrypted.sequence,
            },
            preferences,
            local: LocalMetadata::created(Utc::now()),
            last_update_key_map: sealed.last_update_key_map,
        })
    }

    /// Builds the server copy of `event` as another client would push it.
    pub fn remote(event: &Event) -> RemoteEvent {
        RemoteEvent {
            event: Self::seal(event, Vec::new()).expect("Failed to seal event"),
            session_key: Vec::new(),
            preferences_session_key: None,
        }
    }
}

impl EventCrypto for PassthroughCrypto {
    fn encrypt(&self, event: &Event, context: &EncryptionContext<'_>) -> SyncResult<EncryptedEvent> {
        if self.poisoned_titles.lock().contains(&event.content.title) {
            return Err(SyncError::crypto(event.id(), "cannot encrypt event"));
        }
        let mut session_keys = vec![WrappedKey {
            recipient: context.calendar_id.to_string(),
            key: context.key_material.calendar_public_key.clone(),
        }];
        session_keys.extend(context.attendee_keys.iter().map(|key| WrappedKey {
            recipient: key.email.clone(),
            key: key.public_key.clone(),
        }));
        Self::seal(event, session_keys)
    }

    fn decrypt(&self, remote: &RemoteEvent) -> SyncResult<Event> {
        let id = EventId::from_uuid(remote.event.parent_event_id);
        if self.undecryptable.lock().contains(&id) {
            return Err(SyncError::crypto(id, "cannot decrypt event"));
        }
        Self::open(&remote.event)
    }
}

fn to_cbor<T: Serialize>(id: EventId, value: &T) -> SyncResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes).map_err(|e| SyncError::crypto(id, e.to_string()))?;
    Ok(bytes)
}

fn from_cbor<T: serde::de::DeserializeOwned>(id: EventId, bytes: &[u8]) -> SyncResult<T> {
    ciborium::from_reader(bytes).map_err(|e| SyncError::crypto(id, e.to_string()))
}

/// Resolves attendees from a fixed address book.
#[derive(Default)]
pub struct StaticResolver {
    keys: HashMap<String, Vec<u8>>,
}

impl StaticResolver {
    /// Creates an empty address book.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a key for `email`.
    pub fn with_key(mut self, email: &str, key: &[u8]) -> Self {
        self.keys.insert(email.to_lowercase(), key.to_vec());
        self
    }
}

impl AttendeeResolver for StaticResolver {
    fn resolve(&self, event: &Event) -> SyncResult<Vec<AttendeeKey>> {
        event
            .content
            .attendees
            .iter()
            .map(|attendee| {
                self.keys
                    .get(&attendee.email.to_lowercase())
                    .map(|key| AttendeeKey {
                        email: attendee.email.clone(),
                        public_key: key.clone(),
                    })
                    .ok_or_else(|| SyncError::UnresolvedAttendee {
                        event: event.id(),
                        email: attendee.email.clone(),
                    })
            })
            .collect()
    }
}

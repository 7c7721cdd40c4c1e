//! Push half of a pass.

use crate::crypto::EncryptionContext;
use crate::engine::SyncEngine;
use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::transport::SyncTransport;
use calsync_core::{
    error_log, recovery, CalendarMetadata, ChangeOrigin, ErrorArgs, Event, EventId, UpdateType,
    UpdateTypes,
};
use calsync_sync_protocol::{EncryptedEvent, PushPayload, PushUpdateType};
use chrono::{DateTime, Utc};

/// Events sent with the request, with the `updated_at` they had when
/// gathered.
pub(crate) type Gathered = Vec<(EventId, DateTime<Utc>)>;

pub(crate) struct PreparedPush {
    pub(crate) payloads: Vec<PushPayload>,
    pub(crate) gathered: Gathered,
    pub(crate) isolated: usize,
    pub(crate) backlog: bool,
}

/// Gathers the oldest unsynced events and encrypts them.
///
/// An event that cannot be encrypted is isolated: queued for recovery,
/// logged and purged, so it cannot block the rest of the batch.
pub(crate) fn prepare<T: SyncTransport>(
    engine: &SyncEngine<T>,
    metadata: &CalendarMetadata,
) -> SyncResult<PreparedPush> {
    let batch_size = engine.config.push_batch_size;
    let mut candidates = engine.store.unsynced_events(batch_size + 1)?;
    let backlog = candidates.len() > batch_size;
    candidates.truncate(batch_size);

    let mut payloads = Vec::with_capacity(candidates.len());
    let mut gathered = Vec::with_capacity(candidates.len());
    let mut poisoned = Vec::new();

    for event in candidates {
        match encrypt(engine, metadata, &event) {
            Ok(encrypted) => {
                payloads.push(PushPayload {
                    event: encrypted,
                    update_types: push_update_types(&event.local.update_types),
                });
                gathered.push((event.id(), event.local.updated_at));
            }
            Err(err) if err.kind() == ErrorKind::PoisonEvent => {
                tracing::warn!(event = %event.id(), error = %err, "isolating event");
                poisoned.push((event.id(), err));
            }
            Err(err) => return Err(err),
        }
    }

    let isolated = poisoned.len();
    if !poisoned.is_empty() {
        isolate(engine, &metadata.calendar_id, poisoned)?;
    }

    Ok(PreparedPush {
        payloads,
        gathered,
        isolated,
        backlog,
    })
}

fn encrypt<T: SyncTransport>(
    engine: &SyncEngine<T>,
    metadata: &CalendarMetadata,
    event: &Event,
) -> SyncResult<EncryptedEvent> {
    let attendee_keys = engine.resolver.resolve(event)?;
    let context = EncryptionContext {
        calendar_id: &metadata.calendar_id,
        key_material: &metadata.key_material,
        attendee_keys: &attendee_keys,
    };
    engine.crypto.encrypt(event, &context)
}

fn isolate<T: SyncTransport>(
    engine: &SyncEngine<T>,
    calendar_id: &str,
    poisoned: Vec<(EventId, SyncError)>,
) -> SyncResult<()> {
    engine
        .store
        .transaction_with_origin(ChangeOrigin::Sync, |txn| {
            for (id, err) in &poisoned {
                recovery::add(txn, *id);
                error_log::create(txn, ErrorArgs::for_event(calendar_id, *id, err.to_string()));
                txn.purge_event(*id);
            }
            Ok(())
        })?;
    Ok(())
}

/// Absorbs a failed sync request.
///
/// Every gathered event is queued for recovery and one error record is
/// written. A rejection also purges the batch locally so the server copy
/// can be re-fetched. Returns the failure kind when the pass may finish
/// normally.
pub(crate) fn handle_batch_failure<T: SyncTransport>(
    engine: &SyncEngine<T>,
    gathered: &Gathered,
    err: SyncError,
) -> SyncResult<ErrorKind> {
    let kind = err.kind();
    if kind == ErrorKind::StoreClosed {
        return Err(err);
    }
    let purge = kind == ErrorKind::ServerRejection;
    tracing::warn!(
        error = %err,
        ?kind,
        batch = gathered.len(),
        purge,
        "sync request failed"
    );

    if !gathered.is_empty() {
        let calendar_id = engine.config.calendar_id.as_str();
        let message = err.to_string();
        engine
            .store
            .transaction_with_origin(ChangeOrigin::Sync, |txn| {
                for (id, _) in gathered {
                    recovery::add(txn, *id);
                    if purge {
                        txn.purge_event(*id);
                    }
                }
                error_log::create(txn, ErrorArgs::new(calendar_id, message.as_str()));
                Ok(())
            })?;
    }

    match kind {
        ErrorKind::TransientNetwork | ErrorKind::ServerRejection => Ok(kind),
        _ => Err(err),
    }
}

fn push_update_types(types: &UpdateTypes) -> Vec<PushUpdateType> {
    types
        .iter()
        .map(|kind| match kind {
            UpdateType::Content => PushUpdateType::Content,
            UpdateType::Rsvp => PushUpdateType::Rsvp,
            UpdateType::Preferences => PushUpdateType::Preferences,
        })
        .collect()
}

//! Pull half of a pass.

use crate::engine::SyncEngine;
use crate::error::SyncResult;
use crate::notification::{DeltaKind, EventDelta};
use crate::push::Gathered;
use crate::transport::SyncTransport;
use calsync_core::{
    error_log, recovery, ChangeOrigin, EmailNotification, ErrorArgs, Event, EventId,
    LocalMetadata, MaterializedIndex, SeriesAnchor, StoreTransaction, SyncState,
};
use calsync_sync_protocol::{RecoveryFetchRequest, RemoteEvent, ServerSyncState, SyncResponse};
use chrono::Utc;
use std::collections::HashSet;

/// Result of the recovery fetch.
#[derive(Default)]
pub(crate) struct RecoveryFetch {
    /// Ids the server was asked for. Empty when the fetch failed.
    pub(crate) requested: Vec<EventId>,
    /// Server copies returned.
    pub(crate) events: Vec<RemoteEvent>,
}

pub(crate) struct PullReport {
    pub(crate) pulled: usize,
    pub(crate) recovered: usize,
    pub(crate) marked_done: usize,
    pub(crate) checkpoint: u64,
}

/// Re-fetches the active recovery entries.
///
/// A failed fetch degrades to an empty result; the entries keep their try
/// count.
pub(crate) fn fetch_recovery<T: SyncTransport>(engine: &SyncEngine<T>) -> SyncResult<RecoveryFetch> {
    let entries = engine
        .store
        .recovery_queue()
        .get(engine.config.recovery_batch_size)?;
    if entries.is_empty() {
        return Ok(RecoveryFetch::default());
    }

    let requested: Vec<EventId> = entries.iter().map(|entry| entry.parent_event_id).collect();
    let request = RecoveryFetchRequest {
        calendar_id: engine.config.calendar_id.clone(),
        event_ids: requested.iter().map(|id| *id.as_uuid()).collect(),
    };
    match engine.transport.fetch_events(&request) {
        Ok(response) => Ok(RecoveryFetch {
            requested,
            events: response.events,
        }),
        Err(err) => {
            tracing::warn!(error = %err, entries = requested.len(), "recovery fetch failed");
            Ok(RecoveryFetch::default())
        }
    }
}

struct Decrypted {
    event: Event,
    recovered: bool,
}

/// Applies a sync response.
///
/// The checkpoint is persisted first, in its own transaction. Merging,
/// recovery bookkeeping and acknowledgement of the pushed batch then run in
/// one transaction.
pub(crate) fn apply<T: SyncTransport>(
    engine: &SyncEngine<T>,
    pushed: &Gathered,
    response: SyncResponse,
    recovery: RecoveryFetch,
) -> SyncResult<PullReport> {
    engine.store.set_checkpoint(response.checkpoint)?;
    let checkpoint = engine
        .store
        .metadata()?
        .map_or(response.checkpoint, |metadata| metadata.checkpoint);

    let now = Utc::now();
    let calendar_id = engine.config.calendar_id.as_str();
    let mut decrypted = Vec::new();
    let mut failures = Vec::new();
    let remote = response
        .events
        .iter()
        .map(|event| (event, false))
        .chain(recovery.events.iter().map(|event| (event, true)));
    for (remote, recovered) in remote {
        match engine.crypto.decrypt(remote) {
            Ok(mut event) => {
                event.local = LocalMetadata::created(now);
                event.local.sync_state = SyncState::Done;
                decrypted.push(Decrypted { event, recovered });
            }
            Err(err) => {
                let id = EventId::from_uuid(remote.event.parent_event_id);
                tracing::warn!(event = %id, error = %err, "cannot decrypt remote event");
                failures.push((id, err.to_string()));
            }
        }
    }

    let present: HashSet<EventId> = decrypted
        .iter()
        .filter(|d| d.recovered)
        .map(|d| d.event.id())
        .collect();
    let (found, missing): (Vec<EventId>, Vec<EventId>) = recovery
        .requested
        .iter()
        .copied()
        .partition(|id| present.contains(id));
    let acknowledge = response.state == ServerSyncState::Synced;
    let materializer = engine.store.materializer();
    let merger = engine.merger.as_ref();

    let (deltas, pulled, marked_done, emails) =
        engine
            .store
            .transaction_with_origin(ChangeOrigin::Sync, |txn| {
                let mut deltas = Vec::new();
                let mut pulled = 0;
                for Decrypted { event: remote, .. } in decrypted {
                    match existing(txn, &remote) {
                        Some(local) => {
                            let mut merged = merger.merge(&local, &remote);
                            if merged == local {
                                continue;
                            }
                            pulled += 1;
                            match SeriesAnchor::of(&local) {
                                Some(previous)
                                    if !merged.plain.deleted && !previous.matches(&merged) =>
                                {
                                    let reconciliation =
                                        materializer.reconcile_rule_change(txn, &previous, &mut merged)?;
                                    deltas.extend(
                                        reconciliation
                                            .removed
                                            .into_iter()
                                            .filter(|e| e.id() != merged.id())
                                            .map(|e| EventDelta::stored(DeltaKind::Deleted, e)),
                                    );
                                    deltas.extend(
                                        reconciliation
                                            .added
                                            .into_iter()
                                            .filter(|e| e.id() != merged.id())
                                            .map(|e| EventDelta::stored(DeltaKind::Updated, e)),
                                    );
                                }
                                _ => txn.put_event(merged.clone()),
                            }
                            // A split re-keys the parent; its old id is reported deleted above.
                            let kind = if merged.id() != local.id() {
                                DeltaKind::Added
                            } else if merged.plain.deleted && !local.plain.deleted {
                                DeltaKind::Deleted
                            } else {
                                DeltaKind::Updated
                            };
                            deltas.push(EventDelta::stored(kind, merged));
                        }
                        None => {
                            pulled += 1;
                            if !remote.plain.deleted {
                                deltas.push(EventDelta::stored(DeltaKind::Added, remote.clone()));
                            }
                            txn.put_event(remote);
                        }
                    }
                }

                recovery::remove(txn, &found);
                recovery::increase_try_count(txn, &missing);
                for (id, message) in &failures {
                    recovery::add(txn, *id);
                    error_log::create(txn, ErrorArgs::for_event(calendar_id, *id, message.as_str()));
                }

                let mut marked_done = 0;
                let mut emails = Vec::new();
                if acknowledge {
                    for (id, gathered_at) in pushed {
                        let Some(mut event) = txn.event(*id).cloned() else {
                            continue;
                        };
                        if event.local.updated_at != *gathered_at {
                            continue;
                        }
                        event.local.sync_state = SyncState::Done;
                        event.local.update_types.clear();
                        if event.local.email_notification == Some(EmailNotification::Pending) {
                            event.local.email_notification = Some(EmailNotification::Ready);
                            emails.push(*id);
                        }
                        txn.put_event(event);
                        marked_done += 1;
                    }
                }
                Ok((deltas, pulled, marked_done, emails))
            })?;

    if !emails.is_empty() {
        engine.sink.schedule_emails(emails);
    }
    let deltas = with_occurrences(engine, deltas);
    if !deltas.is_empty() {
        engine.sink.deliver(deltas);
    }

    Ok(PullReport {
        pulled,
        recovered: found.len(),
        marked_done,
        checkpoint,
    })
}

/// Finds the local copy of a remote event, by id or, for a child, by its
/// place in the series.
fn existing(txn: &StoreTransaction<'_>, remote: &Event) -> Option<Event> {
    if let Some(event) = txn.event(remote.id()) {
        return Some(event.clone());
    }
    match (remote.plain.parent_recurrence_id, remote.plain.recurrence_date) {
        (Some(parent), Some(date)) => txn.find_child(parent, date).cloned(),
        _ => None,
    }
}

/// Adds the occurrences of changed series inside the notification window.
fn with_occurrences<T: SyncTransport>(
    engine: &SyncEngine<T>,
    mut deltas: Vec<EventDelta>,
) -> Vec<EventDelta> {
    let from = Utc::now();
    let Ok(window) = chrono::Duration::from_std(engine.config.notification_window) else {
        return deltas;
    };
    let to = from + window;
    let materializer = engine.store.materializer();

    let parents: Vec<(DeltaKind, Event)> = deltas
        .iter()
        .filter(|d| d.kind != DeltaKind::Deleted && d.event.is_recurring_parent())
        .map(|d| (d.kind, d.event.clone()))
        .collect();
    for (kind, parent) in parents {
        let occurrences = engine.store.children_of(parent.id()).and_then(|children| {
            let index = MaterializedIndex::from_children(&children);
            materializer.virtualize(&parent, from, to, &index)
        });
        match occurrences {
            Ok(occurrences) => deltas.extend(
                occurrences
                    .into_iter()
                    .map(|occurrence| EventDelta::occurrence(kind, occurrence)),
            ),
            Err(err) => {
                tracing::warn!(parent = %parent.id(), error = %err, "cannot expand series");
            }
        }
    }
    deltas
}

//! Calendar event and its field groups.

use super::EventId;
use crate::recurrence::RecurrenceRule;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Whether a local event still needs to be pushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SyncState {
    /// Local changes have not been acknowledged by the server.
    #[default]
    Waiting,
    /// The server acknowledged the latest local version.
    Done,
}

/// Category of a local modification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum UpdateType {
    /// Title, description, time, recurrence and similar shared fields.
    Content,
    /// The local user's attendance response.
    Rsvp,
    /// Per-user preferences (color, reminders).
    Preferences,
}

/// Set of [`UpdateType`]s.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UpdateTypes(BTreeSet<UpdateType>);

impl UpdateTypes {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a set holding a single update type.
    #[must_use]
    pub fn only(kind: UpdateType) -> Self {
        let mut set = Self::new();
        set.insert(kind);
        set
    }

    /// Adds an update type.
    pub fn insert(&mut self, kind: UpdateType) {
        self.0.insert(kind);
    }

    /// Adds every update type of `other`.
    pub fn extend(&mut self, other: &UpdateTypes) {
        self.0.extend(other.0.iter().copied());
    }

    /// Returns true if `kind` is in the set.
    #[must_use]
    pub fn contains(&self, kind: UpdateType) -> bool {
        self.0.contains(&kind)
    }

    /// Returns true if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Removes every update type.
    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// Iterates the set in order.
    pub fn iter(&self) -> impl Iterator<Item = UpdateType> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<UpdateType> for UpdateTypes {
    fn from_iter<I: IntoIterator<Item = UpdateType>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Individually merged field of an event.
///
/// Keys of [`Event::last_update_key_map`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EventField {
    /// `content.title`
    Title,
    /// `content.description`
    Description,
    /// `content.location`
    Location,
    /// `content.organizer`
    Organizer,
    /// `content.attendees`
    Attendees,
    /// `plain.start_date`
    StartDate,
    /// `plain.end_date`
    EndDate,
    /// `plain.recurrence_rule`
    RecurrenceRule,
    /// `plain.parent_recurrence_id` together with `plain.recurrence_date`.
    Series,
    /// `plain.deleted`
    Deleted,
    /// The whole `preferences` group.
    Preferences,
}

impl EventField {
    /// Every mergeable field.
    pub const ALL: [EventField; 11] = [
        EventField::Title,
        EventField::Description,
        EventField::Location,
        EventField::Organizer,
        EventField::Attendees,
        EventField::StartDate,
        EventField::EndDate,
        EventField::RecurrenceRule,
        EventField::Series,
        EventField::Deleted,
        EventField::Preferences,
    ];

    /// The update category a change to this field belongs to.
    #[must_use]
    pub fn update_type(self) -> UpdateType {
        match self {
            EventField::Attendees => UpdateType::Rsvp,
            EventField::Preferences => UpdateType::Preferences,
            _ => UpdateType::Content,
        }
    }
}

/// Attendance response of an attendee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AttendeeStatus {
    /// No response yet.
    #[default]
    NeedsAction,
    /// Will attend.
    Accepted,
    /// Will not attend.
    Declined,
    /// Might attend.
    Tentative,
}

/// An invited participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attendee {
    /// Mail address, used to resolve the attendee's public key.
    pub email: String,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Attendance response.
    #[serde(default)]
    pub status: AttendeeStatus,
}

impl Attendee {
    /// Creates an attendee who has not responded yet.
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: None,
            status: AttendeeStatus::NeedsAction,
        }
    }
}

/// Shared, end-to-end encrypted content.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EventContent {
    /// Title.
    pub title: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Location.
    #[serde(default)]
    pub location: String,
    /// Organizer mail address.
    #[serde(default)]
    pub organizer: Option<String>,
    /// Invited participants.
    #[serde(default)]
    pub attendees: Vec<Attendee>,
}

/// Scheduling fields visible to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlainContent {
    /// Start instant.
    pub start_date: DateTime<Utc>,
    /// End instant.
    pub end_date: DateTime<Utc>,
    /// Recurrence rule; set on recurring parents only.
    #[serde(default)]
    pub recurrence_rule: Option<RecurrenceRule>,
    /// Occurrence this child overrides.
    #[serde(default)]
    pub recurrence_date: Option<DateTime<Utc>>,
    /// Parent series of a child.
    #[serde(default)]
    pub parent_recurrence_id: Option<EventId>,
    /// Soft-delete flag.
    #[serde(default)]
    pub deleted: bool,
    /// Scheduling revision, advanced by the organizer's time changes.
    #[serde(default)]
    pub sequence: u32,
}

/// Per-user, non-shared preferences.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EventPreferences {
    /// Display color.
    #[serde(default)]
    pub color: Option<String>,
    /// Reminder offsets before start, in minutes.
    #[serde(default)]
    pub reminders: Vec<i64>,
}

/// State of the invitation mail for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmailNotification {
    /// Mails must go out once the server has the event.
    Pending,
    /// Handed to the notification sink.
    Ready,
}

/// Replica-local bookkeeping, never sent to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalMetadata {
    /// Push state.
    pub sync_state: SyncState,
    /// Categories of unpushed local changes.
    #[serde(default)]
    pub update_types: UpdateTypes,
    /// First local write.
    pub created_at: DateTime<Utc>,
    /// Last local write; orders the push queue.
    pub updated_at: DateTime<Utc>,
    /// Invitation mail marker.
    #[serde(default)]
    pub email_notification: Option<EmailNotification>,
}

impl LocalMetadata {
    /// Fresh metadata for a record created at `now`.
    #[must_use]
    pub fn created(now: DateTime<Utc>) -> Self {
        Self {
            sync_state: SyncState::Waiting,
            update_types: UpdateTypes::only(UpdateType::Content),
            created_at: now,
            updated_at: now,
            email_notification: None,
        }
    }
}

/// A calendar event as stored in the replica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Identity, unique per replica.
    pub parent_event_id: EventId,
    /// Shared content.
    pub content: EventContent,
    /// Scheduling fields.
    pub plain: PlainContent,
    /// Per-user preferences.
    #[serde(default)]
    pub preferences: EventPreferences,
    /// Local bookkeeping.
    pub local: LocalMetadata,
    /// Timestamp of the last write of each field.
    #[serde(default)]
    pub last_update_key_map: BTreeMap<EventField, DateTime<Utc>>,
}

impl Event {
    /// Creates a local, unsynced event.
    pub fn new(title: impl Into<String>, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        let now = Utc::now();
        Self {
            parent_event_id: EventId::new(),
            content: EventContent {
                title: title.into(),
                ..EventContent::default()
            },
            plain: PlainContent {
                start_date: start,
                end_date: end,
                recurrence_rule: None,
                recurrence_date: None,
                parent_recurrence_id: None,
                deleted: false,
                sequence: 0,
            },
            preferences: EventPreferences::default(),
            local: LocalMetadata::created(now),
            last_update_key_map: BTreeMap::new(),
        }
    }

    /// Returns the identity.
    #[must_use]
    pub fn id(&self) -> EventId {
        self.parent_event_id
    }

    /// Returns true for a series parent.
    #[must_use]
    pub fn is_recurring_parent(&self) -> bool {
        self.plain.recurrence_rule.is_some() && self.plain.parent_recurrence_id.is_none()
    }

    /// Returns true for a materialized override of one occurrence.
    #[must_use]
    pub fn is_recurring_child(&self) -> bool {
        self.plain.parent_recurrence_id.is_some() && self.plain.recurrence_date.is_some()
    }

    /// Returns the scheduled length.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.plain.end_date - self.plain.start_date
    }

    /// Returns true if the event intersects `[start, end)`.
    ///
    /// Zero-length events are included when they start inside the window.
    #[must_use]
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        if self.plain.start_date == self.plain.end_date {
            return self.plain.start_date >= start && self.plain.start_date < end;
        }
        self.plain.start_date < end && self.plain.end_date > start
    }

    /// Returns true if the local user is the organizer.
    #[must_use]
    pub fn is_organized_by(&self, address: Option<&str>) -> bool {
        match (self.content.organizer.as_deref(), address) {
            (Some(organizer), Some(address)) => organizer.eq_ignore_ascii_case(address),
            _ => false,
        }
    }

    /// Records a local write of `fields` at `now` and marks the event unsynced.
    pub fn touch(&mut self, fields: &[EventField], now: DateTime<Utc>) {
        for field in fields {
            self.last_update_key_map.insert(*field, now);
            self.local.update_types.insert(field.update_type());
        }
        self.local.updated_at = now;
        self.local.sync_state = SyncState::Waiting;
    }

    /// Returns the timestamp of the last write of `field`.
    #[must_use]
    pub fn field_timestamp(&self, field: EventField) -> Option<DateTime<Utc>> {
        self.last_update_key_map.get(&field).copied()
    }

    /// Soft-deletes the event as a local write.
    pub fn mark_deleted(&mut self, now: DateTime<Utc>) {
        self.plain.deleted = true;
        self.touch(&[EventField::Deleted], now);
    }

    /// Builds an ephemeral occurrence of this series starting at `start`.
    ///
    /// The occurrence gets a fresh id on every call.
    #[must_use]
    pub fn occurrence_at(&self, start: DateTime<Utc>) -> Event {
        let mut occurrence = self.clone();
        occurrence.parent_event_id = EventId::new();
        occurrence.plain.start_date = start;
        occurrence.plain.end_date = start + self.duration();
        occurrence.plain.recurrence_rule = None;
        occurrence.plain.recurrence_date = Some(start);
        occurrence.plain.parent_recurrence_id = Some(self.parent_event_id);
        occurrence
    }
}

/// Partial local edit of an event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventPatch {
    /// New title.
    pub title: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// New location.
    pub location: Option<String>,
    /// New attendee list.
    pub attendees: Option<Vec<Attendee>>,
    /// New start.
    pub start_date: Option<DateTime<Utc>>,
    /// New end.
    pub end_date: Option<DateTime<Utc>>,
    /// New preferences.
    pub preferences: Option<EventPreferences>,
    /// Soft-delete flag.
    pub deleted: Option<bool>,
}

impl EventPatch {
    /// Creates an empty patch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the title.
    #[must_use]
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Sets the location.
    #[must_use]
    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the attendee list.
    #[must_use]
    pub fn attendees(mut self, attendees: Vec<Attendee>) -> Self {
        self.attendees = Some(attendees);
        self
    }

    /// Moves the event.
    #[must_use]
    pub fn times(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start_date = Some(start);
        self.end_date = Some(end);
        self
    }

    /// Sets the preferences.
    #[must_use]
    pub fn preferences(mut self, preferences: EventPreferences) -> Self {
        self.preferences = Some(preferences);
        self
    }

    /// Sets the soft-delete flag.
    #[must_use]
    pub fn deleted(mut self, deleted: bool) -> Self {
        self.deleted = Some(deleted);
        self
    }

    /// Applies the patch, returning the fields whose value changed.
    pub fn apply(&self, event: &mut Event) -> Vec<EventField> {
        let mut changed = Vec::new();
        fn set<T: PartialEq + Clone>(
            slot: &mut T,
            value: &Option<T>,
            field: EventField,
            changed: &mut Vec<EventField>,
        ) {
            if let Some(value) = value {
                if slot != value {
                    *slot = value.clone();
                    changed.push(field);
                }
            }
        }
        set(&mut event.content.title, &self.title, EventField::Title, &mut changed);
        set(
            &mut event.content.description,
            &self.description,
            EventField::Description,
            &mut changed,
        );
        set(
            &mut event.content.location,
            &self.location,
            EventField::Location,
            &mut changed,
        );
        set(
            &mut event.content.attendees,
            &self.attendees,
            EventField::Attendees,
            &mut changed,
        );
        set(
            &mut event.plain.start_date,
            &self.start_date,
            EventField::StartDate,
            &mut changed,
        );
        set(
            &mut event.plain.end_date,
            &self.end_date,
            EventField::EndDate,
            &mut changed,
        );
        set(
            &mut event.preferences,
            &self.preferences,
            EventField::Preferences,
            &mut changed,
        );
        set(&mut event.plain.deleted, &self.deleted, EventField::Deleted, &mut changed);
        changed
    }
}

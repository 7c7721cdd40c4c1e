//! Fixtures: fixed instants, events, series and stores.

use calsync_core::{CalendarMetadata, Event, EventStore, RecurrenceRule, StoreConfig};
use calsync_storage::FileBackend;
use chrono::{DateTime, Duration, TimeZone, Utc, Weekday};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// Calendar id used by fixtures.
pub const CALENDAR_ID: &str = "cal-test";

/// Address of the replica owner.
pub const OWNER: &str = "owner@example.com";

/// Monday 2024-04-01 09:00 UTC.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 4, 1, 9, 0, 0)
        .single()
        .expect("valid fixture instant")
}

/// `t0()` shifted by days and hours.
pub fn at(days: i64, hours: i64) -> DateTime<Utc> {
    t0() + Duration::days(days) + Duration::hours(hours)
}

/// A single event of `minutes` length organized by [`OWNER`].
pub fn event(title: &str, start: DateTime<Utc>, minutes: i64) -> Event {
    let mut event = Event::new(title, start, start + Duration::minutes(minutes));
    event.content.organizer = Some(OWNER.to_string());
    event
}

/// A weekly series parent with `count` occurrences.
pub fn weekly_series(
    title: &str,
    start: DateTime<Utc>,
    minutes: i64,
    days: &[Weekday],
    count: u32,
) -> Event {
    let mut parent = event(title, start, minutes);
    parent.plain.recurrence_rule =
        Some(RecurrenceRule::weekly(days.iter().copied()).with_count(count));
    parent
}

/// A materialized child overriding the occurrence of `parent` at `date`.
pub fn child_of(parent: &Event, date: DateTime<Utc>, title: &str) -> Event {
    let mut child = parent.occurrence_at(date);
    child.content.title = title.to_string();
    child
}

/// Metadata for [`CALENDAR_ID`] owned by [`OWNER`].
pub fn metadata() -> CalendarMetadata {
    CalendarMetadata::new(CALENDAR_ID).with_owner(OWNER)
}

/// An in-memory store initialized with [`metadata`].
pub fn memory_store() -> Arc<EventStore> {
    let store = EventStore::open_in_memory().expect("Failed to open in-memory store");
    store
        .set_metadata(metadata())
        .expect("Failed to write metadata");
    Arc::new(store)
}

/// A file-backed store with automatic cleanup.
pub struct TestStore {
    /// The store instance.
    pub store: Arc<EventStore>,
    config: StoreConfig,
    temp_dir: TempDir,
}

impl TestStore {
    /// Creates a store in a fresh temporary directory.
    pub fn file() -> Self {
        Self::file_with_config(StoreConfig::default())
    }

    /// Creates a store with `config` in a fresh temporary directory.
    pub fn file_with_config(config: StoreConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = Arc::new(open(&temp_dir.path().join("calendar.journal"), config.clone()));
        store
            .set_metadata(metadata())
            .expect("Failed to write metadata");
        Self {
            store,
            config,
            temp_dir,
        }
    }

    /// Returns the journal path.
    pub fn path(&self) -> PathBuf {
        self.temp_dir.path().join("calendar.journal")
    }

    /// Closes the store and opens it again from its journal.
    pub fn reopen(&mut self) {
        self.store.close().expect("Failed to close store");
        self.store = Arc::new(open(&self.path(), self.config.clone()));
    }
}

impl std::ops::Deref for TestStore {
    type Target = EventStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

fn open(path: &std::path::Path, config: StoreConfig) -> EventStore {
    let backend =
        FileBackend::open_with_create_dirs(path).expect("Failed to create journal backend");
    EventStore::open(Box::new(backend), config).expect("Failed to open store")
}

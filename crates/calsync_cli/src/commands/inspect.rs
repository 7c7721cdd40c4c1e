//! Inspect command implementation.

use super::{format_size, print_json};
use crate::Format;
use calsync_core::EventStore;
use serde::Serialize;
use std::path::Path;

/// Replica inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Journal path.
    pub path: String,
    /// Remote calendar id, if metadata was written.
    pub calendar_id: Option<String>,
    /// Owner mail address.
    pub owner_address: Option<String>,
    /// Last applied server checkpoint.
    pub checkpoint: Option<u64>,
    /// Last commit sequence.
    pub sequence: u64,
    /// Journal size in bytes.
    pub journal_bytes: u64,
    /// Stored events, tombstones included.
    pub events: usize,
    /// Soft-deleted events.
    pub deleted_events: usize,
    /// Events waiting for a push.
    pub unsynced_events: usize,
    /// Saved drafts.
    pub drafts: usize,
    /// Recovery entries, exhausted included.
    pub recovery_entries: usize,
    /// Recovery entries no longer retried.
    pub exhausted_entries: usize,
    /// Error log records.
    pub error_records: usize,
}

/// Builds the inspection result.
pub fn inspect(store: &EventStore, path: &Path) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let stats = store.stats()?;
    let metadata = store.metadata()?;
    Ok(InspectResult {
        path: path.display().to_string(),
        calendar_id: metadata.as_ref().map(|m| m.calendar_id.clone()),
        owner_address: metadata.as_ref().and_then(|m| m.owner_address.clone()),
        checkpoint: metadata.as_ref().map(|m| m.checkpoint),
        sequence: stats.sequence,
        journal_bytes: stats.journal_bytes,
        events: stats.events,
        deleted_events: stats.deleted_events,
        unsynced_events: stats.unsynced_events,
        drafts: stats.drafts,
        recovery_entries: stats.recovery_entries,
        exhausted_entries: stats.exhausted_entries,
        error_records: stats.error_records,
    })
}

/// Runs the inspect command.
pub fn run(store: &EventStore, path: &Path, format: Format) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(store, path)?;
    match format {
        Format::Json => print_json(&result)?,
        Format::Text => print_text_output(&result),
    }
    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("Replica Inspection");
    println!("==================");
    println!();
    println!("Path: {}", result.path);
    println!();
    println!("Calendar:");
    match &result.calendar_id {
        Some(id) => println!("  Id:         {}", id),
        None => println!("  Id:         (no metadata)"),
    }
    if let Some(owner) = &result.owner_address {
        println!("  Owner:      {}", owner);
    }
    if let Some(checkpoint) = result.checkpoint {
        println!("  Checkpoint: {}", checkpoint);
    }
    println!();
    println!("Journal:");
    println!("  Size:     {}", format_size(result.journal_bytes));
    println!("  Sequence: {}", result.sequence);
    println!();
    println!("Events:");
    println!("  Stored:   {}", result.events);
    println!("  Deleted:  {}", result.deleted_events);
    println!("  Unsynced: {}", result.unsynced_events);
    println!("  Drafts:   {}", result.drafts);
    println!();
    println!("Sync:");
    println!(
        "  Recovery entries: {} ({} exhausted)",
        result.recovery_entries, result.exhausted_entries
    );
    println!("  Error records:    {}", result.error_records);
}

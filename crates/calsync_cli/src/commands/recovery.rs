//! Recovery queue listing.

use super::print_json;
use crate::Format;
use calsync_core::{EventStore, EventToRecover};

/// Returns the retryable entries, or every entry when `all` is set.
pub fn entries(store: &EventStore, all: bool) -> Result<Vec<EventToRecover>, Box<dyn std::error::Error>> {
    let queue = store.recovery_queue();
    let entries = if all {
        queue.all()?
    } else {
        queue.get(usize::MAX)?
    };
    Ok(entries)
}

/// Runs the recovery command.
pub fn run(store: &EventStore, all: bool, format: Format) -> Result<(), Box<dyn std::error::Error>> {
    let entries = entries(store, all)?;
    match format {
        Format::Json => print_json(&entries)?,
        Format::Text => {
            if entries.is_empty() {
                println!("Recovery queue is empty");
            }
            for entry in &entries {
                println!(
                    "{}  tries={}  queued={}{}",
                    entry.parent_event_id,
                    entry.try_count,
                    entry.created_at.to_rfc3339(),
                    if entry.is_exhausted() { "  (exhausted)" } else { "" }
                );
            }
        }
    }
    Ok(())
}

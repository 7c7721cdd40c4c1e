//! Error log listing.

use super::print_json;
use crate::Format;
use calsync_core::EventStore;

/// Runs the errors command.
pub fn run(store: &EventStore, format: Format) -> Result<(), Box<dyn std::error::Error>> {
    let records = store.error_log().get_all()?;
    match format {
        Format::Json => print_json(&records)?,
        Format::Text => {
            if records.is_empty() {
                println!("No sync errors recorded");
            }
            for record in &records {
                println!("{}  x{}  calendar={}", record.error_id, record.count, record.calendar_id);
                for message in &record.message {
                    println!("    {}", message);
                }
            }
        }
    }
    Ok(())
}

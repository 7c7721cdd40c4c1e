//! Compact command implementation.

use super::format_size;
use calsync_core::EventStore;

/// Runs the compact command.
pub fn run(store: &EventStore) -> Result<(), Box<dyn std::error::Error>> {
    let before = store.stats()?.journal_bytes;
    let after = store.compact()?;

    println!("Compaction complete");
    println!("  Size before: {}", format_size(before));
    println!("  Size after:  {}", format_size(after));
    if before > 0 {
        let saved = before.saturating_sub(after);
        println!(
            "  Space saved: {} ({:.1}%)",
            format_size(saved),
            saved as f64 / before as f64 * 100.0
        );
    }
    Ok(())
}

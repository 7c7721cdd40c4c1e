//! calsync CLI
//!
//! Diagnostics for a file-backed calendar replica.
//!
//! # Commands
//!
//! - `inspect` - Metadata, table counts and journal size
//! - `recovery` - Recovery queue entries
//! - `errors` - Deduplicated sync failures
//! - `events` - Events in a time window, optionally with virtual occurrences
//! - `compact` - Rewrite the journal as a single snapshot

mod commands;

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Offline calendar replica tools.
#[derive(Parser)]
#[command(name = "calsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the replica journal
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// File holding the 32-byte sealing key of an encrypted replica
    #[arg(global = true, short, long)]
    key_file: Option<PathBuf>,

    /// Output format
    #[arg(global = true, short, long, value_enum, default_value_t = Format::Text)]
    format: Format,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// How results are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// Human-readable text.
    Text,
    /// Pretty-printed JSON.
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Display metadata, table counts and journal size
    Inspect,

    /// List recovery queue entries
    Recovery {
        /// Include entries that are no longer retried
        #[arg(short, long)]
        all: bool,
    },

    /// List recorded sync failures
    Errors,

    /// List events overlapping a time window
    Events {
        /// Window start (RFC 3339 or YYYY-MM-DD)
        #[arg(long, value_parser = parse_instant)]
        from: DateTime<Utc>,

        /// Window end, exclusive (RFC 3339 or YYYY-MM-DD)
        #[arg(long, value_parser = parse_instant)]
        to: DateTime<Utc>,

        /// Expand recurring series into their occurrences
        #[arg(short, long)]
        expand: bool,
    },

    /// Rewrite the journal as a single snapshot
    Compact,
}

fn parse_instant(value: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(value) {
        return Ok(instant.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| format!("invalid instant '{value}', expected RFC 3339 or YYYY-MM-DD"))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let path = cli.path.ok_or("Replica path required (--path)")?;
    let store = commands::open_store(&path, cli.key_file.as_deref())?;

    let result = match cli.command {
        Commands::Inspect => commands::inspect::run(&store, &path, cli.format),
        Commands::Recovery { all } => commands::recovery::run(&store, all, cli.format),
        Commands::Errors => commands::errors::run(&store, cli.format),
        Commands::Events { from, to, expand } => {
            if from >= to {
                return Err("--from must be before --to".into());
            }
            commands::events::run(&store, from, to, expand, cli.format)
        }
        Commands::Compact => commands::compact::run(&store),
    };

    store.close()?;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn instants_accept_dates_and_timestamps() {
        assert_eq!(
            parse_instant("2024-04-01").unwrap(),
            Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(
            parse_instant("2024-04-01T09:30:00+02:00").unwrap(),
            Utc.with_ymd_and_hms(2024, 4, 1, 7, 30, 0).unwrap()
        );
        assert!(parse_instant("next tuesday").is_err());
    }

    #[test]
    fn cli_parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "calsync", "events", "--from", "2024-04-01", "--to", "2024-04-08", "--expand",
            "--path", "replica.journal", "--format", "json",
        ])
        .unwrap();
        assert_eq!(cli.format, Format::Json);
        assert!(matches!(cli.command, Commands::Events { expand: true, .. }));
    }
}

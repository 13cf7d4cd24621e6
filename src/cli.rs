//! CLI struct definitions for the capture-ledger command-line interface.
//!
//! All clap-derived types live here. Dispatch lives in `lib.rs`.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "capture-ledger",
    version = env!("CARGO_PKG_VERSION"),
    about = "Crash-safe staging ledger that exports voice memos and emails into a notes vault exactly once."
)]
pub(crate) struct Cli {
    /// State root holding the ledger, its config and backups.
    #[clap(long, global = true, default_value = ".capture-ledger")]
    pub root: PathBuf,
    /// Output format.
    #[clap(long, global = true, value_enum, default_value = "text")]
    pub format: OutputFormat,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Create the state root, vault layout, default config and ledger
    Init,
    /// Stage one capture and drive it to export
    Ingest {
        #[clap(subcommand)]
        command: IngestCommand,
    },
    /// Resume every capture left in a non-terminal state
    Recover,
    /// Snapshot and verify the ledger now
    Backup,
    /// Delete terminal captures older than the retention horizon
    Sweep {
        /// Override the configured retention horizon.
        #[clap(long)]
        days: Option<u32>,
    },
    /// Show the read-only health report
    Health {
        /// Error summary window in hours.
        #[clap(long, default_value_t = crate::plugins::health::DEFAULT_ERROR_WINDOW_HOURS)]
        window_hours: i64,
    },
    /// Recover, then ingest from voice folders, export pending captures and back up when due
    Run {
        /// Voice memo drop folder (repeatable).
        #[clap(long = "voice-dir")]
        voice_dirs: Vec<PathBuf>,
        /// Keep polling every N seconds instead of a single pass.
        #[clap(long)]
        poll_secs: Option<u64>,
    },
}

#[derive(Subcommand, Debug)]
pub(crate) enum IngestCommand {
    /// Stage a voice memo by path
    Voice {
        /// Audio file to transcribe and export.
        path: PathBuf,
    },
    /// Stage an email message
    Email {
        #[clap(long)]
        message_id: String,
        #[clap(long)]
        from: String,
        #[clap(long, default_value = "")]
        subject: String,
        /// File holding the message body; `-` reads stdin.
        #[clap(long)]
        body_file: PathBuf,
    },
}

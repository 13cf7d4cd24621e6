//! Capture Ledger: crash-safe staging and exactly-once export of captures.
//!
//! Voice memos and emails are staged in a local SQLite ledger, normalized,
//! fingerprinted, deduplicated and exported into a notes vault as one
//! Markdown file each. A crash at any point leaves the capture either fully
//! exported or still recorded as pending; the next start resumes it.
//!
//! # Architecture
//!
//! ## Single writer
//!
//! One process owns the ledger file and the vault. A second process fails
//! fast with a busy error instead of waiting indefinitely.
//!
//! ## The Thin Waist
//!
//! Every state change goes through [`plugins::ledger::Ledger`], which
//! validates the transition, commits it in one `IMMEDIATE` transaction and
//! appends a line to `ledger.events.jsonl`.
//!
//! ## Components (Plugins)
//!
//! - `normalize`: canonical text and SHA-256 fingerprints
//! - `state`: the capture lifecycle and its legal transitions
//! - `ledger`: the SQLite store
//! - `dedup`: collision checks against the ledger and the destination file
//! - `export`: temp-write, fsync, rename into `<vault>/inbox/`
//! - `transcribe`: the external transcription collaborator
//! - `pipeline`: drives one capture from staged to terminal
//! - `recovery`: resumes non-terminal captures at startup
//! - `backup` / `retention`: verified snapshots gating old-row deletion
//! - `watcher`: voice memo drop-folder intake
//! - `health`: read-only diagnostic report
//!
//! # Examples
//!
//! ```bash
//! capture-ledger init
//! capture-ledger ingest voice ~/Memos/groceries.m4a
//! capture-ledger ingest email --message-id '<a@b>' --from me@x --body-file body.txt
//! capture-ledger run --voice-dir ~/Memos --poll-secs 30
//! capture-ledger health --format json
//! ```

mod cli;
pub mod core;
pub mod plugins;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use cli::{Cli, Command, IngestCommand, OutputFormat};
use colored::Colorize;
use crate::core::config::{self, LedgerConfig};
use crate::core::store::Store;
use crate::plugins::backup::{BackupController, VerificationResult};
use crate::plugins::health;
use crate::plugins::ledger::Ledger;
use crate::plugins::pipeline::{EmailMessage, Ingest, IngestOutcome, Pipeline, ProcessReport, VoiceMemo};
use crate::plugins::recovery::{self, RecoveryReport};
use crate::plugins::retention::{self, RetentionOutcome};
use crate::plugins::watcher;
use serde::Serialize;
use std::fs;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

fn emit<T: Serialize>(format: OutputFormat, value: &T, text: impl FnOnce(&T)) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Text => text(value),
    }
    Ok(())
}

fn print_process_report(report: &ProcessReport) {
    let marker = if report.error.is_some() {
        "●".bright_red()
    } else if report.status.is_terminal() {
        "●".bright_green()
    } else {
        "●".bright_yellow()
    };
    let path = report
        .path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    println!("  {marker} {} {} {}", report.capture_id, report.status, path.dimmed());
    if let Some(original) = &report.duplicate_of {
        println!("      duplicate of {original}");
    }
    if let Some(err) = &report.error {
        println!("      {}", err.bright_red());
    }
}

fn print_recovery(report: &RecoveryReport) {
    if report.scanned == 0 && report.stale_temps_removed == 0 {
        return;
    }
    println!(
        "{} resumed {} capture(s), removed {} stale temp file(s)",
        "▸".bright_yellow(),
        report.scanned,
        report.stale_temps_removed
    );
    for r in &report.resumed {
        print_process_report(r);
    }
}

fn print_backup(result: &VerificationResult) {
    if result.verified {
        println!(
            "{} backup verified: {} (pruned {})",
            "●".bright_green(),
            result.backup_path.display(),
            result.pruned
        );
    } else {
        println!(
            "{} backup failed verification ({} consecutive): {}",
            "●".bright_red(),
            result.consecutive_failures,
            result.detail.as_deref().unwrap_or("unknown")
        );
    }
}

fn print_retention(outcome: &RetentionOutcome) {
    match outcome {
        RetentionOutcome::Swept { cutoff, deleted } => {
            println!("{} swept {deleted} capture(s) older than {cutoff}", "●".bright_green())
        }
        RetentionOutcome::Suspended {
            consecutive_failures,
        } => println!(
            "{} retention suspended after {consecutive_failures} failed backup verifications",
            "●".bright_red()
        ),
    }
}

/// Open the pipeline and run recovery before anything new is accepted.
fn start_pipeline(config: &LedgerConfig) -> anyhow::Result<(Pipeline, RecoveryReport)> {
    let mut pipeline = Pipeline::open(config)
        .with_context(|| format!("opening ledger {}", config.ledger_path().display()))?;
    let report = recovery::recover(&mut pipeline)?;
    Ok((pipeline, report))
}

fn read_body(path: &Path) -> anyhow::Result<String> {
    if path == Path::new("-") {
        let mut body = String::new();
        std::io::stdin().read_to_string(&mut body)?;
        return Ok(body);
    }
    fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

#[derive(Serialize)]
struct InitReport {
    state_root: String,
    vault_root: String,
    created: Vec<String>,
    config_written: bool,
    migrations_applied: bool,
}

fn cmd_init(root: &Path, format: OutputFormat) -> anyhow::Result<()> {
    let config_written = config::write_default_config(root)?;
    let config = config::load_config(root)?;
    let store = Store::from_config(&config);
    let mut created: Vec<String> = store
        .ensure_layout()?
        .into_iter()
        .map(|p| p.display().to_string())
        .collect();
    if !config.backup_dir.is_dir() {
        fs::create_dir_all(&config.backup_dir)?;
        created.push(config.backup_dir.display().to_string());
    }
    let existed = config.ledger_path().exists();
    Ledger::open(&config)?;

    let report = InitReport {
        state_root: config.state_root.display().to_string(),
        vault_root: config.vault_root.display().to_string(),
        created,
        config_written,
        migrations_applied: !existed,
    };
    emit(format, &report, |r| {
        println!("{} capture ledger ready", "▸".bright_green());
        println!("    {} {}", "●".bright_green(), r.state_root.bright_white());
        println!("    {} {}", "●".bright_green(), r.vault_root.bright_white());
        for dir in &r.created {
            println!("      created {}", dir.dimmed());
        }
    })
}

#[derive(Serialize)]
struct IngestReport {
    recovery: RecoveryReport,
    outcome: IngestOutcome,
}

fn cmd_ingest(config: &LedgerConfig, command: IngestCommand, format: OutputFormat) -> anyhow::Result<()> {
    let input = match command {
        IngestCommand::Voice { path } => Ingest::Voice(VoiceMemo { audio_path: path }),
        IngestCommand::Email {
            message_id,
            from,
            subject,
            body_file,
        } => Ingest::Email(EmailMessage {
            message_id,
            from,
            subject,
            body: read_body(&body_file)?,
        }),
    };
    let (mut pipeline, recovery) = start_pipeline(config)?;
    let outcome = pipeline.ingest(input)?;
    emit(format, &IngestReport { recovery, outcome }, |r| {
        print_recovery(&r.recovery);
        match &r.outcome {
            IngestOutcome::Staged(report) => print_process_report(report),
            IngestOutcome::AlreadyStaged { channel, native_id } => {
                println!("  {} {channel}:{native_id} already staged", "●".dimmed())
            }
        }
    })
}

#[derive(Serialize)]
struct RunPass {
    watched: Vec<watcher::WatchReport>,
    processed: Vec<ProcessReport>,
    backup: Option<VerificationResult>,
    retention: RetentionOutcome,
}

fn cmd_run(
    config: &LedgerConfig,
    voice_dirs: &[std::path::PathBuf],
    poll_secs: Option<u64>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let (mut pipeline, recovery) = start_pipeline(config)?;
    emit(format, &recovery, print_recovery)?;
    let backups = BackupController::from_config(config);

    loop {
        let mut watched = Vec::with_capacity(voice_dirs.len());
        for dir in voice_dirs {
            watched.push(watcher::scan_voice_dir(&mut pipeline, dir)?);
        }
        let processed = pipeline.process_pending()?;
        let backup = match backups.maybe_run(pipeline.ledger(), Utc::now()) {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(error = %e, "backup run failed to record its result");
                None
            }
        };
        let retention =
            retention::sweep_retention(pipeline.ledger_mut(), config.retention_days, Utc::now())?;

        let pass = RunPass {
            watched,
            processed,
            backup,
            retention,
        };
        emit(format, &pass, |p| {
            for w in &p.watched {
                println!(
                    "{} {}: {} new, {} already staged, {} failed",
                    "▸".bright_yellow(),
                    w.dir.display(),
                    w.staged.len(),
                    w.already_staged,
                    w.failed.len()
                );
                for r in &w.staged {
                    print_process_report(r);
                }
                for (path, err) in &w.failed {
                    println!("  {} {} {}", "●".bright_red(), path.display(), err);
                }
            }
            for r in &p.processed {
                print_process_report(r);
            }
            if let Some(b) = &p.backup {
                print_backup(b);
            }
            if matches!(p.retention, RetentionOutcome::Suspended { .. }) {
                print_retention(&p.retention);
            }
        })?;

        match poll_secs {
            Some(secs) => std::thread::sleep(Duration::from_secs(secs.max(1))),
            None => return Ok(()),
        }
    }
}

pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let format = cli.format;
    match cli.command {
        Command::Init => cmd_init(&cli.root, format),
        command => {
            let config = config::load_config(&cli.root)
                .with_context(|| format!("loading config from {}", cli.root.display()))?;
            dispatch(&config, command, format)
        }
    }
}

fn dispatch(config: &LedgerConfig, command: Command, format: OutputFormat) -> anyhow::Result<()> {
    match command {
        Command::Init => cmd_init(&config.state_root, format),
        Command::Ingest { command } => cmd_ingest(config, command, format),
        Command::Recover => {
            let (_pipeline, report) = start_pipeline(config)?;
            emit(format, &report, |r| {
                if r.scanned == 0 && r.stale_temps_removed == 0 {
                    println!("{} nothing to recover", "●".bright_green());
                }
                print_recovery(r);
            })
        }
        Command::Backup => {
            let ledger = Ledger::open(config)?;
            let result = BackupController::from_config(config).run(&ledger)?;
            emit(format, &result, print_backup)
        }
        Command::Sweep { days } => {
            let mut ledger = Ledger::open(config)?;
            let outcome = retention::sweep_retention(
                &mut ledger,
                days.unwrap_or(config.retention_days),
                Utc::now(),
            )?;
            emit(format, &outcome, print_retention)
        }
        Command::Health { window_hours } => {
            let ledger = Ledger::open(config)?;
            let report = health::health_report(&ledger, Utc::now(), window_hours)?;
            emit(format, &report, |r| print!("{}", health::render_text(r)))
        }
        Command::Run {
            voice_dirs,
            poll_secs,
        } => cmd_run(config, &voice_dirs, poll_secs, format),
    }
}

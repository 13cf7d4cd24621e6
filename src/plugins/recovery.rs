//! Startup recovery.
//!
//! Runs once before any new ingestion: clears temp files orphaned by an
//! interrupted export, then re-enters the ordinary pipeline for every
//! non-terminal capture, oldest first. There is no separate recovery mode;
//! the exporter and dedup engine are idempotent, so resuming is just running
//! the pipeline again.

use crate::plugins::export::classify_io;
use crate::plugins::ledger::ErrorStage;
use crate::plugins::pipeline::{Pipeline, PipelineError, ProcessReport};
use crate::plugins::state::CaptureStatus;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct RecoveryReport {
    pub stale_temps_removed: usize,
    pub scanned: usize,
    pub resumed: Vec<ProcessReport>,
}

impl RecoveryReport {
    pub fn terminal_count(&self) -> usize {
        self.resumed.iter().filter(|r| r.status.is_terminal()).count()
    }

    pub fn halted(&self) -> impl Iterator<Item = &ProcessReport> {
        self.resumed.iter().filter(|r| r.error.is_some())
    }

    pub fn placeholders(&self) -> usize {
        self.resumed
            .iter()
            .filter(|r| r.status == CaptureStatus::ExportedPlaceholder)
            .count()
    }
}

pub fn recover(pipeline: &mut Pipeline) -> Result<RecoveryReport, PipelineError> {
    let stale_temps_removed = match pipeline.exporter().sweep_stale_temps() {
        Ok(n) => n,
        Err(e) => {
            let staging = pipeline.exporter().store().staging_dir();
            let message = classify_io(&staging, e).to_string();
            tracing::warn!("stale temp sweep failed: {message}");
            if let Err(log_err) = pipeline
                .ledger()
                .log_error(None, ErrorStage::Export, &message)
            {
                tracing::error!(error = %log_err, "failed to record temp sweep error");
            }
            0
        }
    };

    let pending = pipeline.ledger().scan_non_terminal()?;
    let scanned = pending.len();
    if scanned > 0 {
        tracing::info!(scanned, "resuming non-terminal captures");
    }
    let mut resumed = Vec::with_capacity(scanned);
    for capture in pending {
        resumed.push(pipeline.drive(capture)?);
    }

    Ok(RecoveryReport {
        stale_temps_removed,
        scanned,
        resumed,
    })
}

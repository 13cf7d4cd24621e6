//! Sequential capture pipeline.
//!
//! One capture at a time: stage it, finalize its content (transcribe voice,
//! normalize email), dedup, export. Every step re-reads the capture's stored
//! status and resumes from there, so running the pipeline again over a
//! half-finished capture is how recovery works.

use crate::core::config::LedgerConfig;
use crate::core::error::LedgerError;
use crate::plugins::dedup;
use crate::plugins::export::{AtomicExporter, ExportError, ExportOutcome, Severity};
use crate::plugins::ledger::{Capture, CaptureMeta, ErrorStage, Ledger, NewCapture};
use crate::plugins::normalize;
use crate::plugins::state::{CaptureStatus, NextStep};
use crate::plugins::transcribe::{self, CommandTranscriber, Transcriber, UnconfiguredTranscriber};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct VoiceMemo {
    pub audio_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct EmailMessage {
    pub message_id: String,
    pub from: String,
    pub subject: String,
    pub body: String,
}

/// What an ingestion source hands the pipeline.
#[derive(Debug, Clone)]
pub enum Ingest {
    Voice(VoiceMemo),
    Email(EmailMessage),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestOutcome {
    /// Newly staged and driven as far as it could go.
    Staged(ProcessReport),
    /// The channel's native id was already in the ledger; nothing was written.
    AlreadyStaged { channel: String, native_id: String },
}

/// Where one capture ended up after a pipeline pass.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessReport {
    pub capture_id: String,
    pub status: CaptureStatus,
    pub path: Option<PathBuf>,
    pub duplicate_of: Option<String>,
    /// Set when this capture was halted; the pipeline itself keeps going.
    pub error: Option<String>,
}

/// Failures that stop the whole pipeline, not just one capture.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("pipeline halted: {0}")]
    Halted(ExportError),
    #[error("ledger unavailable: {0}")]
    Ledger(#[from] LedgerError),
}

pub struct Pipeline {
    ledger: Ledger,
    exporter: AtomicExporter,
    transcriber: Box<dyn Transcriber>,
    transcription_timeout: Duration,
    partial_fingerprint_bytes: u64,
}

impl Pipeline {
    pub fn new(
        ledger: Ledger,
        exporter: AtomicExporter,
        transcriber: Box<dyn Transcriber>,
        config: &LedgerConfig,
    ) -> Self {
        Self {
            ledger,
            exporter,
            transcriber,
            transcription_timeout: config.transcription_timeout,
            partial_fingerprint_bytes: config.partial_fingerprint_bytes,
        }
    }

    /// Opens the ledger and builds the transcriber named in `config`.
    pub fn open(config: &LedgerConfig) -> Result<Self, LedgerError> {
        let ledger = Ledger::open(config)?;
        let transcriber: Box<dyn Transcriber> = match config
            .transcription_command
            .as_deref()
            .and_then(CommandTranscriber::from_argv)
        {
            Some(cmd) => Box::new(cmd),
            None => Box::new(UnconfiguredTranscriber),
        };
        Ok(Self::new(
            ledger,
            AtomicExporter::from_config(config),
            transcriber,
            config,
        ))
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut Ledger {
        &mut self.ledger
    }

    pub fn exporter(&self) -> &AtomicExporter {
        &self.exporter
    }

    pub fn exporter_mut(&mut self) -> &mut AtomicExporter {
        &mut self.exporter
    }

    pub fn into_ledger(self) -> Ledger {
        self.ledger
    }

    /// Stage `input` durably, then drive it through the pipeline.
    pub fn ingest(&mut self, input: Ingest) -> Result<IngestOutcome, PipelineError> {
        let new = match self.stage_input(&input) {
            Ok(new) => new,
            Err(e) => {
                self.log(None, ErrorStage::Ingest, &e.to_string());
                return Err(e.into());
            }
        };
        match self.ledger.insert_capture(&new) {
            Ok(id) => {
                tracing::info!(capture_id = %id, source = %new.meta.source(), "capture staged");
                self.process(&id).map(IngestOutcome::Staged)
            }
            Err(LedgerError::DuplicateNativeId { channel, native_id }) => {
                tracing::info!(%channel, %native_id, "already staged; skipping");
                Ok(IngestOutcome::AlreadyStaged { channel, native_id })
            }
            Err(e) => {
                self.log(None, ErrorStage::Ingest, &e.to_string());
                Err(e.into())
            }
        }
    }

    fn stage_input(&self, input: &Ingest) -> Result<NewCapture, LedgerError> {
        Ok(match input {
            Ingest::Voice(memo) => {
                // The canonical path is the native id, so every spelling of
                // one file (relative, `..`, symlink) stages only once.
                let audio_path = fs::canonicalize(&memo.audio_path)?;
                let audio_fingerprint =
                    normalize::partial_fingerprint(&audio_path, self.partial_fingerprint_bytes)?;
                NewCapture {
                    meta: CaptureMeta::Voice {
                        file_path: audio_path.to_string_lossy().to_string(),
                        audio_fingerprint,
                    },
                    raw_content: None,
                }
            }
            Ingest::Email(mail) => NewCapture {
                meta: CaptureMeta::Email {
                    message_id: mail.message_id.clone(),
                    from: mail.from.clone(),
                    subject: mail.subject.clone(),
                },
                raw_content: Some(mail.body.clone()),
            },
        })
    }

    /// Drive the capture `id` from its stored status.
    pub fn process(&mut self, id: &str) -> Result<ProcessReport, PipelineError> {
        let capture = self.ledger.get_capture(id)?;
        self.drive(capture)
    }

    /// Drive every non-terminal capture, oldest first. Stops at the first
    /// pipeline-fatal error.
    pub fn process_pending(&mut self) -> Result<Vec<ProcessReport>, PipelineError> {
        let pending = self.ledger.scan_non_terminal()?;
        let mut reports = Vec::with_capacity(pending.len());
        for capture in pending {
            reports.push(self.drive(capture)?);
        }
        Ok(reports)
    }

    pub(crate) fn drive(&mut self, mut capture: Capture) -> Result<ProcessReport, PipelineError> {
        loop {
            match capture.status.next_step() {
                NextStep::Finalize => match self.finalize(&capture) {
                    Ok(Finalized::Continue(next)) => capture = next,
                    Ok(Finalized::Duplicate(report)) => return Ok(report),
                    Err(e) => return self.capture_failed(&capture, ErrorStage::Transcribe, e),
                },
                NextStep::Export | NextStep::ExportPlaceholder => return self.export(&capture),
                NextStep::Done => return Ok(self.settled(&capture)),
            }
        }
    }

    /// `staged` -> `transcribed` / `failed_transcription`, or terminal duplicate.
    fn finalize(&mut self, capture: &Capture) -> Result<Finalized, LedgerError> {
        let raw = match &capture.meta {
            CaptureMeta::Voice {
                file_path,
                audio_fingerprint,
            } => {
                if let Some(original) = self
                    .ledger
                    .find_by_audio_fingerprint(audio_fingerprint, &capture.id)?
                {
                    let hash = original
                        .content_hash
                        .clone()
                        .unwrap_or_else(|| audio_fingerprint.clone());
                    return self.terminate_duplicate(capture, &original, &hash);
                }
                match transcribe::transcribe_with_retry(
                    self.transcriber.as_ref(),
                    Path::new(file_path),
                    self.transcription_timeout,
                ) {
                    Ok(text) => text,
                    Err(failures) => {
                        let reason = failures
                            .iter()
                            .map(ToString::to_string)
                            .collect::<Vec<_>>()
                            .join("; ");
                        self.ledger.mark_failed(&capture.id, &reason)?;
                        return Ok(Finalized::Continue(self.ledger.get_capture(&capture.id)?));
                    }
                }
            }
            CaptureMeta::Email { .. } => capture.raw_content.clone().ok_or_else(|| {
                LedgerError::ValidationError(format!(
                    "email capture {} was staged without a body",
                    capture.id
                ))
            })?,
        };

        let (canonical, hash) = normalize::canonicalize(&raw);
        if let Some(original) = dedup::prior_holder(&self.ledger, &capture.id, &hash)? {
            return self.terminate_duplicate(capture, &original, &hash);
        }
        self.ledger.attach_content(&capture.id, &canonical, &hash)?;
        Ok(Finalized::Continue(self.ledger.get_capture(&capture.id)?))
    }

    fn terminate_duplicate(
        &mut self,
        capture: &Capture,
        original: &Capture,
        hash: &str,
    ) -> Result<Finalized, LedgerError> {
        let original_path = self.exporter.relative_path(&original.id);
        let status = self
            .ledger
            .record_duplicate(&capture.id, &original_path, hash)?;
        tracing::info!(capture_id = %capture.id, duplicate_of = %original.id, "duplicate content; no file written");
        Ok(Finalized::Duplicate(ProcessReport {
            capture_id: capture.id.clone(),
            status,
            path: Some(self.exporter.store().resolve(&original_path)),
            duplicate_of: Some(original.id.clone()),
            error: None,
        }))
    }

    fn export(&mut self, capture: &Capture) -> Result<ProcessReport, PipelineError> {
        match self.exporter.export(&mut self.ledger, capture) {
            Ok(outcome) => {
                tracing::info!(capture_id = %capture.id, status = %outcome.status(), "export settled");
                let path = outcome.path().map(Path::to_path_buf);
                Ok(ProcessReport {
                    capture_id: capture.id.clone(),
                    status: outcome.status(),
                    path,
                    duplicate_of: None,
                    error: None,
                })
            }
            Err(ExportError::Ledger(e)) => self.capture_failed(capture, ErrorStage::Export, e),
            Err(e) => {
                let message = e.to_string();
                if e.is_critical() {
                    tracing::error!(capture_id = %capture.id, "CRITICAL: {message}");
                } else {
                    tracing::warn!(capture_id = %capture.id, "export failed: {message}");
                }
                self.log(Some(&capture.id), ErrorStage::Export, &message);
                if e.severity() == Severity::PipelineHalt {
                    return Err(PipelineError::Halted(e));
                }
                Ok(self.halted_report(&capture.id, message)?)
            }
        }
    }

    fn capture_failed(
        &mut self,
        capture: &Capture,
        stage: ErrorStage,
        err: LedgerError,
    ) -> Result<ProcessReport, PipelineError> {
        let message = err.to_string();
        self.log(Some(&capture.id), stage, &message);
        if err.is_infrastructure() {
            return Err(PipelineError::Ledger(err));
        }
        if matches!(err, LedgerError::IllegalTransition { .. }) {
            tracing::error!(capture_id = %capture.id, "CRITICAL: {message}");
        } else {
            tracing::warn!(capture_id = %capture.id, "capture halted: {message}");
        }
        Ok(self.halted_report(&capture.id, message)?)
    }

    /// Report for a halted capture, carrying the status the ledger holds now.
    fn halted_report(&self, capture_id: &str, message: String) -> Result<ProcessReport, LedgerError> {
        let status = self.ledger.get_capture(capture_id)?.status;
        Ok(ProcessReport {
            capture_id: capture_id.to_string(),
            status,
            path: None,
            duplicate_of: None,
            error: Some(message),
        })
    }

    fn settled(&self, capture: &Capture) -> ProcessReport {
        let path = match capture.status {
            CaptureStatus::Exported | CaptureStatus::ExportedPlaceholder => {
                Some(self.exporter.destination(&capture.id))
            }
            _ => None,
        };
        ProcessReport {
            capture_id: capture.id.clone(),
            status: capture.status,
            path,
            duplicate_of: None,
            error: None,
        }
    }

    fn log(&self, capture_id: Option<&str>, stage: ErrorStage, message: &str) {
        if let Err(e) = self.ledger.log_error(capture_id, stage, message) {
            tracing::error!(error = %e, "failed to write error log entry: {message}");
        }
    }
}

enum Finalized {
    Continue(Capture),
    Duplicate(ProcessReport),
}

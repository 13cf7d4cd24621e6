//! Atomic exporter: one note file per capture, written all-or-nothing.
//!
//! Protocol per capture:
//! 1. render the note;
//! 2. dedup against the destination file (short-circuit on duplicate/conflict);
//! 3. ensure `inbox/` and `.trash/` exist under the vault root;
//! 4. write `.trash/<id>.<ext>.tmp` and fsync it;
//! 5. rename it onto `inbox/<id>.<ext>`;
//! 6. fsync the `inbox/` directory so the rename itself is durable;
//! 7. record the export in the ledger.
//!
//! A failure in steps 3-6 removes the temp file and never reaches step 7.

use crate::core::config::LedgerConfig;
use crate::core::error::LedgerError;
use crate::core::store::Store;
use crate::plugins::dedup::{DedupDecision, DedupEngine};
use crate::plugins::ledger::{Capture, Ledger};
use crate::plugins::normalize;
use crate::plugins::state::{CaptureStatus, ExportMode};
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Body written for voice captures whose transcription failed twice.
pub const PLACEHOLDER_TEXT: &str =
    "[Transcription unavailable: the audio could not be transcribed. The original recording is kept at its source path.]";

const TEMP_SUFFIX: &str = "tmp";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
    /// Stop this capture; continue with the next one.
    CaptureHalt,
    /// Stop all processing until an operator intervenes.
    PipelineHalt,
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("permission denied at {path}: {source}")]
    PermissionDenied { path: PathBuf, source: io::Error },
    #[error("vault unavailable (disconnected mount?) at {path}: {source}")]
    MountUnavailable { path: PathBuf, source: io::Error },
    #[error("disk full while writing {path}: {source}")]
    DiskFull { path: PathBuf, source: io::Error },
    #[error("read-only filesystem at {path}: {source}")]
    ReadOnlyFilesystem { path: PathBuf, source: io::Error },
    #[error("I/O error at {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("CONFLICT: {path} holds content {found_hash} but capture {capture_id} expects {expected_hash}")]
    Conflict {
        capture_id: String,
        path: PathBuf,
        expected_hash: String,
        found_hash: String,
    },
    #[error("capture {capture_id} is not ready for export: {reason}")]
    NotReady { capture_id: String, reason: String },
    #[error("exporter halted after fatal error: {0}")]
    Halted(String),
    #[error("export interrupted at {0:?}")]
    Interrupted(FaultPoint),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl ExportError {
    pub fn severity(&self) -> Severity {
        match self {
            ExportError::DiskFull { .. }
            | ExportError::ReadOnlyFilesystem { .. }
            | ExportError::Halted(_)
            | ExportError::Interrupted(_) => Severity::PipelineHalt,
            _ => Severity::CaptureHalt,
        }
    }

    /// Critical conditions signal a broken invariant rather than a bad environment.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            ExportError::Conflict { .. }
                | ExportError::Ledger(LedgerError::IllegalTransition { .. })
        )
    }

    /// Permission and mount problems may be retried by a later phase; nothing retries them yet.
    pub fn is_retry_eligible(&self) -> bool {
        matches!(
            self,
            ExportError::PermissionDenied { .. } | ExportError::MountUnavailable { .. }
        )
    }
}

/// Maps a filesystem error to its export class.
pub fn classify_io(path: &Path, source: io::Error) -> ExportError {
    let path = path.to_path_buf();
    match source.kind() {
        io::ErrorKind::PermissionDenied => ExportError::PermissionDenied { path, source },
        io::ErrorKind::StorageFull => ExportError::DiskFull { path, source },
        io::ErrorKind::ReadOnlyFilesystem => ExportError::ReadOnlyFilesystem { path, source },
        io::ErrorKind::NotConnected | io::ErrorKind::StaleNetworkFileHandle => {
            ExportError::MountUnavailable { path, source }
        }
        _ => ExportError::Io { path, source },
    }
}

/// Crash-simulation points. When set, the exporter stops dead at that point:
/// no cleanup, no ledger write, exactly as if the process had been killed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FaultPoint {
    AfterTempWrite,
    AfterRename,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExportOutcome {
    /// A note file was written and an `initial` audit row recorded.
    Written { path: PathBuf, status: CaptureStatus },
    /// The destination already held this content; `duplicate_skip` recorded.
    Duplicate { path: PathBuf, status: CaptureStatus },
    /// Nothing to write for this capture (already terminal as a duplicate).
    Skipped { status: CaptureStatus },
}

impl ExportOutcome {
    pub fn path(&self) -> Option<&Path> {
        match self {
            ExportOutcome::Written { path, .. } | ExportOutcome::Duplicate { path, .. } => {
                Some(path)
            }
            ExportOutcome::Skipped { .. } => None,
        }
    }

    pub fn status(&self) -> CaptureStatus {
        match self {
            ExportOutcome::Written { status, .. }
            | ExportOutcome::Duplicate { status, .. }
            | ExportOutcome::Skipped { status } => *status,
        }
    }
}

/// The note body and fingerprint a capture exports with.
pub fn export_payload(capture: &Capture) -> Result<(String, String), ExportError> {
    match capture.status {
        CaptureStatus::Transcribed | CaptureStatus::Exported => {
            match (&capture.raw_content, &capture.content_hash) {
                (Some(body), Some(hash)) => Ok((body.clone(), hash.clone())),
                _ => Err(ExportError::NotReady {
                    capture_id: capture.id.clone(),
                    reason: "content or fingerprint missing".to_string(),
                }),
            }
        }
        CaptureStatus::FailedTranscription | CaptureStatus::ExportedPlaceholder => Ok((
            PLACEHOLDER_TEXT.to_string(),
            normalize::fingerprint(PLACEHOLDER_TEXT.as_bytes()),
        )),
        CaptureStatus::Staged | CaptureStatus::ExportedDuplicate => Err(ExportError::NotReady {
            capture_id: capture.id.clone(),
            reason: format!("status is {}", capture.status),
        }),
    }
}

/// Renders the front-matter header followed by the body.
pub fn render_note(capture: &Capture, body: &str, hash: &str) -> String {
    format!(
        "---\nid: {}\nsource: {}\ncaptured_at: {}\ncontent_hash: {}\n---\n\n{}\n",
        capture.id, capture.source, capture.created_at, hash, body
    )
}

pub struct AtomicExporter {
    store: Store,
    extension: String,
    halted: Option<String>,
    fault: Option<FaultPoint>,
}

impl AtomicExporter {
    pub fn new(store: Store, extension: &str) -> Self {
        Self {
            store,
            extension: extension.to_string(),
            halted: None,
            fault: None,
        }
    }

    pub fn from_config(config: &LedgerConfig) -> Self {
        Self::new(Store::from_config(config), &config.note_extension)
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Test hook: stop at `point` on the next export as if killed.
    pub fn inject_fault(&mut self, point: Option<FaultPoint>) {
        self.fault = point;
    }

    pub fn halted_reason(&self) -> Option<&str> {
        self.halted.as_deref()
    }

    pub fn relative_path(&self, capture_id: &str) -> String {
        Store::relative_note_path(capture_id, &self.extension)
    }

    pub fn destination(&self, capture_id: &str) -> PathBuf {
        self.store.resolve(&self.relative_path(capture_id))
    }

    pub fn temp_path(&self, capture_id: &str) -> PathBuf {
        self.store
            .staging_dir()
            .join(format!("{capture_id}.{}.{TEMP_SUFFIX}", self.extension))
    }

    pub fn export(
        &mut self,
        ledger: &mut Ledger,
        capture: &Capture,
    ) -> Result<ExportOutcome, ExportError> {
        if let Some(reason) = &self.halted {
            return Err(ExportError::Halted(reason.clone()));
        }
        if capture.status == CaptureStatus::ExportedDuplicate {
            return Ok(ExportOutcome::Skipped {
                status: capture.status,
            });
        }

        let (body, hash) = export_payload(capture)?;
        let note = render_note(capture, &body, &hash);
        let relative = self.relative_path(&capture.id);
        let destination = self.store.resolve(&relative);

        let decision = DedupEngine::new(&self.store, &self.extension).check(&capture.id, &hash);
        match decision.map_err(|e| self.fail(classify_io(&destination, e)))? {
            DedupDecision::NoCollision => {}
            DedupDecision::Duplicate => {
                let status =
                    ledger.record_export(&capture.id, &relative, &hash, ExportMode::DuplicateSkip)?;
                tracing::debug!(capture_id = %capture.id, "destination already current");
                return Ok(ExportOutcome::Duplicate {
                    path: destination,
                    status,
                });
            }
            DedupDecision::Conflict { found_hash } => {
                return Err(ExportError::Conflict {
                    capture_id: capture.id.clone(),
                    path: destination,
                    expected_hash: hash,
                    found_hash,
                });
            }
        }

        let temp = self.temp_path(&capture.id);
        if let Err(err) = self.write_and_publish(&note, &temp, &destination) {
            if !matches!(err, ExportError::Interrupted(_)) {
                remove_if_present(&temp);
            }
            return Err(self.fail(err));
        }

        let status = ledger.record_export(&capture.id, &relative, &hash, ExportMode::Initial)?;
        Ok(ExportOutcome::Written {
            path: destination,
            status,
        })
    }

    fn write_and_publish(
        &self,
        note: &str,
        temp: &Path,
        destination: &Path,
    ) -> Result<(), ExportError> {
        let vault = &self.store.vault_root;
        if !vault.is_dir() {
            return Err(ExportError::MountUnavailable {
                path: vault.clone(),
                source: io::Error::new(io::ErrorKind::NotFound, "vault root is missing"),
            });
        }
        let inbox = self.store.inbox_dir();
        let staging = self.store.staging_dir();
        fs::create_dir_all(&inbox).map_err(|e| classify_io(&inbox, e))?;
        fs::create_dir_all(&staging).map_err(|e| classify_io(&staging, e))?;

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(temp)
            .map_err(|e| classify_io(temp, e))?;
        file.write_all(note.as_bytes())
            .map_err(|e| classify_io(temp, e))?;
        file.sync_all().map_err(|e| classify_io(temp, e))?;
        drop(file);

        if self.fault == Some(FaultPoint::AfterTempWrite) {
            return Err(ExportError::Interrupted(FaultPoint::AfterTempWrite));
        }

        fs::rename(temp, destination).map_err(|e| classify_io(destination, e))?;
        sync_dir(&inbox).map_err(|e| classify_io(&inbox, e))?;

        if self.fault == Some(FaultPoint::AfterRename) {
            return Err(ExportError::Interrupted(FaultPoint::AfterRename));
        }
        Ok(())
    }

    /// Latch pipeline-fatal errors so later exports refuse to run.
    fn fail(&mut self, err: ExportError) -> ExportError {
        if err.severity() == Severity::PipelineHalt && self.halted.is_none() {
            self.halted = Some(err.to_string());
        }
        err
    }

    /// Remove temp files orphaned by an interrupted export. Returns how many.
    pub fn sweep_stale_temps(&self) -> io::Result<usize> {
        let staging = self.store.staging_dir();
        let entries = match fs::read_dir(&staging) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };
        let mut removed = 0;
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == TEMP_SUFFIX) {
                match fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e),
                }
            }
        }
        if removed > 0 {
            sync_dir(&staging)?;
        }
        Ok(removed)
    }
}

fn remove_if_present(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove temp file");
        }
    }
}

/// Flush directory metadata (the rename) to stable storage.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

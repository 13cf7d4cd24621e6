//! Voice memo folder watcher.
//!
//! One pass over a drop directory: every audio file is handed to the pipeline
//! as a voice capture. Already-staged files are skipped by the ledger's
//! `(source, native_id)` uniqueness, so re-scanning is harmless. Progress is
//! kept in a sync cursor owned by this watcher.

use crate::core::error::LedgerError;
use crate::core::time;
use crate::plugins::pipeline::{Ingest, IngestOutcome, Pipeline, PipelineError, ProcessReport, VoiceMemo};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const AUDIO_EXTENSIONS: &[&str] = &["m4a", "mp3", "wav", "aac", "ogg", "opus", "flac"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceCursor {
    pub last_scan_at: String,
    pub files_seen: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct WatchReport {
    pub dir: PathBuf,
    pub files_seen: usize,
    pub staged: Vec<ProcessReport>,
    pub already_staged: usize,
    pub failed: Vec<(PathBuf, String)>,
    pub cursor_version: i64,
}

pub fn voice_cursor_key(dir: &Path) -> String {
    format!("voice:{}", dir.display())
}

pub fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| AUDIO_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

/// Audio files directly under `dir`, sorted by name.
pub fn list_audio_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_file() && is_audio_file(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

pub fn scan_voice_dir(pipeline: &mut Pipeline, dir: &Path) -> Result<WatchReport, PipelineError> {
    let files = list_audio_files(dir).map_err(LedgerError::from)?;
    let mut report = WatchReport {
        dir: dir.to_path_buf(),
        files_seen: files.len(),
        staged: Vec::new(),
        already_staged: 0,
        failed: Vec::new(),
        cursor_version: 0,
    };

    for audio_path in files {
        let input = Ingest::Voice(VoiceMemo {
            audio_path: audio_path.clone(),
        });
        match pipeline.ingest(input) {
            Ok(IngestOutcome::Staged(processed)) => report.staged.push(processed),
            Ok(IngestOutcome::AlreadyStaged { .. }) => report.already_staged += 1,
            // An unreadable file only costs that file; a sick database stops the scan.
            Err(PipelineError::Ledger(e))
                if !matches!(e, LedgerError::Busy(_) | LedgerError::RusqliteError(_)) =>
            {
                report.failed.push((audio_path, e.to_string()))
            }
            Err(e) => return Err(e),
        }
    }

    let cursor = VoiceCursor {
        last_scan_at: time::now_rfc3339(),
        files_seen: report.files_seen,
    };
    let value = serde_json::to_string(&cursor).map_err(LedgerError::from)?;
    report.cursor_version = pipeline
        .ledger_mut()
        .set_cursor(&voice_cursor_key(dir), &value)?;
    tracing::info!(
        dir = %dir.display(),
        staged = report.staged.len(),
        already_staged = report.already_staged,
        failed = report.failed.len(),
        "voice folder scanned"
    );
    Ok(report)
}

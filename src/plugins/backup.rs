//! Backup and verification controller.
//!
//! Each run snapshots the ledger (`VACUUM INTO`), runs `PRAGMA integrity_check`
//! on the snapshot and compares its logical fingerprint with the live store.
//! Failures never stop ingestion or export; they only feed a consecutive
//! failure counter that throttles the retention sweep:
//!
//! | consecutive failures | health               | effect                    |
//! |----------------------|----------------------|---------------------------|
//! | 0                    | `Healthy`            |                           |
//! | 1                    | `Warning`            | warn log only             |
//! | 2                    | `Degraded`           | surfaced by health check  |
//! | 3+                   | `RetentionSuspended` | retention sweep refused   |
//!
//! One successful run resets the counter. State lives in `ledger_meta`.

use crate::core::config::LedgerConfig;
use crate::core::db;
use crate::core::error::LedgerError;
use crate::core::schemas;
use crate::core::time;
use crate::plugins::ledger::{self, ErrorStage, Ledger};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const BACKUP_PREFIX: &str = "ledger-";
const BACKUP_SUFFIX: &str = ".sqlite3";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupHealth {
    Healthy,
    Warning,
    Degraded,
    RetentionSuspended,
}

impl BackupHealth {
    pub fn from_failures(consecutive_failures: u32) -> Self {
        match consecutive_failures {
            0 => BackupHealth::Healthy,
            1 => BackupHealth::Warning,
            2 => BackupHealth::Degraded,
            _ => BackupHealth::RetentionSuspended,
        }
    }

    pub fn retention_allowed(self) -> bool {
        self != BackupHealth::RetentionSuspended
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VerificationResult {
    pub backup_path: PathBuf,
    pub verified: bool,
    pub detail: Option<String>,
    pub consecutive_failures: u32,
    pub health: BackupHealth,
    pub pruned: usize,
}

pub struct BackupController {
    backup_dir: PathBuf,
    interval: Duration,
    keep: usize,
}

impl BackupController {
    pub fn new(backup_dir: &Path, interval: Duration, keep: usize) -> Self {
        Self {
            backup_dir: backup_dir.to_path_buf(),
            interval,
            keep: keep.max(1),
        }
    }

    pub fn from_config(config: &LedgerConfig) -> Self {
        Self::new(&config.backup_dir, config.backup_interval, config.backup_keep)
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Due when no run is recorded or the last one is at least one interval old.
    /// The last run time is read from the ledger so it survives restarts.
    pub fn is_due(&self, ledger: &Ledger, now: DateTime<Utc>) -> Result<bool, LedgerError> {
        let last = ledger
            .meta_get(schemas::META_BACKUP_LAST_RUN_AT)?
            .as_deref()
            .and_then(time::parse_rfc3339);
        let interval = chrono::Duration::from_std(self.interval)
            .unwrap_or_else(|_| chrono::Duration::MAX);
        Ok(last.is_none_or(|last| now - last >= interval))
    }

    pub fn maybe_run(
        &self,
        ledger: &Ledger,
        now: DateTime<Utc>,
    ) -> Result<Option<VerificationResult>, LedgerError> {
        if !self.is_due(ledger, now)? {
            return Ok(None);
        }
        self.run(ledger).map(Some)
    }

    /// Snapshot, verify and update the failure counter.
    pub fn run(&self, ledger: &Ledger) -> Result<VerificationResult, LedgerError> {
        let now = Utc::now();
        let suffix = time::new_event_id();
        let backup_path = self.backup_dir.join(format!(
            "{BACKUP_PREFIX}{}-{}{BACKUP_SUFFIX}",
            time::file_stamp(now),
            &suffix[suffix.len() - 6..]
        ));

        let outcome = snapshot_and_verify(ledger, &backup_path);
        let previous = consecutive_failures(ledger)?;
        let (verified, detail, failures) = match outcome {
            Ok(()) => (true, None, 0),
            Err(reason) => (false, Some(reason), previous.saturating_add(1)),
        };
        let health = BackupHealth::from_failures(failures);

        ledger.meta_set(
            schemas::META_BACKUP_LAST_RESULT,
            if verified { "ok" } else { "failed" },
        )?;
        ledger.meta_set(schemas::META_BACKUP_LAST_RUN_AT, &time::format_rfc3339(now))?;
        ledger.meta_set(
            schemas::META_BACKUP_LAST_PATH,
            &backup_path.to_string_lossy(),
        )?;
        ledger.meta_set(
            schemas::META_BACKUP_CONSECUTIVE_FAILURES,
            &failures.to_string(),
        )?;

        let mut pruned = 0;
        if let Some(reason) = &detail {
            ledger.log_error(None, ErrorStage::Backup, reason)?;
            match health {
                BackupHealth::Warning => {
                    tracing::warn!(failures, "backup verification failed: {reason}")
                }
                _ => tracing::error!(
                    failures,
                    ?health,
                    "backup verification failed again: {reason}"
                ),
            }
            // A broken snapshot is not worth keeping.
            if backup_path.exists() {
                if let Err(e) = fs::remove_file(&backup_path) {
                    tracing::warn!(error = %e, "could not remove unverified snapshot");
                }
            }
        } else {
            if previous > 0 {
                tracing::info!(previous, "backup verification recovered");
            }
            pruned = self.prune()?;
        }

        Ok(VerificationResult {
            backup_path,
            verified,
            detail,
            consecutive_failures: failures,
            health,
            pruned,
        })
    }

    /// Keep only the newest `keep` snapshots.
    pub fn prune(&self) -> Result<usize, LedgerError> {
        let mut backups = list_backups(&self.backup_dir)?;
        if backups.len() <= self.keep {
            return Ok(0);
        }
        let excess = backups.len() - self.keep;
        let mut removed = 0;
        for path in backups.drain(..excess) {
            fs::remove_file(&path)?;
            removed += 1;
        }
        Ok(removed)
    }
}

fn snapshot_and_verify(ledger: &Ledger, backup_path: &Path) -> Result<(), String> {
    ledger
        .snapshot_to(backup_path)
        .map_err(|e| format!("snapshot failed: {e}"))?;
    let snapshot = db::db_connect_readonly(backup_path)
        .map_err(|e| format!("cannot open snapshot {}: {e}", backup_path.display()))?;
    let problems =
        db::integrity_problems(&snapshot).map_err(|e| format!("integrity check failed: {e}"))?;
    if !problems.is_empty() {
        return Err(format!("integrity check reported: {}", problems.join("; ")));
    }
    let snapshot_fp = ledger::logical_fingerprint(&snapshot)
        .map_err(|e| format!("snapshot fingerprint failed: {e}"))?;
    let live_fp = ledger
        .logical_fingerprint()
        .map_err(|e| format!("live fingerprint failed: {e}"))?;
    if snapshot_fp != live_fp {
        return Err(format!(
            "snapshot fingerprint {snapshot_fp} differs from live {live_fp}"
        ));
    }
    Ok(())
}

/// Backup files in `dir`, oldest first (names sort chronologically).
pub fn list_backups(dir: &Path) -> Result<Vec<PathBuf>, LedgerError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut out = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let is_backup = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(BACKUP_PREFIX) && n.ends_with(BACKUP_SUFFIX));
        if is_backup {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}

pub fn consecutive_failures(ledger: &Ledger) -> Result<u32, LedgerError> {
    Ok(ledger
        .meta_get(schemas::META_BACKUP_CONSECUTIVE_FAILURES)?
        .and_then(|v| v.parse().ok())
        .unwrap_or(0))
}

pub fn backup_health(ledger: &Ledger) -> Result<BackupHealth, LedgerError> {
    consecutive_failures(ledger).map(BackupHealth::from_failures)
}

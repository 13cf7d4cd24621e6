//! Read-only health/diagnostic surface.

use crate::core::error::LedgerError;
use crate::core::schemas;
use crate::core::time;
use crate::plugins::backup::{self, BackupHealth};
use crate::plugins::ledger::{ErrorEntry, Ledger};
use chrono::{DateTime, Duration, Utc};
use colored::Colorize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write;

/// Default look-back window for the error summary.
pub const DEFAULT_ERROR_WINDOW_HOURS: i64 = 24;

#[derive(Debug, Clone, Serialize)]
pub struct CursorPoll {
    pub key: String,
    pub value: String,
    pub version: i64,
    pub last_poll_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorSummary {
    pub window_hours: i64,
    pub since: String,
    pub total: usize,
    pub by_stage: BTreeMap<String, usize>,
    pub latest: Option<ErrorEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackupSummary {
    pub last_result: Option<String>,
    pub last_run_at: Option<String>,
    pub last_path: Option<String>,
    pub consecutive_failures: u32,
    pub health: BackupHealth,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub generated_at: String,
    pub pending_captures: u64,
    pub last_export_at: Option<String>,
    pub polls: Vec<CursorPoll>,
    pub errors: ErrorSummary,
    pub backup: BackupSummary,
}

impl HealthReport {
    /// True when nothing needs an operator's attention.
    pub fn is_healthy(&self) -> bool {
        self.backup.health == BackupHealth::Healthy && self.errors.total == 0
    }
}

pub fn health_report(
    ledger: &Ledger,
    now: DateTime<Utc>,
    window_hours: i64,
) -> Result<HealthReport, LedgerError> {
    let since = Duration::try_hours(window_hours)
        .and_then(|window| now.checked_sub_signed(window))
        .map(time::format_rfc3339)
        .ok_or_else(|| {
            LedgerError::ValidationError(format!(
                "error window of {window_hours} hours is out of range"
            ))
        })?;
    let recent = ledger.recent_errors(&since)?;
    let mut by_stage = BTreeMap::new();
    for entry in &recent {
        *by_stage.entry(entry.stage.as_str().to_string()).or_insert(0) += 1;
    }

    let polls = ledger
        .list_cursors()?
        .into_iter()
        .map(|c| CursorPoll {
            key: c.key,
            value: c.value,
            version: c.version,
            last_poll_at: c.updated_at,
        })
        .collect();

    let consecutive_failures = backup::consecutive_failures(ledger)?;

    Ok(HealthReport {
        generated_at: time::format_rfc3339(now),
        pending_captures: ledger.pending_count()?,
        last_export_at: ledger.last_export_at()?,
        polls,
        errors: ErrorSummary {
            window_hours,
            since,
            total: recent.len(),
            by_stage,
            latest: recent.into_iter().next(),
        },
        backup: BackupSummary {
            last_result: ledger.meta_get(schemas::META_BACKUP_LAST_RESULT)?,
            last_run_at: ledger.meta_get(schemas::META_BACKUP_LAST_RUN_AT)?,
            last_path: ledger.meta_get(schemas::META_BACKUP_LAST_PATH)?,
            consecutive_failures,
            health: BackupHealth::from_failures(consecutive_failures),
        },
    })
}

fn health_label(health: BackupHealth) -> colored::ColoredString {
    match health {
        BackupHealth::Healthy => "healthy".bright_green(),
        BackupHealth::Warning => "warning".bright_yellow(),
        BackupHealth::Degraded => "degraded".yellow().bold(),
        BackupHealth::RetentionSuspended => "retention suspended".bright_red().bold(),
    }
}

pub fn render_text(report: &HealthReport) -> String {
    let mut out = String::new();
    let never = || "never".dimmed().to_string();

    let _ = writeln!(out, "{}", "capture ledger health".bold());
    let _ = writeln!(out, "  generated        {}", report.generated_at);
    let pending = if report.pending_captures == 0 {
        report.pending_captures.to_string().bright_green()
    } else {
        report.pending_captures.to_string().bright_yellow()
    };
    let _ = writeln!(out, "  pending          {pending}");
    let _ = writeln!(
        out,
        "  last export      {}",
        report.last_export_at.clone().unwrap_or_else(never)
    );

    if report.polls.is_empty() {
        let _ = writeln!(out, "  polls            {}", never());
    } else {
        for poll in &report.polls {
            let _ = writeln!(
                out,
                "  poll {:<12}{} (v{})",
                poll.key, poll.last_poll_at, poll.version
            );
        }
    }

    let errors = &report.errors;
    let total = if errors.total == 0 {
        "0".bright_green()
    } else {
        errors.total.to_string().bright_red()
    };
    let _ = writeln!(out, "  errors ({}h)      {total}", errors.window_hours);
    for (stage, count) in &errors.by_stage {
        let _ = writeln!(out, "    {stage:<14} {count}");
    }
    if let Some(latest) = &errors.latest {
        let _ = writeln!(
            out,
            "    latest         [{}] {}",
            latest.created_at,
            latest.message.dimmed()
        );
    }

    let backup = &report.backup;
    let _ = writeln!(
        out,
        "  backup           {} ({} consecutive failures)",
        health_label(backup.health),
        backup.consecutive_failures
    );
    let _ = writeln!(
        out,
        "    last run       {} {}",
        backup.last_run_at.clone().unwrap_or_else(never),
        backup.last_result.as_deref().unwrap_or("")
    );
    out
}

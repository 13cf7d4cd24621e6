//! Retention sweep, gated on backup verification health.

use crate::core::error::LedgerError;
use crate::core::time;
use crate::plugins::backup;
use crate::plugins::ledger::Ledger;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RetentionOutcome {
    Swept { cutoff: String, deleted: usize },
    Suspended { consecutive_failures: u32 },
}

/// Delete terminal captures older than `retention_days` before `now`.
///
/// Refused (not an error) while backups have failed verification three or
/// more times in a row. A horizon reaching past the representable calendar
/// is a validation error.
pub fn sweep_retention(
    ledger: &mut Ledger,
    retention_days: u32,
    now: DateTime<Utc>,
) -> Result<RetentionOutcome, LedgerError> {
    let failures = backup::consecutive_failures(ledger)?;
    if !backup::BackupHealth::from_failures(failures).retention_allowed() {
        tracing::warn!(
            consecutive_failures = failures,
            "retention sweep suspended until a backup verifies"
        );
        return Ok(RetentionOutcome::Suspended {
            consecutive_failures: failures,
        });
    }

    let cutoff = Duration::try_days(i64::from(retention_days))
        .and_then(|horizon| now.checked_sub_signed(horizon))
        .map(time::format_rfc3339)
        .ok_or_else(|| {
            LedgerError::ValidationError(format!(
                "retention horizon of {retention_days} days is out of range"
            ))
        })?;
    let deleted = ledger.delete_terminal_before(&cutoff)?;
    if deleted > 0 {
        tracing::info!(deleted, %cutoff, "retention sweep removed terminal captures");
    }
    Ok(RetentionOutcome::Swept { cutoff, deleted })
}

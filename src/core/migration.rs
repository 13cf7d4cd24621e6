//! Schema version detection and automatic migration.
//!
//! - **Migrations run automatically** when the ledger is opened.
//! - **Idempotent migrations**: every statement is `IF NOT EXISTS`, safe to rerun.
//! - **Version tracking**: `ledger_meta.schema_version` stores the applied version.
//! - **Forward-only**: a ledger written by a newer binary is refused, not downgraded.

use crate::core::error::LedgerError;
use crate::core::schemas;
use crate::core::time;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};

/// Migration definition
pub struct Migration {
    /// Schema version this migration produces
    pub target_version: u32,
    /// Human-readable description
    pub description: &'static str,
    /// Statements applied in order inside the migration transaction
    pub statements: &'static [&'static str],
}

/// All migrations in chronological order
pub fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            target_version: 1,
            description: "Create captures, exports_audit, errors_log and sync_state",
            statements: &[
                schemas::LEDGER_DB_SCHEMA_CAPTURES,
                schemas::LEDGER_DB_SCHEMA_CAPTURES_HASH_INDEX,
                schemas::LEDGER_DB_SCHEMA_CAPTURES_STATUS_INDEX,
                schemas::LEDGER_DB_SCHEMA_EXPORTS_AUDIT,
                schemas::LEDGER_DB_SCHEMA_EXPORTS_AUDIT_INDEX,
                schemas::LEDGER_DB_SCHEMA_ERRORS_LOG,
                schemas::LEDGER_DB_SCHEMA_ERRORS_LOG_INDEX,
                schemas::LEDGER_DB_SCHEMA_SYNC_STATE,
            ],
        },
        Migration {
            target_version: 2,
            description: "Index partial audio fingerprints for early voice dedup",
            statements: &[schemas::LEDGER_DB_SCHEMA_AUDIO_FINGERPRINT_INDEX],
        },
    ]
}

/// Reads the applied schema version (0 for a fresh file).
pub fn stored_version(conn: &Connection) -> Result<u32, LedgerError> {
    conn.execute(schemas::LEDGER_DB_SCHEMA_META, [])?;
    let raw: Option<String> = conn
        .query_row(
            "SELECT value FROM ledger_meta WHERE key = ?1",
            params![schemas::META_SCHEMA_VERSION],
            |row| row.get(0),
        )
        .optional()?;
    match raw {
        None => Ok(0),
        Some(v) => v.parse::<u32>().map_err(|_| {
            LedgerError::ValidationError(format!("Unparseable schema_version '{v}'"))
        }),
    }
}

/// Check if migration is needed and run if necessary. Returns the number applied.
pub fn check_and_migrate(conn: &mut Connection) -> Result<usize, LedgerError> {
    let from_version = stored_version(conn)?;
    if from_version > schemas::LEDGER_SCHEMA_VERSION {
        return Err(LedgerError::ValidationError(format!(
            "Ledger schema v{from_version} is newer than supported v{}",
            schemas::LEDGER_SCHEMA_VERSION
        )));
    }
    if from_version == schemas::LEDGER_SCHEMA_VERSION {
        return Ok(0);
    }

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let mut applied = 0;
    for migration in all_migrations() {
        if migration.target_version <= from_version {
            continue;
        }
        tracing::info!(
            target_version = migration.target_version,
            "applying migration: {}",
            migration.description
        );
        for stmt in migration.statements {
            tx.execute(stmt, [])?;
        }
        applied += 1;
    }
    tx.execute(
        "INSERT INTO ledger_meta(key, value, updated_at) VALUES(?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        params![
            schemas::META_SCHEMA_VERSION,
            schemas::LEDGER_SCHEMA_VERSION.to_string(),
            time::now_rfc3339()
        ],
    )?;
    tx.commit()?;
    Ok(applied)
}

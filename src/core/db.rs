use crate::core::error::LedgerError;
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

/// Default bounded lock wait before a contended write surfaces as `Busy`.
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Opens the ledger file with the durability settings every caller relies on:
/// WAL journaling, `synchronous=FULL`, enforced foreign keys and a bounded
/// busy timeout.
pub fn db_connect(db_path: &Path, busy_timeout_ms: u64) -> Result<Connection, LedgerError> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(Duration::from_millis(busy_timeout_ms))?;
    let mode: String = conn.query_row("PRAGMA journal_mode=WAL;", [], |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") {
        return Err(LedgerError::ValidationError(format!(
            "journal_mode=WAL rejected (got {mode}) for {}",
            db_path.display()
        )));
    }
    conn.execute_batch("PRAGMA synchronous=FULL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

/// Read-only connection used against backup snapshots.
pub fn db_connect_readonly(db_path: &Path) -> Result<Connection, LedgerError> {
    let conn = Connection::open_with_flags(
        db_path,
        rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(conn)
}

/// Runs `PRAGMA integrity_check` and returns the problems it reports (empty when ok).
pub fn integrity_problems(conn: &Connection) -> Result<Vec<String>, LedgerError> {
    let mut stmt = conn.prepare("PRAGMA integrity_check;")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    let mut problems = Vec::new();
    for row in rows {
        let line = row?;
        if line != "ok" {
            problems.push(line);
        }
    }
    Ok(problems)
}

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("SQLite error: {0}")]
    RusqliteError(rusqlite::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
    #[error("Ledger is busy (another process holds the lock): {0}")]
    Busy(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Duplicate native id: {channel}:{native_id} is already staged")]
    DuplicateNativeId { channel: String, native_id: String },
    #[error("Illegal transition for capture {id}: {from} -> {to}")]
    IllegalTransition { id: String, from: String, to: String },
    #[error("Fingerprint algorithm mismatch: ledger uses {stored}, binary uses {expected}")]
    HashAlgorithmMismatch { stored: String, expected: String },
    #[error("Capture id allocation failed: {0}")]
    IdAllocation(#[from] ulid::MonotonicError),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl From<rusqlite::Error> for LedgerError {
    fn from(err: rusqlite::Error) -> Self {
        if is_busy(&err) {
            return LedgerError::Busy(err.to_string());
        }
        LedgerError::RusqliteError(err)
    }
}

impl LedgerError {
    /// The store itself is unusable (locked, I/O, SQLite failure); continuing
    /// with other captures cannot succeed either.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            LedgerError::Busy(_) | LedgerError::RusqliteError(_) | LedgerError::IoError(_)
        )
    }
}

/// `SQLITE_BUSY` / `SQLITE_LOCKED` surface as `Busy` rather than a hang.
fn is_busy(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(code, _) => matches!(
            code.code,
            rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
        ),
        _ => false,
    }
}

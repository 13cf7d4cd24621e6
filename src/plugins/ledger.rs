//! Ledger Store: the single writer for captures, export audit, error log and
//! sync cursors.
//!
//! Every multi-statement mutation runs in an `IMMEDIATE` transaction so the
//! status check and the write it guards commit together. All transition
//! validation happens here; callers never write `status` directly.

use crate::core::broker::EventBroker;
use crate::core::config::LedgerConfig;
use crate::core::db;
use crate::core::error::LedgerError;
use crate::core::migration;
use crate::core::schemas;
use crate::core::time;
use crate::plugins::normalize::FINGERPRINT_ALGORITHM;
use crate::plugins::state::{self, CaptureStatus, ExportMode};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Voice,
    Email,
}

impl Source {
    pub fn as_str(self) -> &'static str {
        match self {
            Source::Voice => "voice",
            Source::Email => "email",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "voice" => Ok(Source::Voice),
            "email" => Ok(Source::Email),
            other => Err(LedgerError::ValidationError(format!(
                "Unknown capture source '{other}'"
            ))),
        }
    }
}

/// Per-channel side data. The tag doubles as the capture's `source`, and the
/// identity field of each variant is the channel's native id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum CaptureMeta {
    Voice {
        file_path: String,
        audio_fingerprint: String,
    },
    Email {
        message_id: String,
        from: String,
        subject: String,
    },
}

impl CaptureMeta {
    pub fn source(&self) -> Source {
        match self {
            CaptureMeta::Voice { .. } => Source::Voice,
            CaptureMeta::Email { .. } => Source::Email,
        }
    }

    pub fn native_id(&self) -> &str {
        match self {
            CaptureMeta::Voice { file_path, .. } => file_path,
            CaptureMeta::Email { message_id, .. } => message_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capture {
    pub id: String,
    pub source: Source,
    pub raw_content: Option<String>,
    pub content_hash: Option<String>,
    pub status: CaptureStatus,
    pub meta: CaptureMeta,
    pub created_at: String,
    pub updated_at: String,
}

/// Input to [`Ledger::insert_capture`]. Email bodies travel with the insert so
/// the first durable write already holds them; voice content arrives later.
#[derive(Debug, Clone)]
pub struct NewCapture {
    pub meta: CaptureMeta,
    pub raw_content: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: String,
    pub capture_id: String,
    pub export_path: String,
    pub hash_at_export: String,
    pub mode: ExportMode,
    pub exported_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorStage {
    Ingest,
    Transcribe,
    Export,
    Backup,
}

impl ErrorStage {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorStage::Ingest => "ingest",
            ErrorStage::Transcribe => "transcribe",
            ErrorStage::Export => "export",
            ErrorStage::Backup => "backup",
        }
    }
}

impl FromStr for ErrorStage {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ingest" => Ok(ErrorStage::Ingest),
            "transcribe" => Ok(ErrorStage::Transcribe),
            "export" => Ok(ErrorStage::Export),
            "backup" => Ok(ErrorStage::Backup),
            other => Err(LedgerError::ValidationError(format!(
                "Unknown error stage '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub id: String,
    pub capture_id: Option<String>,
    pub stage: ErrorStage,
    pub message: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    pub key: String,
    pub value: String,
    pub version: i64,
    pub updated_at: String,
}

const CAPTURE_COLUMNS: &str =
    "id, source, raw_content, content_hash, status, meta_json, created_at, updated_at";

const TERMINAL_STATUSES_SQL: &str = "('exported', 'exported_duplicate', 'exported_placeholder')";

type CaptureRow = (
    String,
    String,
    Option<String>,
    Option<String>,
    String,
    String,
    String,
    String,
);

fn read_capture_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CaptureRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn capture_from_row(raw: CaptureRow) -> Result<Capture, LedgerError> {
    let (id, source, raw_content, content_hash, status, meta_json, created_at, updated_at) = raw;
    let meta: CaptureMeta = serde_json::from_str(&meta_json)?;
    let source: Source = source.parse()?;
    if meta.source() != source {
        return Err(LedgerError::ValidationError(format!(
            "Capture {id}: meta tagged {} but source column is {source}",
            meta.source()
        )));
    }
    Ok(Capture {
        id,
        source,
        raw_content,
        content_hash,
        status: status.parse()?,
        meta,
        created_at,
        updated_at,
    })
}

fn load_capture(conn: &Connection, id: &str) -> Result<Capture, LedgerError> {
    let raw = conn
        .query_row(
            &format!("SELECT {CAPTURE_COLUMNS} FROM captures WHERE id = ?1"),
            params![id],
            read_capture_row,
        )
        .optional()?
        .ok_or_else(|| LedgerError::NotFound(format!("capture {id}")))?;
    capture_from_row(raw)
}

fn query_captures(
    conn: &Connection,
    sql: &str,
    args: &[&dyn rusqlite::ToSql],
) -> Result<Vec<Capture>, LedgerError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(args, read_capture_row)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(capture_from_row(row?)?);
    }
    Ok(out)
}

/// Handle on one ledger file. Exactly one process should hold it open for
/// writing; a second one fails fast with [`LedgerError::Busy`].
pub struct Ledger {
    conn: Connection,
    events: EventBroker,
    path: PathBuf,
    ids: time::CaptureIds,
}

impl Ledger {
    pub fn open(config: &LedgerConfig) -> Result<Self, LedgerError> {
        Self::open_at(
            &config.ledger_path(),
            &config.events_path(),
            config.busy_timeout_ms,
        )
    }

    pub fn open_at(
        db_path: &Path,
        events_path: &Path,
        busy_timeout_ms: u64,
    ) -> Result<Self, LedgerError> {
        let mut conn = db::db_connect(db_path, busy_timeout_ms)?;
        migration::check_and_migrate(&mut conn)?;
        ensure_hash_algorithm(&conn)?;
        Ok(Self {
            conn,
            events: EventBroker::new(events_path),
            path: db_path.to_path_buf(),
            ids: time::CaptureIds::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn events(&self) -> &EventBroker {
        &self.events
    }

    /// Stage a new capture. This is the first durable write for any input.
    pub fn insert_capture(&mut self, new: &NewCapture) -> Result<String, LedgerError> {
        let id = self.ids.next_id()?;
        let source = new.meta.source();
        let native_id = new.meta.native_id().to_string();
        if native_id.trim().is_empty() {
            return Err(LedgerError::ValidationError(format!(
                "{source} capture has an empty native id"
            )));
        }
        let meta_json = serde_json::to_string(&new.meta)?;
        let conn = &mut self.conn;

        self.events.observe("capture.insert", Some(&id), || {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let existing: Option<String> = tx
                .query_row(
                    "SELECT id FROM captures WHERE source = ?1 AND channel_native_id = ?2",
                    params![source.as_str(), native_id],
                    |row| row.get(0),
                )
                .optional()?;
            if existing.is_some() {
                return Err(LedgerError::DuplicateNativeId {
                    channel: source.to_string(),
                    native_id: native_id.clone(),
                });
            }
            let now = time::now_rfc3339();
            tx.execute(
                "INSERT INTO captures(id, source, channel_native_id, raw_content, content_hash, status, meta_json, created_at, updated_at)
                 VALUES(?1, ?2, ?3, ?4, NULL, ?5, ?6, ?7, ?7)",
                params![
                    id,
                    source.as_str(),
                    native_id,
                    new.raw_content,
                    CaptureStatus::Staged.as_str(),
                    meta_json,
                    now
                ],
            )?;
            tx.commit()?;
            Ok(())
        })?;
        Ok(id)
    }

    pub fn get_capture(&self, id: &str) -> Result<Capture, LedgerError> {
        load_capture(&self.conn, id)
    }

    /// Bind finalized content and its fingerprint, advancing `staged -> transcribed`.
    /// Repeating the call with the same hash is a no-op.
    pub fn attach_content(
        &mut self,
        id: &str,
        canonical_content: &str,
        hash: &str,
    ) -> Result<(), LedgerError> {
        let conn = &mut self.conn;
        self.events.observe("capture.attach_content", Some(id), || {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let capture = load_capture(&tx, id)?;
            if capture.content_hash.as_deref() == Some(hash) {
                return Ok(());
            }
            if capture.content_hash.is_some() {
                return Err(LedgerError::ValidationError(format!(
                    "capture {id} already carries a different content hash"
                )));
            }
            state::ensure_transition(id, capture.status, CaptureStatus::Transcribed)?;
            let holder: Option<String> = tx
                .query_row(
                    "SELECT id FROM captures WHERE content_hash = ?1 AND id != ?2",
                    params![hash, id],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(holder) = holder {
                return Err(LedgerError::ValidationError(format!(
                    "content hash of capture {id} is already held by {holder}"
                )));
            }
            tx.execute(
                "UPDATE captures SET raw_content = ?1, content_hash = ?2, status = ?3, updated_at = ?4 WHERE id = ?5",
                params![
                    canonical_content,
                    hash,
                    CaptureStatus::Transcribed.as_str(),
                    time::now_rfc3339(),
                    id
                ],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    /// Move a capture onto the failure branch and log why, in one transaction.
    pub fn mark_failed(&mut self, id: &str, reason: &str) -> Result<(), LedgerError> {
        let conn = &mut self.conn;
        self.events.observe("capture.mark_failed", Some(id), || {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let capture = load_capture(&tx, id)?;
            if capture.status == CaptureStatus::FailedTranscription {
                return Ok(());
            }
            state::ensure_transition(id, capture.status, CaptureStatus::FailedTranscription)?;
            let now = time::now_rfc3339();
            tx.execute(
                "UPDATE captures SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![CaptureStatus::FailedTranscription.as_str(), now, id],
            )?;
            insert_error(&tx, Some(id), ErrorStage::Transcribe, reason, &now)?;
            tx.commit()?;
            Ok(())
        })
    }

    pub fn find_by_hash(&self, hash: &str) -> Result<Option<Capture>, LedgerError> {
        let mut found = query_captures(
            &self.conn,
            &format!("SELECT {CAPTURE_COLUMNS} FROM captures WHERE content_hash = ?1"),
            &[&hash],
        )?;
        Ok(found.pop())
    }

    /// Oldest voice capture staged before `staged_before_id` that shares the
    /// partial audio fingerprint. Only earlier captures can be originals.
    pub fn find_by_audio_fingerprint(
        &self,
        audio_fingerprint: &str,
        staged_before_id: &str,
    ) -> Result<Option<Capture>, LedgerError> {
        let found = query_captures(
            &self.conn,
            &format!(
                "SELECT {CAPTURE_COLUMNS} FROM captures
                 WHERE source = 'voice'
                   AND json_extract(meta_json, '$.audio_fingerprint') = ?1
                   AND id < ?2
                 ORDER BY id ASC LIMIT 1"
            ),
            &[&audio_fingerprint, &staged_before_id],
        )?;
        Ok(found.into_iter().next())
    }

    /// Insert an audit row and, for a non-terminal capture, advance it to the
    /// matching terminal state, atomically. Terminal captures keep their status
    /// and only gain the audit row. Returns the resulting status.
    pub fn record_export(
        &mut self,
        capture_id: &str,
        export_path: &str,
        hash_at_export: &str,
        mode: ExportMode,
    ) -> Result<CaptureStatus, LedgerError> {
        let conn = &mut self.conn;
        self.events
            .observe(&format!("export.record.{}", mode.as_str()), Some(capture_id), || {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let capture = load_capture(&tx, capture_id)?;
                let now = time::now_rfc3339();
                let status = if capture.status.is_terminal() {
                    capture.status
                } else {
                    let next = state::terminal_for(capture.status, mode);
                    state::ensure_transition(capture_id, capture.status, next)?;
                    tx.execute(
                        "UPDATE captures SET status = ?1, updated_at = ?2 WHERE id = ?3",
                        params![next.as_str(), now, capture_id],
                    )?;
                    next
                };
                tx.execute(
                    "INSERT INTO exports_audit(id, capture_id, export_path, hash_at_export, mode, exported_at)
                     VALUES(?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        time::new_event_id(),
                        capture_id,
                        export_path,
                        hash_at_export,
                        mode.as_str(),
                        now
                    ],
                )?;
                tx.commit()?;
                Ok(status)
            })
    }

    /// Terminate `capture_id` as a duplicate of content already exported at
    /// `original_path`, without writing a file.
    pub fn record_duplicate(
        &mut self,
        capture_id: &str,
        original_path: &str,
        hash: &str,
    ) -> Result<CaptureStatus, LedgerError> {
        self.record_export(capture_id, original_path, hash, ExportMode::DuplicateSkip)
    }

    /// Every non-terminal capture in staging order. Capture ids are
    /// time-ordered and strictly increasing, so id order is arrival order.
    pub fn scan_non_terminal(&self) -> Result<Vec<Capture>, LedgerError> {
        query_captures(
            &self.conn,
            &format!(
                "SELECT {CAPTURE_COLUMNS} FROM captures
                 WHERE status NOT IN {TERMINAL_STATUSES_SQL}
                 ORDER BY id ASC"
            ),
            &[],
        )
    }

    pub fn pending_count(&self) -> Result<u64, LedgerError> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM captures WHERE status NOT IN {TERMINAL_STATUSES_SQL}"),
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn audit_rows(&self, capture_id: &str) -> Result<Vec<AuditRecord>, LedgerError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, capture_id, export_path, hash_at_export, mode, exported_at
             FROM exports_audit WHERE capture_id = ?1 ORDER BY exported_at ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![capture_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (id, capture_id, export_path, hash_at_export, mode, exported_at) = row?;
            out.push(AuditRecord {
                id,
                capture_id,
                export_path,
                hash_at_export,
                mode: mode.parse()?,
                exported_at,
            });
        }
        Ok(out)
    }

    pub fn last_export_at(&self) -> Result<Option<String>, LedgerError> {
        let ts: Option<String> =
            self.conn
                .query_row("SELECT MAX(exported_at) FROM exports_audit", [], |row| {
                    row.get(0)
                })?;
        Ok(ts)
    }

    /// Append a diagnostic row. Never consulted for control flow.
    pub fn log_error(
        &self,
        capture_id: Option<&str>,
        stage: ErrorStage,
        message: &str,
    ) -> Result<(), LedgerError> {
        self.events.observe(
            &format!("error.{}", stage.as_str()),
            capture_id,
            || {
                // A capture id that was swept (or never existed) is still worth the message.
                let known = match capture_id {
                    Some(id) => self
                        .conn
                        .query_row("SELECT 1 FROM captures WHERE id = ?1", params![id], |_| {
                            Ok(())
                        })
                        .optional()?
                        .map(|_| id),
                    None => None,
                };
                insert_error(&self.conn, known, stage, message, &time::now_rfc3339())
            },
        )
    }

    /// Errors logged at or after `since` (RFC 3339), newest first.
    pub fn recent_errors(&self, since: &str) -> Result<Vec<ErrorEntry>, LedgerError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, capture_id, stage, message, created_at FROM errors_log
             WHERE created_at >= ?1 ORDER BY created_at DESC, id DESC",
        )?;
        let rows = stmt.query_map(params![since], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (id, capture_id, stage, message, created_at) = row?;
            out.push(ErrorEntry {
                id,
                capture_id,
                stage: stage.parse()?,
                message,
                created_at,
            });
        }
        Ok(out)
    }

    pub fn get_cursor(&self, key: &str) -> Result<Option<SyncCursor>, LedgerError> {
        let cursor = self
            .conn
            .query_row(
                "SELECT key, value, version, updated_at FROM sync_state WHERE key = ?1",
                params![key],
                |row| {
                    Ok(SyncCursor {
                        key: row.get(0)?,
                        value: row.get(1)?,
                        version: row.get(2)?,
                        updated_at: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(cursor)
    }

    /// Upsert a cursor, bumping its version. Returns the new version.
    pub fn set_cursor(&mut self, key: &str, value: &str) -> Result<i64, LedgerError> {
        let conn = &mut self.conn;
        self.events.observe(&format!("cursor.set.{key}"), None, || {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            tx.execute(
                "INSERT INTO sync_state(key, value, version, updated_at) VALUES(?1, ?2, 1, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                     version = sync_state.version + 1, updated_at = excluded.updated_at",
                params![key, value, time::now_rfc3339()],
            )?;
            let version: i64 = tx.query_row(
                "SELECT version FROM sync_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )?;
            tx.commit()?;
            Ok(version)
        })
    }

    pub fn list_cursors(&self) -> Result<Vec<SyncCursor>, LedgerError> {
        let mut stmt = self
            .conn
            .prepare("SELECT key, value, version, updated_at FROM sync_state ORDER BY key")?;
        let rows = stmt.query_map([], |row| {
            Ok(SyncCursor {
                key: row.get(0)?,
                value: row.get(1)?,
                version: row.get(2)?,
                updated_at: row.get(3)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(LedgerError::from)
    }

    /// Physically delete terminal captures last updated before `cutoff`.
    /// Audit rows cascade; error rows survive with `capture_id` cleared.
    pub fn delete_terminal_before(&mut self, cutoff: &str) -> Result<usize, LedgerError> {
        let conn = &mut self.conn;
        self.events.observe("retention.sweep", None, || {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let removed = tx.execute(
                &format!(
                    "DELETE FROM captures WHERE status IN {TERMINAL_STATUSES_SQL} AND updated_at < ?1"
                ),
                params![cutoff],
            )?;
            tx.commit()?;
            Ok(removed)
        })
    }

    pub fn meta_get(&self, key: &str) -> Result<Option<String>, LedgerError> {
        meta_get(&self.conn, key)
    }

    pub fn meta_set(&self, key: &str, value: &str) -> Result<(), LedgerError> {
        meta_set(&self.conn, key, value)
    }

    /// Write a consistent copy of the ledger to `dest` (must not exist yet).
    pub fn snapshot_to(&self, dest: &Path) -> Result<(), LedgerError> {
        if dest.exists() {
            return Err(LedgerError::ValidationError(format!(
                "snapshot target {} already exists",
                dest.display()
            )));
        }
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let target = dest.to_string_lossy().to_string();
        self.events.observe("backup.snapshot", None, || {
            self.conn.execute("VACUUM INTO ?1", params![target])?;
            Ok(())
        })
    }

    pub fn logical_fingerprint(&self) -> Result<String, LedgerError> {
        logical_fingerprint(&self.conn)
    }
}

fn ensure_hash_algorithm(conn: &Connection) -> Result<(), LedgerError> {
    match meta_get(conn, schemas::META_HASH_ALGORITHM)? {
        None => meta_set(conn, schemas::META_HASH_ALGORITHM, FINGERPRINT_ALGORITHM),
        Some(stored) if stored == FINGERPRINT_ALGORITHM => Ok(()),
        Some(stored) => Err(LedgerError::HashAlgorithmMismatch {
            stored,
            expected: FINGERPRINT_ALGORITHM.to_string(),
        }),
    }
}

fn meta_get(conn: &Connection, key: &str) -> Result<Option<String>, LedgerError> {
    let value = conn
        .query_row(
            "SELECT value FROM ledger_meta WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value)
}

fn meta_set(conn: &Connection, key: &str, value: &str) -> Result<(), LedgerError> {
    conn.execute(
        "INSERT INTO ledger_meta(key, value, updated_at) VALUES(?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        params![key, value, time::now_rfc3339()],
    )?;
    Ok(())
}

fn insert_error(
    conn: &Connection,
    capture_id: Option<&str>,
    stage: ErrorStage,
    message: &str,
    now: &str,
) -> Result<(), LedgerError> {
    conn.execute(
        "INSERT INTO errors_log(id, capture_id, stage, message, created_at) VALUES(?1, ?2, ?3, ?4, ?5)",
        params![time::new_event_id(), capture_id, stage.as_str(), message, now],
    )?;
    Ok(())
}

/// Order-stable digest over the four logical tables (bookkeeping excluded).
/// Two ledgers with identical logical content yield identical digests.
pub fn logical_fingerprint(conn: &Connection) -> Result<String, LedgerError> {
    let mut hasher = Sha256::new();
    let tables = [
        "SELECT id, source, channel_native_id, raw_content, content_hash, status, meta_json, created_at, updated_at FROM captures ORDER BY id",
        "SELECT id, capture_id, export_path, hash_at_export, mode, exported_at FROM exports_audit ORDER BY id",
        "SELECT id, capture_id, stage, message, created_at FROM errors_log ORDER BY id",
        "SELECT key, value, version, updated_at FROM sync_state ORDER BY key",
    ];
    for sql in tables {
        hasher.update(sql.as_bytes());
        let mut stmt = conn.prepare(sql)?;
        let columns = stmt.column_count();
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            for idx in 0..columns {
                match row.get_ref(idx)? {
                    ValueRef::Null => hasher.update([0u8]),
                    ValueRef::Integer(v) => {
                        hasher.update([1u8]);
                        hasher.update(v.to_be_bytes());
                    }
                    ValueRef::Real(v) => {
                        hasher.update([2u8]);
                        hasher.update(v.to_bits().to_be_bytes());
                    }
                    ValueRef::Text(bytes) => {
                        hasher.update([3u8]);
                        hasher.update((bytes.len() as u64).to_be_bytes());
                        hasher.update(bytes);
                    }
                    ValueRef::Blob(bytes) => {
                        hasher.update([4u8]);
                        hasher.update((bytes.len() as u64).to_be_bytes());
                        hasher.update(bytes);
                    }
                }
            }
            hasher.update([0x1e]);
        }
    }
    Ok(format!("{:x}", hasher.finalize()))
}

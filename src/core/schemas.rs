//! Centralized schema definitions for the capture ledger.
//!
//! The ledger is a single SQLite file holding four logical tables:
//! 1. captures: one row per inbound thought, with its lifecycle status.
//! 2. exports_audit: one row per export attempt that reached a file-system decision.
//! 3. errors_log: append-only diagnostics, never read for control flow.
//! 4. sync_state: opaque poll cursors owned by ingestion collaborators.
//!
//! `ledger_meta` carries bookkeeping (schema version, fingerprint algorithm,
//! backup verification state).

pub const LEDGER_DB_NAME: &str = "ledger.sqlite3";
pub const LEDGER_EVENTS_NAME: &str = "ledger.events.jsonl";
pub const CONFIG_FILE_NAME: &str = "capture.toml";

/// Highest schema version this binary knows how to apply.
pub const LEDGER_SCHEMA_VERSION: u32 = 2;

pub const LEDGER_DB_SCHEMA_META: &str = "
    CREATE TABLE IF NOT EXISTS ledger_meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
";

pub const LEDGER_DB_SCHEMA_CAPTURES: &str = "
    CREATE TABLE IF NOT EXISTS captures (
        id TEXT PRIMARY KEY,
        source TEXT NOT NULL CHECK (source IN ('voice', 'email')),
        channel_native_id TEXT NOT NULL,
        raw_content TEXT,
        content_hash TEXT,
        status TEXT NOT NULL CHECK (status IN (
            'staged', 'transcribed', 'failed_transcription',
            'exported', 'exported_duplicate', 'exported_placeholder'
        )),
        meta_json TEXT NOT NULL, -- tagged by source, see CaptureMeta
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE(source, channel_native_id)
    )
";
pub const LEDGER_DB_SCHEMA_CAPTURES_HASH_INDEX: &str = "
    CREATE UNIQUE INDEX IF NOT EXISTS idx_captures_content_hash
        ON captures(content_hash) WHERE content_hash IS NOT NULL
";
pub const LEDGER_DB_SCHEMA_CAPTURES_STATUS_INDEX: &str = "
    CREATE INDEX IF NOT EXISTS idx_captures_status_created
        ON captures(status, created_at)
";

pub const LEDGER_DB_SCHEMA_EXPORTS_AUDIT: &str = "
    CREATE TABLE IF NOT EXISTS exports_audit (
        id TEXT PRIMARY KEY,
        capture_id TEXT NOT NULL,
        export_path TEXT NOT NULL, -- relative to the vault root
        hash_at_export TEXT NOT NULL,
        mode TEXT NOT NULL CHECK (mode IN ('initial', 'duplicate_skip')),
        exported_at TEXT NOT NULL,
        FOREIGN KEY(capture_id) REFERENCES captures(id) ON DELETE CASCADE
    )
";
pub const LEDGER_DB_SCHEMA_EXPORTS_AUDIT_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_exports_audit_capture ON exports_audit(capture_id)";

pub const LEDGER_DB_SCHEMA_ERRORS_LOG: &str = "
    CREATE TABLE IF NOT EXISTS errors_log (
        id TEXT PRIMARY KEY,
        capture_id TEXT,
        stage TEXT NOT NULL CHECK (stage IN ('ingest', 'transcribe', 'export', 'backup')),
        message TEXT NOT NULL,
        created_at TEXT NOT NULL,
        FOREIGN KEY(capture_id) REFERENCES captures(id) ON DELETE SET NULL
    )
";
pub const LEDGER_DB_SCHEMA_ERRORS_LOG_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_errors_log_created ON errors_log(created_at)";

pub const LEDGER_DB_SCHEMA_SYNC_STATE: &str = "
    CREATE TABLE IF NOT EXISTS sync_state (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        version INTEGER NOT NULL DEFAULT 1,
        updated_at TEXT NOT NULL
    )
";

// --- v2: early voice dedup over the partial audio fingerprint ---
pub const LEDGER_DB_SCHEMA_AUDIO_FINGERPRINT_INDEX: &str = "
    CREATE INDEX IF NOT EXISTS idx_captures_audio_fingerprint
        ON captures(json_extract(meta_json, '$.audio_fingerprint'))
        WHERE source = 'voice'
";

// --- ledger_meta keys ---
pub const META_SCHEMA_VERSION: &str = "schema_version";
pub const META_HASH_ALGORITHM: &str = "hash_algorithm";
pub const META_BACKUP_LAST_RESULT: &str = "backup.last_result";
pub const META_BACKUP_LAST_RUN_AT: &str = "backup.last_run_at";
pub const META_BACKUP_LAST_PATH: &str = "backup.last_path";
pub const META_BACKUP_CONSECUTIVE_FAILURES: &str = "backup.consecutive_failures";

use capture_ledger::core::broker::EventBroker;
use capture_ledger::core::config::{self, LedgerConfig};
use capture_ledger::core::db;
use capture_ledger::core::error::LedgerError;
use capture_ledger::core::migration;
use capture_ledger::core::schemas;
use capture_ledger::core::store::Store;
use capture_ledger::core::time;
use rusqlite::params;
use std::fs;
use tempfile::tempdir;

#[test]
fn test_db_connect_applies_durability_pragmas() {
    let tmp = tempdir().unwrap();
    let db_path = tmp.path().join("nested").join("ledger.sqlite3");
    let conn = db::db_connect(&db_path, 250).expect("connect");

    let mode: String = conn
        .query_row("PRAGMA journal_mode;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(mode.to_lowercase(), "wal");
    let sync: i64 = conn
        .query_row("PRAGMA synchronous;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(sync, 2, "synchronous must be FULL");
    let fk: i64 = conn
        .query_row("PRAGMA foreign_keys;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(fk, 1);
    let busy: i64 = conn
        .query_row("PRAGMA busy_timeout;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(busy, 250);
    assert!(db::integrity_problems(&conn).unwrap().is_empty());
}

#[test]
fn test_migrations_are_idempotent_and_refuse_newer_schema() {
    let tmp = tempdir().unwrap();
    let db_path = tmp.path().join("ledger.sqlite3");
    let mut conn = db::db_connect(&db_path, 1_000).unwrap();

    let applied = migration::check_and_migrate(&mut conn).unwrap();
    assert_eq!(applied, migration::all_migrations().len());
    assert_eq!(
        migration::stored_version(&conn).unwrap(),
        schemas::LEDGER_SCHEMA_VERSION
    );
    assert_eq!(migration::check_and_migrate(&mut conn).unwrap(), 0);

    for table in ["captures", "exports_audit", "errors_log", "sync_state"] {
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![table],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1, "table {table} should exist");
    }

    conn.execute(
        "UPDATE ledger_meta SET value = '99' WHERE key = ?1",
        params![schemas::META_SCHEMA_VERSION],
    )
    .unwrap();
    let err = migration::check_and_migrate(&mut conn).unwrap_err();
    assert!(matches!(err, LedgerError::ValidationError(_)));
}

#[test]
fn test_broker_records_success_and_failure() {
    let tmp = tempdir().unwrap();
    let broker = EventBroker::new(&tmp.path().join("ledger.events.jsonl"));

    let ok: Result<u32, LedgerError> = broker.observe("capture.insert", Some("01ABC"), || Ok(7));
    assert_eq!(ok.unwrap(), 7);
    let failed: Result<(), LedgerError> = broker.observe("capture.attach_content", None, || {
        Err(LedgerError::NotFound("capture 01XYZ".into()))
    });
    assert!(failed.is_err());

    let events = broker.read_events().unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].op, "capture.insert");
    assert_eq!(events[0].capture_id.as_deref(), Some("01ABC"));
    assert_eq!(events[0].status, "success");
    assert_eq!(events[1].status, "error");
    assert!(events[1].detail.as_deref().unwrap().contains("01XYZ"));
}

#[test]
fn test_broker_skips_torn_trailing_line() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("ledger.events.jsonl");
    let broker = EventBroker::new(&path);
    let _: Result<(), LedgerError> = broker.observe("cursor.set.mail", None, || Ok(()));
    let mut raw = fs::read_to_string(&path).unwrap();
    raw.push_str("{\"ts\":\"2026-");
    fs::write(&path, raw).unwrap();
    assert_eq!(broker.read_events().unwrap().len(), 1);
}

#[test]
fn test_config_and_store_layout_share_the_state_root() {
    let tmp = tempdir().unwrap();
    fs::write(
        tmp.path().join(schemas::CONFIG_FILE_NAME),
        "vault_root = \"Notes\"\nnote_extension = \"txt\"\n",
    )
    .unwrap();
    let config: LedgerConfig = config::load_config(tmp.path()).unwrap();
    let store = Store::from_config(&config);
    assert_eq!(store.inbox_dir(), tmp.path().join("Notes").join("inbox"));
    assert_eq!(store.staging_dir(), tmp.path().join("Notes").join(".trash"));
    assert_eq!(config.note_extension, "txt");

    fs::write(tmp.path().join(schemas::CONFIG_FILE_NAME), "unknown_key = 1\n").unwrap();
    assert!(matches!(
        config::load_config(tmp.path()),
        Err(LedgerError::Config(_))
    ));
}

#[test]
fn test_timestamps_sort_chronologically_as_strings() {
    let a = time::now_rfc3339();
    std::thread::sleep(std::time::Duration::from_millis(3));
    let b = time::now_rfc3339();
    assert_eq!(a.len(), b.len());
    assert!(a < b);
    assert!(time::parse_rfc3339(&a).is_some());

    let mut ids = time::CaptureIds::new();
    let id1 = ids.next_id().unwrap();
    let id2 = ids.next_id().unwrap();
    assert_eq!(id1.len(), 26);
    assert!(id1 < id2);
}

use capture_ledger::core::error::LedgerError;
use capture_ledger::plugins::ledger::{CaptureMeta, ErrorStage, Ledger, NewCapture, Source};
use capture_ledger::plugins::normalize;
use capture_ledger::plugins::state::{CaptureStatus, ExportMode};
use chrono::{Duration, Utc};
use rusqlite::Connection;
use tempfile::{TempDir, tempdir};

fn open(tmp: &TempDir) -> Ledger {
    Ledger::open_at(
        &tmp.path().join("ledger.sqlite3"),
        &tmp.path().join("ledger.events.jsonl"),
        200,
    )
    .expect("open ledger")
}

fn voice(path: &str, audio_fp: &str) -> NewCapture {
    NewCapture {
        meta: CaptureMeta::Voice {
            file_path: path.to_string(),
            audio_fingerprint: audio_fp.to_string(),
        },
        raw_content: None,
    }
}

fn email(message_id: &str, body: &str) -> NewCapture {
    NewCapture {
        meta: CaptureMeta::Email {
            message_id: message_id.to_string(),
            from: "me@example.com".to_string(),
            subject: "reminder".to_string(),
        },
        raw_content: Some(body.to_string()),
    }
}

#[test]
fn test_same_native_id_is_rejected_per_channel() {
    let tmp = tempdir().unwrap();
    let mut ledger = open(&tmp);

    let first = ledger.insert_capture(&voice("/memos/a.m4a", "fp-a")).unwrap();
    let err = ledger
        .insert_capture(&voice("/memos/a.m4a", "fp-other"))
        .unwrap_err();
    match err {
        LedgerError::DuplicateNativeId { channel, native_id } => {
            assert_eq!(channel, "voice");
            assert_eq!(native_id, "/memos/a.m4a");
        }
        other => panic!("expected DuplicateNativeId, got {other:?}"),
    }

    // Same native id on the other channel is a different capture.
    let mail = ledger.insert_capture(&email("/memos/a.m4a", "hi")).unwrap();
    assert_ne!(first, mail);

    let stored = ledger.get_capture(&first).unwrap();
    assert_eq!(stored.source, Source::Voice);
    assert_eq!(stored.status, CaptureStatus::Staged);
    assert!(stored.content_hash.is_none());
}

#[test]
fn test_attach_content_advances_and_is_indexed_by_hash() {
    let tmp = tempdir().unwrap();
    let mut ledger = open(&tmp);
    let id = ledger.insert_capture(&voice("/memos/a.m4a", "fp-a")).unwrap();
    let (canonical, hash) = normalize::canonicalize("buy milk  \r\n");

    ledger.attach_content(&id, &canonical, &hash).unwrap();
    ledger.attach_content(&id, &canonical, &hash).unwrap();

    let found = ledger.find_by_hash(&hash).unwrap().expect("indexed");
    assert_eq!(found.id, id);
    assert_eq!(found.status, CaptureStatus::Transcribed);
    assert_eq!(found.raw_content.as_deref(), Some("buy milk"));
    assert!(ledger.find_by_hash(&normalize::fingerprint(b"other")).unwrap().is_none());

    let other = ledger.insert_capture(&voice("/memos/b.m4a", "fp-b")).unwrap();
    let err = ledger.attach_content(&other, &canonical, &hash).unwrap_err();
    assert!(matches!(err, LedgerError::ValidationError(_)));
    assert_eq!(
        ledger.get_capture(&other).unwrap().status,
        CaptureStatus::Staged
    );
}

#[test]
fn test_illegal_transition_leaves_capture_untouched() {
    let tmp = tempdir().unwrap();
    let mut ledger = open(&tmp);
    let id = ledger.insert_capture(&email("msg-1", "body")).unwrap();

    // staged -> exported skips finalization.
    let err = ledger
        .record_export(&id, "inbox/x.md", "h", ExportMode::Initial)
        .unwrap_err();
    assert!(matches!(err, LedgerError::IllegalTransition { .. }));
    assert_eq!(ledger.get_capture(&id).unwrap().status, CaptureStatus::Staged);
    assert!(ledger.audit_rows(&id).unwrap().is_empty());

    let (canonical, hash) = normalize::canonicalize("body");
    ledger.attach_content(&id, &canonical, &hash).unwrap();
    let err = ledger.mark_failed(&id, "late failure").unwrap_err();
    assert!(matches!(err, LedgerError::IllegalTransition { .. }));
}

#[test]
fn test_terminal_captures_only_gain_audit_rows() {
    let tmp = tempdir().unwrap();
    let mut ledger = open(&tmp);
    let id = ledger.insert_capture(&email("msg-1", "body")).unwrap();
    let (canonical, hash) = normalize::canonicalize("body");
    ledger.attach_content(&id, &canonical, &hash).unwrap();

    let path = format!("inbox/{id}.md");
    let status = ledger
        .record_export(&id, &path, &hash, ExportMode::Initial)
        .unwrap();
    assert_eq!(status, CaptureStatus::Exported);
    let status = ledger
        .record_export(&id, &path, &hash, ExportMode::DuplicateSkip)
        .unwrap();
    assert_eq!(status, CaptureStatus::Exported);

    let rows = ledger.audit_rows(&id).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].mode, ExportMode::Initial);
    assert_eq!(rows[1].mode, ExportMode::DuplicateSkip);
    assert_eq!(ledger.get_capture(&id).unwrap().content_hash, Some(hash));
    assert!(ledger.last_export_at().unwrap().is_some());
}

#[test]
fn test_failed_transcription_is_logged_in_the_same_step() {
    let tmp = tempdir().unwrap();
    let mut ledger = open(&tmp);
    let id = ledger.insert_capture(&voice("/memos/a.m4a", "fp-a")).unwrap();
    ledger.mark_failed(&id, "timed out twice").unwrap();
    ledger.mark_failed(&id, "timed out twice").unwrap();

    assert_eq!(
        ledger.get_capture(&id).unwrap().status,
        CaptureStatus::FailedTranscription
    );
    let errors = ledger.recent_errors("").unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].stage, ErrorStage::Transcribe);
    assert_eq!(errors[0].capture_id.as_deref(), Some(id.as_str()));
}

#[test]
fn test_scan_non_terminal_returns_oldest_first() {
    let tmp = tempdir().unwrap();
    let mut ledger = open(&tmp);
    let a = ledger.insert_capture(&email("msg-a", "a")).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(3));
    let b = ledger.insert_capture(&voice("/memos/b.m4a", "fp-b")).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(3));
    let c = ledger.insert_capture(&email("msg-c", "c")).unwrap();
    ledger.mark_failed(&b, "no transcriber").unwrap();

    let (canonical, hash) = normalize::canonicalize("c");
    ledger.attach_content(&c, &canonical, &hash).unwrap();
    ledger
        .record_export(&c, &format!("inbox/{c}.md"), &hash, ExportMode::Initial)
        .unwrap();

    let pending: Vec<_> = ledger
        .scan_non_terminal()
        .unwrap()
        .into_iter()
        .map(|c| c.id)
        .collect();
    assert_eq!(pending, vec![a, b]);
    assert_eq!(ledger.pending_count().unwrap(), 2);
}

#[test]
fn test_audio_fingerprint_lookup_only_matches_earlier_captures() {
    let tmp = tempdir().unwrap();
    let mut ledger = open(&tmp);
    let a = ledger.insert_capture(&voice("/memos/a.m4a", "same")).unwrap();
    let b = ledger.insert_capture(&voice("/memos/copy-of-a.m4a", "same")).unwrap();
    let c = ledger.insert_capture(&voice("/memos/copy-2.m4a", "same")).unwrap();

    assert_eq!(
        ledger.find_by_audio_fingerprint("same", &b).unwrap().map(|c| c.id),
        Some(a.clone())
    );
    assert_eq!(
        ledger.find_by_audio_fingerprint("same", &c).unwrap().map(|c| c.id),
        Some(a.clone())
    );
    // The oldest capture is the original; nothing staged later can claim it.
    assert!(ledger.find_by_audio_fingerprint("same", &a).unwrap().is_none());
    assert!(ledger.find_by_audio_fingerprint("none", &c).unwrap().is_none());
}

#[test]
fn test_scan_order_matches_insertion_order_within_one_millisecond() {
    let tmp = tempdir().unwrap();
    let mut ledger = open(&tmp);
    let inserted: Vec<String> = (0..300)
        .map(|n| {
            ledger
                .insert_capture(&email(&format!("burst-{n}"), "same minute"))
                .unwrap()
        })
        .collect();

    let scanned: Vec<String> = ledger
        .scan_non_terminal()
        .unwrap()
        .into_iter()
        .map(|c| c.id)
        .collect();
    assert_eq!(scanned, inserted);
}

#[test]
fn test_sync_cursors_are_versioned() {
    let tmp = tempdir().unwrap();
    let mut ledger = open(&tmp);
    assert!(ledger.get_cursor("mail:inbox").unwrap().is_none());
    assert_eq!(ledger.set_cursor("mail:inbox", "uid=10").unwrap(), 1);
    assert_eq!(ledger.set_cursor("mail:inbox", "uid=42").unwrap(), 2);
    ledger.set_cursor("voice:/memos", "{}").unwrap();

    let cursor = ledger.get_cursor("mail:inbox").unwrap().unwrap();
    assert_eq!(cursor.value, "uid=42");
    assert_eq!(cursor.version, 2);
    let keys: Vec<_> = ledger
        .list_cursors()
        .unwrap()
        .into_iter()
        .map(|c| c.key)
        .collect();
    assert_eq!(keys, vec!["mail:inbox", "voice:/memos"]);
}

#[test]
fn test_retention_delete_keeps_error_rows_and_pending_captures() {
    let tmp = tempdir().unwrap();
    let mut ledger = open(&tmp);
    let done = ledger.insert_capture(&email("msg-done", "done")).unwrap();
    let (canonical, hash) = normalize::canonicalize("done");
    ledger.attach_content(&done, &canonical, &hash).unwrap();
    ledger
        .record_export(&done, &format!("inbox/{done}.md"), &hash, ExportMode::Initial)
        .unwrap();
    ledger
        .log_error(Some(&done), ErrorStage::Export, "transient")
        .unwrap();
    let pending = ledger.insert_capture(&email("msg-pending", "p")).unwrap();

    let cutoff = capture_ledger::core::time::format_rfc3339(Utc::now() + Duration::days(1));
    assert_eq!(ledger.delete_terminal_before(&cutoff).unwrap(), 1);

    assert!(matches!(
        ledger.get_capture(&done),
        Err(LedgerError::NotFound(_))
    ));
    assert!(ledger.audit_rows(&done).unwrap().is_empty());
    assert!(ledger.get_capture(&pending).is_ok());
    let errors = ledger.recent_errors("").unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].capture_id.is_none());
}

#[test]
fn test_log_error_tolerates_unknown_capture() {
    let tmp = tempdir().unwrap();
    let ledger = open(&tmp);
    ledger
        .log_error(Some("01UNKNOWN"), ErrorStage::Ingest, "unreadable file")
        .unwrap();
    std::thread::sleep(std::time::Duration::from_millis(3));
    ledger.log_error(None, ErrorStage::Backup, "snapshot failed").unwrap();

    let errors = ledger.recent_errors("").unwrap();
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0].stage, ErrorStage::Backup);
    assert!(errors.iter().all(|e| e.capture_id.is_none()));
}

#[test]
fn test_reopening_with_another_hash_algorithm_fails() {
    let tmp = tempdir().unwrap();
    drop(open(&tmp));
    let conn = Connection::open(tmp.path().join("ledger.sqlite3")).unwrap();
    conn.execute(
        "UPDATE ledger_meta SET value = 'blake3-v1' WHERE key = 'hash_algorithm'",
        [],
    )
    .unwrap();
    drop(conn);

    let err = Ledger::open_at(
        &tmp.path().join("ledger.sqlite3"),
        &tmp.path().join("ledger.events.jsonl"),
        200,
    )
    .err()
    .expect("mismatch must be refused");
    assert!(matches!(err, LedgerError::HashAlgorithmMismatch { .. }));
}

#[test]
fn test_second_writer_fails_fast_with_busy() {
    let tmp = tempdir().unwrap();
    let mut ledger = open(&tmp);
    let blocker = Connection::open(tmp.path().join("ledger.sqlite3")).unwrap();
    blocker.execute_batch("BEGIN IMMEDIATE;").unwrap();

    let started = std::time::Instant::now();
    let err = ledger.insert_capture(&email("msg-1", "x")).unwrap_err();
    assert!(matches!(err, LedgerError::Busy(_)), "got {err:?}");
    assert!(started.elapsed() < std::time::Duration::from_secs(5));

    blocker.execute_batch("COMMIT;").unwrap();
    ledger.insert_capture(&email("msg-1", "x")).unwrap();
}

#[test]
fn test_logical_fingerprint_tracks_content() {
    let tmp = tempdir().unwrap();
    let mut ledger = open(&tmp);
    let before = ledger.logical_fingerprint().unwrap();
    assert_eq!(before, ledger.logical_fingerprint().unwrap());
    ledger.insert_capture(&email("msg-1", "x")).unwrap();
    assert_ne!(before, ledger.logical_fingerprint().unwrap());
}

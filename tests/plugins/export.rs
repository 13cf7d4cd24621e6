use capture_ledger::core::config::LedgerConfig;
use capture_ledger::plugins::dedup::{self, DedupDecision, DedupEngine};
use capture_ledger::plugins::export::{
    AtomicExporter, ExportError, ExportOutcome, FaultPoint, PLACEHOLDER_TEXT, Severity,
};
use capture_ledger::plugins::ledger::{Capture, CaptureMeta, Ledger, NewCapture};
use capture_ledger::plugins::normalize;
use capture_ledger::plugins::state::{CaptureStatus, ExportMode};
use std::fs;
use tempfile::{TempDir, tempdir};

struct Harness {
    config: LedgerConfig,
    ledger: Ledger,
    exporter: AtomicExporter,
}

fn harness(tmp: &TempDir) -> Harness {
    let config = LedgerConfig::defaults(tmp.path());
    fs::create_dir_all(&config.vault_root).unwrap();
    Harness {
        ledger: Ledger::open(&config).unwrap(),
        exporter: AtomicExporter::from_config(&config),
        config,
    }
}

fn transcribed_voice(ledger: &mut Ledger, path: &str, text: &str) -> Capture {
    let id = ledger
        .insert_capture(&NewCapture {
            meta: CaptureMeta::Voice {
                file_path: path.to_string(),
                audio_fingerprint: normalize::fingerprint(path.as_bytes()),
            },
            raw_content: None,
        })
        .unwrap();
    let (canonical, hash) = normalize::canonicalize(text);
    ledger.attach_content(&id, &canonical, &hash).unwrap();
    ledger.get_capture(&id).unwrap()
}

fn initial_rows(ledger: &Ledger, id: &str) -> usize {
    ledger
        .audit_rows(id)
        .unwrap()
        .iter()
        .filter(|r| r.mode == ExportMode::Initial)
        .count()
}

#[test]
fn test_voice_happy_path_writes_note_and_initial_audit_row() {
    let tmp = tempdir().unwrap();
    let mut h = harness(&tmp);
    let capture = transcribed_voice(&mut h.ledger, "/path/a.m4a", "buy milk");

    let outcome = h.exporter.export(&mut h.ledger, &capture).unwrap();
    let expected = h.config.vault_root.join("inbox").join(format!("{}.md", capture.id));
    assert_eq!(
        outcome,
        ExportOutcome::Written {
            path: expected.clone(),
            status: CaptureStatus::Exported
        }
    );

    let note = fs::read_to_string(&expected).unwrap();
    assert!(note.starts_with("---\n"));
    assert!(note.contains(&format!("id: {}\n", capture.id)));
    assert!(note.contains("source: voice\n"));
    assert!(note.contains(&format!("captured_at: {}\n", capture.created_at)));
    assert!(note.contains(&format!(
        "content_hash: {}\n",
        capture.content_hash.as_deref().unwrap()
    )));
    assert!(note.ends_with("\nbuy milk\n"));

    let rows = h.ledger.audit_rows(&capture.id).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].mode, ExportMode::Initial);
    assert_eq!(rows[0].export_path, format!("inbox/{}.md", capture.id));
    assert_eq!(
        h.ledger.get_capture(&capture.id).unwrap().status,
        CaptureStatus::Exported
    );
    assert!(fs::read_dir(h.exporter.store().staging_dir()).unwrap().next().is_none());
}

#[test]
fn test_exporting_a_terminal_capture_again_writes_nothing_new() {
    let tmp = tempdir().unwrap();
    let mut h = harness(&tmp);
    let capture = transcribed_voice(&mut h.ledger, "/path/a.m4a", "buy milk");
    h.exporter.export(&mut h.ledger, &capture).unwrap();
    let path = h.exporter.destination(&capture.id);
    let before = fs::read(&path).unwrap();

    let exported = h.ledger.get_capture(&capture.id).unwrap();
    let again = h.exporter.export(&mut h.ledger, &exported).unwrap();
    assert!(matches!(again, ExportOutcome::Duplicate { .. }));
    assert_eq!(again.status(), CaptureStatus::Exported);
    assert_eq!(fs::read(&path).unwrap(), before);
    assert_eq!(initial_rows(&h.ledger, &capture.id), 1);
}

#[test]
fn test_externally_deleted_note_self_heals_with_one_more_initial_row() {
    let tmp = tempdir().unwrap();
    let mut h = harness(&tmp);
    let capture = transcribed_voice(&mut h.ledger, "/path/a.m4a", "buy milk");
    h.exporter.export(&mut h.ledger, &capture).unwrap();
    let path = h.exporter.destination(&capture.id);
    let original = fs::read_to_string(&path).unwrap();

    fs::remove_file(&path).unwrap();
    let exported = h.ledger.get_capture(&capture.id).unwrap();
    let outcome = h.exporter.export(&mut h.ledger, &exported).unwrap();

    assert!(matches!(outcome, ExportOutcome::Written { .. }));
    assert_eq!(fs::read_to_string(&path).unwrap(), original);
    assert_eq!(initial_rows(&h.ledger, &capture.id), 2);
    assert_eq!(
        h.ledger.get_capture(&capture.id).unwrap().status,
        CaptureStatus::Exported
    );
}

#[test]
fn test_different_content_at_destination_is_a_conflict_and_never_overwritten() {
    let tmp = tempdir().unwrap();
    let mut h = harness(&tmp);
    let capture = transcribed_voice(&mut h.ledger, "/path/a.m4a", "buy milk");
    let path = h.exporter.destination(&capture.id);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, "---\nid: x\n---\n\nsomething else\n").unwrap();

    let engine = DedupEngine::new(h.exporter.store(), h.exporter.extension());
    let decision = engine
        .check(&capture.id, capture.content_hash.as_deref().unwrap())
        .unwrap();
    assert!(matches!(decision, DedupDecision::Conflict { .. }));

    let err = h.exporter.export(&mut h.ledger, &capture).unwrap_err();
    assert!(matches!(err, ExportError::Conflict { .. }));
    assert!(err.is_critical());
    assert_eq!(err.severity(), Severity::CaptureHalt);
    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        "---\nid: x\n---\n\nsomething else\n"
    );
    assert_eq!(
        h.ledger.get_capture(&capture.id).unwrap().status,
        CaptureStatus::Transcribed
    );
    assert!(h.ledger.audit_rows(&capture.id).unwrap().is_empty());
    assert!(h.exporter.halted_reason().is_none());
}

#[test]
fn test_binary_file_at_destination_is_a_critical_conflict() {
    let tmp = tempdir().unwrap();
    let mut h = harness(&tmp);
    let capture = transcribed_voice(&mut h.ledger, "/path/bin.m4a", "buy milk");
    let path = h.exporter.destination(&capture.id);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, [0xff, 0xfe, 0x00]).unwrap();

    let err = h.exporter.export(&mut h.ledger, &capture).unwrap_err();
    assert!(matches!(err, ExportError::Conflict { .. }));
    assert!(err.is_critical());
    assert_eq!(fs::read(&path).unwrap(), vec![0xff, 0xfe, 0x00]);
    assert_eq!(
        h.ledger.get_capture(&capture.id).unwrap().status,
        CaptureStatus::Transcribed
    );
}

#[test]
fn test_failed_transcription_exports_placeholder() {
    let tmp = tempdir().unwrap();
    let mut h = harness(&tmp);
    let id = h
        .ledger
        .insert_capture(&NewCapture {
            meta: CaptureMeta::Voice {
                file_path: "/path/b.m4a".into(),
                audio_fingerprint: "fp-b".into(),
            },
            raw_content: None,
        })
        .unwrap();
    h.ledger.mark_failed(&id, "timeout; timeout").unwrap();
    let capture = h.ledger.get_capture(&id).unwrap();

    let outcome = h.exporter.export(&mut h.ledger, &capture).unwrap();
    assert_eq!(outcome.status(), CaptureStatus::ExportedPlaceholder);
    let note = fs::read_to_string(outcome.path().unwrap()).unwrap();
    assert!(note.contains(PLACEHOLDER_TEXT));

    let stored = h.ledger.get_capture(&id).unwrap();
    assert!(stored.content_hash.is_none());
    let rows = h.ledger.audit_rows(&id).unwrap();
    assert_eq!(
        rows[0].hash_at_export,
        normalize::fingerprint(PLACEHOLDER_TEXT.as_bytes())
    );
}

#[test]
fn test_missing_vault_root_halts_only_that_capture() {
    let tmp = tempdir().unwrap();
    let mut h = harness(&tmp);
    let capture = transcribed_voice(&mut h.ledger, "/path/a.m4a", "buy milk");
    fs::remove_dir_all(&h.config.vault_root).unwrap();

    let err = h.exporter.export(&mut h.ledger, &capture).unwrap_err();
    assert!(matches!(err, ExportError::MountUnavailable { .. }));
    assert_eq!(err.severity(), Severity::CaptureHalt);
    assert!(!h.config.vault_root.exists(), "exporter must not recreate the vault");
    assert_eq!(
        h.ledger.get_capture(&capture.id).unwrap().status,
        CaptureStatus::Transcribed
    );
}

#[test]
fn test_crash_after_temp_write_leaves_no_destination_and_recovers_once() {
    let tmp = tempdir().unwrap();
    let mut h = harness(&tmp);
    let capture = transcribed_voice(&mut h.ledger, "/path/a.m4a", "buy milk");

    h.exporter.inject_fault(Some(FaultPoint::AfterTempWrite));
    let err = h.exporter.export(&mut h.ledger, &capture).unwrap_err();
    assert!(matches!(
        err,
        ExportError::Interrupted(FaultPoint::AfterTempWrite)
    ));
    assert!(!h.exporter.destination(&capture.id).exists());
    assert!(h.exporter.temp_path(&capture.id).exists());
    assert!(h.ledger.audit_rows(&capture.id).unwrap().is_empty());

    // Restart: a fresh exporter over the same vault.
    let mut exporter = AtomicExporter::from_config(&h.config);
    assert_eq!(exporter.sweep_stale_temps().unwrap(), 1);
    let pending = h.ledger.scan_non_terminal().unwrap();
    assert_eq!(pending.len(), 1);
    let outcome = exporter.export(&mut h.ledger, &pending[0]).unwrap();
    assert_eq!(outcome.status(), CaptureStatus::Exported);

    let inbox: Vec<_> = fs::read_dir(exporter.store().inbox_dir())
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(inbox, vec![exporter.destination(&capture.id)]);
    assert!(fs::read_to_string(&inbox[0]).unwrap().ends_with("\nbuy milk\n"));
    assert_eq!(initial_rows(&h.ledger, &capture.id), 1);
}

#[test]
fn test_crash_after_rename_is_settled_without_rewriting() {
    let tmp = tempdir().unwrap();
    let mut h = harness(&tmp);
    let capture = transcribed_voice(&mut h.ledger, "/path/a.m4a", "buy milk");

    h.exporter.inject_fault(Some(FaultPoint::AfterRename));
    h.exporter.export(&mut h.ledger, &capture).unwrap_err();
    let path = h.exporter.destination(&capture.id);
    let written = fs::read_to_string(&path).unwrap();
    assert!(written.ends_with("\nbuy milk\n"), "rename must publish a complete file");
    assert_eq!(
        h.ledger.get_capture(&capture.id).unwrap().status,
        CaptureStatus::Transcribed
    );

    let mut exporter = AtomicExporter::from_config(&h.config);
    let outcome = exporter.export(&mut h.ledger, &capture).unwrap();
    assert!(matches!(outcome, ExportOutcome::Duplicate { .. }));
    assert_eq!(outcome.status(), CaptureStatus::ExportedDuplicate);
    assert_eq!(fs::read_to_string(&path).unwrap(), written);
    let rows = h.ledger.audit_rows(&capture.id).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].mode, ExportMode::DuplicateSkip);
}

#[test]
fn test_interrupted_exporter_refuses_further_work() {
    let tmp = tempdir().unwrap();
    let mut h = harness(&tmp);
    let first = transcribed_voice(&mut h.ledger, "/path/a.m4a", "one");
    let second = transcribed_voice(&mut h.ledger, "/path/b.m4a", "two");

    h.exporter.inject_fault(Some(FaultPoint::AfterTempWrite));
    h.exporter.export(&mut h.ledger, &first).unwrap_err();
    h.exporter.inject_fault(None);
    let err = h.exporter.export(&mut h.ledger, &second).unwrap_err();
    assert!(matches!(err, ExportError::Halted(_)));
    assert!(h.exporter.halted_reason().is_some());
    assert!(!h.exporter.destination(&second.id).exists());
}

#[test]
fn test_note_body_fingerprint_ignores_header() {
    let (_, hash) = normalize::canonicalize("buy milk");
    let note = "---\nid: 01A\nsource: voice\ncaptured_at: 2026-01-01T00:00:00.000Z\ncontent_hash: x\n---\n\nbuy milk\n";
    assert_eq!(dedup::note_body_fingerprint(note), hash);
}

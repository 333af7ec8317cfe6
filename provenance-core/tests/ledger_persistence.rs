//! Persistence and tamper-detection tests for the HMAC ledger.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;

use provenance_core::{Ledger, ProvenanceError, GENESIS};
use serde_json::{json, Value};
use tempfile::TempDir;

const SECRET: &str = "integration-secret";

fn seed_ledger(path: &Path, count: usize) -> Ledger {
    let ledger = Ledger::open(SECRET, path).expect("Failed to open ledger");
    for i in 0..count {
        ledger
            .append(&json!({"step": format!("stage-{}", i), "params": {"scale": i, "model": "x4"}}))
            .expect("Failed to append");
    }
    ledger
}

/// Rewrite line `index` of the ledger file through `edit`.
fn edit_line(path: &Path, index: usize, edit: impl FnOnce(&mut Value)) {
    let contents = fs::read_to_string(path).unwrap();
    let mut lines: Vec<String> = contents.lines().map(str::to_string).collect();
    let mut record: Value = serde_json::from_str(&lines[index]).unwrap();
    edit(&mut record);
    lines[index] = serde_json::to_string(&record).unwrap();
    fs::write(path, lines.join("\n") + "\n").unwrap();
}

// ============================================================================
// Reopen Tests
// ============================================================================

#[test]
fn test_reopen_restores_chain() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ledger.jsonl");

    let original = seed_ledger(&path, 4).records();
    let reopened = Ledger::open(SECRET, &path).unwrap();

    assert_eq!(reopened.records(), original);
    assert!(reopened.verify_chain().is_ok());
    assert_eq!(reopened.get(0).unwrap().prev_hmac, GENESIS);
    assert_eq!(reopened.path(), Some(path.as_path()));
}

#[test]
fn test_file_holds_one_record_per_line() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ledger.jsonl");
    seed_ledger(&path, 3);

    let contents = fs::read_to_string(&path).unwrap();
    assert!(contents.ends_with('\n'));
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 3);

    let record: Value = serde_json::from_str(lines[0]).unwrap();
    let mut keys: Vec<&str> = record.as_object().unwrap().keys().map(String::as_str).collect();
    keys.sort_unstable();
    assert_eq!(keys, ["hmac", "index", "payload", "prev_hmac", "timestamp"]);
}

#[test]
fn test_append_after_reopen_continues_chain() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ledger.jsonl");
    let last = seed_ledger(&path, 2).last_hmac().unwrap();

    let reopened = Ledger::open(SECRET, &path).unwrap();
    let record = reopened.append(&json!({"step": "export"})).unwrap();

    assert_eq!(record.index, 2);
    assert_eq!(record.prev_hmac, last);
    assert_eq!(Ledger::open(SECRET, &path).unwrap().len(), 3);
    assert!(!Ledger::open(SECRET, &path).unwrap().tamper_detected());
}

#[test]
fn test_missing_trailing_newline_is_repaired() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ledger.jsonl");
    seed_ledger(&path, 2);

    let contents = fs::read_to_string(&path).unwrap();
    fs::write(&path, contents.trim_end()).unwrap();

    Ledger::open(SECRET, &path)
        .unwrap()
        .append(&json!({"step": "after-truncation"}))
        .unwrap();

    let reopened = Ledger::open(SECRET, &path).unwrap();
    assert_eq!(reopened.len(), 3);
    assert!(reopened.verify_chain().is_ok());
}

#[test]
fn test_creates_parent_directories() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("audit").join("ledger.jsonl");

    seed_ledger(&path, 1);
    assert!(path.exists());
}

// ============================================================================
// Tamper Detection Tests
// ============================================================================

#[test]
fn test_modified_payload_detected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ledger.jsonl");
    seed_ledger(&path, 3);

    edit_line(&path, 1, |record| record["payload"]["params"]["scale"] = json!(99));

    let ledger = Ledger::open(SECRET, &path).unwrap();
    assert!(ledger.tamper_detected());
    assert!(matches!(
        ledger.verify_chain(),
        Err(ProvenanceError::IntegrityViolation { index: 1, .. })
    ));
}

#[test]
fn test_modified_fields_detected() {
    let edits: [(&str, fn(&mut Value)); 9] = [
        ("hmac", |r| r["hmac"] = json!("00".repeat(32))),
        ("hmac type", |r| r["hmac"] = json!(42)),
        ("prev_hmac", |r| r["prev_hmac"] = json!(GENESIS)),
        ("index", |r| r["index"] = json!(7)),
        ("negative index", |r| r["index"] = json!(-1)),
        ("fractional index", |r| r["index"] = json!(2.5)),
        ("timestamp", |r| r["timestamp"] = json!(0.5)),
        ("timestamp type", |r| r["timestamp"] = json!("yesterday")),
        ("payload removed", |r| {
            r.as_object_mut().unwrap().remove("payload");
        }),
    ];

    for (field, edit) in edits {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.jsonl");
        seed_ledger(&path, 3);

        edit_line(&path, 2, edit);
        let ledger = Ledger::open(SECRET, &path).unwrap();
        assert!(
            matches!(
                ledger.verify_chain(),
                Err(ProvenanceError::IntegrityViolation { index: 2, .. })
            ),
            "editing {} went unnoticed",
            field
        );
        assert!(ledger.tamper_detected());
    }
}

#[test]
fn test_deleted_record_detected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ledger.jsonl");
    seed_ledger(&path, 3);

    let contents = fs::read_to_string(&path).unwrap();
    let kept: Vec<&str> = contents.lines().enumerate().filter(|(i, _)| *i != 1).map(|(_, l)| l).collect();
    fs::write(&path, kept.join("\n") + "\n").unwrap();

    assert!(Ledger::open(SECRET, &path).unwrap().tamper_detected());
}

#[test]
fn test_wrong_secret_detected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ledger.jsonl");
    seed_ledger(&path, 2);

    let ledger = Ledger::open("another-secret", &path).unwrap();
    assert!(ledger.tamper_detected());
    assert!(matches!(
        ledger.verify_chain(),
        Err(ProvenanceError::IntegrityViolation { index: 0, .. })
    ));
}

#[test]
fn test_malformed_line_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ledger.jsonl");
    seed_ledger(&path, 1);

    let mut contents = fs::read_to_string(&path).unwrap();
    contents.push_str("{not a record}\n");
    fs::write(&path, contents).unwrap();

    assert!(matches!(
        Ledger::open(SECRET, &path),
        Err(ProvenanceError::SerializationError(_))
    ));
}

#[test]
fn test_unknown_field_detected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ledger.jsonl");
    seed_ledger(&path, 2);

    edit_line(&path, 0, |record| record["signer"] = json!("mallory"));

    let ledger = Ledger::open(SECRET, &path).unwrap();
    assert_eq!(ledger.len(), 2);
    assert!(ledger.get(0).is_none());
    assert!(matches!(
        ledger.verify_chain(),
        Err(ProvenanceError::IntegrityViolation { index: 0, .. })
    ));
}

#[test]
fn test_non_object_line_detected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ledger.jsonl");
    seed_ledger(&path, 1);

    let mut contents = fs::read_to_string(&path).unwrap();
    contents.push_str("[1, 2, 3]\n");
    fs::write(&path, contents).unwrap();

    let ledger = Ledger::open(SECRET, &path).unwrap();
    assert!(matches!(
        ledger.verify_chain(),
        Err(ProvenanceError::IntegrityViolation { index: 1, .. })
    ));
}

#[test]
fn test_empty_secret_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ledger.jsonl");

    assert!(matches!(
        Ledger::open("", &path),
        Err(ProvenanceError::MissingSecret)
    ));
    assert!(!path.exists());
}

// ============================================================================
// Concurrency Tests
// ============================================================================

#[test]
fn test_concurrent_appends_keep_chain_valid() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ledger.jsonl");
    let ledger = Arc::new(Ledger::open(SECRET, &path).unwrap());

    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let ledger = Arc::clone(&ledger);
            thread::spawn(move || {
                for i in 0..25 {
                    ledger.append(&json!({"worker": worker, "i": i})).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(ledger.len(), 100);
    assert!(ledger.verify_chain().is_ok());

    let reopened = Ledger::open(SECRET, &path).unwrap();
    assert_eq!(reopened.records(), ledger.records());
    for (position, record) in reopened.records().iter().enumerate() {
        assert_eq!(record.index, position as u64);
    }
}

use super::*;
use serde_json::json;
use std::fs;
use tempfile::tempdir;

// -------------------- Helpers --------------------

fn create_log(path: &Path, records: &[Value]) {
    let mut log = Journal::open(path, &[DB_MAGIC], OpenMode::CreateExcl, Locking::No).unwrap();
    for record in records {
        log.write(record).unwrap();
    }
    log.commit().unwrap();
}

fn read_all(path: &Path) -> Vec<Value> {
    let mut log = Journal::open(path, &[DB_MAGIC], OpenMode::ReadOnly, Locking::No).unwrap();
    let mut records = Vec::new();
    while let Some(json) = log.read().unwrap() {
        records.push(json);
    }
    records
}

// -------------------- Basic write & read --------------------

#[test]
fn write_and_read_roundtrip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db");

    let records = vec![json!({"a": 1}), json!([1, 2, 3]), json!("plain string")];
    create_log(&path, &records);

    assert_eq!(read_all(&path), records);
}

#[test]
fn empty_log_reads_no_records() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db");
    create_log(&path, &[]);

    assert_eq!(read_all(&path), Vec::<Value>::new());
}

#[test]
fn offset_advances_past_each_record() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db");
    create_log(&path, &[json!({"x": 1}), json!({"y": 2})]);

    let file_len = fs::metadata(&path).unwrap().len();
    let mut log = Journal::open(&path, &[DB_MAGIC], OpenMode::ReadOnly, Locking::No).unwrap();
    assert_eq!(log.offset(), 0);
    log.read().unwrap().unwrap();
    let after_first = log.offset();
    assert!(after_first > 0);
    log.read().unwrap().unwrap();
    assert_eq!(log.offset(), file_len);
    assert!(log.read().unwrap().is_none());
}

#[test]
fn header_carries_magic_length_and_digest() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db");
    create_log(&path, &[json!({"k": "v"})]);

    let contents = fs::read_to_string(&path).unwrap();
    let header = contents.lines().next().unwrap();
    assert!(header.starts_with(DB_MAGIC));
    let payload = contents.lines().nth(1).unwrap();
    assert!(header.contains(&payload.len().to_string()));
    // 40 hex chars of SHA-1 at the end
    let digest = header.rsplit(' ').next().unwrap();
    assert_eq!(digest.len(), 40);
    assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
}

// -------------------- Unread --------------------

#[test]
fn unread_rereads_the_same_record() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db");
    create_log(&path, &[json!(1), json!(2)]);

    let mut log = Journal::open(&path, &[DB_MAGIC], OpenMode::ReadOnly, Locking::No).unwrap();
    assert_eq!(log.read().unwrap(), Some(json!(1)));
    assert_eq!(log.read().unwrap(), Some(json!(2)));
    log.unread();
    assert_eq!(log.read().unwrap(), Some(json!(2)));
    assert!(log.read().unwrap().is_none());
}

#[test]
fn write_after_unread_discards_the_record() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db");
    create_log(&path, &[json!(1), json!(2)]);

    {
        let mut log =
            Journal::open(&path, &[DB_MAGIC], OpenMode::ReadWrite, Locking::No).unwrap();
        assert_eq!(log.read().unwrap(), Some(json!(1)));
        assert_eq!(log.read().unwrap(), Some(json!(2)));
        log.unread();
        log.write(&json!(3)).unwrap();
        log.commit().unwrap();
    }

    assert_eq!(read_all(&path), vec![json!(1), json!(3)]);
}

// -------------------- Corruption detection --------------------

#[test]
fn truncated_tail_stops_before_bad_record() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db");
    create_log(&path, &[json!({"good": true}), json!({"tail": true})]);

    // Chop one byte off the last record.
    let mut data = fs::read(&path).unwrap();
    data.truncate(data.len() - 1);
    fs::write(&path, &data).unwrap();

    let mut log = Journal::open(&path, &[DB_MAGIC], OpenMode::ReadOnly, Locking::No).unwrap();
    assert_eq!(log.read().unwrap(), Some(json!({"good": true})));
    let offset_before = log.offset();
    let err = log.read().unwrap_err();
    assert!(matches!(err, DbError::Io { .. }));
    assert!(err.to_string().contains(&offset_before.to_string()));
    // Position stays just before the bad record.
    assert_eq!(log.offset(), offset_before);
}

#[test]
fn checksum_mismatch_is_io_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db");
    create_log(&path, &[json!({"k": "value"})]);

    // Flip a byte inside the payload.
    let mut data = fs::read(&path).unwrap();
    let last = data.len() - 2;
    data[last] ^= 0xFF;
    fs::write(&path, &data).unwrap();

    let mut log = Journal::open(&path, &[DB_MAGIC], OpenMode::ReadOnly, Locking::No).unwrap();
    let err = log.read().unwrap_err();
    assert!(err.to_string().contains("checksum mismatch"));
}

#[test]
fn garbage_header_is_io_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db");
    create_log(&path, &[json!(1)]);

    let mut data = fs::read(&path).unwrap();
    data.extend_from_slice(b"not a record header at all");
    fs::write(&path, &data).unwrap();

    let mut log = Journal::open(&path, &[DB_MAGIC], OpenMode::ReadOnly, Locking::No).unwrap();
    assert_eq!(log.read().unwrap(), Some(json!(1)));
    assert!(log.read().is_err());
}

#[test]
fn bad_length_field_is_io_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db");
    fs::write(
        &path,
        format!("{DB_MAGIC} zzz 0000000000000000000000000000000000000000\n"),
    )
    .unwrap();

    let mut log = Journal::open(&path, &[DB_MAGIC], OpenMode::ReadOnly, Locking::No).unwrap();
    let err = log.read().unwrap_err();
    assert!(err.to_string().contains("bad record length"));
}

#[test]
fn wrong_magic_rejected_at_open() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db");
    fs::write(
        &path,
        "SOMETHING ELSE 2 0000000000000000000000000000000000000000\n{}\n",
    )
    .unwrap();

    let err = Journal::open(&path, &[DB_MAGIC], OpenMode::ReadOnly, Locking::No).unwrap_err();
    assert!(err.to_string().contains("unexpected file format"));
}

#[test]
fn magic_alternatives_detected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db");
    {
        let mut log =
            Journal::open(&path, &[CLUSTER_MAGIC], OpenMode::CreateExcl, Locking::No).unwrap();
        log.write(&json!({"term": 1})).unwrap();
        log.commit().unwrap();
    }

    let log = Journal::open(
        &path,
        &[DB_MAGIC, CLUSTER_MAGIC],
        OpenMode::ReadOnly,
        Locking::No,
    )
    .unwrap();
    assert_eq!(log.magic(), CLUSTER_MAGIC);
}

// -------------------- Open modes --------------------

#[test]
fn create_excl_fails_if_path_exists() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db");
    create_log(&path, &[]);

    let err = Journal::open(&path, &[DB_MAGIC], OpenMode::CreateExcl, Locking::No).unwrap_err();
    assert!(matches!(err, DbError::Io { .. }));
}

#[test]
fn read_only_refuses_writes() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db");
    create_log(&path, &[]);

    let mut log = Journal::open(&path, &[DB_MAGIC], OpenMode::ReadOnly, Locking::No).unwrap();
    assert!(log.write(&json!(1)).is_err());
}

#[test]
fn open_missing_file_read_write_fails() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nope");
    assert!(Journal::open(&path, &[DB_MAGIC], OpenMode::ReadWrite, Locking::No).is_err());
}

// -------------------- Locking --------------------

#[test]
fn second_locked_open_fails() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db");
    create_log(&path, &[]);

    let _held = Journal::open(&path, &[DB_MAGIC], OpenMode::ReadWrite, Locking::Yes).unwrap();
    let err = Journal::open(&path, &[DB_MAGIC], OpenMode::ReadWrite, Locking::Yes).unwrap_err();
    assert!(err.to_string().contains("locked"));
}

#[test]
fn lock_released_on_drop() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db");
    create_log(&path, &[]);

    {
        let _held =
            Journal::open(&path, &[DB_MAGIC], OpenMode::ReadWrite, Locking::Auto).unwrap();
    }
    // Auto locks read-write opens; the lock must be gone once dropped.
    let _reopened =
        Journal::open(&path, &[DB_MAGIC], OpenMode::ReadWrite, Locking::Auto).unwrap();
}

#[test]
fn auto_locking_skips_read_only() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db");
    create_log(&path, &[]);

    let _held = Journal::open(&path, &[DB_MAGIC], OpenMode::ReadWrite, Locking::Yes).unwrap();
    // Read-only with Auto takes no lock, so this succeeds even while the
    // writer holds one.
    let _reader = Journal::open(&path, &[DB_MAGIC], OpenMode::ReadOnly, Locking::Auto).unwrap();
}

// -------------------- Atomic replacement --------------------

#[test]
fn replace_commit_swaps_contents_atomically() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db");
    create_log(&path, &[json!(1), json!(2), json!(3)]);

    let mut log = Journal::open(&path, &[DB_MAGIC], OpenMode::ReadWrite, Locking::No).unwrap();
    while log.read().unwrap().is_some() {}

    let mut replacement = log.replace_start().unwrap();
    replacement.write(&json!("fresh")).unwrap();
    log.replace_commit(replacement).unwrap();

    // The journal observes the new file immediately...
    log.write(&json!("appended")).unwrap();
    log.commit().unwrap();
    drop(log);

    // ...and so does a fresh open.
    assert_eq!(read_all(&path), vec![json!("fresh"), json!("appended")]);
    assert!(!tmp_path(&path).exists());
}

#[test]
fn replace_abort_leaves_original_untouched() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db");
    create_log(&path, &[json!("original")]);

    let log = Journal::open(&path, &[DB_MAGIC], OpenMode::ReadWrite, Locking::No).unwrap();
    let mut replacement = log.replace_start().unwrap();
    replacement.write(&json!("unwanted")).unwrap();
    Journal::replace_abort(replacement);
    drop(log);

    assert_eq!(read_all(&path), vec![json!("original")]);
    assert!(!tmp_path(&path).exists());
}

#[test]
fn replace_start_discards_stale_temporary() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db");
    create_log(&path, &[json!(1)]);
    fs::write(tmp_path(&path), b"leftover from a crash").unwrap();

    let log = Journal::open(&path, &[DB_MAGIC], OpenMode::ReadWrite, Locking::No).unwrap();
    let replacement = log.replace_start().unwrap();
    Journal::replace_abort(replacement);
}

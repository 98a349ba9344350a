use std::collections::BTreeMap;
use std::path::Path;

use journal::{Journal, Locking, OpenMode, DB_MAGIC};
use model::{Database, Datum, Row, Schema, Transaction};
use serde_json::{json, Value};
use uuid::Uuid;

/// The S1 schema: one table `T` with a string column `k` and an integer
/// column `v`.
pub fn mini_schema() -> Schema {
    Schema::from_json(&json!({
        "name": "mini",
        "tables": {
            "T": {
                "columns": {
                    "k": {"type": "string"},
                    "v": {"type": "integer"},
                }
            }
        }
    }))
    .unwrap()
}

/// Creates a fresh database file holding only the schema record.
pub fn create_db(path: &Path, schema: &Schema) {
    let mut log = Journal::open(path, &[DB_MAGIC], OpenMode::CreateExcl, Locking::No).unwrap();
    log.write(&schema.to_json()).unwrap();
    log.commit().unwrap();
}

/// Reads every record in the log (ignoring integrity of the tail).
pub fn record_count(path: &Path) -> usize {
    let mut log = Journal::open(path, &[DB_MAGIC], OpenMode::ReadOnly, Locking::No).unwrap();
    let mut n = 0;
    while let Ok(Some(_)) = log.read() {
        n += 1;
    }
    n
}

/// Reads every record's JSON.
pub fn read_records(path: &Path) -> Vec<Value> {
    let mut log = Journal::open(path, &[DB_MAGIC], OpenMode::ReadOnly, Locking::No).unwrap();
    let mut records = Vec::new();
    while let Some(json) = log.read().unwrap() {
        records.push(json);
    }
    records
}

/// A transaction inserting one `T` row.
pub fn insert_txn(db: &Database, uuid: Uuid, k: &str, v: i64) -> Transaction {
    let mut row = Row::new(&db.table("T").unwrap().schema, uuid);
    row.fields.insert("k".into(), Datum::String(k.into()));
    row.fields.insert("v".into(), Datum::Integer(v));
    let mut txn = Transaction::new();
    txn.insert_row(db, "T", row).unwrap();
    txn
}

/// A transaction setting `T`'s row `uuid` column `v`.
pub fn set_v_txn(db: &Database, uuid: Uuid, v: i64) -> Transaction {
    let mut values = BTreeMap::new();
    values.insert("v".to_string(), Datum::Integer(v));
    let mut txn = Transaction::new();
    txn.modify_row(db, "T", uuid, values).unwrap();
    txn
}

/// A transaction deleting `T`'s row `uuid`.
pub fn delete_txn(db: &Database, uuid: Uuid) -> Transaction {
    let mut txn = Transaction::new();
    txn.delete_row(db, "T", uuid).unwrap();
    txn
}

//! Transaction delta codec.
//!
//! A delta record is a JSON object mapping table names to per-table change
//! objects, plus two reserved keys: `_date` (wall-clock milliseconds) and
//! `_comment` (optional). A per-table change maps row UUIDs to either
//! `null` (delete) or an object of column values (insert when the row is
//! new, modify otherwise).

use std::collections::BTreeMap;

use journal::Journal;
use model::{Change, Database, Datum, DbError, Result, Row, Schema, Transaction};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::now_msec;

pub(crate) const DATE_KEY: &str = "_date";
pub(crate) const COMMENT_KEY: &str = "_comment";

/// Encodes a stream of row changes into delta JSON.
///
/// Inserts carry every persistent column whose value differs from the
/// type's default; modifies carry only the columns recorded as changed; a
/// modify that touches nothing persistent is dropped. Returns `None` when no
/// table ends up with any row, in which case nothing should be written.
pub fn encode<'a>(
    schema: &Schema,
    changes: impl Iterator<Item = Change<'a>>,
) -> Option<Value> {
    let mut tables: Map<String, Value> = Map::new();

    for change in changes {
        let Some(table_schema) = schema.table(change.table) else {
            continue;
        };

        let (uuid, row_json) = match (change.old, change.new) {
            (Some(old), None) => (old.uuid, Value::Null),
            (old, Some(new)) => {
                let mut fields = Map::new();
                for column in table_schema.columns.values() {
                    if !column.persistent {
                        continue;
                    }
                    let Some(datum) = new.field(&column.name) else {
                        continue;
                    };
                    let wanted = match old {
                        // Modify: exactly the changed columns.
                        Some(_) => change.changed.contains(&column.name),
                        // Insert: everything that isn't the default.
                        None => !datum.is_default(column.ty),
                    };
                    if wanted {
                        fields.insert(column.name.clone(), datum.to_json());
                    }
                }
                if old.is_some() && fields.is_empty() {
                    // A modify with nothing persistent to record.
                    continue;
                }
                (new.uuid, Value::Object(fields))
            }
            (None, None) => continue,
        };

        let table_entry = tables
            .entry(change.table.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(rows) = table_entry {
            rows.insert(uuid.to_string(), row_json);
        }
    }

    if tables.is_empty() {
        None
    } else {
        Some(Value::Object(tables))
    }
}

/// Stamps `_date` (and `_comment`, if any) into a delta and appends it to
/// the journal; with `durable` the append is fsynced before returning.
pub(crate) fn append(
    journal: &mut Journal,
    delta: Option<Value>,
    comment: Option<&str>,
    durable: bool,
) -> Result<()> {
    let mut obj = match delta {
        Some(Value::Object(obj)) => obj,
        None => Map::new(),
        Some(_) => return Err(DbError::syntax("delta must be a JSON object")),
    };
    if let Some(comment) = comment {
        obj.insert(COMMENT_KEY.to_string(), Value::from(comment));
    }
    obj.insert(DATE_KEY.to_string(), Value::from(now_msec()));

    journal
        .write(&Value::Object(obj))
        .map_err(|e| e.wrap("writing transaction failed"))?;
    if durable {
        journal
            .commit()
            .map_err(|e| e.wrap("committing transaction failed"))?;
    }
    Ok(())
}

/// Decodes delta JSON into a transaction over `db`.
///
/// With `converting`, unknown tables and columns are silently skipped
/// instead of being errors. Any other failure aborts the whole transaction;
/// partial deltas never reach the database.
pub fn decode(db: &Database, json: &Value, converting: bool) -> Result<Transaction> {
    let obj = json
        .as_object()
        .ok_or_else(|| DbError::syntax("transaction record must be a JSON object"))?;

    let mut txn = Transaction::new();
    for (name, value) in obj {
        if db.table(name).is_none() {
            if name == DATE_KEY && value.as_i64().is_some() {
                continue;
            } else if name == COMMENT_KEY || converting {
                continue;
            }
            return Err(DbError::UnknownTable(name.clone()));
        }
        decode_table(db, &mut txn, name, value, converting)?;
    }
    Ok(txn)
}

fn decode_table(
    db: &Database,
    txn: &mut Transaction,
    table: &str,
    json: &Value,
    converting: bool,
) -> Result<()> {
    let rows = json.as_object().ok_or_else(|| {
        DbError::syntax(format!("changes to table {table} must be a JSON object"))
    })?;
    for (uuid_str, row_json) in rows {
        let uuid = Uuid::parse_str(uuid_str)
            .map_err(|_| DbError::syntax(format!("{uuid_str:?} is not a valid UUID")))?;
        decode_row(db, txn, table, uuid, row_json, converting)?;
    }
    Ok(())
}

fn decode_row(
    db: &Database,
    txn: &mut Transaction,
    table: &str,
    uuid: Uuid,
    json: &Value,
    converting: bool,
) -> Result<()> {
    match json {
        Value::Null => txn.delete_row(db, table, uuid),
        Value::Object(columns) => {
            let values = parse_columns(db, table, columns, converting)?;
            if txn.row_view(db, table, &uuid).is_some() {
                txn.modify_row(db, table, uuid, values)
            } else {
                let table_schema = &db.table(table).expect("table checked by caller").schema;
                let mut row = Row::new(table_schema, uuid);
                row.fields.extend(values);
                txn.insert_row(db, table, row)
            }
        }
        _ => Err(DbError::syntax(format!(
            "row {uuid} must be a JSON object or null"
        ))),
    }
}

fn parse_columns(
    db: &Database,
    table: &str,
    columns: &Map<String, Value>,
    converting: bool,
) -> Result<BTreeMap<String, Datum>> {
    let table_schema = &db.table(table).expect("table checked by caller").schema;
    let mut values = BTreeMap::new();
    for (name, value) in columns {
        let column = match table_schema.column(name) {
            Some(column) => column,
            None if converting => continue,
            None => {
                return Err(DbError::UnknownColumn {
                    table: table.to_string(),
                    column: name.clone(),
                })
            }
        };
        values.insert(name.clone(), Datum::from_json(column.ty, value)?);
    }
    Ok(values)
}

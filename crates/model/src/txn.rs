use std::collections::{BTreeMap, BTreeSet};

use uuid::Uuid;

use crate::db::{Database, Row};
use crate::error::{DbError, Result};
use crate::value::Datum;

/// One row's pending change inside a transaction.
#[derive(Debug, Clone)]
struct RowChange {
    /// The row as it was before the transaction; `None` for inserts.
    old: Option<Row>,
    /// The row as it will be after the transaction; `None` for deletes.
    new: Option<Row>,
    /// Names of the columns touched by modifies. Empty for inserts/deletes.
    changed: BTreeSet<String>,
}

/// A borrowed view of one change, yielded by [`Transaction::changes`].
///
/// The on-disk delta encoder consumes these: `new == None` is a delete,
/// `old == None` is an insert, otherwise a modify whose written columns are
/// restricted to `changed`.
#[derive(Debug, Clone, Copy)]
pub struct Change<'a> {
    pub table: &'a str,
    pub old: Option<&'a Row>,
    pub new: Option<&'a Row>,
    pub changed: &'a BTreeSet<String>,
}

/// A buffered set of row changes against a [`Database`].
///
/// Operations validate against the database plus the changes already
/// buffered, so a transaction sees its own effects: inserting a row and then
/// modifying it in the same transaction merges into a single insert.
/// Nothing touches the database until [`Transaction::commit`].
#[derive(Debug, Default)]
pub struct Transaction {
    changes: BTreeMap<String, BTreeMap<Uuid, RowChange>>,
    comment: Option<String>,
}

impl Transaction {
    pub fn new() -> Transaction {
        Transaction::default()
    }

    pub fn set_comment(&mut self, comment: impl Into<String>) {
        self.comment = Some(comment.into());
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    /// Whether the transaction buffers no row changes at all.
    pub fn is_empty(&self) -> bool {
        self.changes.values().all(|rows| rows.is_empty())
    }

    /// The row as this transaction currently sees it: the pending version if
    /// one is buffered, the database's version otherwise.
    pub fn row_view<'a>(
        &'a self,
        db: &'a Database,
        table: &str,
        uuid: &Uuid,
    ) -> Option<&'a Row> {
        if let Some(change) = self.changes.get(table).and_then(|rows| rows.get(uuid)) {
            return change.new.as_ref();
        }
        db.table(table).and_then(|t| t.row(uuid))
    }

    /// Buffers the insertion of a fresh row.
    pub fn insert_row(&mut self, db: &Database, table: &str, row: Row) -> Result<()> {
        self.check_table(db, table)?;
        if self.row_view(db, table, &row.uuid).is_some() {
            return Err(DbError::Constraint(format!(
                "transaction inserts row {} that already exists in table {table}",
                row.uuid
            )));
        }
        self.changes.entry(table.to_string()).or_default().insert(
            row.uuid,
            RowChange {
                old: None,
                new: Some(row),
                changed: BTreeSet::new(),
            },
        );
        Ok(())
    }

    /// Buffers column updates to an existing row (existing in the database
    /// or inserted earlier in this same transaction).
    pub fn modify_row(
        &mut self,
        db: &Database,
        table: &str,
        uuid: Uuid,
        values: BTreeMap<String, Datum>,
    ) -> Result<()> {
        self.check_table(db, table)?;
        for column in values.keys() {
            let known = db
                .table(table)
                .is_some_and(|t| t.schema.column(column).is_some());
            if !known {
                return Err(DbError::UnknownColumn {
                    table: table.to_string(),
                    column: column.clone(),
                });
            }
        }

        let current = self.row_view(db, table, &uuid).cloned().ok_or_else(|| {
            DbError::syntax(format!(
                "transaction modifies row {uuid} that does not exist in table {table}"
            ))
        })?;

        let rows = self.changes.entry(table.to_string()).or_default();
        let change = rows.entry(uuid).or_insert_with(|| RowChange {
            old: Some(current.clone()),
            new: Some(current.clone()),
            changed: BTreeSet::new(),
        });
        // Inserts stay inserts: changed columns are only recorded when the
        // row predates this transaction.
        if change.old.is_some() {
            change.changed.extend(values.keys().cloned());
        }
        let new = change
            .new
            .as_mut()
            .expect("modify target verified present above");
        new.fields.extend(values);
        Ok(())
    }

    /// Buffers the deletion of a row. Deleting a row that does not exist at
    /// this point is an error.
    pub fn delete_row(&mut self, db: &Database, table: &str, uuid: Uuid) -> Result<()> {
        self.check_table(db, table)?;
        if self.row_view(db, table, &uuid).is_none() {
            return Err(DbError::syntax(format!(
                "transaction deletes row {uuid} that does not exist in table {table}"
            )));
        }

        let rows = self.changes.entry(table.to_string()).or_default();
        match rows.remove(&uuid) {
            // Insert followed by delete cancels out entirely.
            Some(change) if change.old.is_none() => {}
            Some(change) => {
                rows.insert(
                    uuid,
                    RowChange {
                        old: change.old,
                        new: None,
                        changed: BTreeSet::new(),
                    },
                );
            }
            None => {
                let old = db
                    .table(table)
                    .and_then(|t| t.row(&uuid))
                    .cloned()
                    .expect("row_view verified presence");
                rows.insert(
                    uuid,
                    RowChange {
                        old: Some(old),
                        new: None,
                        changed: BTreeSet::new(),
                    },
                );
            }
        }
        Ok(())
    }

    /// Iterates over the buffered changes, table by table.
    pub fn changes(&self) -> impl Iterator<Item = Change<'_>> {
        self.changes.iter().flat_map(|(table, rows)| {
            rows.values().map(move |change| Change {
                table,
                old: change.old.as_ref(),
                new: change.new.as_ref(),
                changed: &change.changed,
            })
        })
    }

    /// Applies the buffered changes to the database, consuming the
    /// transaction.
    pub fn commit(self, db: &mut Database) -> Result<()> {
        for (table_name, rows) in self.changes {
            let table = db.table_mut(&table_name).ok_or_else(|| {
                DbError::UnknownTable(table_name.clone())
            })?;
            for (uuid, change) in rows {
                match change.new {
                    Some(row) => {
                        table.rows.insert(uuid, row);
                    }
                    None => {
                        table.rows.remove(&uuid);
                    }
                }
            }
        }
        Ok(())
    }

    fn check_table(&self, db: &Database, table: &str) -> Result<()> {
        if db.table(table).is_none() {
            return Err(DbError::UnknownTable(table.to_string()));
        }
        Ok(())
    }
}

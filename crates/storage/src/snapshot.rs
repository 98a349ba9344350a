//! Snapshot writer: serializes a whole database into a fresh log as
//! schema + one mega-transaction holding every live row.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use journal::{Journal, Locking, OpenMode, DB_MAGIC};
use model::{Change, Database, Result};

use crate::delta;

/// Writes `db` into `journal`, which is assumed fresh and empty: the schema
/// as record 0, then a single durable delta inserting every live row.
///
/// Returns the byte length of the snapshot record.
pub(crate) fn write_snapshot(
    journal: &mut Journal,
    comment: Option<&str>,
    db: &Database,
) -> Result<u64> {
    journal.write(&db.schema.to_json())?;
    let base = journal.offset();

    let no_changes = BTreeSet::new();
    let everything = db.tables.values().flat_map(|table| {
        table.rows.values().map(|row| Change {
            table: &table.schema.name,
            old: None,
            new: Some(row),
            changed: &no_changes,
        })
    });
    // An empty database still gets its (empty) snapshot record, so a
    // compacted log always holds exactly two records.
    let encoded = delta::encode(&db.schema, everything);
    delta::append(journal, encoded, comment, true)?;

    Ok(journal.offset() - base)
}

/// Saves a snapshot copy of `db` as a new database file at `path`.
///
/// The file is created exclusively; a half-written copy is unlinked on
/// failure.
pub fn save_copy<P: AsRef<Path>>(path: P, comment: Option<&str>, db: &Database) -> Result<()> {
    let path = path.as_ref();
    let mut journal = Journal::open(path, &[DB_MAGIC], OpenMode::CreateExcl, Locking::Yes)?;
    let result = write_snapshot(&mut journal, comment, db);
    if result.is_err() {
        drop(journal);
        let _ = fs::remove_file(path);
    }
    result.map(|_| ())
}

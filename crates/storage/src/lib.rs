//! # Storage - HarborDB database file layer
//!
//! Binds an append-only [`journal::Journal`] to an in-memory
//! [`model::Database`]:
//!
//! - **Open**: read record 0 as the schema, replay every following record as
//!   a transaction delta, tolerate a corrupt or truncated tail.
//! - **Commit**: encode a live transaction into a delta record, append it,
//!   and apply it to the database.
//! - **Compact**: periodically rewrite the log as schema + one snapshot
//!   transaction, swapped in atomically.
//!
//! ## Module Responsibilities
//!
//! | Module         | Purpose                                             |
//! |----------------|-----------------------------------------------------|
//! | `lib.rs`       | `DbFile` struct, open/replay, `read_schema`         |
//! | [`delta`]      | transaction delta JSON encode/decode                |
//! | `commit`       | live commit path and the compaction gate            |
//! | `snapshot`     | whole-database snapshot writer, `save_copy`         |
//! | `compaction`   | gate predicate and atomic in-place compaction       |
//!
//! ## Crash Safety
//!
//! A record is durable once `commit(.., durable: true)` returns. A partial
//! record left by a crash is detected by the journal's integrity checks on
//! the next open; replay stops in front of it and the first subsequent
//! append truncates it away. Compaction never touches the original log until
//! the replacement is complete and fsynced.

mod commit;
mod compaction;
pub mod delta;
mod snapshot;

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use journal::{Journal, Locking, OpenMode, DB_MAGIC};
use model::{Database, DbError, Result, Schema};
use tracing::warn;

pub use compaction::should_compact;
pub use snapshot::save_copy;

/// Minimum number of milliseconds between database compactions.
pub const COMPACT_MIN_MSEC: i64 = 10 * 60 * 1000;

/// Minimum number of milliseconds between compaction attempts after a
/// failure.
pub const COMPACT_RETRY_MSEC: i64 = 60 * 1000;

/// An open database file: the journal plus the bookkeeping that drives
/// compaction.
///
/// The `DbFile` owns the journal exclusively. The [`Database`] it was opened
/// with stays with the caller; commits and compactions borrow it.
pub struct DbFile {
    journal: Journal,
    /// Wall-clock ms of the last successful compaction (or of open).
    last_compact: i64,
    /// Earliest wall-clock ms at which the next compaction may run.
    next_compact: i64,
    /// Transaction records appended since the last snapshot.
    n_transactions: u64,
    /// Byte length of the snapshot record (record index 1), the compaction
    /// size threshold.
    snapshot_size: u64,
}

impl std::fmt::Debug for DbFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbFile")
            .field("path", &self.journal.path())
            .field("offset", &self.journal.offset())
            .field("n_transactions", &self.n_transactions)
            .field("snapshot_size", &self.snapshot_size)
            .field("next_compact", &self.next_compact)
            .finish()
    }
}

impl DbFile {
    /// Opens the database file at `path` and replays it into a live
    /// database.
    ///
    /// With `alt_schema` the on-disk schema record is read but discarded,
    /// the given schema is used instead, and replay runs in *converting*
    /// mode: deltas naming unknown tables or columns have those parts
    /// silently skipped. This is the upgrade/downgrade path.
    ///
    /// Replay errors after record 0 are logged and swallowed: a truncated
    /// or corrupt tail is treated as not there, and the offending records
    /// are discarded by the next append.
    pub fn open<P: AsRef<Path>>(
        path: P,
        alt_schema: Option<&Schema>,
        read_only: bool,
        locking: Locking,
    ) -> Result<(Database, DbFile)> {
        let path = path.as_ref();
        let mode = if read_only {
            OpenMode::ReadOnly
        } else {
            OpenMode::ReadWrite
        };
        let mut journal = Journal::open(path, &[DB_MAGIC], mode, locking)?;

        let schema_json = journal.read()?.ok_or_else(|| {
            DbError::io(format!(
                "{}: database file contains no schema",
                path.display()
            ))
        })?;
        let schema = match alt_schema {
            Some(schema) => schema.clone(),
            None => Schema::from_json(&schema_json).map_err(|e| {
                e.wrap(format!(
                    "failed to parse {:?} as a database schema",
                    path.display()
                ))
            })?,
        };
        let converting = alt_schema.is_some();
        let mut db = Database::new(schema);

        // The first record after the schema is the snapshot a compaction
        // left behind; its size throttles the next compaction.
        let base_offset = journal.offset();
        let mut snapshot_size = 0;
        let mut n_transactions = 0u64;
        loop {
            let json = match journal.read() {
                Ok(Some(json)) => json,
                Ok(None) => break,
                Err(err) => {
                    // Probably a tail truncated by a crash; use what we have.
                    warn!("{}", err.display_chain());
                    break;
                }
            };

            let applied = delta::decode(&db, &json, converting)
                .and_then(|txn| txn.commit(&mut db));
            if let Err(err) = applied {
                journal.unread();
                warn!("{}", err.display_chain());
                break;
            }

            n_transactions += 1;
            if n_transactions == 1 {
                snapshot_size = journal.offset() - base_offset;
            }
        }

        let now = now_msec();
        let file = DbFile {
            journal,
            last_compact: now,
            next_compact: now + COMPACT_MIN_MSEC,
            n_transactions,
            snapshot_size,
        };
        Ok((db, file))
    }

    /// Number of transaction records appended since the last snapshot.
    pub fn n_transactions(&self) -> u64 {
        self.n_transactions
    }

    /// Byte length of the current snapshot record.
    pub fn snapshot_size(&self) -> u64 {
        self.snapshot_size
    }

    /// Byte size of the backing log.
    pub fn log_size(&self) -> u64 {
        self.journal.offset()
    }
}

/// Opens `path` read-only, returns record 0's schema, and closes it again.
pub fn read_schema<P: AsRef<Path>>(path: P) -> Result<Schema> {
    let path = path.as_ref();
    let mut journal = Journal::open(path, &[DB_MAGIC], OpenMode::ReadOnly, Locking::No)?;
    let json = journal.read()?.ok_or_else(|| {
        DbError::io(format!(
            "{}: database file contains no schema",
            path.display()
        ))
    })?;
    Schema::from_json(&json).map_err(|e| {
        e.wrap(format!(
            "failed to parse {:?} as a database schema",
            path.display()
        ))
    })
}

/// Current wall-clock time in milliseconds.
pub(crate) fn now_msec() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests;

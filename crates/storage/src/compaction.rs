//! Compaction: rewrite the log as schema + one snapshot record, swapped in
//! atomically via the journal's replace protocol.

use journal::Journal;
use model::{Database, Result};

use crate::{now_msec, snapshot, DbFile, COMPACT_MIN_MSEC, COMPACT_RETRY_MSEC};

/// The compaction gate. All four conditions must hold: enough wall-clock
/// time since the last attempt, at least 100 transactions since the last
/// snapshot, a log of at least 10 MiB, and a log at least four times the
/// size of the previous snapshot.
pub fn should_compact(
    now: i64,
    next_compact: i64,
    n_transactions: u64,
    log_size: u64,
    snapshot_size: u64,
) -> bool {
    now >= next_compact
        && n_transactions >= 100
        && log_size >= 10 * 1024 * 1024
        && log_size >= 4 * snapshot_size
}

impl DbFile {
    /// Compacts the log in place: writes `db` into a replacement log and
    /// atomically swaps it in. On failure the original log is untouched and
    /// the next attempt is pushed back by [`COMPACT_RETRY_MSEC`].
    pub fn compact(&mut self, db: &Database) -> Result<()> {
        match self.try_compact(db) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.next_compact = now_msec() + COMPACT_RETRY_MSEC;
                Err(err)
            }
        }
    }

    fn try_compact(&mut self, db: &Database) -> Result<()> {
        let comment = format!(
            "compacting database online ({:.3} seconds old, {} transactions, {} bytes)",
            (now_msec() - self.last_compact) as f64 / 1000.0,
            self.n_transactions,
            self.journal.offset()
        );

        let mut new_log = self.journal.replace_start()?;
        let snapshot_size = match snapshot::write_snapshot(&mut new_log, Some(&comment), db) {
            Ok(size) => size,
            Err(err) => {
                Journal::replace_abort(new_log);
                return Err(err);
            }
        };
        self.journal.replace_commit(new_log)?;

        self.last_compact = now_msec();
        self.next_compact = self.last_compact + COMPACT_MIN_MSEC;
        self.n_transactions = 1;
        self.snapshot_size = snapshot_size;
        Ok(())
    }
}

//! Live commit path: encode a transaction, append it, apply it, and maybe
//! trigger compaction.

use model::{Database, Result, Transaction};
use tracing::warn;

use crate::compaction::should_compact;
use crate::{delta, now_msec, DbFile, COMPACT_RETRY_MSEC};

impl DbFile {
    /// Commits `txn`: appends its delta record to the log (fsyncing when
    /// `durable`), applies it to `db`, and runs compaction if the gate
    /// fires.
    ///
    /// A transaction whose delta touches no table writes nothing. A
    /// compaction failure is logged and rescheduled but does not fail the
    /// commit itself.
    pub fn commit(&mut self, db: &mut Database, txn: Transaction, durable: bool) -> Result<()> {
        let encoded = delta::encode(&db.schema, txn.changes());
        if encoded.is_none() {
            // Nothing to persist; still apply in-memory effects.
            txn.commit(db)?;
            return Ok(());
        }

        delta::append(&mut self.journal, encoded, txn.comment(), durable)?;
        self.n_transactions += 1;
        txn.commit(db)?;

        if should_compact(
            now_msec(),
            self.next_compact,
            self.n_transactions,
            self.journal.offset(),
            self.snapshot_size,
        ) {
            if let Err(err) = self.compact(db) {
                warn!(
                    "{}: compacting database failed ({}), retrying in {} seconds",
                    self.journal.path().display(),
                    err.display_chain(),
                    COMPACT_RETRY_MSEC / 1000
                );
            }
        }

        Ok(())
    }
}

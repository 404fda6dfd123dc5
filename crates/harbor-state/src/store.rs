//! StateStore: the handle every caller goes through.
//!
//! The store bundles the in-memory database, the watch registry, the
//! graveyard and the lock-delay table. Table-specific operations live in
//! their own modules (`catalog`, `kvs`, `session`, ...) as further `impl`
//! blocks on [`StateStore`].
//!
//! Every mutating method follows the same shape: open one write transaction
//! and a [`WatchManager`], run the `*_txn` helpers, and hand both to
//! [`StateStore::commit`] only if everything succeeded. Returning early with
//! `?` drops the transaction, which aborts it and discards the armed watches.

use std::sync::Arc;

use tracing::debug;

use crate::db::{MemDb, ReadTxn, WriteTxn};
use crate::delay::LockDelay;
use crate::graveyard::Graveyard;
use crate::schema::Table;
use crate::tombstone_gc::TombstoneGc;
use crate::watch::{FullTableWatch, KvsWatch, MultiWatch, QueryMethod, StoreWatches, WatchManager};

/// Thread-safe, cheaply cloneable handle to the state store.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<MemDb>,
    watches: Arc<StoreWatches>,
    pub(crate) graveyard: Graveyard,
    pub(crate) lock_delay: Arc<LockDelay>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    /// Create an empty store without tombstone expiry.
    pub fn new() -> Self {
        Self {
            db: Arc::new(MemDb::new()),
            watches: Arc::new(StoreWatches::new()),
            graveyard: Graveyard::default(),
            lock_delay: Arc::new(LockDelay::new()),
        }
    }

    /// Create an empty store whose deletes feed `gc`.
    pub fn with_tombstone_gc(gc: Arc<TombstoneGc>) -> Self {
        Self {
            graveyard: Graveyard::new(Some(gc)),
            ..Self::new()
        }
    }

    pub(crate) fn read(&self) -> ReadTxn {
        self.db.read()
    }

    pub(crate) fn write(&self) -> WriteTxn<'_> {
        self.db.write()
    }

    pub(crate) fn watch_manager(&self) -> WatchManager {
        WatchManager::new(self.watches.clone())
    }

    pub(crate) fn watches_handle(&self) -> Arc<StoreWatches> {
        self.watches.clone()
    }

    /// Commit `tx` and fire the armed watches once it is visible.
    pub(crate) fn commit(&self, mut tx: WriteTxn<'_>, watches: WatchManager) {
        tx.defer(move || watches.notify());
        tx.commit();
    }

    /// Highest index recorded for any of `tables`.
    pub fn max_index(&self, tables: &[Table]) -> u64 {
        self.read().max_index(tables)
    }

    // ── Watches ────────────────────────────────────────────────────

    /// Watch over the tables backing `method`.
    pub fn get_query_watch(&self, method: QueryMethod) -> MultiWatch {
        self.watches.query(method)
    }

    pub fn get_table_watch(&self, table: Table) -> Arc<FullTableWatch> {
        self.watches.table(table).clone()
    }

    /// Watch over every KV key under `prefix`.
    pub fn get_kvs_watch(&self, prefix: &str) -> KvsWatch {
        self.watches.kvs(prefix)
    }

    // ── Tombstones ─────────────────────────────────────────────────

    /// Remove every tombstone whose index is at or below `index`.
    /// Returns how many were removed.
    pub fn reap_tombstones(&self, index: u64) -> usize {
        let mut tx = self.write();
        let reaped = Graveyard::reap_txn(&mut tx, index);
        tx.commit();
        debug!(index, reaped, "tombstones reaped");
        reaped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DirEntry;
    use crate::watch::{Watch, watch_channel};

    #[test]
    fn clones_share_state() {
        let store = StateStore::new();
        let other = store.clone();
        store.kvs_set(4, DirEntry::new("foo", "bar"));
        assert_eq!(other.max_index(&[Table::Kvs]), 4);
    }

    #[test]
    fn aborted_write_fires_nothing() {
        let store = StateStore::new();
        let (tx, mut rx) = watch_channel();
        store.get_table_watch(Table::Nodes).wait(tx);

        let write = store.write();
        let mut watches = store.watch_manager();
        watches.arm(Table::Nodes);
        drop(write);
        drop(watches);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn reap_keeps_newer_tombstones() {
        let store = StateStore::new();
        store.kvs_set(1, DirEntry::new("a", "1"));
        store.kvs_set(2, DirEntry::new("b", "2"));
        store.kvs_delete(3, "a");
        store.kvs_delete(4, "b");

        assert_eq!(store.reap_tombstones(3), 1);
        let stones = Graveyard::dump(&store.read());
        assert_eq!(stones.len(), 1);
        assert_eq!(stones[0].key, "b");
    }
}

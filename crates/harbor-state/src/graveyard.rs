//! Tombstones for deleted KV keys.
//!
//! A delete leaves a tombstone stamped with the delete's index, so a list
//! over a prefix whose keys are all gone still reports an index at least
//! as high as the delete. Tombstones are reaped once the GC says they are
//! old enough.

use std::sync::Arc;

use crate::db::{Tables, WriteTxn};
use crate::schema::Table;
use crate::tombstone_gc::TombstoneGc;
use crate::types::Tombstone;

#[derive(Clone, Default)]
pub(crate) struct Graveyard {
    gc: Option<Arc<TombstoneGc>>,
}

impl Graveyard {
    pub fn new(gc: Option<Arc<TombstoneGc>>) -> Self {
        Self { gc }
    }

    /// Record the deletion of `key` at `idx`. The GC hint runs after commit.
    pub fn insert_txn(&self, tx: &mut WriteTxn<'_>, key: &str, idx: u64) {
        tx.tombstones.insert(Tombstone {
            key: key.to_string(),
            index: idx,
        });
        tx.set_index(Table::Tombstones, idx);
        if let Some(gc) = &self.gc {
            let gc = gc.clone();
            tx.defer(move || gc.hint(idx));
        }
    }

    /// Highest tombstone index under `prefix`, or 0.
    pub fn max_index_txn(tables: &Tables, prefix: &str) -> u64 {
        tables
            .tombstones
            .range(prefix.to_string()..)
            .take_while(|t| t.key.starts_with(prefix))
            .map(|t| t.index)
            .max()
            .unwrap_or(0)
    }

    pub fn dump(tables: &Tables) -> Vec<Tombstone> {
        tables.tombstones.iter().cloned().collect()
    }

    /// Drop every tombstone at or below `index`. Returns how many went.
    pub fn reap_txn(tx: &mut WriteTxn<'_>, index: u64) -> usize {
        let expired: Vec<String> = tx
            .tombstones
            .iter()
            .filter(|t| t.index <= index)
            .map(|t| t.key.clone())
            .collect();
        for key in &expired {
            tx.tombstones.remove(key);
        }
        expired.len()
    }

    pub fn restore(tables: &mut Tables, stone: Tombstone) {
        tables.bump_index(Table::Tombstones, stone.index);
        tables.tombstones.insert(stone);
    }
}

//! Durable snapshots on redb.
//!
//! A snapshot file is a redb database with one table per entity (see
//! [`crate::tables`]). Saving rewrites every table inside one write
//! transaction, so a crash mid-save leaves the previous snapshot intact.

use std::collections::BTreeMap;
use std::path::Path;

use redb::{
    Database, ReadTransaction, ReadableDatabase, ReadableTable, TableDefinition, TableError,
    WriteTransaction,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::error::{StateError, StateResult};
use crate::schema::Table;
use crate::snapshot::{SnapshotData, StateSnapshot};
use crate::store::StateStore;
use crate::tables::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Write `snapshot` to the redb file at `path`, replacing its contents.
pub fn save_snapshot(path: &Path, snapshot: &StateSnapshot) -> StateResult<()> {
    let db = Database::create(path).map_err(map_err!(Open))?;
    let txn = db.begin_write().map_err(map_err!(Transaction))?;

    write_rows(&txn, NODES, snapshot.nodes())?;
    write_rows(&txn, SERVICES, snapshot.services())?;
    write_rows(&txn, CHECKS, snapshot.checks())?;
    write_rows(&txn, KVS, snapshot.kvs())?;
    write_rows(&txn, TOMBSTONES, snapshot.tombstones().iter())?;
    write_rows(&txn, SESSIONS, snapshot.sessions())?;
    write_rows(&txn, ACLS, snapshot.acls())?;
    write_rows(&txn, PREPARED_QUERIES, snapshot.prepared_queries())?;
    write_rows(&txn, COORDINATES, snapshot.coordinates())?;
    write_rows(&txn, AUTOPILOT, snapshot.autopilot())?;
    {
        let mut meta = txn.open_table(META).map_err(map_err!(Table))?;
        meta.insert(LAST_INDEX, snapshot.last_index())
            .map_err(map_err!(Write))?;
    }
    write_indexes(&txn, &snapshot.indexes())?;

    txn.commit().map_err(map_err!(Transaction))?;
    info!(?path, last_index = snapshot.last_index(), "snapshot saved");
    Ok(())
}

/// Read the redb snapshot at `path` without touching any store.
pub fn read_snapshot(path: &Path) -> StateResult<SnapshotData> {
    let db = Database::open(path).map_err(map_err!(Open))?;
    let txn = db.begin_read().map_err(map_err!(Transaction))?;

    let last_index = match txn.open_table(META) {
        Ok(meta) => meta
            .get(LAST_INDEX)
            .map_err(map_err!(Read))?
            .map(|v| v.value())
            .unwrap_or(0),
        Err(TableError::TableDoesNotExist(_)) => 0,
        Err(e) => return Err(StateError::Table(e.to_string())),
    };

    Ok(SnapshotData {
        last_index,
        indexes: read_indexes(&txn)?,
        nodes: read_rows(&txn, NODES)?,
        services: read_rows(&txn, SERVICES)?,
        checks: read_rows(&txn, CHECKS)?,
        kvs: read_rows(&txn, KVS)?,
        tombstones: read_rows(&txn, TOMBSTONES)?,
        sessions: read_rows(&txn, SESSIONS)?,
        acls: read_rows(&txn, ACLS)?,
        prepared_queries: read_rows(&txn, PREPARED_QUERIES)?,
        coordinates: read_rows(&txn, COORDINATES)?,
        autopilot: read_rows(&txn, AUTOPILOT)?.into_iter().next(),
    })
}

/// Restore the snapshot at `path` into `store`. Returns its last index.
pub fn load_snapshot(path: &Path, store: &StateStore) -> StateResult<u64> {
    let data = read_snapshot(path)?;
    let last_index = data.last_index;
    let mut restore = store.restore();
    restore.data(data);
    restore.commit();
    Ok(last_index)
}

fn write_indexes(txn: &WriteTransaction, indexes: &BTreeMap<Table, u64>) -> StateResult<()> {
    txn.delete_table(INDEXES).map_err(map_err!(Table))?;
    let mut table = txn.open_table(INDEXES).map_err(map_err!(Table))?;
    for (t, idx) in indexes {
        table.insert(t.name(), *idx).map_err(map_err!(Write))?;
    }
    Ok(())
}

/// Files written before per-table indexes were saved have no `INDEXES`
/// table; restore then falls back to the row indexes.
fn read_indexes(txn: &ReadTransaction) -> StateResult<BTreeMap<Table, u64>> {
    let table = match txn.open_table(INDEXES) {
        Ok(table) => table,
        Err(TableError::TableDoesNotExist(_)) => return Ok(BTreeMap::new()),
        Err(e) => return Err(StateError::Table(e.to_string())),
    };
    let mut indexes = BTreeMap::new();
    for t in Table::ALL {
        if let Some(idx) = table.get(t.name()).map_err(map_err!(Read))? {
            indexes.insert(t, idx.value());
        }
    }
    Ok(indexes)
}

fn write_rows<'a, T: Serialize + 'a>(
    txn: &WriteTransaction,
    def: TableDefinition<u64, &[u8]>,
    rows: impl IntoIterator<Item = &'a T>,
) -> StateResult<()> {
    txn.delete_table(def).map_err(map_err!(Table))?;
    let mut table = txn.open_table(def).map_err(map_err!(Table))?;
    let mut count = 0u64;
    for row in rows {
        let value = serde_json::to_vec(row).map_err(map_err!(Serialize))?;
        table
            .insert(count, value.as_slice())
            .map_err(map_err!(Write))?;
        count += 1;
    }
    debug!(table = %def, count, "snapshot table written");
    Ok(())
}

fn read_rows<T: DeserializeOwned>(
    txn: &ReadTransaction,
    def: TableDefinition<u64, &[u8]>,
) -> StateResult<Vec<T>> {
    let table = match txn.open_table(def) {
        Ok(table) => table,
        Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
        Err(e) => return Err(StateError::Table(e.to_string())),
    };
    let mut rows = Vec::new();
    for entry in table.iter().map_err(map_err!(Read))? {
        let (_, value) = entry.map_err(map_err!(Read))?;
        rows.push(serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Table;
    use crate::types::*;

    fn populated() -> StateStore {
        let store = StateStore::new();
        store
            .ensure_node(
                1,
                Node {
                    node: "foo".into(),
                    address: "10.1.1.1".into(),
                    ..Default::default()
                },
            )
            .unwrap();
        store.kvs_set(2, DirEntry::new("a", "1"));
        store.kvs_set(3, DirEntry::new("b", "2"));
        store.kvs_delete(4, "b");
        store.update_autopilot_config(5, AutopilotConfig::default());
        store
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.redb");
        let source = populated();
        save_snapshot(&path, &source.snapshot()).unwrap();

        let target = StateStore::new();
        let last = load_snapshot(&path, &target).unwrap();
        assert_eq!(last, 5);
        assert_eq!(target.snapshot().to_data(), source.snapshot().to_data());
        assert_eq!(target.max_index(&[Table::Tombstones]), 4);
    }

    #[test]
    fn save_replaces_previous_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.redb");
        let store = populated();
        save_snapshot(&path, &store.snapshot()).unwrap();

        store.kvs_delete(6, "a");
        save_snapshot(&path, &store.snapshot()).unwrap();

        let data = read_snapshot(&path).unwrap();
        assert!(data.kvs.is_empty());
        assert_eq!(data.tombstones.len(), 2);
        assert_eq!(data.last_index, 6);
    }

    #[test]
    fn table_index_survives_deleting_newest_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.redb");
        let source = populated();
        source
            .ensure_node(
                6,
                Node {
                    node: "bar".into(),
                    address: "10.1.1.2".into(),
                    ..Default::default()
                },
            )
            .unwrap();
        source.delete_node(7, "bar").unwrap();
        save_snapshot(&path, &source.snapshot()).unwrap();

        let data = read_snapshot(&path).unwrap();
        assert_eq!(data.indexes[&Table::Nodes], 7);

        let target = StateStore::new();
        assert_eq!(load_snapshot(&path, &target).unwrap(), 7);
        assert_eq!(target.max_index(&[Table::Nodes]), 7);
        assert_eq!(target.nodes().1.len(), 1);
        assert_eq!(target.snapshot().to_data(), source.snapshot().to_data());
    }

    #[test]
    fn missing_file_is_an_open_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_snapshot(&dir.path().join("nope.redb")).unwrap_err();
        assert!(matches!(err, StateError::Open(_)));
    }
}

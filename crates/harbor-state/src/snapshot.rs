//! Point-in-time snapshots and bulk restore.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::db::{ReadTxn, WriteTxn};
use crate::graveyard::Graveyard;
use crate::schema::Table;
use crate::store::StateStore;
use crate::types::*;

/// A consistent, immutable view of the whole store.
pub struct StateSnapshot {
    tables: ReadTxn,
    last_index: u64,
}

impl StateSnapshot {
    /// Highest index of any table at the time of the snapshot.
    pub fn last_index(&self) -> u64 {
        self.last_index
    }

    /// Table indexes as of the snapshot. Tables never written are omitted.
    pub fn indexes(&self) -> BTreeMap<Table, u64> {
        Table::ALL
            .iter()
            .map(|&table| (table, self.tables.index(table)))
            .filter(|&(_, idx)| idx > 0)
            .collect()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.tables.nodes.iter()
    }

    /// Service rows, without the joined node columns.
    pub fn services(&self) -> impl Iterator<Item = &ServiceNode> {
        self.tables.services.iter()
    }

    pub fn checks(&self) -> impl Iterator<Item = &HealthCheck> {
        self.tables.checks.iter()
    }

    pub fn kvs(&self) -> impl Iterator<Item = &DirEntry> {
        self.tables.kvs.iter()
    }

    pub fn tombstones(&self) -> Vec<Tombstone> {
        Graveyard::dump(&self.tables)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.tables.sessions.iter()
    }

    pub fn acls(&self) -> impl Iterator<Item = &Acl> {
        self.tables.acls.iter()
    }

    pub fn prepared_queries(&self) -> impl Iterator<Item = &PreparedQuery> {
        self.tables.prepared_queries.iter()
    }

    pub fn coordinates(&self) -> impl Iterator<Item = &Coordinate> {
        self.tables.coordinates.iter()
    }

    pub fn autopilot(&self) -> Option<&AutopilotConfig> {
        self.tables.autopilot.as_ref()
    }

    /// Owned copy of every row, for serialization.
    pub fn to_data(&self) -> SnapshotData {
        SnapshotData {
            last_index: self.last_index,
            indexes: self.indexes(),
            nodes: self.nodes().cloned().collect(),
            services: self.services().cloned().collect(),
            checks: self.checks().cloned().collect(),
            kvs: self.kvs().cloned().collect(),
            tombstones: self.tombstones(),
            sessions: self.sessions().cloned().collect(),
            acls: self.acls().cloned().collect(),
            prepared_queries: self.prepared_queries().cloned().collect(),
            coordinates: self.coordinates().cloned().collect(),
            autopilot: self.autopilot().cloned(),
        }
    }
}

/// Every row of a snapshot in owned form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotData {
    pub last_index: u64,
    /// Per-table indexes. A table whose newest write was a delete has an
    /// index above any of its surviving rows.
    #[serde(default)]
    pub indexes: BTreeMap<Table, u64>,
    pub nodes: Vec<Node>,
    pub services: Vec<ServiceNode>,
    pub checks: Vec<HealthCheck>,
    pub kvs: Vec<DirEntry>,
    pub tombstones: Vec<Tombstone>,
    pub sessions: Vec<Session>,
    pub acls: Vec<Acl>,
    pub prepared_queries: Vec<PreparedQuery>,
    pub coordinates: Vec<Coordinate>,
    pub autopilot: Option<AutopilotConfig>,
}

/// Bulk loader. Rows keep their stored indexes; each table index is raised
/// to the highest modify index restored into it, or to the index recorded
/// by [`StateRestore::index`] if that is higher. Nothing is visible until
/// [`StateRestore::commit`].
pub struct StateRestore<'a> {
    store: &'a StateStore,
    tx: WriteTxn<'a>,
}

impl StateRestore<'_> {
    /// Raise `table`'s index to `idx`.
    pub fn index(&mut self, table: Table, idx: u64) {
        self.tx.bump_index(table, idx);
    }

    pub fn node(&mut self, node: Node) {
        self.tx.bump_index(Table::Nodes, node.modify_index);
        self.tx.nodes.insert(node);
    }

    pub fn service(&mut self, service: ServiceNode) {
        self.tx.bump_index(Table::Services, service.modify_index);
        self.tx.services.insert(service.stored());
    }

    pub fn check(&mut self, check: HealthCheck) {
        self.tx.bump_index(Table::Checks, check.modify_index);
        self.tx.checks.insert(check);
    }

    pub fn kvs(&mut self, entry: DirEntry) {
        self.tx.bump_index(Table::Kvs, entry.modify_index);
        self.tx.kvs.insert(entry);
    }

    pub fn tombstone(&mut self, stone: Tombstone) {
        Graveyard::restore(&mut self.tx, stone);
    }

    /// Restores the session and its check mappings.
    pub fn session(&mut self, session: Session) {
        self.tx.bump_index(Table::Sessions, session.modify_index);
        for check_id in &session.checks {
            self.tx.session_checks.insert(SessionCheck {
                node: session.node.clone(),
                check_id: check_id.clone(),
                session: session.id.clone(),
            });
        }
        self.tx.bump_index(Table::SessionChecks, session.modify_index);
        self.tx.sessions.insert(session);
    }

    pub fn acl(&mut self, acl: Acl) {
        self.tx.bump_index(Table::Acls, acl.modify_index);
        self.tx.acls.insert(acl);
    }

    pub fn prepared_query(&mut self, query: PreparedQuery) {
        self.tx.bump_index(Table::PreparedQueries, query.modify_index);
        self.tx.prepared_queries.insert(query);
    }

    /// Coordinates carry no index; they are stamped with `idx`.
    pub fn coordinate(&mut self, coordinate: Coordinate, idx: u64) {
        self.tx.bump_index(Table::Coordinates, idx);
        self.tx.coordinates.insert(coordinate);
    }

    pub fn autopilot(&mut self, config: AutopilotConfig) {
        self.tx.bump_index(Table::Autopilot, config.modify_index);
        self.tx.autopilot = Some(config);
    }

    /// Load every row of `data`.
    pub fn data(&mut self, data: SnapshotData) {
        let coordinates_index = data
            .indexes
            .get(&Table::Coordinates)
            .copied()
            .unwrap_or(data.last_index);
        data.nodes.into_iter().for_each(|r| self.node(r));
        data.services.into_iter().for_each(|r| self.service(r));
        data.checks.into_iter().for_each(|r| self.check(r));
        data.kvs.into_iter().for_each(|r| self.kvs(r));
        data.tombstones.into_iter().for_each(|r| self.tombstone(r));
        data.sessions.into_iter().for_each(|r| self.session(r));
        data.acls.into_iter().for_each(|r| self.acl(r));
        data.prepared_queries
            .into_iter()
            .for_each(|r| self.prepared_query(r));
        data.coordinates
            .into_iter()
            .for_each(|r| self.coordinate(r, coordinates_index));
        if let Some(config) = data.autopilot {
            self.autopilot(config);
        }
        for (table, idx) in data.indexes {
            self.index(table, idx);
        }
    }

    /// Publish the restored rows and wake every watcher.
    pub fn commit(self) {
        let StateRestore { store, mut tx } = self;
        let last_index = tx.max_index(&Table::ALL);
        let watches = store.watches_handle();
        tx.defer(move || watches.notify_all());
        tx.commit();
        info!(last_index, "state restored");
    }
}

impl StateStore {
    /// Consistent view of the whole store.
    pub fn snapshot(&self) -> StateSnapshot {
        let tables = self.read();
        let last_index = tables.max_index(&Table::ALL);
        StateSnapshot { tables, last_index }
    }

    /// Start a bulk restore. Holds the writer lock until committed or
    /// dropped; dropping discards everything loaded.
    pub fn restore(&self) -> StateRestore<'_> {
        StateRestore {
            store: self,
            tx: self.write(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watch::{Watch, watch_channel};

    fn populated() -> StateStore {
        let store = StateStore::new();
        store
            .ensure_registration(
                1,
                &RegisterRequest {
                    node: "foo".into(),
                    address: "10.0.0.1".into(),
                    service: Some(NodeService {
                        id: "web".into(),
                        service: "web".into(),
                        port: 80,
                        ..Default::default()
                    }),
                    check: Some(HealthCheck {
                        node: "foo".into(),
                        check_id: "web-alive".into(),
                        service_id: "web".into(),
                        status: HealthStatus::Passing,
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            )
            .unwrap();
        store
            .session_create(
                2,
                Session {
                    id: "s1".into(),
                    node: "foo".into(),
                    checks: vec!["web-alive".into()],
                    ..Default::default()
                },
            )
            .unwrap();
        store.kvs_set(3, DirEntry::new("app/config", "on"));
        store.kvs_set(4, DirEntry::new("app/old", "x"));
        store.kvs_delete(5, "app/old");
        store
    }

    #[test]
    fn snapshot_is_isolated_from_later_writes() {
        let store = populated();
        let snap = store.snapshot();
        store.kvs_set(6, DirEntry::new("late", "x"));

        assert_eq!(snap.last_index(), 5);
        assert_eq!(snap.kvs().count(), 1);
        assert_eq!(snap.tombstones().len(), 1);
    }

    #[test]
    fn restore_round_trips_and_notifies() {
        let source = populated();
        let data = source.snapshot().to_data();

        let target = StateStore::new();
        let (tx, mut rx) = watch_channel();
        target.get_kvs_watch("app/").wait(tx);

        let mut restore = target.restore();
        restore.data(data.clone());
        restore.commit();

        assert!(rx.try_recv().is_ok());
        assert_eq!(target.snapshot().to_data(), data);
        assert_eq!(target.max_index(&Table::ALL), 5);
        assert_eq!(target.read().session_checks.len(), 1);

        let (idx, nodes) = target.check_service_nodes("web");
        assert_eq!(idx, 1);
        assert_eq!(nodes[0].checks.len(), 1);
        assert_eq!(target.kvs_list("app/").0, 5);
    }

    #[test]
    fn restore_keeps_index_of_deleted_rows() {
        let node = |name: &str| Node {
            node: name.into(),
            address: "10.0.0.1".into(),
            ..Default::default()
        };
        let source = StateStore::new();
        source.ensure_node(1, node("a")).unwrap();
        source.ensure_node(2, node("b")).unwrap();
        source.delete_node(5, "b").unwrap();
        assert_eq!(source.max_index(&[Table::Nodes]), 5);

        let data = source.snapshot().to_data();
        assert_eq!(data.indexes[&Table::Nodes], 5);

        let target = StateStore::new();
        let mut restore = target.restore();
        restore.data(data);
        restore.commit();

        assert_eq!(target.max_index(&[Table::Nodes]), 5);
        assert_eq!(target.nodes().0, 5);
        assert_eq!(target.snapshot().last_index(), 5);
    }

    #[test]
    fn dropped_restore_loads_nothing() {
        let store = StateStore::new();
        {
            let mut restore = store.restore();
            restore.kvs(DirEntry {
                modify_index: 9,
                ..DirEntry::new("k", "v")
            });
        }
        assert!(store.kvs_get("k").1.is_none());
        assert_eq!(store.max_index(&[Table::Kvs]), 0);
    }
}

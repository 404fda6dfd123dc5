//! Network coordinates, one per node.

use tracing::debug;

use crate::schema::Table;
use crate::store::StateStore;
use crate::types::{Coordinate, NetworkCoordinate, fold};

impl StateStore {
    pub fn coordinate(&self, node: &str) -> (u64, Option<NetworkCoordinate>) {
        let tx = self.read();
        let coord = tx.coordinates.get(&fold(node)).map(|c| c.coord.clone());
        (tx.index(Table::Coordinates), coord)
    }

    pub fn coordinates(&self) -> (u64, Vec<Coordinate>) {
        let tx = self.read();
        let idx = tx.max_index(&[Table::Coordinates, Table::Nodes]);
        (idx, tx.coordinates.iter().cloned().collect())
    }

    /// Store a batch of coordinates. Updates for nodes that are not
    /// registered are dropped; they can race with a node deregistration.
    pub fn coordinate_batch_update(&self, idx: u64, updates: Vec<Coordinate>) {
        let mut tx = self.write();
        let mut watches = self.watch_manager();
        let mut stored = 0;
        for update in updates {
            if !tx.nodes.contains(&fold(&update.node)) {
                continue;
            }
            tx.coordinates.insert(update);
            stored += 1;
        }
        if stored > 0 {
            tx.set_index(Table::Coordinates, idx);
            watches.arm(Table::Coordinates);
        }
        debug!(idx, stored, "coordinates updated");
        self.commit(tx, watches);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Node;

    fn coord(node: &str, x: f64) -> Coordinate {
        Coordinate {
            node: node.to_string(),
            coord: NetworkCoordinate {
                vec: vec![x, 0.0],
                error: 1.5,
                ..Default::default()
            },
        }
    }

    #[test]
    fn unknown_nodes_are_skipped() {
        let store = StateStore::new();
        store
            .ensure_node(
                1,
                Node {
                    node: "foo".into(),
                    ..Default::default()
                },
            )
            .unwrap();

        store.coordinate_batch_update(2, vec![coord("foo", 1.0), coord("ghost", 2.0)]);
        let (idx, all) = store.coordinates();
        assert_eq!(idx, 2);
        assert_eq!(all.len(), 1);
        assert_eq!(store.coordinate("FOO").1.unwrap().vec, vec![1.0, 0.0]);
    }

    #[test]
    fn node_delete_drops_coordinate() {
        let store = StateStore::new();
        store
            .ensure_node(
                1,
                Node {
                    node: "foo".into(),
                    ..Default::default()
                },
            )
            .unwrap();
        store.coordinate_batch_update(2, vec![coord("foo", 1.0)]);
        store.delete_node(3, "foo").unwrap();
        assert!(store.coordinate("foo").1.is_none());
        assert_eq!(store.max_index(&[Table::Coordinates]), 3);
    }
}

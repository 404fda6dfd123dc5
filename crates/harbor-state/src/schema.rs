//! Table identifiers and the indexed row containers backing each table.
//!
//! Every table is a [`RowSet`]: a persistent ordered map from primary key to
//! row plus one persistent multimap per secondary index. Cloning a `RowSet`
//! is O(1) and shares structure with the original, which is what makes the
//! copy-on-write transactions in [`crate::db`] cheap.

use std::fmt;
use std::ops::RangeBounds;

use imbl::{OrdMap, OrdSet};
use serde::{Deserialize, Serialize};

use crate::types::*;

/// The fixed set of tables in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Nodes,
    Services,
    Checks,
    Kvs,
    Tombstones,
    Sessions,
    SessionChecks,
    Acls,
    PreparedQueries,
    Autopilot,
    Coordinates,
}

impl Table {
    pub const COUNT: usize = 11;

    pub const ALL: [Table; Table::COUNT] = [
        Table::Nodes,
        Table::Services,
        Table::Checks,
        Table::Kvs,
        Table::Tombstones,
        Table::Sessions,
        Table::SessionChecks,
        Table::Acls,
        Table::PreparedQueries,
        Table::Autopilot,
        Table::Coordinates,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Table::Nodes => "nodes",
            Table::Services => "services",
            Table::Checks => "checks",
            Table::Kvs => "kvs",
            Table::Tombstones => "tombstones",
            Table::Sessions => "sessions",
            Table::SessionChecks => "session_checks",
            Table::Acls => "acls",
            Table::PreparedQueries => "prepared-queries",
            Table::Autopilot => "autopilot-config",
            Table::Coordinates => "coordinates",
        }
    }

    /// Dense slot for array-backed per-table state.
    pub(crate) fn slot(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Secondary index names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum By {
    Id,
    Meta,
    Node,
    ServiceName,
    Status,
    NodeService,
    NodeCheck,
    Session,
    Name,
}

/// Extracts the index values of one row for one secondary index.
pub(crate) type Extract<R> = fn(&R) -> Vec<String>;

/// A row type stored in a [`RowSet`].
pub(crate) trait Row: Clone + 'static {
    type Key: Ord + Clone + fmt::Debug;

    const TABLE: Table;
    const INDEXES: &'static [(By, Extract<Self>)] = &[];

    fn key(&self) -> Self::Key;
}

/// Persistent rows plus their secondary indexes.
#[derive(Clone)]
pub(crate) struct RowSet<R: Row> {
    rows: OrdMap<R::Key, R>,
    indexes: Vec<OrdMap<String, OrdSet<R::Key>>>,
}

impl<R: Row> Default for RowSet<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Row> RowSet<R> {
    pub fn new() -> Self {
        Self {
            rows: OrdMap::new(),
            indexes: vec![OrdMap::new(); R::INDEXES.len()],
        }
    }

    pub fn get(&self, key: &R::Key) -> Option<&R> {
        self.rows.get(key)
    }

    pub fn contains(&self, key: &R::Key) -> bool {
        self.rows.contains_key(key)
    }

    /// Upserts `row`, returning the previous row under the same key.
    pub fn insert(&mut self, row: R) -> Option<R> {
        let key = row.key();
        let old = self.rows.insert(key.clone(), row.clone());
        if let Some(old) = &old {
            self.unindex(&key, old);
        }
        self.index(&key, &row);
        old
    }

    pub fn remove(&mut self, key: &R::Key) -> Option<R> {
        let old = self.rows.remove(key)?;
        self.unindex(key, &old);
        Some(old)
    }

    pub fn iter(&self) -> impl Iterator<Item = &R> {
        self.rows.values()
    }

    pub fn range<B: RangeBounds<R::Key>>(&self, range: B) -> impl Iterator<Item = &R> {
        self.rows.range(range).map(|(_, row)| row)
    }

    /// Rows whose `by` index contains `value`, in primary key order.
    pub fn lookup<'a>(&'a self, by: By, value: &str) -> impl Iterator<Item = &'a R> + use<'a, R> {
        let slot = R::INDEXES.iter().position(|(b, _)| *b == by);
        debug_assert!(slot.is_some(), "table {} has no {by:?} index", R::TABLE);
        slot.and_then(|slot| self.indexes[slot].get(value))
            .into_iter()
            .flat_map(|keys| keys.iter())
            .filter_map(move |key| self.rows.get(key))
    }

    /// Primary keys whose `by` index contains `value`.
    pub fn lookup_keys(&self, by: By, value: &str) -> Vec<R::Key> {
        self.lookup(by, value).map(Row::key).collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn index(&mut self, key: &R::Key, row: &R) {
        for (slot, (_, extract)) in R::INDEXES.iter().enumerate() {
            for value in extract(row) {
                let mut keys = self.indexes[slot].get(&value).cloned().unwrap_or_default();
                keys.insert(key.clone());
                self.indexes[slot].insert(value, keys);
            }
        }
    }

    fn unindex(&mut self, key: &R::Key, row: &R) {
        for (slot, (_, extract)) in R::INDEXES.iter().enumerate() {
            for value in extract(row) {
                let Some(mut keys) = self.indexes[slot].get(&value).cloned() else {
                    continue;
                };
                keys.remove(key);
                if keys.is_empty() {
                    self.indexes[slot].remove(&value);
                } else {
                    self.indexes[slot].insert(value, keys);
                }
            }
        }
    }
}

/// Compound index value for `(node, other)` pairs.
pub(crate) fn pair(node: &str, other: &str) -> String {
    format!("{}\u{0}{}", fold(node), other)
}

fn non_empty(value: &str) -> Vec<String> {
    if value.is_empty() {
        Vec::new()
    } else {
        vec![value.to_string()]
    }
}

// ── Row impls ─────────────────────────────────────────────────────

fn node_id(n: &Node) -> Vec<String> {
    non_empty(&n.id.to_lowercase())
}

fn node_meta(n: &Node) -> Vec<String> {
    n.meta.iter().map(|(k, v)| format!("{k}\u{0}{v}")).collect()
}

impl Row for Node {
    type Key = String;
    const TABLE: Table = Table::Nodes;
    const INDEXES: &'static [(By, Extract<Self>)] = &[(By::Id, node_id), (By::Meta, node_meta)];

    fn key(&self) -> String {
        fold(&self.node)
    }
}

fn service_node(s: &ServiceNode) -> Vec<String> {
    vec![fold(&s.node)]
}

fn service_name(s: &ServiceNode) -> Vec<String> {
    vec![fold(&s.service_name)]
}

impl Row for ServiceNode {
    type Key = (String, String);
    const TABLE: Table = Table::Services;
    const INDEXES: &'static [(By, Extract<Self>)] =
        &[(By::Node, service_node), (By::ServiceName, service_name)];

    fn key(&self) -> (String, String) {
        (fold(&self.node), self.service_id.clone())
    }
}

fn check_node(c: &HealthCheck) -> Vec<String> {
    vec![fold(&c.node)]
}

fn check_status(c: &HealthCheck) -> Vec<String> {
    vec![c.status.as_str().to_string()]
}

fn check_service_name(c: &HealthCheck) -> Vec<String> {
    non_empty(&fold(&c.service_name))
}

/// Node-level checks index under an empty service id.
fn check_node_service(c: &HealthCheck) -> Vec<String> {
    vec![pair(&c.node, &c.service_id)]
}

impl Row for HealthCheck {
    type Key = (String, String);
    const TABLE: Table = Table::Checks;
    const INDEXES: &'static [(By, Extract<Self>)] = &[
        (By::Node, check_node),
        (By::Status, check_status),
        (By::ServiceName, check_service_name),
        (By::NodeService, check_node_service),
    ];

    fn key(&self) -> (String, String) {
        (fold(&self.node), self.check_id.clone())
    }
}

fn kv_session(e: &DirEntry) -> Vec<String> {
    e.session_id().map(str::to_string).into_iter().collect()
}

impl Row for DirEntry {
    type Key = String;
    const TABLE: Table = Table::Kvs;
    const INDEXES: &'static [(By, Extract<Self>)] = &[(By::Session, kv_session)];

    fn key(&self) -> String {
        self.key.clone()
    }
}

impl Row for Tombstone {
    type Key = String;
    const TABLE: Table = Table::Tombstones;

    fn key(&self) -> String {
        self.key.clone()
    }
}

fn session_node(s: &Session) -> Vec<String> {
    vec![fold(&s.node)]
}

impl Row for Session {
    type Key = String;
    const TABLE: Table = Table::Sessions;
    const INDEXES: &'static [(By, Extract<Self>)] = &[(By::Node, session_node)];

    fn key(&self) -> String {
        self.id.clone()
    }
}

fn mapping_session(m: &SessionCheck) -> Vec<String> {
    vec![m.session.clone()]
}

fn mapping_node_check(m: &SessionCheck) -> Vec<String> {
    vec![pair(&m.node, &m.check_id)]
}

impl Row for SessionCheck {
    type Key = (String, String, String);
    const TABLE: Table = Table::SessionChecks;
    const INDEXES: &'static [(By, Extract<Self>)] = &[
        (By::Session, mapping_session),
        (By::NodeCheck, mapping_node_check),
    ];

    fn key(&self) -> (String, String, String) {
        (fold(&self.node), self.check_id.clone(), self.session.clone())
    }
}

impl Row for Acl {
    type Key = String;
    const TABLE: Table = Table::Acls;

    fn key(&self) -> String {
        self.id.clone()
    }
}

fn query_name(q: &PreparedQuery) -> Vec<String> {
    non_empty(&q.name.to_lowercase())
}

fn query_session(q: &PreparedQuery) -> Vec<String> {
    q.session.iter().filter(|s| !s.is_empty()).cloned().collect()
}

impl Row for PreparedQuery {
    type Key = String;
    const TABLE: Table = Table::PreparedQueries;
    const INDEXES: &'static [(By, Extract<Self>)] =
        &[(By::Name, query_name), (By::Session, query_session)];

    fn key(&self) -> String {
        self.id.clone()
    }
}

impl Row for Coordinate {
    type Key = String;
    const TABLE: Table = Table::Coordinates;

    fn key(&self) -> String {
        fold(&self.node)
    }
}

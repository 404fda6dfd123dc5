//! Catalog: nodes, services and health checks.
//!
//! Writes dirty-check against the stored row and skip the write (and the
//! watch) when nothing changed, so anti-entropy re-registrations stay quiet.
//! A check going critical, or going away, destroys every session that lists
//! it.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::db::{Tables, WriteTxn};
use crate::error::{StateError, StateResult};
use crate::schema::{By, Table, pair};
use crate::store::StateStore;
use crate::types::*;
use crate::watch::WatchManager;

impl StateStore {
    // ── Writes ─────────────────────────────────────────────────────

    /// Apply a node/service/check registration atomically.
    pub fn ensure_registration(&self, idx: u64, req: &RegisterRequest) -> StateResult<()> {
        let mut tx = self.write();
        let mut watches = self.watch_manager();
        self.ensure_registration_txn(&mut tx, &mut watches, idx, req)?;
        self.commit(tx, watches);
        Ok(())
    }

    pub(crate) fn ensure_registration_txn(
        &self,
        tx: &mut WriteTxn<'_>,
        watches: &mut WatchManager,
        idx: u64,
        req: &RegisterRequest,
    ) -> StateResult<()> {
        let existing = tx.nodes.get(&fold(&req.node));
        if req.changes_node(existing) {
            ensure_node_txn(tx, watches, idx, req.to_node())?;
        }

        if let Some(service) = &req.service {
            let stored = tx
                .services
                .get(&(fold(&req.node), service.id.clone()))
                .map(ServiceNode::to_node_service);
            if !stored.is_some_and(|s| s.is_same(service)) {
                ensure_service_txn(tx, watches, idx, &req.node, service)?;
            }
        }

        for check in req.check.iter().chain(req.checks.iter()) {
            self.ensure_check_txn(tx, watches, idx, check.clone())?;
        }
        Ok(())
    }

    /// Upsert a node.
    pub fn ensure_node(&self, idx: u64, node: Node) -> StateResult<()> {
        let mut tx = self.write();
        let mut watches = self.watch_manager();
        ensure_node_txn(&mut tx, &mut watches, idx, node)?;
        self.commit(tx, watches);
        Ok(())
    }

    /// Upsert a service on an existing node.
    pub fn ensure_service(&self, idx: u64, node: &str, service: &NodeService) -> StateResult<()> {
        let mut tx = self.write();
        let mut watches = self.watch_manager();
        ensure_service_txn(&mut tx, &mut watches, idx, node, service)?;
        self.commit(tx, watches);
        Ok(())
    }

    /// Upsert a health check.
    pub fn ensure_check(&self, idx: u64, check: HealthCheck) -> StateResult<()> {
        let mut tx = self.write();
        let mut watches = self.watch_manager();
        self.ensure_check_txn(&mut tx, &mut watches, idx, check)?;
        self.commit(tx, watches);
        Ok(())
    }

    pub(crate) fn ensure_check_txn(
        &self,
        tx: &mut WriteTxn<'_>,
        watches: &mut WatchManager,
        idx: u64,
        mut check: HealthCheck,
    ) -> StateResult<()> {
        if !tx.nodes.contains(&fold(&check.node)) {
            return Err(StateError::MissingNode);
        }
        if !check.service_id.is_empty() {
            let service = tx
                .services
                .get(&(fold(&check.node), check.service_id.clone()))
                .ok_or(StateError::MissingService)?;
            check.service_name = service.service_name.clone();
        }

        let key = (fold(&check.node), check.check_id.clone());
        match tx.checks.get(&key) {
            Some(existing) if existing.is_same(&check) => return Ok(()),
            Some(existing) => check.create_index = existing.create_index,
            None => check.create_index = idx,
        }
        check.modify_index = idx;

        let critical = check.status == HealthStatus::Critical;
        let sessions = if critical {
            sessions_for_check(tx, &check.node, &check.check_id)
        } else {
            Vec::new()
        };

        debug!(node = %check.node, check = %check.check_id, status = check.status.as_str(), "check stored");
        tx.checks.insert(check);
        tx.set_index(Table::Checks, idx);
        watches.arm(Table::Checks);

        for session in sessions {
            self.delete_session_txn(tx, watches, idx, &session)?;
        }
        Ok(())
    }

    /// Delete a node and everything registered on it.
    pub fn delete_node(&self, idx: u64, node: &str) -> StateResult<()> {
        let mut tx = self.write();
        let mut watches = self.watch_manager();
        self.delete_node_txn(&mut tx, &mut watches, idx, node)?;
        self.commit(tx, watches);
        Ok(())
    }

    pub(crate) fn delete_node_txn(
        &self,
        tx: &mut WriteTxn<'_>,
        watches: &mut WatchManager,
        idx: u64,
        node: &str,
    ) -> StateResult<()> {
        let key = fold(node);
        if !tx.nodes.contains(&key) {
            return Ok(());
        }

        let services: Vec<_> = tx
            .services
            .lookup(By::Node, &key)
            .map(|s| (fold(&s.node), s.service_id.clone()))
            .collect();
        if !services.is_empty() {
            for service in &services {
                tx.services.remove(service);
            }
            tx.set_index(Table::Services, idx);
            watches.arm(Table::Services);
        }

        let checks: Vec<_> = tx
            .checks
            .lookup(By::Node, &key)
            .map(|c| c.check_id.clone())
            .collect();
        for check in checks {
            self.delete_check_txn(tx, watches, idx, node, &check)?;
        }

        if tx.coordinates.remove(&key).is_some() {
            tx.set_index(Table::Coordinates, idx);
            watches.arm(Table::Coordinates);
        }

        tx.nodes.remove(&key);
        tx.set_index(Table::Nodes, idx);
        watches.arm(Table::Nodes);

        let sessions: Vec<_> = tx
            .sessions
            .lookup(By::Node, &key)
            .map(|s| s.id.clone())
            .collect();
        for session in sessions {
            self.delete_session_txn(tx, watches, idx, &session)?;
        }

        debug!(%node, "node deleted");
        Ok(())
    }

    /// Delete one service and the checks bound to it.
    pub fn delete_service(&self, idx: u64, node: &str, service_id: &str) -> StateResult<()> {
        let mut tx = self.write();
        let mut watches = self.watch_manager();
        self.delete_service_txn(&mut tx, &mut watches, idx, node, service_id)?;
        self.commit(tx, watches);
        Ok(())
    }

    pub(crate) fn delete_service_txn(
        &self,
        tx: &mut WriteTxn<'_>,
        watches: &mut WatchManager,
        idx: u64,
        node: &str,
        service_id: &str,
    ) -> StateResult<()> {
        let key = (fold(node), service_id.to_string());
        if !tx.services.contains(&key) {
            return Ok(());
        }

        let checks: Vec<_> = tx
            .checks
            .lookup(By::NodeService, &pair(node, service_id))
            .map(|c| c.check_id.clone())
            .collect();
        for check in checks {
            self.delete_check_txn(tx, watches, idx, node, &check)?;
        }

        tx.services.remove(&key);
        tx.set_index(Table::Services, idx);
        watches.arm(Table::Services);
        debug!(%node, service = %service_id, "service deleted");
        Ok(())
    }

    /// Delete one health check, invalidating sessions that depend on it.
    pub fn delete_check(&self, idx: u64, node: &str, check_id: &str) -> StateResult<()> {
        let mut tx = self.write();
        let mut watches = self.watch_manager();
        self.delete_check_txn(&mut tx, &mut watches, idx, node, check_id)?;
        self.commit(tx, watches);
        Ok(())
    }

    pub(crate) fn delete_check_txn(
        &self,
        tx: &mut WriteTxn<'_>,
        watches: &mut WatchManager,
        idx: u64,
        node: &str,
        check_id: &str,
    ) -> StateResult<()> {
        let key = (fold(node), check_id.to_string());
        if tx.checks.remove(&key).is_none() {
            return Ok(());
        }
        tx.set_index(Table::Checks, idx);
        watches.arm(Table::Checks);

        for session in sessions_for_check(tx, node, check_id) {
            self.delete_session_txn(tx, watches, idx, &session)?;
        }
        Ok(())
    }

    // ── Nodes ──────────────────────────────────────────────────────

    pub fn get_node(&self, node: &str) -> (u64, Option<Node>) {
        let tx = self.read();
        (tx.index(Table::Nodes), tx.nodes.get(&fold(node)).cloned())
    }

    pub fn nodes(&self) -> (u64, Vec<Node>) {
        let tx = self.read();
        (tx.index(Table::Nodes), tx.nodes.iter().cloned().collect())
    }

    /// Nodes whose meta contains every `filters` pair.
    pub fn nodes_by_meta(&self, filters: &BTreeMap<String, String>) -> (u64, Vec<Node>) {
        let tx = self.read();
        let nodes = nodes_matching(&tx, filters)
            .into_iter()
            .cloned()
            .collect();
        (tx.index(Table::Nodes), nodes)
    }

    // ── Services ───────────────────────────────────────────────────

    /// Every service name with the union of its tags.
    pub fn services(&self) -> (u64, BTreeMap<String, Vec<String>>) {
        let tx = self.read();
        (tx.index(Table::Services), tag_union(tx.services.iter()))
    }

    pub fn services_by_node_meta(
        &self,
        filters: &BTreeMap<String, String>,
    ) -> (u64, BTreeMap<String, Vec<String>>) {
        let tx = self.read();
        let idx = tx.max_index(&[Table::Nodes, Table::Services]);
        let services = nodes_matching(&tx, filters)
            .into_iter()
            .flat_map(|n| tx.services.lookup(By::Node, &fold(&n.node)));
        (idx, tag_union(services))
    }

    /// Instances of `service`, joined with their node's address and meta.
    pub fn service_nodes(&self, service: &str) -> (u64, Vec<ServiceNode>) {
        let tx = self.read();
        let idx = tx.max_index(&[Table::Nodes, Table::Services]);
        let rows = tx.services.lookup(By::ServiceName, &fold(service));
        (idx, parse_service_nodes(&tx, rows))
    }

    /// Like [`StateStore::service_nodes`] but only instances carrying `tag`,
    /// compared case-insensitively.
    pub fn service_tag_nodes(&self, service: &str, tag: &str) -> (u64, Vec<ServiceNode>) {
        let tx = self.read();
        let idx = tx.max_index(&[Table::Nodes, Table::Services]);
        let rows = tx
            .services
            .lookup(By::ServiceName, &fold(service))
            .filter(|s| has_tag(&s.service_tags, tag));
        (idx, parse_service_nodes(&tx, rows))
    }

    pub fn node_service(&self, node: &str, service_id: &str) -> (u64, Option<NodeService>) {
        let tx = self.read();
        let service = tx
            .services
            .get(&(fold(node), service_id.to_string()))
            .map(ServiceNode::to_node_service);
        (tx.index(Table::Services), service)
    }

    /// The node and every service registered on it.
    pub fn node_services(&self, node: &str) -> (u64, Option<NodeServices>) {
        let tx = self.read();
        let idx = tx.max_index(&[Table::Nodes, Table::Services]);
        let Some(row) = tx.nodes.get(&fold(node)) else {
            return (idx, None);
        };
        let services = tx
            .services
            .lookup(By::Node, &fold(node))
            .map(|s| (s.service_id.clone(), s.to_node_service()))
            .collect();
        let result = NodeServices {
            node: row.clone(),
            services,
        };
        (idx, Some(result))
    }

    // ── Checks ─────────────────────────────────────────────────────

    pub fn node_check(&self, node: &str, check_id: &str) -> (u64, Option<HealthCheck>) {
        let tx = self.read();
        let check = tx.checks.get(&(fold(node), check_id.to_string())).cloned();
        (tx.index(Table::Checks), check)
    }

    pub fn node_checks(&self, node: &str) -> (u64, Vec<HealthCheck>) {
        let tx = self.read();
        let checks = tx.checks.lookup(By::Node, &fold(node)).cloned().collect();
        (tx.index(Table::Checks), checks)
    }

    pub fn service_checks(&self, service: &str) -> (u64, Vec<HealthCheck>) {
        let tx = self.read();
        let checks = tx
            .checks
            .lookup(By::ServiceName, &fold(service))
            .cloned()
            .collect();
        (tx.index(Table::Checks), checks)
    }

    pub fn service_checks_by_node_meta(
        &self,
        service: &str,
        filters: &BTreeMap<String, String>,
    ) -> (u64, Vec<HealthCheck>) {
        let tx = self.read();
        let idx = tx.max_index(&[Table::Nodes, Table::Checks]);
        let checks = tx
            .checks
            .lookup(By::ServiceName, &fold(service))
            .filter(|c| node_satisfies(&tx, &c.node, filters))
            .cloned()
            .collect();
        (idx, checks)
    }

    /// Checks currently in `state`; [`StatusFilter::Any`] returns them all.
    pub fn checks_in_state(&self, state: StatusFilter) -> (u64, Vec<HealthCheck>) {
        let tx = self.read();
        (tx.index(Table::Checks), checks_in_state(&tx, state))
    }

    pub fn checks_in_state_by_node_meta(
        &self,
        state: StatusFilter,
        filters: &BTreeMap<String, String>,
    ) -> (u64, Vec<HealthCheck>) {
        let tx = self.read();
        let idx = tx.max_index(&[Table::Nodes, Table::Checks]);
        let checks = checks_in_state(&tx, state)
            .into_iter()
            .filter(|c| node_satisfies(&tx, &c.node, filters))
            .collect();
        (idx, checks)
    }

    // ── Combined views ─────────────────────────────────────────────

    /// Instances of `service` with their node and every relevant check.
    pub fn check_service_nodes(&self, service: &str) -> (u64, Vec<CheckServiceNode>) {
        let tx = self.read();
        let idx = tx.max_index(&[Table::Nodes, Table::Services, Table::Checks]);
        let rows = tx.services.lookup(By::ServiceName, &fold(service));
        (idx, parse_check_service_nodes(&tx, rows))
    }

    pub fn check_service_tag_nodes(&self, service: &str, tag: &str) -> (u64, Vec<CheckServiceNode>) {
        let tx = self.read();
        let idx = tx.max_index(&[Table::Nodes, Table::Services, Table::Checks]);
        let rows = tx
            .services
            .lookup(By::ServiceName, &fold(service))
            .filter(|s| has_tag(&s.service_tags, tag));
        (idx, parse_check_service_nodes(&tx, rows))
    }

    /// Everything registered on one node.
    pub fn node_info(&self, node: &str) -> (u64, Vec<NodeInfo>) {
        let tx = self.read();
        let idx = tx.max_index(&[Table::Nodes, Table::Services, Table::Checks]);
        let dump = tx
            .nodes
            .get(&fold(node))
            .map(|n| node_info(&tx, n))
            .into_iter()
            .collect();
        (idx, dump)
    }

    /// Everything registered on every node.
    pub fn node_dump(&self) -> (u64, Vec<NodeInfo>) {
        let tx = self.read();
        let idx = tx.max_index(&[Table::Nodes, Table::Services, Table::Checks]);
        let dump = tx.nodes.iter().map(|n| node_info(&tx, n)).collect();
        (idx, dump)
    }
}

// ── Write helpers ─────────────────────────────────────────────────

pub(crate) fn ensure_node_txn(
    tx: &mut WriteTxn<'_>,
    watches: &mut WatchManager,
    idx: u64,
    mut node: Node,
) -> StateResult<()> {
    let key = fold(&node.node);
    if !node.id.is_empty() {
        let owner = tx
            .nodes
            .lookup(By::Id, &node.id.to_lowercase())
            .find(|n| fold(&n.node) != key);
        if let Some(owner) = owner {
            return Err(StateError::NodeIdConflict {
                id: node.id.clone(),
                existing: owner.node.clone(),
            });
        }
    }

    match tx.nodes.get(&key) {
        Some(existing) if existing.is_same(&node) => return Ok(()),
        Some(existing) => node.create_index = existing.create_index,
        None => node.create_index = idx,
    }
    node.modify_index = idx;

    debug!(node = %node.node, idx, "node stored");
    tx.nodes.insert(node);
    tx.set_index(Table::Nodes, idx);
    watches.arm(Table::Nodes);
    Ok(())
}

pub(crate) fn ensure_service_txn(
    tx: &mut WriteTxn<'_>,
    watches: &mut WatchManager,
    idx: u64,
    node: &str,
    service: &NodeService,
) -> StateResult<()> {
    let owner = tx.nodes.get(&fold(node)).ok_or(StateError::MissingNode)?;
    let mut row = service.to_service_node(&owner.node);

    match tx.services.get(&(fold(node), service.id.clone())) {
        Some(existing) if existing.to_node_service().is_same(service) => return Ok(()),
        Some(existing) => row.create_index = existing.create_index,
        None => row.create_index = idx,
    }
    row.modify_index = idx;

    debug!(%node, service = %service.id, idx, "service stored");
    tx.services.insert(row.stored());
    tx.set_index(Table::Services, idx);
    watches.arm(Table::Services);
    Ok(())
}

/// Sessions that list `(node, check)` among their checks.
fn sessions_for_check(tables: &Tables, node: &str, check: &str) -> Vec<String> {
    tables
        .session_checks
        .lookup(By::NodeCheck, &pair(node, check))
        .map(|m| m.session.clone())
        .collect()
}

// ── Read helpers ──────────────────────────────────────────────────

fn nodes_matching<'a>(tables: &'a Tables, filters: &BTreeMap<String, String>) -> Vec<&'a Node> {
    // Narrow with the meta index on the first filter, then check the rest.
    match filters.iter().next() {
        Some((k, v)) => tables
            .nodes
            .lookup(By::Meta, &format!("{k}\u{0}{v}"))
            .filter(|n| n.satisfies_meta(filters))
            .collect(),
        None => tables.nodes.iter().collect(),
    }
}

fn node_satisfies(tables: &Tables, node: &str, filters: &BTreeMap<String, String>) -> bool {
    tables
        .nodes
        .get(&fold(node))
        .is_some_and(|n| n.satisfies_meta(filters))
}

fn has_tag(tags: &[String], tag: &str) -> bool {
    tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
}

fn tag_union<'a>(rows: impl Iterator<Item = &'a ServiceNode>) -> BTreeMap<String, Vec<String>> {
    let mut union: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for row in rows {
        union
            .entry(row.service_name.clone())
            .or_default()
            .extend(row.service_tags.iter().cloned());
    }
    union
        .into_iter()
        .map(|(name, tags)| (name, tags.into_iter().collect()))
        .collect()
}

fn checks_in_state(tables: &Tables, state: StatusFilter) -> Vec<HealthCheck> {
    match state {
        StatusFilter::Any => tables.checks.iter().cloned().collect(),
        StatusFilter::Only(status) => tables
            .checks
            .lookup(By::Status, status.as_str())
            .cloned()
            .collect(),
    }
}

/// Fill in the node-level columns of each service row from its node.
fn parse_service_nodes<'a>(
    tables: &Tables,
    rows: impl Iterator<Item = &'a ServiceNode>,
) -> Vec<ServiceNode> {
    rows.filter_map(|row| {
        let node = tables.nodes.get(&fold(&row.node))?;
        let mut joined = row.clone();
        joined.id = node.id.clone();
        joined.address = node.address.clone();
        joined.tagged_addresses = node.tagged_addresses.clone();
        joined.node_meta = node.meta.clone();
        Some(joined)
    })
    .collect()
}

fn parse_check_service_nodes<'a>(
    tables: &Tables,
    rows: impl Iterator<Item = &'a ServiceNode>,
) -> Vec<CheckServiceNode> {
    rows.filter_map(|row| {
        let node = tables.nodes.get(&fold(&row.node))?;
        let checks = tables
            .checks
            .lookup(By::Node, &fold(&row.node))
            .filter(|c| c.service_id.is_empty() || c.service_id == row.service_id)
            .cloned()
            .collect();
        Some(CheckServiceNode {
            node: node.clone(),
            service: row.to_node_service(),
            checks,
        })
    })
    .collect()
}

fn node_info(tables: &Tables, node: &Node) -> NodeInfo {
    let key = fold(&node.node);
    NodeInfo {
        id: node.id.clone(),
        node: node.node.clone(),
        address: node.address.clone(),
        tagged_addresses: node.tagged_addresses.clone(),
        meta: node.meta.clone(),
        services: tables
            .services
            .lookup(By::Node, &key)
            .map(ServiceNode::to_node_service)
            .collect(),
        checks: tables.checks.lookup(By::Node, &key).cloned().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watch::{Watch, watch_channel};

    fn node(name: &str) -> Node {
        Node {
            node: name.to_string(),
            address: "127.0.0.1".to_string(),
            ..Default::default()
        }
    }

    fn service(id: &str, name: &str, tags: &[&str]) -> NodeService {
        NodeService {
            id: id.to_string(),
            service: name.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            port: 6379,
            ..Default::default()
        }
    }

    fn check(node: &str, id: &str, service_id: &str, status: HealthStatus) -> HealthCheck {
        HealthCheck {
            node: node.to_string(),
            check_id: id.to_string(),
            service_id: service_id.to_string(),
            status,
            ..Default::default()
        }
    }

    fn meta(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn ensure_node_stamps_indexes() {
        let store = StateStore::new();
        store.ensure_node(1, node("foo")).unwrap();
        let mut changed = node("foo");
        changed.address = "10.0.0.1".into();
        store.ensure_node(3, changed).unwrap();

        let (idx, stored) = store.get_node("FOO");
        let stored = stored.unwrap();
        assert_eq!(idx, 3);
        assert_eq!(stored.create_index, 1);
        assert_eq!(stored.modify_index, 3);
    }

    #[test]
    fn ensure_node_rejects_duplicate_id() {
        let store = StateStore::new();
        let mut a = node("a");
        a.id = "40e4a748-2192-161a-0510-9bf59fe950b5".into();
        store.ensure_node(1, a.clone()).unwrap();

        let mut b = node("b");
        b.id = a.id.to_uppercase();
        let err = store.ensure_node(2, b).unwrap_err();
        assert!(matches!(err, StateError::NodeIdConflict { .. }));
    }

    #[test]
    fn service_requires_node() {
        let store = StateStore::new();
        let err = store
            .ensure_service(1, "missing", &service("redis", "redis", &[]))
            .unwrap_err();
        assert!(matches!(err, StateError::MissingNode));
    }

    #[test]
    fn check_requires_service_and_copies_name() {
        let store = StateStore::new();
        store.ensure_node(1, node("foo")).unwrap();
        let err = store
            .ensure_check(2, check("foo", "c1", "redis", HealthStatus::Passing))
            .unwrap_err();
        assert!(matches!(err, StateError::MissingService));

        store
            .ensure_service(3, "foo", &service("redis", "Redis", &[]))
            .unwrap();
        store
            .ensure_check(4, check("foo", "c1", "redis", HealthStatus::Passing))
            .unwrap();
        let (_, stored) = store.node_check("foo", "c1");
        assert_eq!(stored.unwrap().service_name, "Redis");
    }

    #[test]
    fn checks_default_to_critical() {
        let check: HealthCheck =
            serde_json::from_str(r#"{"node":"foo","check_id":"c"}"#).unwrap();
        assert_eq!(check.status, HealthStatus::Critical);
    }

    #[test]
    fn identical_registration_is_a_no_op() {
        let store = StateStore::new();
        let req = RegisterRequest {
            node: "foo".into(),
            address: "127.0.0.1".into(),
            service: Some(service("redis", "redis", &["primary"])),
            check: Some(check("foo", "c1", "redis", HealthStatus::Passing)),
            ..Default::default()
        };
        store.ensure_registration(1, &req).unwrap();

        let (tx, mut rx) = watch_channel();
        store
            .get_query_watch(crate::watch::QueryMethod::NodeDump)
            .wait(tx);
        store.ensure_registration(2, &req).unwrap();
        assert!(rx.try_recv().is_err());
        assert_eq!(
            store.max_index(&[Table::Nodes, Table::Services, Table::Checks]),
            1
        );
    }

    #[test]
    fn service_views_join_node_fields() {
        let store = StateStore::new();
        let mut n = node("foo");
        n.meta = meta(&[("rack", "r1")]);
        store.ensure_node(1, n).unwrap();
        store.ensure_node(2, node("bar")).unwrap();
        store
            .ensure_service(3, "foo", &service("db1", "db", &["Primary"]))
            .unwrap();
        store
            .ensure_service(4, "bar", &service("db2", "db", &["replica"]))
            .unwrap();

        let (idx, rows) = store.service_nodes("DB");
        assert_eq!(idx, 4);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].address, "127.0.0.1");
        assert_eq!(rows[1].node_meta.get("rack").map(String::as_str), Some("r1"));

        let (_, tagged) = store.service_tag_nodes("db", "primary");
        assert_eq!(tagged.len(), 1);
        assert_eq!(tagged[0].service_id, "db1");

        let (_, services) = store.services();
        assert_eq!(services["db"], vec!["Primary".to_string(), "replica".to_string()]);

        let (_, filtered) = store.services_by_node_meta(&meta(&[("rack", "r1")]));
        assert_eq!(filtered["db"], vec!["Primary".to_string()]);

        let (_, nodes) = store.nodes_by_meta(&meta(&[("rack", "r1")]));
        assert_eq!(nodes.len(), 1);
    }

    #[test]
    fn check_state_queries() {
        let store = StateStore::new();
        store.ensure_node(1, node("foo")).unwrap();
        store
            .ensure_check(2, check("foo", "a", "", HealthStatus::Passing))
            .unwrap();
        store
            .ensure_check(3, check("foo", "b", "", HealthStatus::Warning))
            .unwrap();

        let (_, all) = store.checks_in_state(StatusFilter::Any);
        assert_eq!(all.len(), 2);
        let (_, warn) = store.checks_in_state("warning".parse().unwrap());
        assert_eq!(warn.len(), 1);
        assert_eq!(warn[0].check_id, "b");

        let (_, none) =
            store.checks_in_state_by_node_meta(StatusFilter::Any, &meta(&[("x", "y")]));
        assert!(none.is_empty());
    }

    #[test]
    fn delete_service_removes_its_checks() {
        let store = StateStore::new();
        store.ensure_node(1, node("foo")).unwrap();
        store
            .ensure_service(2, "foo", &service("redis", "redis", &[]))
            .unwrap();
        store
            .ensure_check(3, check("foo", "svc", "redis", HealthStatus::Passing))
            .unwrap();
        store
            .ensure_check(4, check("foo", "node", "", HealthStatus::Passing))
            .unwrap();

        store.delete_service(5, "foo", "redis").unwrap();
        let (idx, checks) = store.node_checks("foo");
        assert_eq!(idx, 5);
        assert_eq!(checks.len(), 1);
        assert_eq!(checks[0].check_id, "node");
        assert!(store.node_service("foo", "redis").1.is_none());
    }

    #[test]
    fn node_dump_lists_everything() {
        let store = StateStore::new();
        store.ensure_node(1, node("foo")).unwrap();
        store
            .ensure_service(2, "foo", &service("web", "web", &[]))
            .unwrap();
        store
            .ensure_check(3, check("foo", "web-check", "web", HealthStatus::Passing))
            .unwrap();

        let (idx, dump) = store.node_dump();
        assert_eq!(idx, 3);
        assert_eq!(dump.len(), 1);
        assert_eq!(dump[0].services.len(), 1);
        assert_eq!(dump[0].checks.len(), 1);

        let (_, info) = store.node_info("missing");
        assert!(info.is_empty());
    }
}

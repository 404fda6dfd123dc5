//! Domain types for the Harbor state store.
//!
//! These types represent catalog registrations, health checks, KV entries,
//! sessions, ACLs, prepared queries and cluster tunables. Every stored row
//! carries a `create_index`/`modify_index` pair stamped from the log index of
//! the write that produced it.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Node names and service names compare case-insensitively; this is their
/// canonical key form.
pub(crate) fn fold(name: &str) -> String {
    name.to_lowercase()
}

// ── Node ──────────────────────────────────────────────────────────

/// A registered catalog node.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Node {
    pub id: String,
    /// Node name, unique and case-insensitive.
    pub node: String,
    pub address: String,
    #[serde(default)]
    pub tagged_addresses: BTreeMap<String, String>,
    #[serde(default)]
    pub meta: BTreeMap<String, String>,
    #[serde(default)]
    pub create_index: u64,
    #[serde(default)]
    pub modify_index: u64,
}

impl Node {
    /// Compares everything except the raft indexes.
    pub fn is_same(&self, other: &Node) -> bool {
        self.id == other.id
            && self.node == other.node
            && self.address == other.address
            && self.tagged_addresses == other.tagged_addresses
            && self.meta == other.meta
    }

    /// True if every filter pair is present in the node's meta.
    pub fn satisfies_meta(&self, filters: &BTreeMap<String, String>) -> bool {
        filters
            .iter()
            .all(|(k, v)| self.meta.get(k).is_some_and(|have| have == v))
    }
}

// ── Services ──────────────────────────────────────────────────────

/// A service as registered on a single node.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeService {
    pub id: String,
    pub service: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub create_index: u64,
    #[serde(default)]
    pub modify_index: u64,
}

impl NodeService {
    /// Compares the registration payload, ignoring the raft indexes.
    pub fn is_same(&self, other: &NodeService) -> bool {
        self.id == other.id
            && self.service == other.service
            && self.tags == other.tags
            && self.address == other.address
            && self.port == other.port
    }

    /// Builds the denormalized service row stored for `node`.
    pub fn to_service_node(&self, node: &str) -> ServiceNode {
        ServiceNode {
            node: node.to_string(),
            service_id: self.id.clone(),
            service_name: self.service.clone(),
            service_tags: self.tags.clone(),
            service_address: self.address.clone(),
            service_port: self.port,
            create_index: self.create_index,
            modify_index: self.modify_index,
            ..Default::default()
        }
    }
}

/// Service registration row, keyed by `(node, service_id)`.
///
/// The node-level fields (`id`, `address`, `tagged_addresses`, `node_meta`)
/// are never stored; reads join them in from the parent node.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceNode {
    #[serde(default)]
    pub id: String,
    pub node: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub tagged_addresses: BTreeMap<String, String>,
    #[serde(default)]
    pub node_meta: BTreeMap<String, String>,
    pub service_id: String,
    pub service_name: String,
    #[serde(default)]
    pub service_tags: Vec<String>,
    #[serde(default)]
    pub service_address: String,
    #[serde(default)]
    pub service_port: u16,
    #[serde(default)]
    pub create_index: u64,
    #[serde(default)]
    pub modify_index: u64,
}

impl ServiceNode {
    pub fn to_node_service(&self) -> NodeService {
        NodeService {
            id: self.service_id.clone(),
            service: self.service_name.clone(),
            tags: self.service_tags.clone(),
            address: self.service_address.clone(),
            port: self.service_port,
            create_index: self.create_index,
            modify_index: self.modify_index,
        }
    }

    /// Strips the joined node fields so only the service columns remain.
    pub(crate) fn stored(mut self) -> Self {
        self.id.clear();
        self.address.clear();
        self.tagged_addresses.clear();
        self.node_meta.clear();
        self
    }
}

/// Services registered on one node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeServices {
    pub node: Node,
    pub services: BTreeMap<String, NodeService>,
}

// ── Health checks ─────────────────────────────────────────────────

/// Health state of a check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Passing,
    Warning,
    /// Checks with no explicit status start out critical.
    #[default]
    Critical,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passing => "passing",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

impl std::str::FromStr for HealthStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "passing" => Ok(Self::Passing),
            "warning" => Ok(Self::Warning),
            "critical" => Ok(Self::Critical),
            other => Err(format!("invalid health status {other:?}")),
        }
    }
}

/// Status filter for check queries; `Any` matches every status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    Any,
    Only(HealthStatus),
}

impl StatusFilter {
    pub fn matches(&self, status: HealthStatus) -> bool {
        match self {
            Self::Any => true,
            Self::Only(want) => *want == status,
        }
    }
}

impl std::str::FromStr for StatusFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "any" {
            return Ok(Self::Any);
        }
        s.parse().map(Self::Only)
    }
}

/// A health check bound to a node and optionally to one of its services.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthCheck {
    pub node: String,
    pub check_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: HealthStatus,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub output: String,
    /// Empty for node-level checks.
    #[serde(default)]
    pub service_id: String,
    /// Copied from the referenced service at registration time.
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub create_index: u64,
    #[serde(default)]
    pub modify_index: u64,
}

impl HealthCheck {
    /// Compares everything except the raft indexes.
    pub fn is_same(&self, other: &HealthCheck) -> bool {
        self.node == other.node
            && self.check_id == other.check_id
            && self.name == other.name
            && self.status == other.status
            && self.notes == other.notes
            && self.output == other.output
            && self.service_id == other.service_id
            && self.service_name == other.service_name
    }
}

// ── Registration ──────────────────────────────────────────────────

/// A combined node / service / check registration applied atomically.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RegisterRequest {
    #[serde(default)]
    pub id: String,
    pub node: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub tagged_addresses: BTreeMap<String, String>,
    #[serde(default)]
    pub node_meta: BTreeMap<String, String>,
    #[serde(default)]
    pub service: Option<NodeService>,
    #[serde(default)]
    pub check: Option<HealthCheck>,
    #[serde(default)]
    pub checks: Vec<HealthCheck>,
}

impl RegisterRequest {
    /// Whether applying this request would alter the stored node.
    pub fn changes_node(&self, node: Option<&Node>) -> bool {
        let Some(node) = node else {
            return true;
        };
        self.id != node.id
            || self.node != node.node
            || self.address != node.address
            || self.tagged_addresses != node.tagged_addresses
            || self.node_meta != node.meta
    }

    pub(crate) fn to_node(&self) -> Node {
        Node {
            id: self.id.clone(),
            node: self.node.clone(),
            address: self.address.clone(),
            tagged_addresses: self.tagged_addresses.clone(),
            meta: self.node_meta.clone(),
            ..Default::default()
        }
    }
}

/// A service instance together with its node and every relevant check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckServiceNode {
    pub node: Node,
    pub service: NodeService,
    pub checks: Vec<HealthCheck>,
}

/// Everything known about a node, as returned by the node dump queries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeInfo {
    pub id: String,
    pub node: String,
    pub address: String,
    pub tagged_addresses: BTreeMap<String, String>,
    pub meta: BTreeMap<String, String>,
    pub services: Vec<NodeService>,
    pub checks: Vec<HealthCheck>,
}

// ── Coordinates ───────────────────────────────────────────────────

/// Vivaldi-style network coordinate.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NetworkCoordinate {
    pub vec: Vec<f64>,
    pub error: f64,
    pub adjustment: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Coordinate {
    pub node: String,
    pub coord: NetworkCoordinate,
}

// ── KV ────────────────────────────────────────────────────────────

/// A key/value entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DirEntry {
    pub key: String,
    #[serde(default)]
    pub value: Vec<u8>,
    #[serde(default)]
    pub flags: u64,
    /// Session currently holding the lock on this key.
    #[serde(default)]
    pub session: Option<String>,
    #[serde(default)]
    pub lock_index: u64,
    #[serde(default)]
    pub create_index: u64,
    #[serde(default)]
    pub modify_index: u64,
}

impl DirEntry {
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            ..Default::default()
        }
    }

    /// Equal payload and lock state; indexes are not compared.
    pub(crate) fn same_contents(&self, other: &DirEntry) -> bool {
        self.key == other.key
            && self.value == other.value
            && self.flags == other.flags
            && self.session == other.session
            && self.lock_index == other.lock_index
    }

    /// Clone with the value blanked, as returned by mutating txn verbs.
    pub fn without_value(&self) -> DirEntry {
        DirEntry {
            value: Vec::new(),
            ..self.clone()
        }
    }

    pub(crate) fn session_id(&self) -> Option<&str> {
        self.session.as_deref().filter(|s| !s.is_empty())
    }
}

/// Marker left behind when a KV key is deleted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tombstone {
    pub key: String,
    pub index: u64,
}

// ── Sessions ──────────────────────────────────────────────────────

/// What happens to locks held by a session when it is destroyed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionBehavior {
    #[default]
    Release,
    Delete,
}

/// Upper bound applied to a session's lock delay.
pub const MAX_LOCK_DELAY: Duration = Duration::from_secs(60);

/// A session binding a set of health checks to lock ownership.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub node: String,
    #[serde(default)]
    pub checks: Vec<String>,
    #[serde(default)]
    pub lock_delay: Duration,
    #[serde(default)]
    pub behavior: SessionBehavior,
    #[serde(default)]
    pub ttl: Option<Duration>,
    #[serde(default)]
    pub create_index: u64,
    #[serde(default)]
    pub modify_index: u64,
}

/// Join row linking a `(node, check)` pair to a session that depends on it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionCheck {
    pub node: String,
    pub check_id: String,
    pub session: String,
}

// ── ACLs ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AclType {
    #[default]
    Client,
    Management,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Acl {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub acl_type: AclType,
    #[serde(default)]
    pub rules: String,
    #[serde(default)]
    pub create_index: u64,
    #[serde(default)]
    pub modify_index: u64,
}

// ── Prepared queries ──────────────────────────────────────────────

/// Failover policy for a prepared query.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueryFailover {
    #[serde(default)]
    pub nearest_n: u32,
    #[serde(default)]
    pub datacenters: Vec<String>,
}

/// The service selection part of a prepared query.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceQuery {
    pub service: String,
    #[serde(default)]
    pub failover: QueryFailover,
    #[serde(default)]
    pub only_passing: bool,
    #[serde(default)]
    pub near: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub node_meta: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueryDns {
    #[serde(default)]
    pub ttl: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    /// The query name is a prefix matched against lookups.
    #[default]
    NamePrefixMatch,
}

/// Turns a prepared query into a template that answers any name sharing its prefix.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueryTemplate {
    #[serde(default, rename = "type")]
    pub kind: TemplateKind,
    /// Optional regexp applied to the full lookup name; captures feed `${match(N)}`.
    #[serde(default)]
    pub regexp: String,
}

/// A stored prepared query.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PreparedQuery {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub session: Option<String>,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub template: Option<QueryTemplate>,
    pub service: ServiceQuery,
    #[serde(default)]
    pub dns: QueryDns,
    #[serde(default)]
    pub create_index: u64,
    #[serde(default)]
    pub modify_index: u64,
}

// ── Autopilot ─────────────────────────────────────────────────────

/// Cluster autopilot tunables, stored as a singleton row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AutopilotConfig {
    /// Remove dead servers when a new server joins.
    pub cleanup_dead_servers: bool,
    pub last_contact_threshold: Duration,
    pub max_trailing_logs: u64,
    pub server_stabilization_time: Duration,
    #[serde(default)]
    pub create_index: u64,
    #[serde(default)]
    pub modify_index: u64,
}

impl Default for AutopilotConfig {
    fn default() -> Self {
        Self {
            cleanup_dead_servers: true,
            last_contact_threshold: Duration::from_millis(200),
            max_trailing_logs: 250,
            server_stabilization_time: Duration::from_secs(10),
            create_index: 0,
            modify_index: 0,
        }
    }
}

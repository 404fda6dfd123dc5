//! Envoy resource model.
//!
//! Only the fields the patchers read or write are typed. Everything else
//! lands in each message's `extra` map and is written back untouched, so a
//! resource survives a decode/encode cycle even when it carries settings
//! this crate knows nothing about. Field names follow Envoy's snake_case
//! JSON as produced by the admin `config_dump` endpoint.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{XdsError, XdsResult};

// ── Well-known names ──────────────────────────────────────────────

pub const HTTP_CONNECTION_MANAGER: &str = "envoy.filters.network.http_connection_manager";
pub const TCP_PROXY: &str = "envoy.filters.network.tcp_proxy";
pub const HTTP_ROUTER: &str = "envoy.filters.http.router";
pub const AGGREGATE_CLUSTER: &str = "envoy.clusters.aggregate";

/// Cluster receiving inbound traffic for the local service.
pub const LOCAL_APP_CLUSTER: &str = "local_app";
/// Envoy ID of the inbound listener.
pub const PUBLIC_LISTENER: &str = "public_listener";
/// Envoy ID of the transparent-proxy outbound listener.
pub const OUTBOUND_LISTENER: &str = "outbound_listener";

// ── Type URLs ─────────────────────────────────────────────────────

pub const LISTENER_TYPE: &str = "type.googleapis.com/envoy.config.listener.v3.Listener";
pub const ROUTE_TYPE: &str = "type.googleapis.com/envoy.config.route.v3.RouteConfiguration";
pub const CLUSTER_TYPE: &str = "type.googleapis.com/envoy.config.cluster.v3.Cluster";
pub const ENDPOINT_TYPE: &str =
    "type.googleapis.com/envoy.config.endpoint.v3.ClusterLoadAssignment";

pub const HTTP_CONNECTION_MANAGER_TYPE: &str = "type.googleapis.com/envoy.extensions.filters.network.http_connection_manager.v3.HttpConnectionManager";
pub const TCP_PROXY_TYPE: &str =
    "type.googleapis.com/envoy.extensions.filters.network.tcp_proxy.v3.TcpProxy";
pub const AGGREGATE_CLUSTER_TYPE: &str =
    "type.googleapis.com/envoy.extensions.clusters.aggregate.v3.ClusterConfig";
pub const UPSTREAM_TLS_CONTEXT_TYPE: &str =
    "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.UpstreamTlsContext";

// ── Typed config ──────────────────────────────────────────────────

/// A packed `google.protobuf.Any`: the `@type` URL plus the message fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypedConfig {
    #[serde(rename = "@type")]
    pub type_url: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl TypedConfig {
    /// Pack `message` under `type_url`.
    pub fn pack<T: Serialize>(type_url: &str, message: &T) -> XdsResult<Self> {
        match serde_json::to_value(message)? {
            Value::Object(fields) => Ok(Self {
                type_url: type_url.to_string(),
                fields,
            }),
            other => Err(XdsError::TypeMismatch {
                expected: type_url.to_string(),
                got: other.to_string(),
            }),
        }
    }

    /// Unpack into `T` if this config is a `type_url`.
    pub fn unpack<T: DeserializeOwned>(&self, type_url: &str) -> XdsResult<T> {
        if self.type_url != type_url {
            return Err(XdsError::TypeMismatch {
                expected: type_url.to_string(),
                got: self.type_url.clone(),
            });
        }
        Ok(serde_json::from_value(Value::Object(self.fields.clone()))?)
    }

    pub fn is(&self, type_url: &str) -> bool {
        self.type_url == type_url
    }
}

// ── Listeners ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Listener {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub filter_chains: Vec<FilterChain>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_balance_config: Option<ConnectionBalanceConfig>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionBalanceConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exact_balance: Option<ExactBalance>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExactBalance {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterChain {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_chain_match: Option<FilterChainMatch>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<Filter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport_socket: Option<TransportSocket>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterChainMatch {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub server_names: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub prefix_ranges: Vec<CidrRange>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CidrRange {
    pub address_prefix: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix_len: Option<u32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A network filter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Filter {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub typed_config: Option<TypedConfig>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Filter {
    pub fn new(name: &str, typed_config: TypedConfig) -> Self {
        Self {
            name: name.to_string(),
            typed_config: Some(typed_config),
            extra: Map::new(),
        }
    }

    /// Decoded HTTP connection manager, if this is one.
    pub fn http_connection_manager(&self) -> Option<HttpConnectionManager> {
        if self.name != HTTP_CONNECTION_MANAGER {
            return None;
        }
        self.typed_config
            .as_ref()?
            .unpack(HTTP_CONNECTION_MANAGER_TYPE)
            .ok()
    }

    /// Decoded TCP proxy config, if this is one.
    pub fn tcp_proxy(&self) -> Option<TcpProxy> {
        self.typed_config.as_ref()?.unpack(TCP_PROXY_TYPE).ok()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConnectionManager {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stat_prefix: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rds: Option<Rds>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route_config: Option<RouteConfiguration>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub http_filters: Vec<HttpFilter>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub strip_any_host_port: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl HttpConnectionManager {
    /// Re-pack as a network filter.
    pub fn to_filter(&self) -> XdsResult<Filter> {
        Ok(Filter::new(
            HTTP_CONNECTION_MANAGER,
            TypedConfig::pack(HTTP_CONNECTION_MANAGER_TYPE, self)?,
        ))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Rds {
    pub route_config_name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpFilter {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub typed_config: Option<TypedConfig>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl HttpFilter {
    pub fn new(name: &str, typed_config: TypedConfig) -> Self {
        Self {
            name: name.to_string(),
            typed_config: Some(typed_config),
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpProxy {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stat_prefix: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub cluster: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ── Clusters ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Cluster {
    pub name: String,
    /// Discovery type, e.g. `EDS` or `LOGICAL_DNS`.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub discovery_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_type: Option<CustomClusterType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lb_policy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns_lookup_family: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_assignment: Option<ClusterLoadAssignment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport_socket: Option<TransportSocket>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Cluster {
    /// Child cluster names if this is an aggregate cluster.
    pub fn aggregate_clusters(&self) -> Option<Vec<String>> {
        let custom = self.cluster_type.as_ref()?;
        if custom.name != AGGREGATE_CLUSTER {
            return None;
        }
        let config: AggregateClusterConfig = custom
            .typed_config
            .as_ref()?
            .unpack(AGGREGATE_CLUSTER_TYPE)
            .ok()?;
        Some(config.clusters)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomClusterType {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub typed_config: Option<TypedConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregateClusterConfig {
    pub clusters: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSocket {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub typed_config: Option<TypedConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamTlsContext {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub sni: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ── Endpoints ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterLoadAssignment {
    pub cluster_name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub endpoints: Vec<LocalityLbEndpoints>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalityLbEndpoints {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub lb_endpoints: Vec<LbEndpoint>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LbEndpoint {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<Endpoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_status: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoint {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Address {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket_address: Option<SocketAddress>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Address {
    pub fn socket(address: &str, port_value: u32) -> Self {
        Self {
            socket_address: Some(SocketAddress {
                address: address.to_string(),
                port_value,
                extra: Map::new(),
            }),
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketAddress {
    pub address: String,
    pub port_value: u32,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ── Routes ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteConfiguration {
    pub name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub virtual_hosts: Vec<VirtualHost>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VirtualHost {
    pub name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub domains: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<Route>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Route {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(rename = "match", skip_serializing_if = "Option::is_none")]
    pub route_match: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<RouteAction>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteAction {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weighted_clusters: Option<WeightedClusters>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_rewrite_literal: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_host_rewrite: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_rewrite_header: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_rewrite_path_regex: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RouteAction {
    /// Drop whichever host rewrite directive is set. Returns whether one was.
    pub fn clear_host_rewrite(&mut self) -> bool {
        self.host_rewrite_literal.take().is_some()
            | self.auto_host_rewrite.take().is_some()
            | self.host_rewrite_header.take().is_some()
            | self.host_rewrite_path_regex.take().is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightedClusters {
    pub clusters: Vec<ClusterWeight>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterWeight {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

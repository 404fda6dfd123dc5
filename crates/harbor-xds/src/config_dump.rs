//! Reading resources out of a running Envoy's admin API.
//!
//! [`parse_config_dump`] takes the body of `/config_dump` and
//! [`parse_clusters`] the body of `/clusters?format=json`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{XdsError, XdsResult};
use crate::indexed::IndexedResources;
use crate::resource::{Address, Cluster, ClusterLoadAssignment, Listener, RouteConfiguration};

const LISTENERS_DUMP: &str = "type.googleapis.com/envoy.admin.v3.ListenersConfigDump";
const CLUSTERS_DUMP: &str = "type.googleapis.com/envoy.admin.v3.ClustersConfigDump";
const ROUTES_DUMP: &str = "type.googleapis.com/envoy.admin.v3.RoutesConfigDump";
const ENDPOINTS_DUMP: &str = "type.googleapis.com/envoy.admin.v3.EndpointsConfigDump";

const HEALTHY: &str = "HEALTHY";

#[derive(Deserialize)]
struct ConfigDump {
    #[serde(default)]
    configs: Vec<Value>,
}

#[derive(Deserialize)]
struct ListenersDump {
    #[serde(default)]
    dynamic_listeners: Vec<DynamicListener>,
}

#[derive(Deserialize)]
struct DynamicListener {
    #[serde(default)]
    active_state: Option<ActiveListener>,
}

#[derive(Deserialize)]
struct ActiveListener {
    listener: Listener,
}

#[derive(Deserialize)]
struct ClustersDump {
    #[serde(default)]
    dynamic_active_clusters: Vec<DynamicCluster>,
}

#[derive(Deserialize)]
struct DynamicCluster {
    cluster: Cluster,
}

#[derive(Deserialize)]
struct RoutesDump {
    #[serde(default)]
    dynamic_route_configs: Vec<DynamicRoute>,
}

#[derive(Deserialize)]
struct DynamicRoute {
    route_config: RouteConfiguration,
}

#[derive(Deserialize)]
struct EndpointsDump {
    #[serde(default)]
    dynamic_endpoint_configs: Vec<DynamicEndpoints>,
}

#[derive(Deserialize)]
struct DynamicEndpoints {
    endpoint_config: ClusterLoadAssignment,
}

fn decode<T: DeserializeOwned>(type_url: &str, config: Value) -> XdsResult<T> {
    serde_json::from_value(config).map_err(|e| XdsError::ConfigDump(format!("{type_url}: {e}")))
}

/// Dumped resources carry their own `@type`, which is not a resource field.
fn strip_type(extra: &mut Map<String, Value>) {
    extra.remove("@type");
}

/// Index the dynamic listeners, clusters, routes and endpoints of a config
/// dump. Sections of any other type are ignored.
pub fn parse_config_dump(raw: &str) -> XdsResult<IndexedResources> {
    let dump: ConfigDump = serde_json::from_str(raw)?;
    let mut resources = IndexedResources::new();

    for config in dump.configs {
        let type_url = config
            .get("@type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        match type_url.as_str() {
            LISTENERS_DUMP => {
                let dump: ListenersDump = decode(&type_url, config)?;
                for mut listener in dump
                    .dynamic_listeners
                    .into_iter()
                    .filter_map(|l| l.active_state)
                    .map(|s| s.listener)
                {
                    strip_type(&mut listener.extra);
                    resources.insert_listener(listener);
                }
            }
            CLUSTERS_DUMP => {
                let dump: ClustersDump = decode(&type_url, config)?;
                for mut cluster in dump.dynamic_active_clusters.into_iter().map(|c| c.cluster) {
                    strip_type(&mut cluster.extra);
                    resources.insert_cluster(cluster);
                }
            }
            ROUTES_DUMP => {
                let dump: RoutesDump = decode(&type_url, config)?;
                for mut route in dump.dynamic_route_configs.into_iter().map(|r| r.route_config) {
                    strip_type(&mut route.extra);
                    resources.insert_route(route);
                }
            }
            ENDPOINTS_DUMP => {
                let dump: EndpointsDump = decode(&type_url, config)?;
                for mut assignment in dump
                    .dynamic_endpoint_configs
                    .into_iter()
                    .map(|e| e.endpoint_config)
                {
                    strip_type(&mut assignment.extra);
                    resources.insert_endpoints(assignment);
                }
            }
            other => debug!(type_url = other, "skipping config dump section"),
        }
    }

    debug!(
        listeners = resources.listeners.len(),
        routes = resources.routes.len(),
        clusters = resources.clusters.len(),
        endpoints = resources.endpoints.len(),
        "config dump parsed"
    );
    Ok(resources)
}

// ── /clusters ─────────────────────────────────────────────────────

/// Body of `/clusters?format=json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminClusters {
    pub cluster_statuses: Vec<ClusterStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterStatus {
    pub name: String,
    pub host_statuses: Vec<HostStatus>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostStatus {
    pub address: Option<Address>,
    pub health_status: Option<HostHealthStatus>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostHealthStatus {
    pub eds_health_status: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl HostStatus {
    pub fn is_healthy(&self) -> bool {
        self.health_status
            .as_ref()
            .and_then(|h| h.eds_health_status.as_deref())
            == Some(HEALTHY)
    }
}

impl AdminClusters {
    pub fn cluster(&self, name: &str) -> Option<&ClusterStatus> {
        self.cluster_statuses.iter().find(|c| c.name == name)
    }

    /// Healthy hosts of `name`; zero when the cluster is unknown.
    pub fn healthy_endpoints(&self, name: &str) -> usize {
        self.cluster(name)
            .map_or(0, |c| c.host_statuses.iter().filter(|h| h.is_healthy()).count())
    }
}

pub fn parse_clusters(raw: &str) -> XdsResult<AdminClusters> {
    Ok(serde_json::from_str(raw)?)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn indexes_dynamic_resources() {
        let raw = json!({
            "configs": [
                {"@type": "type.googleapis.com/envoy.admin.v3.BootstrapConfigDump", "bootstrap": {}},
                {
                    "@type": LISTENERS_DUMP,
                    "dynamic_listeners": [
                        {"name": "db:127.0.0.1:9191", "active_state": {"version_info": "1", "listener": {
                            "@type": "type.googleapis.com/envoy.config.listener.v3.Listener",
                            "name": "db:127.0.0.1:9191",
                            "filter_chains": [{"filters": [{"name": "envoy.filters.network.tcp_proxy"}]}]
                        }}},
                        {"name": "draining", "warming_state": {}}
                    ]
                },
                {
                    "@type": CLUSTERS_DUMP,
                    "static_clusters": [{"cluster": {"name": "self_admin"}}],
                    "dynamic_active_clusters": [{"cluster": {"name": "db.default.dc1.internal.trust", "type": "EDS"}}]
                },
                {"@type": ROUTES_DUMP, "dynamic_route_configs": [{"route_config": {"name": "db"}}]},
                {"@type": ENDPOINTS_DUMP, "dynamic_endpoint_configs": [{"endpoint_config": {
                    "cluster_name": "db.default.dc1.internal.trust",
                    "endpoints": [{"lb_endpoints": [{"endpoint": {"address": {"socket_address": {"address": "10.0.0.2", "port_value": 20000}}}}]}]
                }}]}
            ]
        });
        let resources = parse_config_dump(&raw.to_string()).unwrap();
        assert_eq!(resources.len(), 4);

        let listener = &resources.listeners["db:127.0.0.1:9191"];
        assert!(!listener.extra.contains_key("@type"));
        assert_eq!(listener.filter_chains[0].filters.len(), 1);

        let cluster = &resources.clusters["db.default.dc1.internal.trust"];
        assert_eq!(cluster.discovery_type.as_deref(), Some("EDS"));
        assert!(!resources.clusters.contains_key("self_admin"));
        assert!(resources.routes.contains_key("db"));
        assert!(resources.endpoints.contains_key("db.default.dc1.internal.trust"));
    }

    #[test]
    fn malformed_section_names_its_type() {
        let raw = json!({"configs": [{"@type": ROUTES_DUMP, "dynamic_route_configs": [{"route_config": 7}]}]});
        let err = parse_config_dump(&raw.to_string()).unwrap_err();
        assert!(matches!(err, XdsError::ConfigDump(ref msg) if msg.starts_with(ROUTES_DUMP)));
        assert!(parse_config_dump("not json").is_err());
    }

    #[test]
    fn counts_healthy_hosts() {
        let clusters = parse_clusters(
            &json!({"cluster_statuses": [{
                "name": "db.default.dc1.internal.trust",
                "added_via_api": true,
                "host_statuses": [
                    {"health_status": {"eds_health_status": "HEALTHY"}},
                    {"health_status": {"eds_health_status": "UNHEALTHY"}},
                    {"health_status": {"eds_health_status": "HEALTHY"}}
                ]
            }]})
            .to_string(),
        )
        .unwrap();
        assert_eq!(clusters.healthy_endpoints("db.default.dc1.internal.trust"), 2);
        assert_eq!(clusters.healthy_endpoints("web.default.dc1.internal.trust"), 0);
    }
}

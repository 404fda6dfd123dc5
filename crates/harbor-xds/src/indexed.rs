//! Resources grouped by type and keyed by name.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::resource::{
    CLUSTER_TYPE, Cluster, ClusterLoadAssignment, ENDPOINT_TYPE, LISTENER_TYPE, Listener,
    ROUTE_TYPE, RouteConfiguration,
};

/// The four xDS resource types an extension can see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceType {
    Listener,
    Route,
    Cluster,
    Endpoint,
}

impl ResourceType {
    pub fn type_url(self) -> &'static str {
        match self {
            ResourceType::Listener => LISTENER_TYPE,
            ResourceType::Route => ROUTE_TYPE,
            ResourceType::Cluster => CLUSTER_TYPE,
            ResourceType::Endpoint => ENDPOINT_TYPE,
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResourceType::Listener => "listener",
            ResourceType::Route => "route",
            ResourceType::Cluster => "cluster",
            ResourceType::Endpoint => "endpoint",
        })
    }
}

/// Listeners, routes, clusters and endpoints of one proxy.
///
/// Listeners, routes and clusters are keyed by name (a cluster's name is its
/// SNI); endpoints by the cluster they belong to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexedResources {
    pub listeners: BTreeMap<String, Listener>,
    pub routes: BTreeMap<String, RouteConfiguration>,
    pub clusters: BTreeMap<String, Cluster>,
    pub endpoints: BTreeMap<String, ClusterLoadAssignment>,
}

impl IndexedResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_listener(&mut self, listener: Listener) -> Option<Listener> {
        self.listeners.insert(listener.name.clone(), listener)
    }

    pub fn insert_route(&mut self, route: RouteConfiguration) -> Option<RouteConfiguration> {
        self.routes.insert(route.name.clone(), route)
    }

    pub fn insert_cluster(&mut self, cluster: Cluster) -> Option<Cluster> {
        self.clusters.insert(cluster.name.clone(), cluster)
    }

    pub fn insert_endpoints(
        &mut self,
        assignment: ClusterLoadAssignment,
    ) -> Option<ClusterLoadAssignment> {
        self.endpoints
            .insert(assignment.cluster_name.clone(), assignment)
    }

    /// Names of every resource of `kind`, sorted.
    pub fn names(&self, kind: ResourceType) -> Vec<&str> {
        match kind {
            ResourceType::Listener => self.listeners.keys().map(String::as_str).collect(),
            ResourceType::Route => self.routes.keys().map(String::as_str).collect(),
            ResourceType::Cluster => self.clusters.keys().map(String::as_str).collect(),
            ResourceType::Endpoint => self.endpoints.keys().map(String::as_str).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.len() + self.routes.len() + self.clusters.len() + self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

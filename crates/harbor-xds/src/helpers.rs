//! Queries and edits shared by the built-in extensions.

use std::collections::BTreeSet;
use std::fmt;

use crate::error::{XdsError, XdsResult};
use crate::resource::{
    Cluster, Filter, FilterChain, HttpConnectionManager, HttpFilter,
    LOCAL_APP_CLUSTER, Listener, OUTBOUND_LISTENER, PUBLIC_LISTENER, RouteConfiguration,
    TransportSocket, TypedConfig, UPSTREAM_TLS_CONTEXT_TYPE, UpstreamTlsContext,
};

/// The part of a listener name before the first `:`, or `""` if there is
/// no `:`.
pub fn get_listener_envoy_id(listener: &Listener) -> &str {
    listener
        .name
        .split_once(':')
        .map_or("", |(envoy_id, _)| envoy_id)
}

pub fn is_local_app_cluster(cluster: &Cluster) -> bool {
    cluster.name == LOCAL_APP_CLUSTER
}

pub fn is_inbound_public_listener(listener: &Listener) -> bool {
    get_listener_envoy_id(listener) == PUBLIC_LISTENER
}

pub fn is_outbound_tproxy_listener(listener: &Listener) -> bool {
    get_listener_envoy_id(listener) == OUTBOUND_LISTENER
}

/// A transparent-proxy chain belongs to an upstream when one of its prefix
/// ranges is exactly the upstream's virtual IP.
pub fn filter_chain_tproxy_match(vip: &str, chain: &FilterChain) -> bool {
    chain.filter_chain_match.as_ref().is_some_and(|m| {
        m.prefix_ranges
            .iter()
            .any(|range| range.address_prefix == vip)
    })
}

/// First server name of the chain match.
pub fn get_sni(chain: &FilterChain) -> Option<&str> {
    chain
        .filter_chain_match
        .as_ref()?
        .server_names
        .first()
        .map(String::as_str)
}

/// Clusters a network filter sends traffic to.
///
/// An HTTP connection manager that uses RDS yields nothing here; its
/// clusters live in the route configuration.
pub fn filter_cluster_names(filter: &Filter) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    if let Some(hcm) = filter.http_connection_manager() {
        if hcm.rds.is_some() {
            return names;
        }
        if let Some(route_config) = &hcm.route_config {
            names.extend(route_cluster_names(route_config));
        }
    }
    if let Some(proxy) = filter.tcp_proxy() {
        if !proxy.cluster.is_empty() {
            names.insert(proxy.cluster);
        }
    }
    names
}

/// Every cluster a route configuration points at, weighted targets included.
pub fn route_cluster_names(route: &RouteConfiguration) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    for action in route
        .virtual_hosts
        .iter()
        .flat_map(|vh| &vh.routes)
        .filter_map(|r| r.route.as_ref())
    {
        if let Some(cluster) = action.cluster.as_ref().filter(|c| !c.is_empty()) {
            names.insert(cluster.clone());
        }
        if let Some(weighted) = &action.weighted_clusters {
            names.extend(weighted.clusters.iter().map(|c| c.name.clone()));
        }
    }
    names
}

pub fn get_http_connection_manager(filter: &Filter) -> XdsResult<HttpConnectionManager> {
    filter
        .http_connection_manager()
        .ok_or(XdsError::MissingHttpConnectionManager)
}

// ── HTTP filter insertion ─────────────────────────────────────────

/// Where [`insert_http_filter`] puts the new filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertLocation {
    First,
    Last,
    BeforeFirstMatch,
    AfterFirstMatch,
    BeforeLastMatch,
    AfterLastMatch,
}

impl fmt::Display for InsertLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertOptions {
    pub location: InsertLocation,
    /// Filter the `*Match` locations look for.
    pub filter_name: String,
}

impl InsertOptions {
    pub fn new(location: InsertLocation, filter_name: &str) -> Self {
        Self {
            location,
            filter_name: filter_name.to_string(),
        }
    }
}

fn locate_insert_index(filters: &[HttpFilter], opts: &InsertOptions) -> Option<usize> {
    let matches = |f: &HttpFilter| f.name == opts.filter_name;
    match opts.location {
        InsertLocation::First => Some(0),
        InsertLocation::Last => Some(filters.len()),
        InsertLocation::BeforeFirstMatch => filters.iter().position(matches),
        InsertLocation::AfterFirstMatch => filters.iter().position(matches).map(|i| i + 1),
        InsertLocation::BeforeLastMatch => filters.iter().rposition(matches),
        InsertLocation::AfterLastMatch => filters.iter().rposition(matches).map(|i| i + 1),
    }
}

/// Insert `http_filter` into the first HTTP connection manager among
/// `filters`, returning the rewritten filter list.
pub fn insert_http_filter(
    filters: &[Filter],
    http_filter: HttpFilter,
    opts: &InsertOptions,
) -> XdsResult<Vec<Filter>> {
    let mut filters = filters.to_vec();
    let (position, mut hcm) = filters
        .iter()
        .enumerate()
        .find_map(|(i, f)| f.http_connection_manager().map(|hcm| (i, hcm)))
        .ok_or(XdsError::MissingHttpConnectionManager)?;

    let index =
        locate_insert_index(&hcm.http_filters, opts).ok_or_else(|| XdsError::InsertLocation {
            filter: http_filter.name.clone(),
            location: opts.location.to_string(),
            target: opts.filter_name.clone(),
        })?;
    hcm.http_filters.insert(index, http_filter);

    let mut rebuilt = hcm.to_filter()?;
    rebuilt.extra = std::mem::take(&mut filters[position].extra);
    filters[position] = rebuilt;
    Ok(filters)
}

/// A `tls` transport socket carrying `context`.
pub fn make_upstream_tls_transport_socket(
    context: &UpstreamTlsContext,
) -> XdsResult<TransportSocket> {
    Ok(TransportSocket {
        name: "tls".to_string(),
        typed_config: Some(TypedConfig::pack(UPSTREAM_TLS_CONTEXT_TYPE, context)?),
    })
}

//! Checks that a proxy's resources can actually reach one upstream.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::debug;

use crate::builtin::validate::{self, Report, Validate};
use crate::config_dump::AdminClusters;
use crate::configuration::{
    CompoundServiceName, EnvoyExtensionSpec, ExtensionConfiguration, ProxyKind, UpstreamData,
};
use crate::error::XdsResult;
use crate::extension::{BasicExtension, EnvoyExtension};
use crate::indexed::IndexedResources;
use crate::plugin::Plugin;

/// Envoy ID of an upstream: its name, qualified by peer if it is imported.
pub fn upstream_envoy_id(service: &CompoundServiceName, peer: Option<&str>) -> String {
    match peer.filter(|p| !p.is_empty()) {
        Some(peer) => format!("{}?peer={peer}", service.name),
        None => service.name.clone(),
    }
}

/// Run the validate extension for `service` over `resources` and report
/// every structural problem found.
///
/// Every cluster name counts as an SNI of the upstream. `vip` enables
/// transparent-proxy listener matching; `clusters` enables the healthy
/// endpoint check.
pub fn validate_upstream(
    resources: &IndexedResources,
    clusters: Option<&AdminClusters>,
    service: &CompoundServiceName,
    peer: Option<&str>,
    vip: Option<&str>,
) -> XdsResult<()> {
    let envoy_id = upstream_envoy_id(service, peer);
    let sni: BTreeSet<String> = resources.clusters.keys().cloned().collect();

    let mut arguments = Map::new();
    arguments.insert("envoyID".into(), Value::String(envoy_id.clone()));
    let config = ExtensionConfiguration {
        envoy_extension: EnvoyExtensionSpec {
            name: validate::NAME.into(),
            required: true,
            arguments,
        },
        service_name: service.clone(),
        kind: ProxyKind::ConnectProxy,
        upstreams: BTreeMap::from([(
            service.clone(),
            UpstreamData {
                vip: vip.unwrap_or_default().to_string(),
                sni,
                envoy_id: envoy_id.clone(),
                outgoing_proxy_kind: ProxyKind::ConnectProxy,
            },
        )]),
    };

    let report = Arc::new(Mutex::new(Report::default()));
    let shared = report.clone();
    let mut extension = BasicExtension::with_constructor(move |config| {
        Ok(Box::new(Validate::from_config(config, shared.clone())?) as Box<dyn Plugin>)
    });
    extension.validate(&config)?;
    extension.extend(&mut resources.clone(), &config)?;

    let report = report.lock().clone();
    debug!(
        envoy_id = %envoy_id,
        listener = report.listener_found,
        route = report.route_found,
        clusters = report.clusters.len(),
        "upstream resources visited"
    );
    report.check(&envoy_id, clusters)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envoy_id_includes_peer() {
        let db = CompoundServiceName::new("db");
        assert_eq!(upstream_envoy_id(&db, None), "db");
        assert_eq!(upstream_envoy_id(&db, Some("")), "db");
        assert_eq!(upstream_envoy_id(&db, Some("east")), "db?peer=east");
    }
}

//! Diagnostic extension that checks an upstream is fully wired.
//!
//! It never changes a resource. Every listener, route and cluster the
//! dispatcher hands it is noted in a shared [`Report`], which is then
//! checked against the expected shape (and optionally live endpoint health)
//! by [`Report::check`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::args::Arguments;
use crate::config_dump::AdminClusters;
use crate::configuration::ExtensionConfiguration;
use crate::error::{ErrorList, XdsError, XdsResult};
use crate::helpers::{filter_cluster_names, route_cluster_names};
use crate::plugin::Plugin;
use crate::resource::{Cluster, Filter, Listener, RouteConfiguration};

pub const NAME: &str = "builtin/proxy/validate";

/// What the validate extension saw for one upstream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Report {
    pub listener_found: bool,
    pub uses_rds: bool,
    pub route_found: bool,
    /// Clusters referenced by matched filters and routes.
    pub referenced: BTreeSet<String>,
    /// Matched clusters, with their children if aggregate.
    pub clusters: BTreeMap<String, Option<Vec<String>>>,
}

impl Report {
    /// Check the report for `envoy_id`. Endpoint health is only checked
    /// when `admin` is given.
    pub fn check(&self, envoy_id: &str, admin: Option<&AdminClusters>) -> XdsResult<()> {
        let mut errors = ErrorList::new();
        let fail = |errors: &mut ErrorList, msg: String| errors.push(XdsError::Validation(msg));

        if !self.listener_found {
            fail(&mut errors, format!("no listener for upstream {envoy_id}"));
        }
        if self.uses_rds && !self.route_found {
            fail(&mut errors, format!("no route for upstream {envoy_id}"));
        }
        if self.referenced.is_empty() {
            fail(
                &mut errors,
                format!("no clusters found on route or listener for upstream {envoy_id}"),
            );
        }

        let mut leaves = BTreeSet::new();
        for name in &self.referenced {
            match self.clusters.get(name) {
                None => fail(
                    &mut errors,
                    format!("no cluster {name} for upstream {envoy_id}"),
                ),
                Some(Some(children)) => {
                    for child in children {
                        match self.clusters.get(child) {
                            None => fail(
                                &mut errors,
                                format!("aggregate cluster {name} references missing cluster {child}"),
                            ),
                            Some(None) => {
                                leaves.insert(child.as_str());
                            }
                            Some(Some(_)) => {}
                        }
                    }
                }
                Some(None) => {
                    leaves.insert(name.as_str());
                }
            }
        }

        if let Some(admin) = admin {
            for name in leaves {
                if admin.healthy_endpoints(name) == 0 {
                    fail(&mut errors, format!("no healthy endpoints for cluster {name}"));
                }
            }
        }
        errors.into_result()
    }
}

pub struct Validate {
    pub envoy_id: String,
    report: Arc<Mutex<Report>>,
}

/// Registry constructor; the report is not kept.
pub fn make(config: &ExtensionConfiguration) -> XdsResult<Box<dyn Plugin>> {
    Ok(Box::new(Validate::from_config(config, Arc::default())?))
}

impl Validate {
    pub fn from_config(
        config: &ExtensionConfiguration,
        report: Arc<Mutex<Report>>,
    ) -> XdsResult<Self> {
        let mut args = Arguments::new(config.arguments());
        let envoy_id = args.required_string("envoyID");
        args.finish(Self { envoy_id, report })
    }
}

impl Plugin for Validate {
    fn can_apply(&self, _config: &ExtensionConfiguration) -> bool {
        true
    }

    fn patch_listener(
        &self,
        _config: &ExtensionConfiguration,
        _listener: &Listener,
    ) -> XdsResult<Option<Listener>> {
        self.report.lock().listener_found = true;
        Ok(None)
    }

    fn patch_filter(
        &self,
        _config: &ExtensionConfiguration,
        filter: &Filter,
    ) -> XdsResult<Option<Filter>> {
        let mut report = self.report.lock();
        if filter
            .http_connection_manager()
            .is_some_and(|hcm| hcm.rds.is_some())
        {
            report.uses_rds = true;
        }
        report.referenced.extend(filter_cluster_names(filter));
        Ok(None)
    }

    fn patch_route(
        &self,
        _config: &ExtensionConfiguration,
        route: &RouteConfiguration,
    ) -> XdsResult<Option<RouteConfiguration>> {
        let mut report = self.report.lock();
        report.route_found = true;
        report.referenced.extend(route_cluster_names(route));
        Ok(None)
    }

    fn patch_cluster(
        &self,
        _config: &ExtensionConfiguration,
        cluster: &Cluster,
    ) -> XdsResult<Option<Cluster>> {
        self.report
            .lock()
            .clusters
            .insert(cluster.name.clone(), cluster.aggregate_clusters());
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> Report {
        Report {
            listener_found: true,
            uses_rds: true,
            route_found: true,
            referenced: BTreeSet::from(["db".to_string(), "agg".to_string()]),
            clusters: BTreeMap::from([
                ("db".to_string(), None),
                ("agg".to_string(), Some(vec!["db".to_string(), "gone".to_string()])),
            ]),
        }
    }

    #[test]
    fn missing_aggregate_child() {
        let err = report().check("db", None).unwrap_err();
        assert_eq!(
            err.to_string(),
            "aggregate cluster agg references missing cluster gone"
        );
    }

    #[test]
    fn empty_report_lists_every_problem() {
        let empty = Report {
            uses_rds: true,
            ..Default::default()
        };
        let text = empty.check("db?peer=east", None).unwrap_err().to_string();
        assert!(text.contains("no listener for upstream db?peer=east"));
        assert!(text.contains("no route for upstream db?peer=east"));
        assert!(text.contains("no clusters found on route or listener for upstream db?peer=east"));
    }

    #[test]
    fn health_only_checked_with_admin_dump() {
        let mut ok = report();
        ok.clusters.insert("gone".into(), None);
        assert!(ok.check("db", None).is_ok());

        let err = ok.check("db", Some(&AdminClusters::default())).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("no healthy endpoints for cluster db"), "{text}");
        assert!(text.contains("no healthy endpoints for cluster gone"), "{text}");
    }
}

//! Extension lifecycle and resource dispatch.
//!
//! An extension starts out unusable. [`EnvoyExtension::validate`] runs the
//! plugin constructor against a configuration; only once that succeeds may
//! [`EnvoyExtension::extend`] walk the resources. [`BasicExtension`] does the
//! walking and matching, the [`Plugin`] only rewrites what it is handed.

use tracing::debug;

use crate::configuration::{ExtensionConfiguration, ProxyKind};
use crate::error::{ErrorList, XdsError, XdsResult};
use crate::helpers::{filter_chain_tproxy_match, get_listener_envoy_id, get_sni};
use crate::indexed::IndexedResources;
use crate::plugin::{Plugin, PluginConstructor};
use crate::resource::{FilterChain, LOCAL_APP_CLUSTER, Listener, OUTBOUND_LISTENER, PUBLIC_LISTENER};

pub trait EnvoyExtension: Send + Sync {
    /// Decode and check the configuration. Must succeed before `extend`.
    fn validate(&mut self, config: &ExtensionConfiguration) -> XdsResult<()>;

    /// Patch `resources` in place.
    ///
    /// # Panics
    ///
    /// If called before a successful `validate`.
    fn extend(
        &self,
        resources: &mut IndexedResources,
        config: &ExtensionConfiguration,
    ) -> XdsResult<()>;
}

type Constructor = Box<dyn Fn(&ExtensionConfiguration) -> XdsResult<Box<dyn Plugin>> + Send + Sync>;

/// Matches listeners, routes and clusters to a configuration and hands the
/// matching ones to a [`Plugin`].
pub struct BasicExtension {
    constructor: Constructor,
    plugin: Option<Box<dyn Plugin>>,
}

impl BasicExtension {
    pub fn new(constructor: PluginConstructor) -> Self {
        Self::with_constructor(constructor)
    }

    /// Like [`new`](Self::new) but accepts a capturing constructor.
    pub fn with_constructor<F>(constructor: F) -> Self
    where
        F: Fn(&ExtensionConfiguration) -> XdsResult<Box<dyn Plugin>> + Send + Sync + 'static,
    {
        Self {
            constructor: Box::new(constructor),
            plugin: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.plugin.is_some()
    }
}

impl std::fmt::Debug for BasicExtension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicExtension")
            .field("ready", &self.is_ready())
            .finish()
    }
}

impl EnvoyExtension for BasicExtension {
    fn validate(&mut self, config: &ExtensionConfiguration) -> XdsResult<()> {
        self.plugin = None;
        self.plugin = Some((self.constructor)(config)?);
        Ok(())
    }

    fn extend(
        &self,
        resources: &mut IndexedResources,
        config: &ExtensionConfiguration,
    ) -> XdsResult<()> {
        let Some(plugin) = self.plugin.as_deref() else {
            panic!("envoy extension used without being properly constructed");
        };
        if !matches!(
            config.kind,
            ProxyKind::ConnectProxy | ProxyKind::TerminatingGateway
        ) {
            return Ok(());
        }
        if !plugin.can_apply(config) {
            return Ok(());
        }

        let mut errors = ErrorList::new();
        let extension = config.name();

        for listener in resources.listeners.values_mut() {
            patch_listener(plugin, config, listener, &mut errors);
        }

        // Inbound configs have no routes.
        if config.is_upstream() {
            for (name, route) in resources.routes.iter_mut() {
                if !config.matches_upstream_service_sni(name) && config.envoy_id() != name {
                    continue;
                }
                match plugin.patch_route(config, route) {
                    Ok(Some(patched)) => {
                        debug!(extension, route = %name, "route patched");
                        *route = patched;
                    }
                    Ok(None) => {}
                    Err(err) => errors.push(patch_error("route", name, err)),
                }
            }
        }

        for (name, cluster) in resources.clusters.iter_mut() {
            let matched = if config.is_upstream() {
                config.matches_upstream_service_sni(name)
            } else {
                name == LOCAL_APP_CLUSTER
            };
            if !matched {
                continue;
            }
            match plugin.patch_cluster(config, cluster) {
                Ok(Some(patched)) => {
                    debug!(extension, cluster = %name, "cluster patched");
                    *cluster = patched;
                }
                Ok(None) => {}
                Err(err) => errors.push(patch_error("cluster", name, err)),
            }
        }

        errors.into_result()
    }
}

fn patch_error(kind: &'static str, name: &str, err: XdsError) -> XdsError {
    XdsError::Patch {
        kind,
        name: name.to_string(),
        reason: err.to_string(),
    }
}

/// Indexes of the filter chains in `listener` that belong to `config`.
fn matching_chains(config: &ExtensionConfiguration, listener: &Listener) -> Vec<usize> {
    let select = |pred: &dyn Fn(&FilterChain) -> bool| -> Vec<usize> {
        listener
            .filter_chains
            .iter()
            .enumerate()
            .filter(|(_, chain)| pred(chain))
            .map(|(i, _)| i)
            .collect()
    };
    match config.kind {
        ProxyKind::TerminatingGateway => select(&|chain| {
            get_sni(chain).is_some_and(|sni| config.matches_upstream_service_sni(sni))
        }),
        ProxyKind::ConnectProxy => {
            let envoy_id = get_listener_envoy_id(listener);
            if envoy_id == OUTBOUND_LISTENER {
                let vip = config.upstream_vip();
                if vip.is_empty() {
                    return Vec::new();
                }
                return select(&|chain| filter_chain_tproxy_match(vip, chain));
            }
            let expected = if config.is_upstream() {
                config.envoy_id()
            } else {
                PUBLIC_LISTENER
            };
            if envoy_id == expected {
                select(&|_| true)
            } else {
                Vec::new()
            }
        }
        _ => Vec::new(),
    }
}

fn patch_listener(
    plugin: &dyn Plugin,
    config: &ExtensionConfiguration,
    listener: &mut Listener,
    errors: &mut ErrorList,
) {
    if matching_chains(config, listener).is_empty() {
        return;
    }
    let name = listener.name.clone();
    let extension = config.name();

    match plugin.patch_listener(config, listener) {
        Ok(Some(patched)) => {
            debug!(extension, listener = %name, "listener patched");
            *listener = patched;
        }
        Ok(None) => {}
        Err(err) => errors.push(patch_error("listener", &name, err)),
    }

    for index in matching_chains(config, listener) {
        let chain = &mut listener.filter_chains[index];
        for filter in &mut chain.filters {
            match plugin.patch_filter(config, filter) {
                Ok(Some(patched)) => {
                    debug!(extension, listener = %name, filter = %patched.name, "filter patched");
                    *filter = patched;
                }
                Ok(None) => {}
                Err(err) => errors.push(patch_error("listener filter", &name, err)),
            }
        }
    }
}

//! The per-extension patching surface.

use crate::configuration::ExtensionConfiguration;
use crate::error::XdsResult;
use crate::resource::{Cluster, Filter, Listener, RouteConfiguration};

/// Patches individual resources that [`BasicExtension`](crate::BasicExtension)
/// has already matched against the configuration.
///
/// Each method returns `Ok(None)` to leave the resource untouched and
/// `Ok(Some(new))` to replace it. An error leaves the resource as it was.
pub trait Plugin: Send + Sync {
    /// Whether the plugin has anything to do for `config` at all.
    fn can_apply(&self, config: &ExtensionConfiguration) -> bool;

    fn patch_route(
        &self,
        _config: &ExtensionConfiguration,
        _route: &RouteConfiguration,
    ) -> XdsResult<Option<RouteConfiguration>> {
        Ok(None)
    }

    fn patch_cluster(
        &self,
        _config: &ExtensionConfiguration,
        _cluster: &Cluster,
    ) -> XdsResult<Option<Cluster>> {
        Ok(None)
    }

    /// Called once per network filter in every matching filter chain.
    fn patch_filter(
        &self,
        _config: &ExtensionConfiguration,
        _filter: &Filter,
    ) -> XdsResult<Option<Filter>> {
        Ok(None)
    }

    /// Called for a matching listener before its filters are visited.
    fn patch_listener(
        &self,
        _config: &ExtensionConfiguration,
        _listener: &Listener,
    ) -> XdsResult<Option<Listener>> {
        Ok(None)
    }
}

/// Builds a plugin from its configuration, decoding the arguments.
pub type PluginConstructor = fn(&ExtensionConfiguration) -> XdsResult<Box<dyn Plugin>>;

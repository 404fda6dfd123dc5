//! harbor-xds: Envoy resource patching for Harbor service proxies.
//!
//! Takes the listeners, routes, clusters and endpoints generated for a
//! proxy and runs a chain of extensions over them. Extensions add HTTP
//! filters, replace clusters or tweak listeners for one service or one of
//! its upstreams.
//!
//! # Architecture
//!
//! Resources are modelled as serde structs over Envoy's JSON form
//! ([`resource`]); fields nobody patches ride along in a flattened `extra`
//! map. A proxy's resources are held in [`IndexedResources`], keyed by name.
//!
//! An extension is a [`BasicExtension`] wrapping a [`Plugin`]. The
//! extension decides *which* resources belong to the configured service
//! (by SNI, envoy ID, `local_app`, or transparent-proxy VIP) and the plugin
//! decides *how* to rewrite them. Extensions must be validated before they
//! run; [`registry::apply_extensions`] does both for a whole chain.
//!
//! [`config_dump`] reads the same resources back out of a live Envoy and
//! [`validate_upstream()`] checks that one upstream is fully reachable.

pub mod args;
pub mod builtin;
pub mod config_dump;
pub mod configuration;
pub mod error;
pub mod extension;
pub mod helpers;
pub mod indexed;
pub mod plugin;
pub mod registry;
pub mod resource;
pub mod validate_upstream;

pub use args::{Arguments, StringSet};
pub use config_dump::{AdminClusters, parse_clusters, parse_config_dump};
pub use configuration::{
    CompoundServiceName, EnvoyExtensionSpec, ExtensionConfiguration, ProxyKind, UpstreamData,
};
pub use error::{ErrorList, XdsError, XdsResult};
pub use extension::{BasicExtension, EnvoyExtension};
pub use helpers::{InsertLocation, InsertOptions};
pub use indexed::{IndexedResources, ResourceType};
pub use plugin::{Plugin, PluginConstructor};
pub use registry::{apply_extensions, construct_builtin};
pub use validate_upstream::{upstream_envoy_id, validate_upstream};

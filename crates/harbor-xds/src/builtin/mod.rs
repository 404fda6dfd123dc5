//! Extensions shipped with harbor.

pub mod connection_balance;
pub mod lambda;
pub mod local_ratelimit;
pub mod lua;
pub mod validate;

use crate::args::StringSet;
use crate::configuration::ExtensionConfiguration;

pub(crate) const INBOUND: &str = "inbound";
pub(crate) const OUTBOUND: &str = "outbound";

pub(crate) fn proxy_types() -> StringSet {
    StringSet::new(&["connect-proxy"])
}

pub(crate) fn listener_directions() -> StringSet {
    StringSet::new(&[INBOUND, OUTBOUND])
}

/// Inbound configs target the local service, upstream configs outbound
/// traffic.
pub(crate) fn direction_matches(config: &ExtensionConfiguration, listener: &str) -> bool {
    if config.is_upstream() {
        listener == OUTBOUND
    } else {
        listener == INBOUND
    }
}

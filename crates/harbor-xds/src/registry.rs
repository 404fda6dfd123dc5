//! Built-in extension lookup and chain application.

use tracing::{debug, warn};

use crate::builtin::{connection_balance, lambda, local_ratelimit, lua, validate};
use crate::configuration::ExtensionConfiguration;
use crate::error::{XdsError, XdsResult};
use crate::extension::{BasicExtension, EnvoyExtension};
use crate::indexed::IndexedResources;
use crate::plugin::PluginConstructor;

/// Names of every built-in extension.
pub const BUILTINS: [&str; 5] = [
    lambda::NAME,
    lua::NAME,
    local_ratelimit::NAME,
    connection_balance::NAME,
    validate::NAME,
];

pub fn builtin_constructor(name: &str) -> Option<PluginConstructor> {
    let constructor: PluginConstructor = match name {
        lambda::NAME => lambda::make,
        lua::NAME => lua::make,
        local_ratelimit::NAME => local_ratelimit::make,
        connection_balance::NAME => connection_balance::make,
        validate::NAME => validate::make,
        _ => return None,
    };
    Some(constructor)
}

/// An unvalidated built-in extension called `name`.
pub fn construct_builtin(name: &str) -> XdsResult<BasicExtension> {
    builtin_constructor(name)
        .map(BasicExtension::new)
        .ok_or_else(|| XdsError::UnknownExtension(name.to_string()))
}

fn apply_one(resources: &mut IndexedResources, config: &ExtensionConfiguration) -> XdsResult<()> {
    let mut extension = construct_builtin(config.name())?;
    extension.validate(config)?;
    extension.extend(resources, config)
}

/// Run each configured extension over `resources` in order.
///
/// A failing extension that is not marked required is logged and skipped;
/// whatever it managed to patch before failing stays. A required one stops
/// the chain with its error.
pub fn apply_extensions(
    resources: &mut IndexedResources,
    configs: &[ExtensionConfiguration],
) -> XdsResult<()> {
    for config in configs {
        let extension = config.name();
        match apply_one(resources, config) {
            Ok(()) => debug!(extension, service = %config.service_name, "extension applied"),
            Err(err) if config.is_required() => return Err(err),
            Err(err) => {
                warn!(extension, service = %config.service_name, error = %err, "skipping failed extension");
            }
        }
    }
    Ok(())
}

//! Spreads accepted connections evenly across Envoy worker threads.

use crate::args::Arguments;
use crate::configuration::{ExtensionConfiguration, ProxyKind};
use crate::error::XdsResult;
use crate::plugin::Plugin;
use crate::resource::{ConnectionBalanceConfig, ExactBalance, Listener};

pub const NAME: &str = "builtin/proxy/connection-balance";

const EXACT_BALANCE: &str = "exact_balance";

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionBalance {
    /// Only `exact_balance` has an effect.
    pub balance_type: String,
}

pub fn make(config: &ExtensionConfiguration) -> XdsResult<Box<dyn Plugin>> {
    Ok(Box::new(ConnectionBalance::from_config(config)?))
}

impl ConnectionBalance {
    pub fn from_config(config: &ExtensionConfiguration) -> XdsResult<Self> {
        let mut args = Arguments::new(config.arguments());
        let balance_type = args.string("BalanceType").unwrap_or_default();
        args.finish(Self { balance_type })
    }
}

impl Plugin for ConnectionBalance {
    fn can_apply(&self, config: &ExtensionConfiguration) -> bool {
        config.kind == ProxyKind::ConnectProxy && self.balance_type == EXACT_BALANCE
    }

    fn patch_listener(
        &self,
        _config: &ExtensionConfiguration,
        listener: &Listener,
    ) -> XdsResult<Option<Listener>> {
        let exact = ConnectionBalanceConfig {
            exact_balance: Some(ExactBalance {}),
            ..Default::default()
        };
        if listener.connection_balance_config.as_ref() == Some(&exact) {
            return Ok(None);
        }
        Ok(Some(Listener {
            connection_balance_config: Some(exact),
            ..listener.clone()
        }))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::configuration::{CompoundServiceName, EnvoyExtensionSpec};
    use crate::extension::{BasicExtension, EnvoyExtension};
    use crate::indexed::IndexedResources;
    use crate::resource::FilterChain;

    fn config(balance: &str) -> ExtensionConfiguration {
        ExtensionConfiguration {
            envoy_extension: EnvoyExtensionSpec {
                name: NAME.into(),
                required: false,
                arguments: json!({"BalanceType": balance})
                    .as_object()
                    .cloned()
                    .unwrap_or_default(),
            },
            service_name: CompoundServiceName::new("web"),
            kind: ProxyKind::ConnectProxy,
            upstreams: Default::default(),
        }
    }

    fn resources() -> IndexedResources {
        let mut resources = IndexedResources::new();
        resources.insert_listener(Listener {
            name: "public_listener:0.0.0.0:21000".into(),
            filter_chains: vec![FilterChain::default()],
            ..Default::default()
        });
        resources
    }

    #[test]
    fn exact_balance_sets_listener_config() {
        let cfg = config("exact_balance");
        let mut ext = BasicExtension::new(make);
        ext.validate(&cfg).unwrap();
        let mut resources = resources();
        ext.extend(&mut resources, &cfg).unwrap();

        let listener = &resources.listeners["public_listener:0.0.0.0:21000"];
        let value = serde_json::to_value(listener).unwrap();
        assert_eq!(value["connection_balance_config"], json!({"exact_balance": {}}));
    }

    #[test]
    fn other_values_do_nothing() {
        let cfg = config("round_robin");
        let mut ext = BasicExtension::new(make);
        ext.validate(&cfg).unwrap();
        let mut patched = resources();
        ext.extend(&mut patched, &cfg).unwrap();
        assert_eq!(patched, resources());
    }
}

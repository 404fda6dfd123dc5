//! Token-bucket rate limiting on the inbound listener.
//!
//! The limit covers every downstream connection together, so it only makes
//! sense in front of the local service.

use serde::Serialize;

use crate::args::{Arguments, StringSet};
use crate::builtin::{INBOUND, direction_matches, proxy_types};
use crate::configuration::ExtensionConfiguration;
use crate::error::{XdsError, XdsResult};
use crate::helpers::{InsertLocation, InsertOptions, insert_http_filter};
use crate::plugin::Plugin;
use crate::resource::{Filter, HTTP_CONNECTION_MANAGER, HttpFilter, TypedConfig};

pub const NAME: &str = "builtin/http/localratelimit";

const RATELIMIT_FILTER: &str = "envoy.filters.http.local_ratelimit";
const RATELIMIT_TYPE: &str =
    "type.googleapis.com/envoy.extensions.filters.http.local_ratelimit.v3.LocalRateLimit";

#[derive(Serialize)]
struct LocalRateLimit {
    stat_prefix: &'static str,
    token_bucket: TokenBucket,
    filter_enabled: RuntimeFractionalPercent,
    filter_enforced: RuntimeFractionalPercent,
}

#[derive(Serialize)]
struct TokenBucket {
    max_tokens: u64,
    tokens_per_fill: u64,
    fill_interval: String,
}

#[derive(Serialize)]
struct RuntimeFractionalPercent {
    default_value: FractionalPercent,
    runtime_key: &'static str,
}

#[derive(Serialize)]
struct FractionalPercent {
    numerator: u32,
    denominator: &'static str,
}

impl RuntimeFractionalPercent {
    fn always(runtime_key: &'static str) -> Self {
        Self {
            default_value: FractionalPercent {
                numerator: 100,
                denominator: "HUNDRED",
            },
            runtime_key,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RateLimit {
    pub max_tokens: u64,
    pub tokens_per_fill: u64,
    /// Seconds between refills.
    pub fill_interval: u64,
    pub proxy_type: String,
    pub listener: String,
}

pub fn make(config: &ExtensionConfiguration) -> XdsResult<Box<dyn Plugin>> {
    Ok(Box::new(RateLimit::from_config(config)?))
}

impl RateLimit {
    pub fn from_config(config: &ExtensionConfiguration) -> XdsResult<Self> {
        let mut args = Arguments::new(config.arguments());
        let max_tokens = args.required_u64("MaxTokens");
        let tokens_per_fill = args.required_u64("TokensPerFill");
        let fill_interval = args.required_u64("FillInterval");
        let proxy_type = args.one_of("ProxyType", &proxy_types());
        let listener = args.one_of("Listener", &StringSet::new(&[INBOUND]));
        if fill_interval == 0 && args_has("FillInterval", config) {
            args.error(XdsError::Argument {
                field: "FillInterval".into(),
                reason: "must be greater than zero".into(),
            });
        }
        args.finish(Self {
            max_tokens,
            tokens_per_fill,
            fill_interval,
            proxy_type,
            listener,
        })
    }

    fn typed_config(&self) -> XdsResult<TypedConfig> {
        TypedConfig::pack(
            RATELIMIT_TYPE,
            &LocalRateLimit {
                stat_prefix: "local_ratelimit",
                token_bucket: TokenBucket {
                    max_tokens: self.max_tokens,
                    tokens_per_fill: self.tokens_per_fill,
                    fill_interval: format!("{}s", self.fill_interval),
                },
                filter_enabled: RuntimeFractionalPercent::always("local_ratelimit_enabled"),
                filter_enforced: RuntimeFractionalPercent::always("local_ratelimit_enforced"),
            },
        )
    }
}

fn args_has(key: &str, config: &ExtensionConfiguration) -> bool {
    config
        .arguments()
        .keys()
        .any(|k| k.eq_ignore_ascii_case(key))
}

impl Plugin for RateLimit {
    fn can_apply(&self, config: &ExtensionConfiguration) -> bool {
        config.kind.as_str() == self.proxy_type && direction_matches(config, &self.listener)
    }

    fn patch_filter(
        &self,
        config: &ExtensionConfiguration,
        filter: &Filter,
    ) -> XdsResult<Option<Filter>> {
        if filter.name != HTTP_CONNECTION_MANAGER || config.is_upstream() {
            return Ok(None);
        }
        let ratelimit = HttpFilter::new(RATELIMIT_FILTER, self.typed_config()?);
        let mut filters = insert_http_filter(
            std::slice::from_ref(filter),
            ratelimit,
            &InsertOptions::new(InsertLocation::First, ""),
        )?;
        Ok(filters.pop())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;
    use crate::configuration::{CompoundServiceName, EnvoyExtensionSpec, ProxyKind};
    use crate::helpers::get_http_connection_manager;
    use crate::helpers::tests::{hcm_filter, http_filter_names};
    use crate::resource::HTTP_ROUTER;

    fn config(args: Value) -> ExtensionConfiguration {
        ExtensionConfiguration {
            envoy_extension: EnvoyExtensionSpec {
                name: NAME.into(),
                required: false,
                arguments: args.as_object().cloned().unwrap_or_default(),
            },
            service_name: CompoundServiceName::new("web"),
            kind: ProxyKind::ConnectProxy,
            upstreams: Default::default(),
        }
    }

    fn args() -> Value {
        json!({
            "MaxTokens": 100,
            "TokensPerFill": 10,
            "FillInterval": 5,
            "ProxyType": "connect-proxy",
            "Listener": "inbound"
        })
    }

    #[test]
    fn requires_every_bucket_setting() {
        let err = RateLimit::from_config(&config(json!({
            "ProxyType": "connect-proxy",
            "Listener": "outbound",
            "FillInterval": 0
        })))
        .unwrap_err();
        let text = err.to_string();
        assert!(text.contains("field MaxTokens is required"), "{text}");
        assert!(text.contains("field TokensPerFill is required"), "{text}");
        assert!(text.contains("invalid Listener 'outbound'; supported values: inbound"), "{text}");
        assert!(text.contains("invalid FillInterval: must be greater than zero"), "{text}");
    }

    #[test]
    fn inserted_first_with_bucket() {
        let cfg = config(args());
        let limit = RateLimit::from_config(&cfg).unwrap();
        assert!(limit.can_apply(&cfg));

        let patched = limit
            .patch_filter(&cfg, &hcm_filter(&["envoy.filters.http.rbac", HTTP_ROUTER]))
            .unwrap()
            .unwrap();
        assert_eq!(
            http_filter_names(&patched),
            vec![RATELIMIT_FILTER, "envoy.filters.http.rbac", HTTP_ROUTER]
        );

        let hcm = get_http_connection_manager(&patched).unwrap();
        let fields = &hcm.http_filters[0].typed_config.as_ref().unwrap().fields;
        assert_eq!(
            fields["token_bucket"],
            json!({"max_tokens": 100, "tokens_per_fill": 10, "fill_interval": "5s"})
        );
        assert_eq!(fields["filter_enforced"]["default_value"]["numerator"], 100);
    }
}

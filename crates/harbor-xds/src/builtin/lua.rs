//! Runs an inline Lua script on HTTP traffic.

use serde_json::json;

use crate::args::Arguments;
use crate::builtin::{direction_matches, listener_directions, proxy_types};
use crate::configuration::ExtensionConfiguration;
use crate::error::XdsResult;
use crate::helpers::{InsertLocation, InsertOptions, insert_http_filter};
use crate::plugin::Plugin;
use crate::resource::{Filter, HTTP_CONNECTION_MANAGER, HTTP_ROUTER, HttpFilter, TypedConfig};

pub const NAME: &str = "builtin/lua";

const LUA_FILTER: &str = "envoy.filters.http.lua";
const LUA_TYPE: &str = "type.googleapis.com/envoy.extensions.filters.http.lua.v3.Lua";

#[derive(Debug, Clone, PartialEq)]
pub struct Lua {
    pub proxy_type: String,
    /// `inbound` or `outbound`.
    pub listener: String,
    pub script: String,
}

pub fn make(config: &ExtensionConfiguration) -> XdsResult<Box<dyn Plugin>> {
    Ok(Box::new(Lua::from_config(config)?))
}

impl Lua {
    pub fn from_config(config: &ExtensionConfiguration) -> XdsResult<Self> {
        let mut args = Arguments::new(config.arguments());
        let script = args.required_string("Script");
        let proxy_type = args.one_of("ProxyType", &proxy_types());
        let listener = args.one_of("Listener", &listener_directions());
        args.finish(Self {
            proxy_type,
            listener,
            script,
        })
    }
}

impl Plugin for Lua {
    fn can_apply(&self, config: &ExtensionConfiguration) -> bool {
        config.kind.as_str() == self.proxy_type && direction_matches(config, &self.listener)
    }

    fn patch_filter(
        &self,
        _config: &ExtensionConfiguration,
        filter: &Filter,
    ) -> XdsResult<Option<Filter>> {
        if filter.name != HTTP_CONNECTION_MANAGER {
            return Ok(None);
        }
        let lua = HttpFilter::new(
            LUA_FILTER,
            TypedConfig::pack(
                LUA_TYPE,
                &json!({"default_source_code": {"inline_string": self.script}}),
            )?,
        );
        let mut filters = insert_http_filter(
            std::slice::from_ref(filter),
            lua,
            &InsertOptions::new(InsertLocation::BeforeFirstMatch, HTTP_ROUTER),
        )?;
        Ok(filters.pop())
    }
}

//! Routes an upstream to an AWS Lambda function.
//!
//! The upstream cluster is swapped for a DNS cluster pointing at the
//! regional Lambda endpoint, and the `aws_lambda` HTTP filter is placed in
//! front of the router so requests become invocations.

use serde::Serialize;
use serde_json::{Map, json};

use crate::args::{Arguments, StringSet};
use crate::configuration::{ExtensionConfiguration, ProxyKind};
use crate::error::{XdsError, XdsResult};
use crate::helpers::{
    InsertLocation, InsertOptions, get_http_connection_manager, insert_http_filter,
    make_upstream_tls_transport_socket,
};
use crate::plugin::Plugin;
use crate::resource::{
    Address, Cluster, ClusterLoadAssignment, Endpoint, Filter, HTTP_CONNECTION_MANAGER,
    HTTP_CONNECTION_MANAGER_TYPE, HTTP_ROUTER, HttpFilter, LbEndpoint, LocalityLbEndpoints,
    RouteConfiguration, TypedConfig, UpstreamTlsContext,
};

pub const NAME: &str = "builtin/aws/lambda";

const LAMBDA_FILTER: &str = "envoy.filters.http.aws_lambda";
const LAMBDA_TYPE: &str = "type.googleapis.com/envoy.extensions.filters.http.aws_lambda.v3.Config";
const LAMBDA_SNI: &str = "*.amazonaws.com";
const LAMBDA_PORT: u32 = 443;
const LAMBDA_METADATA: &str = "com.amazonaws.lambda";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvocationMode {
    #[default]
    Synchronous,
    Asynchronous,
}

#[derive(Serialize)]
struct LambdaConfig<'a> {
    arn: &'a str,
    payload_passthrough: bool,
    invocation_mode: InvocationMode,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Lambda {
    pub arn: String,
    pub region: String,
    pub payload_passthrough: bool,
    pub invocation_mode: InvocationMode,
}

pub fn make(config: &ExtensionConfiguration) -> XdsResult<Box<dyn Plugin>> {
    Ok(Box::new(Lambda::from_config(config)?))
}

impl Lambda {
    pub fn from_config(config: &ExtensionConfiguration) -> XdsResult<Self> {
        let mut args = Arguments::new(config.arguments());
        let arn = args.required_string("ARN");
        let region = args.required_string("Region");
        let payload_passthrough = args.bool("PayloadPassthrough").unwrap_or(false);
        let invocation_mode = match args.string("InvocationMode").as_deref() {
            None | Some("") | Some("synchronous") => InvocationMode::Synchronous,
            Some("asynchronous") => InvocationMode::Asynchronous,
            Some(other) => {
                let modes = StringSet::new(&["synchronous", "asynchronous"]);
                if let Err(err) = modes.check_required(other, "InvocationMode") {
                    args.error(err);
                }
                InvocationMode::Synchronous
            }
        };
        args.finish(Self {
            arn,
            region,
            payload_passthrough,
            invocation_mode,
        })
    }

    fn endpoint(&self) -> String {
        format!("lambda.{}.amazonaws.com", self.region)
    }
}

impl Plugin for Lambda {
    /// Applies when the proxy kind matches the kind of proxy in front of
    /// the upstream, so only outbound configs qualify.
    fn can_apply(&self, config: &ExtensionConfiguration) -> bool {
        config.outgoing_proxy_kind() == Some(config.kind)
    }

    fn patch_cluster(
        &self,
        _config: &ExtensionConfiguration,
        cluster: &Cluster,
    ) -> XdsResult<Option<Cluster>> {
        let tls = UpstreamTlsContext {
            sni: LAMBDA_SNI.to_string(),
            extra: Map::new(),
        };
        let mut extra = Map::new();
        extra.insert(
            "metadata".into(),
            json!({"filter_metadata": {LAMBDA_METADATA: {"egress_gateway": true}}}),
        );

        Ok(Some(Cluster {
            name: cluster.name.clone(),
            discovery_type: Some("LOGICAL_DNS".into()),
            cluster_type: None,
            connect_timeout: cluster.connect_timeout.clone(),
            lb_policy: Some("ROUND_ROBIN".into()),
            dns_lookup_family: Some("V4_ONLY".into()),
            load_assignment: Some(ClusterLoadAssignment {
                cluster_name: cluster.name.clone(),
                endpoints: vec![LocalityLbEndpoints {
                    lb_endpoints: vec![LbEndpoint {
                        endpoint: Some(Endpoint {
                            address: Some(Address::socket(&self.endpoint(), LAMBDA_PORT)),
                            extra: Map::new(),
                        }),
                        health_status: None,
                        extra: Map::new(),
                    }],
                    extra: Map::new(),
                }],
                extra: Map::new(),
            }),
            transport_socket: Some(make_upstream_tls_transport_socket(&tls)?),
            extra,
        }))
    }

    fn patch_filter(
        &self,
        _config: &ExtensionConfiguration,
        filter: &Filter,
    ) -> XdsResult<Option<Filter>> {
        if filter.name != HTTP_CONNECTION_MANAGER {
            return Ok(None);
        }
        if filter.typed_config.is_none() {
            return Err(XdsError::Validation(
                "error getting typed config for http filter".into(),
            ));
        }
        let mut hcm = get_http_connection_manager(filter)?;
        hcm.strip_any_host_port = true;

        let mut with_strip = filter.clone();
        with_strip.typed_config = Some(TypedConfig::pack(HTTP_CONNECTION_MANAGER_TYPE, &hcm)?);

        let lambda = HttpFilter::new(
            LAMBDA_FILTER,
            TypedConfig::pack(
                LAMBDA_TYPE,
                &LambdaConfig {
                    arn: &self.arn,
                    payload_passthrough: self.payload_passthrough,
                    invocation_mode: self.invocation_mode,
                },
            )?,
        );
        let mut filters = insert_http_filter(
            std::slice::from_ref(&with_strip),
            lambda,
            &InsertOptions::new(InsertLocation::BeforeFirstMatch, HTTP_ROUTER),
        )?;
        Ok(filters.pop())
    }

    /// Terminating gateways must not rewrite the host on the way to Lambda.
    fn patch_route(
        &self,
        config: &ExtensionConfiguration,
        route: &RouteConfiguration,
    ) -> XdsResult<Option<RouteConfiguration>> {
        if config.kind != ProxyKind::TerminatingGateway {
            return Ok(None);
        }
        let mut route = route.clone();
        let mut patched = false;
        for action in route
            .virtual_hosts
            .iter_mut()
            .flat_map(|vh| vh.routes.iter_mut())
            .filter_map(|r| r.route.as_mut())
        {
            patched |= action.clear_host_rewrite();
        }
        Ok(patched.then_some(route))
    }
}

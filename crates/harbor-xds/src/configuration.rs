//! What an extension is told about the proxy it is patching.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::XdsError;

/// The kind of proxy whose resources are being generated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProxyKind {
    #[default]
    Typical,
    ConnectProxy,
    MeshGateway,
    TerminatingGateway,
    IngressGateway,
    ApiGateway,
}

impl ProxyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProxyKind::Typical => "typical",
            ProxyKind::ConnectProxy => "connect-proxy",
            ProxyKind::MeshGateway => "mesh-gateway",
            ProxyKind::TerminatingGateway => "terminating-gateway",
            ProxyKind::IngressGateway => "ingress-gateway",
            ProxyKind::ApiGateway => "api-gateway",
        }
    }
}

impl fmt::Display for ProxyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProxyKind {
    type Err = XdsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "" | "typical" => ProxyKind::Typical,
            "connect-proxy" => ProxyKind::ConnectProxy,
            "mesh-gateway" => ProxyKind::MeshGateway,
            "terminating-gateway" => ProxyKind::TerminatingGateway,
            "ingress-gateway" => ProxyKind::IngressGateway,
            "api-gateway" => ProxyKind::ApiGateway,
            other => {
                return Err(XdsError::Unsupported {
                    field: "kind".into(),
                    value: other.into(),
                    supported: "typical, connect-proxy, mesh-gateway, terminating-gateway, \
                                ingress-gateway, api-gateway"
                        .into(),
                });
            }
        })
    }
}

/// A service name qualified by namespace and partition.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CompoundServiceName {
    pub name: String,
    #[serde(default = "default_tenancy")]
    pub namespace: String,
    #[serde(default = "default_tenancy")]
    pub partition: String,
}

fn default_tenancy() -> String {
    "default".to_string()
}

impl CompoundServiceName {
    /// `name` in the default namespace and partition.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: default_tenancy(),
            partition: default_tenancy(),
        }
    }
}

impl fmt::Display for CompoundServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.partition, self.namespace, self.name)
    }
}

/// One entry of a service's extension chain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvoyExtensionSpec {
    pub name: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

/// What the proxy knows about one upstream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpstreamData {
    /// Virtual IP used for transparent proxying.
    #[serde(default)]
    pub vip: String,
    /// SNIs of every cluster that can carry traffic to the upstream.
    #[serde(default)]
    pub sni: BTreeSet<String>,
    /// Envoy ID of the upstream's outbound listener and route.
    #[serde(default)]
    pub envoy_id: String,
    /// Kind of proxy fronting the upstream.
    #[serde(default)]
    pub outgoing_proxy_kind: ProxyKind,
}

/// An extension plus the context it runs in.
///
/// When `service_name` appears in `upstreams` the extension targets that
/// upstream's outbound resources; otherwise it targets the local service's
/// inbound resources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionConfiguration {
    pub envoy_extension: EnvoyExtensionSpec,
    pub service_name: CompoundServiceName,
    pub kind: ProxyKind,
    #[serde(default, with = "upstream_map")]
    pub upstreams: BTreeMap<CompoundServiceName, UpstreamData>,
}

impl ExtensionConfiguration {
    pub fn name(&self) -> &str {
        &self.envoy_extension.name
    }

    pub fn arguments(&self) -> &Map<String, Value> {
        &self.envoy_extension.arguments
    }

    pub fn is_required(&self) -> bool {
        self.envoy_extension.required
    }

    pub fn upstream(&self) -> Option<&UpstreamData> {
        self.upstreams.get(&self.service_name)
    }

    pub fn is_upstream(&self) -> bool {
        self.upstream().is_some()
    }

    pub fn matches_upstream_service_sni(&self, sni: &str) -> bool {
        self.upstream().is_some_and(|u| u.sni.contains(sni))
    }

    /// Envoy ID of the targeted upstream, empty for inbound configs.
    pub fn envoy_id(&self) -> &str {
        self.upstream().map_or("", |u| u.envoy_id.as_str())
    }

    pub fn upstream_vip(&self) -> &str {
        self.upstream().map_or("", |u| u.vip.as_str())
    }

    pub fn outgoing_proxy_kind(&self) -> Option<ProxyKind> {
        self.upstream().map(|u| u.outgoing_proxy_kind)
    }
}

/// JSON object keys must be strings, so the upstream map travels as a list
/// of `{service, ...data}` entries.
mod upstream_map {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::{CompoundServiceName, UpstreamData};

    #[derive(Serialize, Deserialize)]
    struct Entry {
        service: CompoundServiceName,
        #[serde(flatten)]
        data: UpstreamData,
    }

    pub fn serialize<S: Serializer>(
        map: &BTreeMap<CompoundServiceName, UpstreamData>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let entries: Vec<Entry> = map
            .iter()
            .map(|(service, data)| Entry {
                service: service.clone(),
                data: data.clone(),
            })
            .collect();
        entries.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<CompoundServiceName, UpstreamData>, D::Error> {
        let entries = Vec::<Entry>::deserialize(deserializer)?;
        Ok(entries.into_iter().map(|e| (e.service, e.data)).collect())
    }
}

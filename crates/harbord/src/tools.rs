//! Offline Envoy tooling: `harbord validate` and `harbord patch`.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::Context;
use harbor_core::ExtensionEntry;
use harbor_xds::{
    CompoundServiceName, EnvoyExtensionSpec, ExtensionConfiguration, IndexedResources, ProxyKind,
    UpstreamData, XdsError, apply_extensions, parse_clusters, parse_config_dump, validate_upstream,
};
use tracing::info;

fn read(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn load_resources(path: &Path) -> anyhow::Result<IndexedResources> {
    let resources = parse_config_dump(&read(path)?)
        .with_context(|| format!("parsing config dump {}", path.display()))?;
    info!(path = %path.display(), resources = resources.len(), "config dump loaded");
    Ok(resources)
}

// ── validate ───────────────────────────────────────────────────

pub fn validate(
    config_dump: &Path,
    clusters: Option<&Path>,
    service: &str,
    peer: Option<&str>,
    vip: Option<&str>,
) -> anyhow::Result<()> {
    let resources = load_resources(config_dump)?;
    let admin = match clusters {
        Some(path) => Some(
            parse_clusters(&read(path)?)
                .with_context(|| format!("parsing clusters {}", path.display()))?,
        ),
        None => None,
    };

    let service = CompoundServiceName::new(service);
    match validate_upstream(&resources, admin.as_ref(), &service, peer, vip) {
        Ok(()) => {
            println!("✓ {service} is reachable");
            Ok(())
        }
        Err(err) => {
            println!("✗ {service} failed validation:");
            for line in error_lines(&err) {
                println!("  - {line}");
            }
            anyhow::bail!("upstream {service} failed validation")
        }
    }
}

fn error_lines(err: &XdsError) -> Vec<String> {
    match err {
        XdsError::List(list) => list.iter().map(ToString::to_string).collect(),
        other => vec![other.to_string()],
    }
}

// ── patch ──────────────────────────────────────────────────────

/// Which service the extension chain is configured for.
#[derive(Debug, Clone)]
pub struct PatchTarget {
    pub kind: ProxyKind,
    pub service: String,
    /// The service is an upstream of the proxy, not the proxy itself.
    pub upstream: bool,
    pub vip: Option<String>,
}

pub fn read_chain(path: &Path) -> anyhow::Result<Vec<ExtensionEntry>> {
    serde_json::from_str(&read(path)?)
        .with_context(|| format!("parsing extension chain {}", path.display()))
}

pub fn patch(
    config_dump: &Path,
    chain: &[ExtensionEntry],
    target: &PatchTarget,
) -> anyhow::Result<()> {
    let mut resources = load_resources(config_dump)?;
    let configs = build_configurations(chain, &resources, target);
    apply_extensions(&mut resources, &configs)?;
    println!("{}", serde_json::to_string_pretty(&resources)?);
    Ok(())
}

/// One configuration per chain entry. An upstream target claims every
/// cluster whose name starts with `<service>.` as its SNI.
fn build_configurations(
    chain: &[ExtensionEntry],
    resources: &IndexedResources,
    target: &PatchTarget,
) -> Vec<ExtensionConfiguration> {
    let service = CompoundServiceName::new(target.service.as_str());
    let upstreams = if target.upstream {
        let prefix = format!("{}.", target.service);
        let sni: BTreeSet<String> = resources
            .clusters
            .keys()
            .filter(|name| name.starts_with(&prefix))
            .cloned()
            .collect();
        BTreeMap::from([(
            service.clone(),
            UpstreamData {
                vip: target.vip.clone().unwrap_or_default(),
                sni,
                envoy_id: target.service.clone(),
                outgoing_proxy_kind: target.kind,
            },
        )])
    } else {
        BTreeMap::new()
    };

    chain
        .iter()
        .map(|entry| ExtensionConfiguration {
            envoy_extension: EnvoyExtensionSpec {
                name: entry.name.clone(),
                required: entry.required,
                arguments: entry.arguments.clone(),
            },
            service_name: service.clone(),
            kind: target.kind,
            upstreams: upstreams.clone(),
        })
        .collect()
}

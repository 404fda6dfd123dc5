//! harbord: the Harbor daemon.
//!
//! Hosts the state store and ships the offline Envoy tooling:
//! - `serve`: state store with tombstone GC, redb snapshot on shutdown
//! - `validate`: check an upstream against a live Envoy config dump
//! - `patch`: run an extension chain over a config dump
//!
//! # Usage
//!
//! ```text
//! harbord serve --config /etc/harbor/harbor.toml
//! harbord validate --config-dump dump.json --clusters clusters.json --service db
//! harbord patch --config-dump dump.json --extensions chain.json --service web
//! ```

mod serve;
mod tools;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use harbor_core::{DEFAULT_CONFIG_FILE, HarborConfig};
use harbor_xds::ProxyKind;

#[derive(Parser)]
#[command(name = "harbord", about = "Harbor daemon")]
struct Cli {
    /// Emit logs as JSON.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the state store until Ctrl-C.
    Serve {
        /// Path to harbor.toml.
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },

    /// Check that a proxy can reach an upstream.
    Validate {
        /// Output of Envoy's /config_dump.
        #[arg(long)]
        config_dump: PathBuf,

        /// Output of Envoy's /clusters?format=json; enables endpoint health checks.
        #[arg(long)]
        clusters: Option<PathBuf>,

        /// Upstream service name.
        #[arg(long)]
        service: String,

        /// Peer the upstream is imported from.
        #[arg(long)]
        peer: Option<String>,

        /// Virtual IP of the upstream, for transparent proxies.
        #[arg(long)]
        vip: Option<String>,
    },

    /// Apply an extension chain to a config dump and print the result.
    Patch {
        /// Output of Envoy's /config_dump.
        #[arg(long)]
        config_dump: PathBuf,

        /// JSON array of `{name, required, arguments}`. Defaults to the
        /// `[[extensions]]` of `--config`.
        #[arg(long)]
        extensions: Option<PathBuf>,

        /// Path to harbor.toml.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Kind of proxy the dump came from.
        #[arg(long, default_value = "connect-proxy")]
        kind: ProxyKind,

        /// Service the extensions are configured on.
        #[arg(long)]
        service: String,

        /// Treat `--service` as an upstream of the proxy rather than the
        /// proxy's own service.
        #[arg(long)]
        upstream: bool,

        /// Virtual IP of the upstream, for transparent proxies.
        #[arg(long)]
        vip: Option<String>,
    },
}

fn init_tracing(default_filter: &str, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.command {
        Command::Serve { config } => HarborConfig::from_file(config)?,
        Command::Patch {
            config: Some(config),
            ..
        } => HarborConfig::from_file(config)?,
        _ => HarborConfig::default(),
    };
    init_tracing(&config.log.level, cli.log_json || config.log.json);

    match cli.command {
        Command::Serve { .. } => serve::run(config).await,
        Command::Validate {
            config_dump,
            clusters,
            service,
            peer,
            vip,
        } => tools::validate(
            &config_dump,
            clusters.as_deref(),
            &service,
            peer.as_deref(),
            vip.as_deref(),
        ),
        Command::Patch {
            config_dump,
            extensions,
            kind,
            service,
            upstream,
            vip,
            ..
        } => {
            let chain = match extensions {
                Some(path) => tools::read_chain(&path)?,
                None => config.extensions,
            };
            let target = tools::PatchTarget {
                kind,
                service,
                upstream,
                vip,
            };
            tools::patch(&config_dump, &chain, &target)
        }
    }
}

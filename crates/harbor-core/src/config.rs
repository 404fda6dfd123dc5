//! harbor.toml configuration parser.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarborConfig {
    pub state: StateConfig,
    pub tombstone_gc: TombstoneGcConfig,
    pub log: LogConfig,
    /// Extension chain applied by `harbord patch`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extensions: Vec<ExtensionEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub data_dir: PathBuf,
    /// File name of the redb snapshot inside `data_dir`.
    pub snapshot_file: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            snapshot_file: "state.redb".to_string(),
        }
    }
}

impl StateConfig {
    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join(&self.snapshot_file)
    }
}

/// Durations are humantime strings such as `"15m"` or `"30s"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TombstoneGcConfig {
    pub ttl: String,
    pub granularity: String,
}

impl Default for TombstoneGcConfig {
    fn default() -> Self {
        Self {
            ttl: "15m".to_string(),
            granularity: "30s".to_string(),
        }
    }
}

impl TombstoneGcConfig {
    pub fn ttl(&self) -> anyhow::Result<Duration> {
        humantime::parse_duration(&self.ttl)
            .with_context(|| format!("invalid tombstone_gc.ttl {:?}", self.ttl))
    }

    pub fn granularity(&self) -> anyhow::Result<Duration> {
        humantime::parse_duration(&self.granularity)
            .with_context(|| format!("invalid tombstone_gc.granularity {:?}", self.granularity))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info,harbord=debug,harbor=debug".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtensionEntry {
    pub name: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl HarborConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: HarborConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let ttl = self.tombstone_gc.ttl()?;
        let granularity = self.tombstone_gc.granularity()?;
        anyhow::ensure!(
            !ttl.is_zero() && !granularity.is_zero(),
            "tombstone_gc.ttl and tombstone_gc.granularity must be non-zero"
        );
        for ext in &self.extensions {
            anyhow::ensure!(!ext.name.is_empty(), "extension entry without a name");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_defaults() {
        let config: HarborConfig = toml::from_str("").unwrap();
        assert_eq!(config.state.snapshot_path(), PathBuf::from("data/state.redb"));
        assert_eq!(config.tombstone_gc.ttl().unwrap(), Duration::from_secs(900));
        assert_eq!(config.tombstone_gc.granularity().unwrap(), Duration::from_secs(30));
        assert!(!config.log.json);
        assert!(config.extensions.is_empty());
    }

    #[test]
    fn test_parse_full() {
        let toml_str = r#"
[state]
data_dir = "/var/lib/harbor"

[tombstone_gc]
ttl = "2m 30s"

[log]
level = "warn"
json = true

[[extensions]]
name = "builtin/lua"
required = true

[extensions.arguments]
Script = "function envoy_on_request(h) end"
ProxyType = "connect-proxy"
Listener = "inbound"

[[extensions]]
name = "builtin/http/localratelimit"
arguments = { MaxTokens = 10, TokensPerFill = 5, FillInterval = 1, ProxyType = "connect-proxy", Listener = "inbound" }
"#;
        let config: HarborConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(
            config.state.snapshot_path(),
            PathBuf::from("/var/lib/harbor/state.redb")
        );
        assert_eq!(config.tombstone_gc.ttl().unwrap(), Duration::from_secs(150));
        assert_eq!(config.tombstone_gc.granularity, "30s");
        assert_eq!(config.log.level, "warn");
        assert_eq!(config.extensions.len(), 2);
        assert!(config.extensions[0].required);
        assert_eq!(config.extensions[0].arguments["Listener"], "inbound");
        assert_eq!(config.extensions[1].arguments["MaxTokens"], 10);
    }

    #[test]
    fn test_from_file_rejects_bad_duration() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[tombstone_gc]\nttl = \"soon\"").unwrap();
        let err = HarborConfig::from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("tombstone_gc.ttl"), "{err}");
    }

    #[test]
    fn test_round_trip() {
        let config = HarborConfig::default();
        let toml_str = config.to_toml_string().unwrap();
        assert!(toml_str.contains("state.redb"));
        assert_eq!(toml::from_str::<HarborConfig>(&toml_str).unwrap(), config);
    }
}

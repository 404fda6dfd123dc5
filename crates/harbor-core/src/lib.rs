pub mod config;

pub use config::{ExtensionEntry, HarborConfig, LogConfig, StateConfig, TombstoneGcConfig};

/// Default config file looked up by `harbord` when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "harbor.toml";

//! Node configuration types
//!
//! Loaded from a TOML file and layered with `RELAYMESH_*` environment
//! variables, e.g. `RELAYMESH_LOGGING__LEVEL=debug` overrides
//! `[logging] level`.

use crate::error::{NodeError, Result};
use relaymesh_core::types::{ConsensusParams, PublicKeyType};
use relaymesh_staking::DEFAULT_CACHE_CAPACITY;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "RELAYMESH";

/// Complete node configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node operation settings
    #[serde(default)]
    pub node: NodeSettings,

    /// State machine settings
    #[serde(default)]
    pub state: StateConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl NodeConfig {
    /// Load `path` (when given) and apply environment overrides on top
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let config: NodeConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the executor cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.node.chain_id.is_empty() {
            return Err(NodeError::InvalidConfig("node.chain_id is empty".into()));
        }
        if self.node.keep_recent == 0 {
            return Err(NodeError::InvalidConfig("node.keep_recent must be at least 1".into()));
        }
        if self.state.entity_cache_capacity == 0 {
            return Err(NodeError::InvalidConfig(
                "state.entity_cache_capacity must be at least 1".into(),
            ));
        }
        if self.state.pubkey_types.is_empty() {
            return Err(NodeError::InvalidConfig("state.pubkey_types is empty".into()));
        }
        Ok(())
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| NodeError::InvalidConfig(e.to_string()))
    }
}

/// Basic node settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeSettings {
    /// Chain identifier; blocks and genesis files for other chains are rejected
    #[serde(default = "default_chain_id")]
    pub chain_id: String,

    /// Data directory for exported state
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Historical snapshots kept for queries at past heights
    #[serde(default = "default_keep_recent")]
    pub keep_recent: usize,
}

fn default_chain_id() -> String {
    "relaymesh-testnet-1".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_keep_recent() -> usize {
    100
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            chain_id: default_chain_id(),
            data_dir: default_data_dir(),
            keep_recent: default_keep_recent(),
        }
    }
}

/// State machine settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateConfig {
    /// Capacity of each per-block entity cache
    #[serde(default = "default_cache_capacity")]
    pub entity_cache_capacity: usize,

    /// Public key algorithms accepted for staking
    #[serde(default = "default_pubkey_types")]
    pub pubkey_types: Vec<PublicKeyType>,
}

fn default_cache_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}

fn default_pubkey_types() -> Vec<PublicKeyType> {
    vec![PublicKeyType::Ed25519]
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            entity_cache_capacity: default_cache_capacity(),
            pubkey_types: default_pubkey_types(),
        }
    }
}

impl StateConfig {
    pub fn consensus_params(&self) -> ConsensusParams {
        ConsensusParams {
            pubkey_types: self.pubkey_types.clone(),
        }
    }
}

/// Log output format
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive; `RUST_LOG` takes precedence
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format
    #[serde(default)]
    pub format: LogFormat,

    /// Include the event target
    #[serde(default = "default_true")]
    pub with_target: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            with_target: true,
        }
    }
}

/// Metrics configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Prefix of every metric name
    #[serde(default = "default_metrics_namespace")]
    pub namespace: String,
}

fn default_metrics_namespace() -> String {
    "relaymesh".to_string()
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            namespace: default_metrics_namespace(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_toml(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let file = write_toml(
            r#"
            [node]
            chain_id = "relaymesh-local"

            [logging]
            format = "json"
            "#,
        );
        let config = NodeConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.node.chain_id, "relaymesh-local");
        assert_eq!(config.node.keep_recent, 100);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.state, StateConfig::default());
        assert!(config.metrics.enabled);
    }

    #[test]
    fn test_default_round_trips_through_toml() {
        let rendered = NodeConfig::default().to_toml().unwrap();
        let file = write_toml(&rendered);
        let loaded = NodeConfig::load(Some(file.path())).unwrap();
        let defaults = NodeConfig::default();
        assert_eq!(loaded.node, defaults.node);
        assert_eq!(loaded.state, defaults.state);
        assert_eq!(loaded.logging, defaults.logging);
    }

    #[test]
    fn test_environment_overrides_file() {
        let file = write_toml("[metrics]\nnamespace = \"from_file\"\n");
        std::env::set_var("RELAYMESH_METRICS__NAMESPACE", "from_env");
        let config = NodeConfig::load(Some(file.path()));
        std::env::remove_var("RELAYMESH_METRICS__NAMESPACE");
        assert_eq!(config.unwrap().metrics.namespace, "from_env");
    }

    #[test]
    fn test_rejects_zero_keep_recent() {
        let file = write_toml("[node]\nkeep_recent = 0\n");
        assert!(matches!(
            NodeConfig::load(Some(file.path())),
            Err(NodeError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_consensus_params_from_state() {
        let state = StateConfig {
            pubkey_types: vec![PublicKeyType::Ed25519, PublicKeyType::Secp256k1],
            ..StateConfig::default()
        };
        assert!(state.consensus_params().accepts(PublicKeyType::Secp256k1));
    }
}

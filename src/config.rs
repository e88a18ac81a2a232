// NODE CONFIGURATION
// Layered: built-in defaults, then an optional TOML file, then SYNN_* env vars.
// Nested keys use a double underscore, e.g. SYNN_CONSENSUS__BLOCK_INTERVAL_MS=60000.

use crate::NodeError;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use synn_consensus::ConsensusConfig;
use synn_economics::RewardConfig;

pub const ENV_PREFIX: &str = "SYNN";

/// Local transaction generator for single-node runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    pub enabled: bool,
    pub tx_per_tick: usize,
    pub tx_interval_ms: u64,
    /// Stake registered for this node's own PoS key.
    pub stake: u64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        DemoConfig {
            enabled: true,
            tx_per_tick: 10,
            tx_interval_ms: 500,
            stake: 1_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub consensus: ConsensusConfig,
    pub rewards: RewardConfig,
    /// tracing-subscriber filter directive; `RUST_LOG` wins when set.
    pub log_filter: String,
    pub demo: DemoConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            consensus: ConsensusConfig::default(),
            rewards: RewardConfig::default(),
            log_filter: "info".to_string(),
            demo: DemoConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn load(path: Option<&Path>) -> Result<Self, NodeError> {
        let mut builder = Config::builder().add_source(Config::try_from(&NodeConfig::default())?);
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        let config: NodeConfig = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), NodeError> {
        self.consensus.validate()?;
        self.rewards.split.validate()?;
        if self.demo.enabled && self.demo.tx_interval_ms == 0 {
            return Err(NodeError::InvalidConfig("demo.tx_interval_ms must be positive".to_string()));
        }
        if self.demo.stake == 0 {
            return Err(NodeError::InvalidConfig("demo.stake must be positive".to_string()));
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, NodeError> {
        serde_json::to_string_pretty(self).map_err(|e| NodeError::InvalidConfig(e.to_string()))
    }
}

//! Synnergy node: configuration, logging and in-memory wiring around the
//! hybrid PoH/PoS/PoW consensus engine.

pub mod config;
pub mod node;
pub mod telemetry;

pub use config::{DemoConfig, NodeConfig};
pub use node::Node;

use synn_consensus::ConsensusError;
use synn_core::{AuthorityError, CryptoError};
use synn_economics::EconomicsError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("configuration error: {0}")]
    Config(#[from] ::config::ConfigError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Consensus(#[from] ConsensusError),

    #[error(transparent)]
    Economics(#[from] EconomicsError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Authority(#[from] AuthorityError),

    #[error("logging already initialized: {0}")]
    Telemetry(String),
}

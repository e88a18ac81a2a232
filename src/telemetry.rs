// LOGGING
// One tracing-subscriber sink for the binary. Library crates log through the
// `log` facade, which the subscriber bridges.

use crate::NodeError;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` takes precedence over `default_filter`.
pub fn init_tracing(default_filter: &str) -> Result<(), NodeError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .map_err(|e| NodeError::InvalidConfig(format!("log filter {:?}: {}", default_filter, e)))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| NodeError::Telemetry(e.to_string()))
}

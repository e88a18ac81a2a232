/// BLOCK EMISSION SCHEDULE
///
/// The base reward for a block depends on its height alone:
/// `reward(h) = initial_reward >> floor(h / halving_period)`.
/// Wall-clock time never enters the computation, so every node derives the
/// same reward for the same height.

use crate::rewards::RewardSplit;
use crate::EconomicsError;
use num_bigint::BigUint;
use num_traits::Zero;
use serde::{Deserialize, Serialize};

/// Base reward at height 0, in the smallest unit (102.4 SYNN at 18 decimals).
pub const DEFAULT_INITIAL_REWARD: &str = "102400000000000000000";

/// Main-chain heights per halving.
pub const DEFAULT_HALVING_PERIOD: u64 = 200_000;

/// Reward parameters as they appear in node configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardConfig {
    /// Decimal string; too large for TOML integers
    pub initial_reward: String,
    pub halving_period: u64,
    pub split: RewardSplit,
}

impl Default for RewardConfig {
    fn default() -> Self {
        RewardConfig {
            initial_reward: DEFAULT_INITIAL_REWARD.to_string(),
            halving_period: DEFAULT_HALVING_PERIOD,
            split: RewardSplit::default(),
        }
    }
}

/// Halving emission schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmissionSchedule {
    initial_reward: BigUint,
    halving_period: u64,
}

impl EmissionSchedule {
    pub fn new(initial_reward: BigUint, halving_period: u64) -> Result<Self, EconomicsError> {
        if halving_period == 0 {
            return Err(EconomicsError::InvalidSchedule(
                "halving_period must be > 0".to_string(),
            ));
        }
        if initial_reward.is_zero() {
            return Err(EconomicsError::InvalidSchedule(
                "initial_reward must be > 0".to_string(),
            ));
        }
        Ok(EmissionSchedule {
            initial_reward,
            halving_period,
        })
    }

    pub fn from_config(config: &RewardConfig) -> Result<Self, EconomicsError> {
        let initial_reward = BigUint::parse_bytes(config.initial_reward.trim().as_bytes(), 10)
            .ok_or_else(|| {
                EconomicsError::InvalidSchedule(format!(
                    "initial_reward {:?} is not a decimal integer",
                    config.initial_reward
                ))
            })?;
        Self::new(initial_reward, config.halving_period)
    }

    pub fn initial_reward(&self) -> &BigUint {
        &self.initial_reward
    }

    pub fn halving_period(&self) -> u64 {
        self.halving_period
    }

    /// Number of complete halving periods elapsed at `height`.
    pub fn halvings(&self, height: u64) -> u64 {
        height / self.halving_period
    }

    /// Base block reward at `height`. Reaches zero once every bit has been
    /// shifted out and stays there.
    pub fn reward_at(&self, height: u64) -> BigUint {
        let halvings = self.halvings(height);
        if halvings >= self.initial_reward.bits() {
            return BigUint::default();
        }
        &self.initial_reward >> (halvings as usize)
    }
}

impl Default for EmissionSchedule {
    fn default() -> Self {
        EmissionSchedule {
            initial_reward: BigUint::parse_bytes(DEFAULT_INITIAL_REWARD.as_bytes(), 10)
                .unwrap_or_default(),
            halving_period: DEFAULT_HALVING_PERIOD,
        }
    }
}

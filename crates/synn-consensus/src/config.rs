// CONSENSUS PARAMETERS
//
// SAFETY INVARIANTS:
// 1. Difficulty starts strictly positive
// 2. The retarget window holds at least MIN_RETARGET_WINDOW samples
// 3. The quorum fraction lies in (0, 1]

use crate::adaptive::WeightConfig;
use crate::engine::ConsensusError;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

/// Smallest allowed difficulty sample window.
pub const MIN_RETARGET_WINDOW: usize = 5;

/// Stake fraction that must have endorsed a sub-block before it can be sealed.
///
/// A sub-block is eligible when `voted_stake * denominator >= total_stake * numerator`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumPolicy {
    pub numerator: u64,
    pub denominator: u64,
}

impl QuorumPolicy {
    pub const TWO_THIRDS: QuorumPolicy = QuorumPolicy {
        numerator: 2,
        denominator: 3,
    };

    /// Whether `voted` of `total` stake satisfies the policy. Zero total
    /// stake never does.
    pub fn is_met(&self, voted: u128, total: u128) -> bool {
        if total == 0 {
            return false;
        }
        BigUint::from(voted) * self.denominator >= BigUint::from(total) * self.numerator
    }
}

impl Default for QuorumPolicy {
    fn default() -> Self {
        Self::TWO_THIRDS
    }
}

/// Engine configuration, loaded from the node's `consensus` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Upper bound on payloads pulled into one sub-block
    pub max_tx_per_sub_block: usize,

    /// Upper bound on sub-blocks aggregated into one main block
    pub max_sub_blocks_per_block: usize,

    /// Pending queue capacity; the oldest entry is evicted when full
    pub max_pending_sub_blocks: usize,

    /// Sub-block proposal cadence
    pub sub_block_interval_ms: u64,

    /// Main block sealing cadence
    pub block_interval_ms: u64,

    /// Inter-block interval the difficulty controller steers towards
    pub target_block_interval_ms: u64,

    /// Number of seal timestamps the difficulty controller averages over
    pub retarget_window: usize,

    pub initial_difficulty: u64,

    /// Nonces tried before a seal gives up with `SealFailed`
    pub max_pow_attempts: u64,

    pub quorum: QuorumPolicy,

    /// Recent blocks sampled by the adaptive weight manager
    pub adaptive_window: usize,

    pub weights: WeightConfig,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        ConsensusConfig {
            max_tx_per_sub_block: 5_000,
            max_sub_blocks_per_block: 1_000,
            max_pending_sub_blocks: 10_000,
            sub_block_interval_ms: 1_000,
            block_interval_ms: 15 * 60 * 1_000,
            target_block_interval_ms: 15 * 60 * 1_000,
            retarget_window: 100,
            initial_difficulty: 65_536,
            max_pow_attempts: 10_000_000,
            quorum: QuorumPolicy::default(),
            adaptive_window: 10,
            weights: WeightConfig::default(),
        }
    }
}

impl ConsensusConfig {
    /// Reject parameter sets the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConsensusError> {
        let fail = |msg: &str| Err(ConsensusError::InvalidConfig(msg.to_string()));

        if self.max_tx_per_sub_block == 0 {
            return fail("max_tx_per_sub_block must be > 0");
        }
        if self.max_sub_blocks_per_block == 0 {
            return fail("max_sub_blocks_per_block must be > 0");
        }
        if self.max_pending_sub_blocks == 0 {
            return fail("max_pending_sub_blocks must be > 0");
        }
        if self.sub_block_interval_ms == 0 || self.block_interval_ms == 0 {
            return fail("loop intervals must be > 0");
        }
        if self.target_block_interval_ms == 0 {
            return fail("target_block_interval_ms must be > 0");
        }
        if self.retarget_window < MIN_RETARGET_WINDOW {
            return Err(ConsensusError::InvalidConfig(format!(
                "retarget_window must be >= {}",
                MIN_RETARGET_WINDOW
            )));
        }
        if self.initial_difficulty == 0 {
            return fail("initial_difficulty must be > 0");
        }
        if self.max_pow_attempts == 0 {
            return fail("max_pow_attempts must be > 0");
        }
        if self.quorum.denominator == 0
            || self.quorum.numerator == 0
            || self.quorum.numerator > self.quorum.denominator
        {
            return fail("quorum must be a fraction in (0, 1]");
        }
        self.weights.validate()
    }
}

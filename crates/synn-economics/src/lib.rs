/// SYNNERGY BLOCK ECONOMICS
///
/// This crate implements the block reward side of consensus:
/// - The emission schedule halves the base reward every `halving_period` heights
/// - Rewards are split between the PoW miner, the PoS validators whose
///   sub-blocks the block aggregates, and the loan-pool treasury
/// - Distribution is additive and guarded by a per-height paid marker
///
/// All amounts use arbitrary-precision integers so that no halving count
/// can overflow or drift.

pub mod emission;
pub mod rewards;

pub use emission::{EmissionSchedule, RewardConfig, DEFAULT_HALVING_PERIOD, DEFAULT_INITIAL_REWARD};
pub use rewards::{reward_marker_key, reward_step_key, RewardDistributor, RewardReceipt, RewardSplit};

use synn_core::LedgerError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EconomicsError {
    #[error("rewards already paid for height {0}")]
    RewardsAlreadyPaid(u64),
    #[error("invalid reward split: {0}")]
    InvalidSplit(String),
    #[error("invalid emission schedule: {0}")]
    InvalidSchedule(String),
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

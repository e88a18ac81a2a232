/// REWARD DISTRIBUTION
///
/// Splits each block's base reward between:
/// - the PoW miner (`miner_pk`)
/// - the PoS validators of the aggregated sub-blocks, one equal share per sub-header
/// - the loan-pool treasury, which also receives integer-division remainder
///
/// Distribution only credits; it never debits. Each credit is followed by a
/// `reward:<height>:<step>` marker and the whole payout by `reward:<height>`.
/// A second invocation for a paid height is rejected; an invocation after a
/// partial failure resumes at the first unpaid step.

use crate::emission::EmissionSchedule;
use crate::EconomicsError;
use log::{debug, info, warn};
use num_bigint::BigUint;
use num_traits::Zero;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use synn_core::{Address, AuthorityProvider, Block, Ledger};

/// Percentages of the base reward per recipient class. Must sum to 100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardSplit {
    pub miner_percent: u32,
    pub validator_percent: u32,
    pub treasury_percent: u32,
}

impl Default for RewardSplit {
    fn default() -> Self {
        RewardSplit {
            miner_percent: 30,
            validator_percent: 30,
            treasury_percent: 40,
        }
    }
}

impl RewardSplit {
    pub fn validate(&self) -> Result<(), EconomicsError> {
        let parts = [self.miner_percent, self.validator_percent, self.treasury_percent];
        if let Some(p) = parts.iter().find(|p| **p > 100) {
            return Err(EconomicsError::InvalidSplit(format!("share of {}% exceeds 100%", p)));
        }
        let total: u64 = parts.iter().map(|p| u64::from(*p)).sum();
        if total != 100 {
            return Err(EconomicsError::InvalidSplit(format!(
                "percentages sum to {}, expected 100",
                total
            )));
        }
        Ok(())
    }
}

/// State key recording that rewards for `height` were paid.
pub fn reward_marker_key(height: u64) -> String {
    format!("reward:{}", height)
}

/// State key recording that credit `step` of the payout for `height` landed.
pub fn reward_step_key(height: u64, step: usize) -> String {
    format!("reward:{}:{}", height, step)
}

/// What a block paid, and to whom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewardReceipt {
    pub height: u64,
    pub total: BigUint,
    pub miner_pk: Vec<u8>,
    pub miner_share: BigUint,
    /// One entry per sub-header, in block order
    pub validator_shares: Vec<(Vec<u8>, BigUint)>,
    pub treasury: Address,
    pub treasury_share: BigUint,
}

impl RewardReceipt {
    /// Sum of every credited share; always equals `total`.
    pub fn credited(&self) -> BigUint {
        let validators: BigUint = self.validator_shares.iter().map(|(_, s)| s).sum();
        &self.miner_share + validators + &self.treasury_share
    }

    /// Every credit in payout order: miner, validators, treasury.
    pub fn credits(&self) -> Vec<(&[u8], &BigUint)> {
        let mut credits: Vec<(&[u8], &BigUint)> = Vec::with_capacity(self.validator_shares.len() + 2);
        credits.push((self.miner_pk.as_slice(), &self.miner_share));
        credits.extend(self.validator_shares.iter().map(|(v, s)| (v.as_slice(), s)));
        credits.push((&self.treasury[..], &self.treasury_share));
        credits
    }
}

pub struct RewardDistributor {
    schedule: EmissionSchedule,
    split: RewardSplit,
    ledger: Arc<dyn Ledger>,
    authority: Arc<dyn AuthorityProvider>,
}

impl RewardDistributor {
    pub fn new(
        schedule: EmissionSchedule,
        split: RewardSplit,
        ledger: Arc<dyn Ledger>,
        authority: Arc<dyn AuthorityProvider>,
    ) -> Result<Self, EconomicsError> {
        split.validate()?;
        Ok(RewardDistributor {
            schedule,
            split,
            ledger,
            authority,
        })
    }

    pub fn schedule(&self) -> &EmissionSchedule {
        &self.schedule
    }

    /// Compute the shares for `block` without touching the ledger.
    pub fn compute(&self, block: &Block, treasury: Address) -> RewardReceipt {
        let total = self.schedule.reward_at(block.header.height);
        let miner_share = &total * self.split.miner_percent / 100u32;
        let validator_pool = &total * self.split.validator_percent / 100u32;

        let sub_headers = &block.body.sub_headers;
        let per_validator = if sub_headers.is_empty() {
            BigUint::default()
        } else {
            &validator_pool / sub_headers.len() as u64
        };
        let validator_shares: Vec<(Vec<u8>, BigUint)> = sub_headers
            .iter()
            .map(|h| (h.validator.clone(), per_validator.clone()))
            .collect();
        let paid_to_validators = &per_validator * sub_headers.len() as u64;
        let treasury_share = &total - &miner_share - paid_to_validators;

        RewardReceipt {
            height: block.header.height,
            total,
            miner_pk: block.header.miner_pk.clone(),
            miner_share,
            validator_shares,
            treasury,
            treasury_share,
        }
    }

    /// Credit the block reward for `block` to the ledger.
    ///
    /// Ledger failures are returned as-is. Credits that landed before the
    /// failure are not repeated when the call is retried.
    pub fn distribute_rewards(&self, block: &Block) -> Result<RewardReceipt, EconomicsError> {
        let height = block.header.height;
        let marker = reward_marker_key(height);
        if self.ledger.has_state(&marker)? {
            warn!("rewards for block #{} already paid, refusing to credit twice", height);
            return Err(EconomicsError::RewardsAlreadyPaid(height));
        }

        let receipt = self.compute(block, self.authority.loan_pool_address());

        for (step, (account, amount)) in receipt.credits().into_iter().enumerate() {
            let step_key = reward_step_key(height, step);
            if self.ledger.has_state(&step_key)? {
                debug!("block #{} reward step {} already credited, skipping", height, step);
                continue;
            }
            self.credit_nonzero(account, amount)?;
            self.ledger.set_state(&step_key, block.hash().to_vec())?;
        }

        self.ledger.set_state(&marker, block.hash().to_vec())?;

        info!(
            "block #{} rewards: total={} miner={} validators={}x{} treasury={}",
            height,
            receipt.total,
            receipt.miner_share,
            receipt.validator_shares.len(),
            receipt
                .validator_shares
                .first()
                .map(|(_, s)| s.clone())
                .unwrap_or_default(),
            receipt.treasury_share
        );
        Ok(receipt)
    }

    fn credit_nonzero(&self, account: &[u8], amount: &BigUint) -> Result<(), EconomicsError> {
        if amount.is_zero() {
            return Ok(());
        }
        self.ledger.credit(account, amount)?;
        Ok(())
    }
}

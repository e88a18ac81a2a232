// PROOF-OF-WORK BLOCK SEALING
// Aggregates stake-verified sub-blocks into a main block and rate-limits block
// production with a SHA-256 puzzle.
//
// SAFETY CONSTRAINTS:
// 1. target = (2^256 - 1) / difficulty; a hash wins when, read as a big-endian
//    integer, it is <= target
// 2. The search is bounded by `max_pow_attempts` and polls its cancellation token
// 3. Only `SubBlock<StakeVerified>` values meeting the quorum policy are sealed
// 4. A sealed block is appended before rewards are paid, so a rejected append pays nothing
// 5. Imported blocks get the same vote and quorum checks as local seals, plus a
//    timestamp strictly after the parent and no further than MAX_FUTURE_DRIFT_MS ahead
// 6. Every sealed sub-block leaves a `sealed:<hash>` marker; a marked sub-block
//    is never sealed or imported again

use crate::config::QuorumPolicy;
use crate::difficulty::DifficultyController;
use crate::engine::ConsensusError;
use crate::pos_engine::StakeValidator;
use crate::sub_block::{StakeVerified, SubBlock};
use crate::votes::VoteTally;
use log::{debug, info, warn};
use num_bigint::BigUint;
use num_traits::{One, Zero};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;
use synn_core::{
    sub_headers_root, unix_millis, AuthorityProvider, Block, BlockBody, BlockHeader, Hash32, Ledger,
    SubBlockHeader, POW_ROLE, ZERO_HASH,
};
use synn_economics::{RewardDistributor, RewardReceipt};
use tokio_util::sync::CancellationToken;

/// Nonces tried between cancellation checks.
const CANCEL_CHECK_INTERVAL: u64 = 4096;

/// How far past local time an imported block's timestamp may be.
pub const MAX_FUTURE_DRIFT_MS: i64 = 2 * 60 * 1_000;

/// State key marking a sub-block as included in the chain.
pub fn sealed_marker_key(header_hash: &Hash32) -> String {
    format!("sealed:{}", hex::encode(header_hash))
}

/// Largest 256-bit value; the target at difficulty 1.
pub fn max_target() -> BigUint {
    (BigUint::one() << 256usize) - BigUint::one()
}

pub fn target_for(difficulty: &BigUint) -> BigUint {
    if difficulty.is_zero() {
        return max_target();
    }
    max_target() / difficulty
}

pub fn meets_target(hash: &Hash32, target: &BigUint) -> bool {
    BigUint::from_bytes_be(hash) <= *target
}

/// Search nonces `0..max_attempts` for one whose hash meets the header's target.
pub fn solve_pow(
    mut header: BlockHeader,
    max_attempts: u64,
    cancel: &CancellationToken,
) -> Result<BlockHeader, ConsensusError> {
    let target = target_for(&header.difficulty);
    let mut prefix = Sha256::new();
    prefix.update(header.serialize_without_nonce());

    for nonce in 0..max_attempts {
        if nonce % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
            return Err(ConsensusError::SealCancelled { attempts: nonce });
        }
        let mut hasher = prefix.clone();
        hasher.update(nonce.to_le_bytes());
        let hash: Hash32 = hasher.finalize().into();
        if meets_target(&hash, &target) {
            header.nonce = nonce;
            header.pow_hash = hash;
            return Ok(header);
        }
    }

    Err(ConsensusError::SealFailed {
        attempts: max_attempts,
        difficulty: header.difficulty.to_string(),
    })
}

/// Check a sealed header's proof of work.
pub fn verify_pow(header: &BlockHeader) -> Result<(), ConsensusError> {
    let reject = |reason: &str| {
        Err(ConsensusError::InvalidProofOfWork {
            height: header.height,
            reason: reason.to_string(),
        }
        .audited())
    };
    if header.difficulty.is_zero() {
        return reject("zero difficulty");
    }
    if header.compute_pow_hash() != header.pow_hash {
        return reject("pow_hash does not match header and nonce");
    }
    if !meets_target(&header.pow_hash, &target_for(&header.difficulty)) {
        return reject("hash above target");
    }
    Ok(())
}

/// Assembles, seals and commits main blocks.
pub struct BlockSealer {
    ledger: Arc<dyn Ledger>,
    authority: Arc<dyn AuthorityProvider>,
    stake: Arc<StakeValidator>,
    difficulty: Arc<DifficultyController>,
    rewards: Arc<RewardDistributor>,
    quorum: QuorumPolicy,
    max_attempts: u64,
}

impl BlockSealer {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        authority: Arc<dyn AuthorityProvider>,
        stake: Arc<StakeValidator>,
        difficulty: Arc<DifficultyController>,
        rewards: Arc<RewardDistributor>,
        quorum: QuorumPolicy,
        max_attempts: u64,
    ) -> Self {
        BlockSealer {
            ledger,
            authority,
            stake,
            difficulty,
            rewards,
            quorum,
            max_attempts,
        }
    }

    pub fn quorum(&self) -> QuorumPolicy {
        self.quorum
    }

    /// Check the quorum policy against a sub-block's tally.
    pub fn check_quorum(&self, sub_block: &SubBlock<StakeVerified>) -> Result<(), ConsensusError> {
        self.check_tally(sub_block.tally())
    }

    fn check_tally(&self, tally: &VoteTally) -> Result<(), ConsensusError> {
        if !self.quorum.is_met(tally.voted_stake, tally.total_stake) {
            return Err(ConsensusError::QuorumNotReached {
                voted: tally.voted_stake,
                total: tally.total_stake,
            });
        }
        Ok(())
    }

    /// Build the unsealed candidate block on top of the current tip.
    pub fn assemble(
        &self,
        sub_blocks: &[SubBlock<StakeVerified>],
        timestamp_ms: i64,
    ) -> Result<Block, ConsensusError> {
        if sub_blocks.is_empty() {
            return Err(ConsensusError::EmptyBatch);
        }
        for sub_block in sub_blocks {
            self.check_quorum(sub_block)?;
        }

        let sub_headers: Vec<SubBlockHeader> = sub_blocks.iter().map(|sb| sb.header().clone()).collect();
        let timestamp = match self.parent_timestamp() {
            Some(parent) => timestamp_ms.max(parent.saturating_add(1)),
            None => timestamp_ms,
        };
        let header = BlockHeader {
            height: self.ledger.last_block_height() + 1,
            timestamp,
            prev_hash: self.ledger.last_block_hash(),
            miner_pk: self.authority.validator_pub_key(POW_ROLE),
            difficulty: self.difficulty.current(),
            sub_headers_root: sub_headers_root(&sub_headers),
            nonce: 0,
            pow_hash: ZERO_HASH,
        };
        Ok(Block::new(header, BlockBody { sub_headers }))
    }

    pub fn seal_main_block_pow(
        &self,
        sub_blocks: &[SubBlock<StakeVerified>],
        cancel: &CancellationToken,
    ) -> Result<Block, ConsensusError> {
        self.seal_main_block_pow_at(sub_blocks, unix_millis(), cancel)
    }

    /// Seal with an explicit header timestamp, then append, retarget and pay rewards.
    pub fn seal_main_block_pow_at(
        &self,
        sub_blocks: &[SubBlock<StakeVerified>],
        timestamp_ms: i64,
        cancel: &CancellationToken,
    ) -> Result<Block, ConsensusError> {
        let candidate = self.assemble(sub_blocks, timestamp_ms)?;
        let header = solve_pow(candidate.header, self.max_attempts, cancel)?;
        let block = Block::new(header, candidate.body);
        info!(
            "sealed block #{} with {} sub-blocks at difficulty {} (nonce {}, hash {})",
            block.height(),
            block.body.sub_headers.len(),
            block.header.difficulty,
            block.header.nonce,
            hex::encode(block.hash())
        );
        self.commit(&block)?;
        Ok(block)
    }

    /// Validate and commit a block sealed by a peer.
    ///
    /// Checks run cheapest first: timestamp, difficulty, proof of work, then
    /// the votes behind every sub-block header.
    pub fn import_block(&self, block: &Block) -> Result<RewardReceipt, ConsensusError> {
        self.import_block_at(block, unix_millis())
    }

    /// As `import_block`, judging future drift against `now_ms`.
    pub fn import_block_at(&self, block: &Block, now_ms: i64) -> Result<RewardReceipt, ConsensusError> {
        self.check_timestamp(&block.header, now_ms)?;
        let expected = self.difficulty.current();
        if block.header.difficulty != expected {
            return Err(ConsensusError::DifficultyMismatch {
                height: block.height(),
                expected: expected.to_string(),
                got: block.header.difficulty.to_string(),
            }
            .audited());
        }
        verify_pow(&block.header)?;
        self.check_sub_headers(block)?;
        self.commit(block)
    }

    /// Whether a sub-block is already part of the chain.
    pub fn is_sealed(&self, header_hash: &Hash32) -> Result<bool, ConsensusError> {
        Ok(self.ledger.has_state(&sealed_marker_key(header_hash))?)
    }

    fn parent_timestamp(&self) -> Option<i64> {
        self.ledger.recent_blocks(1).last().map(|b| b.header.timestamp)
    }

    fn check_timestamp(&self, header: &BlockHeader, now_ms: i64) -> Result<(), ConsensusError> {
        let reject = |reason: String| {
            Err(ConsensusError::InvalidTimestamp {
                height: header.height,
                reason,
            }
            .audited())
        };
        if let Some(parent) = self.parent_timestamp() {
            if header.timestamp <= parent {
                return reject(format!("{} is not after parent {}", header.timestamp, parent));
            }
        }
        if header.timestamp.saturating_sub(now_ms) > MAX_FUTURE_DRIFT_MS {
            return reject(format!("{} is more than {} ms ahead of {}", header.timestamp, MAX_FUTURE_DRIFT_MS, now_ms));
        }
        Ok(())
    }

    fn check_sub_headers(&self, block: &Block) -> Result<(), ConsensusError> {
        let mut seen = HashSet::with_capacity(block.body.sub_headers.len());
        for sub_header in &block.body.sub_headers {
            let header_hash = sub_header.hash();
            if !seen.insert(header_hash) {
                return Err(ConsensusError::DuplicateSubBlock {
                    height: block.height(),
                    header_hash: hex::encode(header_hash),
                }
                .audited());
            }
            if self.is_sealed(&header_hash)? {
                return Err(ConsensusError::AlreadySealed {
                    header_hash: hex::encode(header_hash),
                }
                .audited());
            }
            let tally = self.stake.tally_header(sub_header)?;
            self.check_tally(&tally)?;
        }
        debug!(
            "block #{}: votes and quorum hold for {} sub-blocks",
            block.height(),
            block.body.sub_headers.len()
        );
        Ok(())
    }

    fn commit(&self, block: &Block) -> Result<RewardReceipt, ConsensusError> {
        self.ledger.append_block(block.clone())?;
        for sub_header in &block.body.sub_headers {
            self.ledger
                .set_state(&sealed_marker_key(&sub_header.hash()), block.hash().to_vec())?;
        }
        self.difficulty.record_and_retarget(block.header.timestamp);
        self.rewards.distribute_rewards(block).map_err(|e| {
            warn!("block #{} appended but reward distribution failed: {}", block.height(), e);
            ConsensusError::from(e)
        })
    }
}

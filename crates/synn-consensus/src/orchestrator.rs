// HYBRID CONSENSUS ENGINE
// Wires the PoH, PoS and PoW stages together and drives them from long-lived
// tokio tasks.
//
// Pipeline: propose + self-vote -> pending queue -> PoH batch check -> stake
// check -> quorum -> seal (blocking pool) -> append, retarget, rewards -> broadcast
//
// SAFETY INVARIANTS:
// 1. Shared mutable state is limited to the pending queue, the difficulty
//    window and the ledger; each synchronises internally
// 2. A sub-block already included in any block is never queued again
// 3. The pending queue is bounded; the oldest entry is evicted first
// 4. A valid competing block cancels the in-flight seal
// 5. Every task stops when the shutdown token is cancelled

use crate::adaptive::AdaptiveManager;
use crate::config::ConsensusConfig;
use crate::difficulty::DifficultyController;
use crate::engine::{ConsensusError, ErrorCategory};
use crate::poh::{validate_poh, validate_poh_batch};
use crate::pos_engine::StakeValidator;
use crate::pow_engine::BlockSealer;
use crate::proposer::SubBlockProposer;
use crate::sub_block::{Proposed, StakeVerified, SubBlock, SubBlockMessage, SubBlockStage};
use crate::votes::VoteMessage;
use bincode::Options;
use log::{debug, info, warn};
use num_bigint::BigUint;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use synn_core::{
    unix_millis, AuthorityProvider, Block, Hash32, InboundMessage, Ledger, Network, NetworkError,
    Signer, SubBlockHeader, TransactionSource,
};
use synn_economics::RewardDistributor;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

pub const TOPIC_VOTE: &str = "posvote";
pub const TOPIC_SUB_BLOCK: &str = "subblock";
pub const TOPIC_BLOCK: &str = "block";

/// Upper bound on a decoded network message.
const MAX_MESSAGE_BYTES: u64 = 64 * 1024 * 1024;

fn codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_limit(MAX_MESSAGE_BYTES)
        .with_fixint_encoding()
        .allow_trailing_bytes()
}

fn decode<T: DeserializeOwned>(topic: &str, payload: &[u8]) -> Result<T, ConsensusError> {
    codec().deserialize(payload).map_err(|e| ConsensusError::Codec {
        topic: topic.to_string(),
        reason: e.to_string(),
    })
}

/// External services the engine is built on.
pub struct Collaborators {
    pub source: Arc<dyn TransactionSource>,
    pub network: Arc<dyn Network>,
    pub signer: Arc<dyn Signer>,
    pub authority: Arc<dyn AuthorityProvider>,
    pub ledger: Arc<dyn Ledger>,
}

pub struct SynnergyConsensus {
    config: ConsensusConfig,
    network: Arc<dyn Network>,
    ledger: Arc<dyn Ledger>,
    proposer: SubBlockProposer,
    stake: Arc<StakeValidator>,
    sealer: Arc<BlockSealer>,
    difficulty: Arc<DifficultyController>,
    adaptive: AdaptiveManager,
    pending: Mutex<VecDeque<SubBlock<Proposed>>>,
    in_flight_seal: Mutex<Option<CancellationToken>>,
}

impl SynnergyConsensus {
    pub fn new(
        config: ConsensusConfig,
        collaborators: Collaborators,
        rewards: RewardDistributor,
    ) -> Result<Self, ConsensusError> {
        config.validate()?;
        let Collaborators {
            source,
            network,
            signer,
            authority,
            ledger,
        } = collaborators;

        let difficulty = Arc::new(DifficultyController::new(
            BigUint::from(config.initial_difficulty),
            config.target_block_interval_ms,
            config.retarget_window,
        )?);
        let proposer = SubBlockProposer::new(
            source,
            authority.clone(),
            config.max_tx_per_sub_block,
            ledger.last_sub_block_height() + 1,
        );
        let stake = Arc::new(StakeValidator::new(ledger.clone(), authority.clone(), signer));
        let sealer = Arc::new(BlockSealer::new(
            ledger.clone(),
            authority,
            stake.clone(),
            difficulty.clone(),
            Arc::new(rewards),
            config.quorum,
            config.max_pow_attempts,
        ));
        let adaptive = AdaptiveManager::new(ledger.clone(), config.weights, config.adaptive_window);

        info!(
            "consensus engine ready: difficulty={}, quorum={}/{}, max {} tx per sub-block",
            config.initial_difficulty, config.quorum.numerator, config.quorum.denominator, config.max_tx_per_sub_block
        );

        Ok(SynnergyConsensus {
            config,
            network,
            ledger,
            proposer,
            stake,
            sealer,
            difficulty,
            adaptive,
            pending: Mutex::new(VecDeque::new()),
            in_flight_seal: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    pub fn difficulty(&self) -> &DifficultyController {
        &self.difficulty
    }

    pub fn stake_validator(&self) -> &StakeValidator {
        &self.stake
    }

    pub fn sealer(&self) -> &BlockSealer {
        &self.sealer
    }

    pub fn adaptive(&self) -> &AdaptiveManager {
        &self.adaptive
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Propose a sub-block from the transaction source, endorse it and publish it.
    pub async fn propose_sub_block(&self) -> Result<SubBlockHeader, ConsensusError> {
        self.propose_sub_block_at(unix_millis()).await
    }

    /// As `propose_sub_block`, with an explicit commitment time.
    pub async fn propose_sub_block_at(&self, timestamp_ms: i64) -> Result<SubBlockHeader, ConsensusError> {
        // a non-authority must not drain the transaction source
        if self.stake.own_index()?.is_none() {
            return Err(ConsensusError::UnauthorizedVoter {
                voter: "local node".to_string(),
            });
        }
        let sub_block = self.proposer.propose_sub_block_at(timestamp_ms)?;
        self.publish_own(sub_block).await
    }

    async fn publish_own(&self, sub_block: SubBlock<Proposed>) -> Result<SubBlockHeader, ConsensusError> {
        let vote = self.stake.cast_vote(sub_block.header())?;
        let header = sub_block.header().clone();
        let message = sub_block.to_message();
        self.enqueue(sub_block);

        self.broadcast(TOPIC_SUB_BLOCK, &message).await?;
        self.broadcast(TOPIC_VOTE, &vote).await?;
        Ok(header)
    }

    /// Queue a sub-block for sealing. Returns `false` if it is already
    /// pending or sealed. A full queue drops its oldest entry.
    pub fn enqueue(&self, sub_block: SubBlock<Proposed>) -> bool {
        let hash = sub_block.hash();
        if self.is_sealed(&hash) {
            return false;
        }
        let mut pending = self.pending.lock();
        if pending.iter().any(|sb| sb.hash() == hash) {
            return false;
        }
        pending.push_back(sub_block);
        self.evict_overflow(&mut pending);
        true
    }

    fn evict_overflow(&self, pending: &mut VecDeque<SubBlock<Proposed>>) {
        while pending.len() > self.config.max_pending_sub_blocks {
            if let Some(evicted) = pending.pop_front() {
                warn!(
                    "pending queue full ({}), dropping sub-block {}",
                    self.config.max_pending_sub_blocks,
                    hex::encode(evicted.hash())
                );
            }
        }
    }

    /// Where a sub-block is, as far as this node knows.
    pub fn status_of(&self, hash: &Hash32) -> Option<SubBlockStage> {
        if self.pending.lock().iter().any(|sb| sb.hash() == *hash) {
            return Some(SubBlockStage::Proposed);
        }
        if self.is_sealed(hash) {
            return Some(SubBlockStage::Sealed);
        }
        None
    }

    // an unreadable marker counts as unsealed; import re-checks it
    fn is_sealed(&self, hash: &Hash32) -> bool {
        matches!(self.sealer.is_sealed(hash), Ok(true))
    }

    /// Take pending sub-blocks through PoH, stake and quorum checks.
    ///
    /// Sub-blocks still waiting for votes go back to the end of the queue;
    /// integrity failures are dropped.
    pub fn collect_sealable(&self) -> Vec<SubBlock<StakeVerified>> {
        let batch: Vec<SubBlock<Proposed>> = {
            let mut pending = self.pending.lock();
            let n = pending.len().min(self.config.max_sub_blocks_per_block);
            pending.drain(..n).collect()
        };
        if batch.is_empty() {
            return Vec::new();
        }

        let mut sealable = Vec::new();
        let mut waiting = Vec::new();

        for result in validate_poh_batch(batch) {
            let Ok(verified) = result else {
                continue;
            };
            if self.is_sealed(&verified.hash()) {
                continue;
            }
            let retry = verified.clone().into_proposed();
            match self.stake.validate_pos(verified) {
                Ok(staked) => match self.sealer.check_quorum(&staked) {
                    Ok(()) => sealable.push(staked),
                    Err(e) => {
                        debug!("sub-block {} not sealable yet: {}", hex::encode(staked.hash()), e);
                        waiting.push(staked.into_proposed());
                    }
                },
                Err(e) if e.is_recoverable() => {
                    debug!("sub-block {} not sealable yet: {}", hex::encode(retry.hash()), e);
                    waiting.push(retry);
                }
                Err(e) => {
                    warn!("dropping sub-block {}: {}", hex::encode(retry.hash()), e);
                }
            }
        }

        if !waiting.is_empty() {
            let mut pending = self.pending.lock();
            pending.extend(waiting);
            self.evict_overflow(&mut pending);
        }
        sealable
    }

    /// Seal on the calling thread. See `BlockSealer::seal_main_block_pow`.
    pub fn seal_main_block_pow(
        &self,
        sub_blocks: &[SubBlock<StakeVerified>],
        cancel: &CancellationToken,
    ) -> Result<Block, ConsensusError> {
        let block = self.sealer.seal_main_block_pow(sub_blocks, cancel)?;
        self.after_commit(&block);
        Ok(block)
    }

    /// Collect sealable sub-blocks and seal them on the blocking pool.
    ///
    /// Returns `Ok(None)` when nothing is sealable. On failure the sub-blocks
    /// are queued again unless a competing block already included them.
    pub async fn seal_pending(&self, shutdown: &CancellationToken) -> Result<Option<Block>, ConsensusError> {
        let sealable = self.collect_sealable();
        if sealable.is_empty() {
            return Ok(None);
        }

        let token = shutdown.child_token();
        *self.in_flight_seal.lock() = Some(token.clone());
        let sealer = self.sealer.clone();
        let joined = tokio::task::spawn_blocking(move || {
            let result = sealer.seal_main_block_pow(&sealable, &token);
            (result, sealable)
        })
        .await;
        self.in_flight_seal.lock().take();

        let (result, sealable) = joined.map_err(|e| ConsensusError::Task(e.to_string()))?;
        match result {
            Ok(block) => {
                self.after_commit(&block);
                self.broadcast(TOPIC_BLOCK, &block).await?;
                Ok(Some(block))
            }
            Err(e) => {
                let mut requeued = 0;
                for sub_block in sealable {
                    if self.enqueue(sub_block.into_proposed()) {
                        requeued += 1;
                    }
                }
                debug!("seal failed, {} sub-blocks queued again", requeued);
                Err(e)
            }
        }
    }

    /// Validate and commit a block from a peer. Known or stale blocks are
    /// ignored and return `Ok(false)`.
    pub fn import_block(&self, block: Block) -> Result<bool, ConsensusError> {
        if block.height() <= self.ledger.last_block_height() {
            debug!("ignoring known or stale block #{}", block.height());
            return Ok(false);
        }
        self.sealer.import_block(&block)?;

        if let Some(token) = self.in_flight_seal.lock().take() {
            info!("block #{} arrived from a peer, cancelling in-flight seal", block.height());
            token.cancel();
        }
        let sealed: HashSet<Hash32> = block.body.sub_headers.iter().map(|h| h.hash()).collect();
        self.pending.lock().retain(|sb| !sealed.contains(&sb.hash()));

        self.after_commit(&block);
        info!("imported block #{} ({})", block.height(), hex::encode(block.hash()));
        Ok(true)
    }

    fn after_commit(&self, block: &Block) {
        if let Err(e) = self.adaptive.adjust_weights() {
            warn!("adaptive weight update after block #{} failed: {}", block.height(), e);
        }
    }

    /// Dispatch one inbound message by topic.
    pub async fn handle_message(&self, message: InboundMessage) -> Result<(), ConsensusError> {
        match message.topic.as_str() {
            TOPIC_VOTE => {
                let vote: VoteMessage = decode(TOPIC_VOTE, &message.payload)?;
                self.stake.accept_vote(&vote)?;
            }
            TOPIC_SUB_BLOCK => {
                let msg: SubBlockMessage = decode(TOPIC_SUB_BLOCK, &message.payload)?;
                self.receive_sub_block(msg.into()).await?;
            }
            TOPIC_BLOCK => {
                let block: Block = decode(TOPIC_BLOCK, &message.payload)?;
                self.import_block(block)?;
            }
            other => debug!("ignoring message on topic {}", other),
        }
        Ok(())
    }

    async fn receive_sub_block(&self, sub_block: SubBlock<Proposed>) -> Result<(), ConsensusError> {
        if self.status_of(&sub_block.hash()).is_some() {
            return Ok(());
        }
        let verified = validate_poh(sub_block)?;
        if self.stake.active_index_of(&verified.header().validator)?.is_none() {
            return Err(ConsensusError::UnauthorizedVoter {
                voter: hex::encode(&verified.header().validator),
            }
            .audited());
        }
        if self.stake.own_index()?.is_some() {
            let vote = self.stake.cast_vote(verified.header())?;
            self.broadcast(TOPIC_VOTE, &vote).await?;
        }
        self.enqueue(verified.into_proposed());
        Ok(())
    }

    async fn broadcast<T: Serialize>(&self, topic: &str, value: &T) -> Result<(), ConsensusError> {
        let payload = codec().serialize(value).map_err(|e| NetworkError::Encode {
            topic: topic.to_string(),
            reason: e.to_string(),
        })?;
        self.network.broadcast(topic, payload).await?;
        Ok(())
    }

    /// Spawn the sub-block loop, the block loop and the message listener.
    pub fn start(self: Arc<Self>, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        let votes = self.network.subscribe(TOPIC_VOTE);
        let sub_blocks = self.network.subscribe(TOPIC_SUB_BLOCK);
        let blocks = self.network.subscribe(TOPIC_BLOCK);

        vec![
            tokio::spawn(self.clone().run_sub_block_loop(shutdown.clone())),
            tokio::spawn(self.clone().run_block_loop(shutdown.clone())),
            tokio::spawn(self.run_listener(votes, sub_blocks, blocks, shutdown)),
        ]
    }

    async fn run_sub_block_loop(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(Duration::from_millis(self.config.sub_block_interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("sub-block loop stopped");
                    break;
                }
                _ = ticker.tick() => {
                    match self.propose_sub_block().await {
                        Ok(header) => debug!("sub-block #{} published", header.height),
                        Err(ConsensusError::EmptyBatch) => {}
                        Err(e) => warn!("sub-block proposal failed: {}", e),
                    }
                }
            }
        }
    }

    async fn run_block_loop(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(Duration::from_millis(self.config.block_interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("block loop stopped");
                    break;
                }
                _ = ticker.tick() => {
                    match self.seal_pending(&shutdown).await {
                        Ok(Some(block)) => debug!("block #{} published", block.height()),
                        Ok(None) => debug!("no sealable sub-blocks"),
                        Err(e @ ConsensusError::SealCancelled { .. }) => info!("{}", e),
                        Err(e) => warn!("block sealing failed: {}", e),
                    }
                }
            }
        }
    }

    async fn run_listener(
        self: Arc<Self>,
        mut votes: mpsc::Receiver<InboundMessage>,
        mut sub_blocks: mpsc::Receiver<InboundMessage>,
        mut blocks: mpsc::Receiver<InboundMessage>,
        shutdown: CancellationToken,
    ) {
        loop {
            let message = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(m) = blocks.recv() => m,
                Some(m) = votes.recv() => m,
                Some(m) = sub_blocks.recv() => m,
                else => break,
            };
            let topic = message.topic.clone();
            if let Err(e) = self.handle_message(message).await {
                match e.category() {
                    // already logged at warn
                    ErrorCategory::IntegrityFailure => {}
                    _ => debug!("dropped {} message: {}", topic, e),
                }
            }
        }
        info!("message listener stopped");
    }
}

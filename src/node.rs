// NODE WIRING
// Builds a single validator on the in-memory collaborators and runs the
// consensus loops until the shutdown token is cancelled.

use crate::config::{DemoConfig, NodeConfig};
use crate::NodeError;
use std::sync::Arc;
use std::time::Duration;
use synn_consensus::{Collaborators, ConsensusWeights, SynnergyConsensus};
use synn_core::{
    Address, Ed25519Signer, Ledger, LoopbackNetwork, MemoryLedger, MemoryPool, StaticAuthority, POS_ROLE,
    POW_ROLE,
};
use synn_economics::{EmissionSchedule, RewardDistributor};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Treasury account credited with the loan-pool share of every block reward.
pub const LOAN_POOL_ADDRESS: Address = *b"synnergy-loan-pool\0\0";

/// Snapshot of chain and engine state for logging.
#[derive(Debug, Clone)]
pub struct NodeStatus {
    pub height: u64,
    pub difficulty: String,
    pub pending_sub_blocks: usize,
    pub weights: ConsensusWeights,
}

pub struct Node {
    config: NodeConfig,
    engine: Arc<SynnergyConsensus>,
    pool: Arc<MemoryPool>,
    ledger: Arc<MemoryLedger>,
}

impl Node {
    /// A node with a fresh keypair per role, registered as the only authority.
    pub fn in_memory(config: NodeConfig) -> Result<Self, NodeError> {
        config.validate()?;
        let signer = Arc::new(Ed25519Signer::generate(&[POS_ROLE, POW_ROLE]));
        let pos_key = signer.public_key(POS_ROLE)?;
        let authority = Arc::new(
            StaticAuthority::new(LOAN_POOL_ADDRESS)
                .with_own_key(POS_ROLE, pos_key.clone())
                .with_own_key(POW_ROLE, signer.public_key(POW_ROLE)?),
        );
        let index = authority.register(pos_key.clone(), config.demo.stake)?;
        info!(
            "validator #{} registered with stake {} (pos key {})",
            index,
            config.demo.stake,
            hex::encode(&pos_key)
        );

        let ledger = Arc::new(MemoryLedger::new());
        let pool = Arc::new(MemoryPool::new());
        let network = Arc::new(LoopbackNetwork::new());
        let rewards = RewardDistributor::new(
            EmissionSchedule::from_config(&config.rewards)?,
            config.rewards.split,
            ledger.clone(),
            authority.clone(),
        )?;
        let engine = SynnergyConsensus::new(
            config.consensus.clone(),
            Collaborators {
                source: pool.clone(),
                network,
                signer,
                authority,
                ledger: ledger.clone(),
            },
            rewards,
        )?;

        Ok(Node {
            config,
            engine: Arc::new(engine),
            pool,
            ledger,
        })
    }

    pub fn engine(&self) -> &Arc<SynnergyConsensus> {
        &self.engine
    }

    pub fn pool(&self) -> &Arc<MemoryPool> {
        &self.pool
    }

    pub fn ledger(&self) -> &Arc<MemoryLedger> {
        &self.ledger
    }

    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            height: self.ledger.last_block_height(),
            difficulty: self.engine.difficulty().current().to_string(),
            pending_sub_blocks: self.engine.pending_len(),
            weights: self.engine.adaptive().weights(),
        }
    }

    /// Run the engine (and the demo generator, if enabled) until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut handles = self.engine.clone().start(shutdown.clone());
        if self.config.demo.enabled {
            handles.push(tokio::spawn(run_demo_source(
                self.pool.clone(),
                self.config.demo.clone(),
                shutdown.clone(),
            )));
        }
        info!(
            "node running: sub-block every {} ms, block every {} ms, difficulty {}",
            self.config.consensus.sub_block_interval_ms,
            self.config.consensus.block_interval_ms,
            self.engine.difficulty().current()
        );

        for handle in handles {
            if let Err(e) = handle.await {
                warn!("node task ended abnormally: {}", e);
            }
        }
        let status = self.status();
        info!(
            "node stopped at height {} (difficulty {}, {} sub-blocks pending)",
            status.height, status.difficulty, status.pending_sub_blocks
        );
    }
}

/// Feed synthetic transactions into the pool.
async fn run_demo_source(pool: Arc<MemoryPool>, demo: DemoConfig, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(Duration::from_millis(demo.tx_interval_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let session: u32 = rand::random();
    let mut counter: u64 = 0;

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                for _ in 0..demo.tx_per_tick {
                    counter += 1;
                    pool.submit(format!("demo-tx-{:08x}-{}", session, counter).into_bytes());
                }
                debug!("demo source submitted {} transactions ({} total)", demo.tx_per_tick, counter);
            }
        }
    }
    info!("demo source stopped after {} transactions", counter);
}

use crate::engine::ConsensusError;
use crate::poh::poh_digest;
use crate::sub_block::{Proposed, SubBlock};
use log::debug;
use parking_lot::Mutex;
use std::sync::Arc;
use synn_core::{unix_millis, AuthorityProvider, SubBlockBody, SubBlockHeader, TransactionSource, POS_ROLE};

/// Stamp `transactions` with a PoH digest at `timestamp_ms`.
pub fn build_sub_block(
    height: u64,
    validator: Vec<u8>,
    transactions: Vec<Vec<u8>>,
    timestamp_ms: i64,
) -> Result<SubBlock<Proposed>, ConsensusError> {
    if transactions.is_empty() {
        return Err(ConsensusError::EmptyBatch);
    }
    let header = SubBlockHeader {
        height,
        validator,
        poh_hash: poh_digest(&transactions, timestamp_ms),
        timestamp: timestamp_ms,
    };
    Ok(SubBlock::new(header, SubBlockBody::new(transactions)))
}

/// Pulls transaction batches and turns them into PoH-stamped sub-blocks.
pub struct SubBlockProposer {
    source: Arc<dyn TransactionSource>,
    authority: Arc<dyn AuthorityProvider>,
    max_tx: usize,
    next_height: Mutex<u64>,
}

impl SubBlockProposer {
    /// `next_height` is the sequence number of the first sub-block produced.
    pub fn new(
        source: Arc<dyn TransactionSource>,
        authority: Arc<dyn AuthorityProvider>,
        max_tx: usize,
        next_height: u64,
    ) -> Self {
        SubBlockProposer {
            source,
            authority,
            max_tx,
            next_height: Mutex::new(next_height),
        }
    }

    pub fn propose_sub_block(&self) -> Result<SubBlock<Proposed>, ConsensusError> {
        self.propose_sub_block_at(unix_millis())
    }

    /// Propose with an explicit commitment time.
    ///
    /// The height counter only advances when a sub-block is produced, so an
    /// empty pool leaves no gap in the sequence.
    pub fn propose_sub_block_at(&self, timestamp_ms: i64) -> Result<SubBlock<Proposed>, ConsensusError> {
        let mut next_height = self.next_height.lock();
        let mut transactions = self.source.pick(self.max_tx);
        if transactions.len() > self.max_tx {
            debug!(
                "transaction source returned {} payloads, keeping the first {}",
                transactions.len(),
                self.max_tx
            );
            transactions.truncate(self.max_tx);
        }
        let validator = self.authority.validator_pub_key(POS_ROLE);
        let sub_block = build_sub_block(*next_height, validator, transactions, timestamp_ms)?;
        *next_height += 1;
        debug!(
            "proposed sub-block #{} with {} transactions, poh={}",
            sub_block.header().height,
            sub_block.body().len(),
            hex::encode(sub_block.header().poh_hash)
        );
        Ok(sub_block)
    }

    pub fn next_height(&self) -> u64 {
        *self.next_height.lock()
    }
}

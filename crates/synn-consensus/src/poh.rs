// PROOF OF HISTORY
//
// poh = SHA-256(tx_1 || tx_2 || ... || tx_n || le(timestamp_ms))
//
// SAFETY INVARIANTS:
// 1. The digest is a pure function of the transaction bytes, their order and the timestamp
// 2. Recomputation is the only defense against reordering after proposal, so
//    any difference from the header is rejected

use crate::engine::ConsensusError;
use crate::sub_block::{PoHVerified, Proposed, SubBlock};
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use synn_core::Hash32;

pub fn poh_digest(transactions: &[Vec<u8>], timestamp_ms: i64) -> Hash32 {
    let mut hasher = Sha256::new();
    for tx in transactions {
        hasher.update(tx);
    }
    hasher.update(timestamp_ms.to_le_bytes());
    hasher.finalize().into()
}

/// Recompute the sub-block's PoH digest and require a byte-for-byte match.
pub fn validate_poh(sub_block: SubBlock<Proposed>) -> Result<SubBlock<PoHVerified>, ConsensusError> {
    let header = sub_block.header();
    let computed = poh_digest(&sub_block.body().transactions, header.timestamp);
    if computed != header.poh_hash {
        return Err(ConsensusError::PoHMismatch {
            height: header.height,
            expected: hex::encode(header.poh_hash),
            computed: hex::encode(computed),
        }
        .audited());
    }
    Ok(sub_block.into_poh_verified())
}

/// Validate independent sub-blocks in parallel. Results keep input order.
pub fn validate_poh_batch(
    sub_blocks: Vec<SubBlock<Proposed>>,
) -> Vec<Result<SubBlock<PoHVerified>, ConsensusError>> {
    sub_blocks.into_par_iter().map(validate_poh).collect()
}

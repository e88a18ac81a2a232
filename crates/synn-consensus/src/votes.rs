// VOTE RECORDS
//
// A vote is a validator's signature over a sub-block header hash, stored in
// the ledger at `vote:<header_hash_hex>:<validator_index>`. The index is the
// validator's position in `list_authorities(false)`.
//
// SAFETY: Votes are written once. A second write under the same key is a no-op,
// which is what prevents double-voting.

use crate::engine::ConsensusError;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use synn_core::{Hash32, Ledger};

/// Largest signature accepted from a voter.
pub const MAX_SIGNATURE_LEN: usize = 4096;

const VOTE_PREFIX: &str = "vote:";

pub fn vote_key(header_hash: &Hash32, validator_index: u32) -> String {
    format!("{}{}:{}", VOTE_PREFIX, hex::encode(header_hash), validator_index)
}

fn vote_prefix(header_hash: &Hash32) -> String {
    format!("{}{}:", VOTE_PREFIX, hex::encode(header_hash))
}

/// Vote published on the `posvote` topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteMessage {
    pub header_hash: Hash32,
    pub validator_index: u32,
    pub signature: Vec<u8>,
}

/// Stake that endorsed a sub-block, out of all active stake.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteTally {
    /// Authority indexes whose votes verified, ascending
    pub voters: Vec<u32>,
    pub voted_stake: u128,
    pub total_stake: u128,
}

pub(crate) fn check_signature_shape(validator_index: u32, signature: &[u8]) -> Result<(), ConsensusError> {
    if signature.is_empty() || signature.len() > MAX_SIGNATURE_LEN {
        return Err(ConsensusError::MalformedSignature {
            validator_index,
            len: signature.len(),
        });
    }
    Ok(())
}

/// Vote persistence on top of the ledger's state store.
#[derive(Clone)]
pub struct VoteStore {
    ledger: Arc<dyn Ledger>,
}

impl VoteStore {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        VoteStore { ledger }
    }

    /// Persist a vote. Returns `false` if one was already recorded for this
    /// validator and sub-block; the stored signature is left untouched.
    pub fn record_vote(
        &self,
        header_hash: &Hash32,
        validator_index: u32,
        signature: Vec<u8>,
    ) -> Result<bool, ConsensusError> {
        check_signature_shape(validator_index, &signature)?;
        let written = self
            .ledger
            .set_state_if_absent(&vote_key(header_hash, validator_index), signature)?;
        if written {
            debug!(
                "recorded vote from validator #{} for sub-block {}",
                validator_index,
                hex::encode(header_hash)
            );
        }
        Ok(written)
    }

    pub fn has_vote(&self, header_hash: &Hash32, validator_index: u32) -> Result<bool, ConsensusError> {
        Ok(self.ledger.has_state(&vote_key(header_hash, validator_index))?)
    }

    /// All votes recorded for a sub-block, by ascending validator index.
    pub fn votes_for(&self, header_hash: &Hash32) -> Result<Vec<(u32, Vec<u8>)>, ConsensusError> {
        let prefix = vote_prefix(header_hash);
        let mut votes = Vec::new();
        for key in self.ledger.keys_with_prefix(&prefix)? {
            let Ok(index) = key[prefix.len()..].parse::<u32>() else {
                warn!("ignoring vote record with malformed key {}", key);
                continue;
            };
            if let Some(signature) = self.ledger.get_state(&key)? {
                votes.push((index, signature));
            }
        }
        votes.sort_by_key(|(index, _)| *index);
        Ok(votes)
    }
}

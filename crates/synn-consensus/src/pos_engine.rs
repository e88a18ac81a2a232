// STAKE-WEIGHTED SUB-BLOCK VALIDATION
// Votes are signatures over the sub-block header hash by active authorities.
//
// SAFETY INVARIANTS:
// 1. The proposer must be an active authority and must have voted for its own sub-block
// 2. Every counted vote must come from an active authority and verify under its key;
//    votes from authorities deactivated since voting are skipped, not counted
// 3. Validation counts stake but does not apply the quorum policy; the sealer does
// 4. Inbound votes are verified before they are recorded

use crate::engine::ConsensusError;
use crate::sub_block::{PoHVerified, StakeVerified, SubBlock};
use crate::votes::{check_signature_shape, VoteMessage, VoteStore, VoteTally};
use log::{debug, info};
use std::sync::Arc;
use synn_core::{AuthorityNode, AuthorityProvider, Hash32, Ledger, Signer, SubBlockHeader, POS_ROLE};

pub struct StakeValidator {
    votes: VoteStore,
    authority: Arc<dyn AuthorityProvider>,
    signer: Arc<dyn Signer>,
}

impl StakeValidator {
    pub fn new(ledger: Arc<dyn Ledger>, authority: Arc<dyn AuthorityProvider>, signer: Arc<dyn Signer>) -> Self {
        StakeValidator {
            votes: VoteStore::new(ledger),
            authority,
            signer,
        }
    }

    pub fn votes(&self) -> &VoteStore {
        &self.votes
    }

    /// Index of `pub_key` in the registration-ordered authority list, if it is active.
    pub fn active_index_of(&self, pub_key: &[u8]) -> Result<Option<u32>, ConsensusError> {
        let authorities = self.authority.list_authorities(false)?;
        Ok(authorities
            .iter()
            .position(|node| node.active && node.pub_key == pub_key)
            .map(|i| i as u32))
    }

    /// This node's authority index, if its PoS key is active.
    pub fn own_index(&self) -> Result<Option<u32>, ConsensusError> {
        self.active_index_of(&self.authority.validator_pub_key(POS_ROLE))
    }

    /// Verify every vote recorded for the sub-block and tally their stake.
    pub fn validate_pos(&self, sub_block: SubBlock<PoHVerified>) -> Result<SubBlock<StakeVerified>, ConsensusError> {
        let tally = self.tally_header(sub_block.header())?;
        Ok(sub_block.into_stake_verified(tally))
    }

    /// Check the proposer and every recorded vote for `header`, and tally stake.
    pub fn tally_header(&self, header: &SubBlockHeader) -> Result<VoteTally, ConsensusError> {
        let header_hash = header.hash();
        let authorities = self.authority.list_authorities(false)?;

        let proposer = &header.validator;
        let proposer_index = authorities
            .iter()
            .position(|node| node.active && &node.pub_key == proposer)
            .ok_or_else(|| {
                ConsensusError::UnauthorizedVoter {
                    voter: hex::encode(proposer),
                }
                .audited()
            })? as u32;

        if !self.votes.has_vote(&header_hash, proposer_index)? {
            return Err(ConsensusError::MissingVote {
                header_hash: hex::encode(header_hash),
                validator_index: proposer_index,
            });
        }

        let total_stake: u128 = authorities
            .iter()
            .filter(|node| node.active)
            .map(|node| self.authority.stake_of(&node.pub_key) as u128)
            .sum();

        let mut tally = VoteTally {
            total_stake,
            ..VoteTally::default()
        };
        for (index, signature) in self.votes.votes_for(&header_hash)? {
            if matches!(authorities.get(index as usize), Some(node) if !node.active) {
                debug!(
                    "skipping vote from deactivated validator #{} on sub-block {}",
                    index,
                    hex::encode(header_hash)
                );
                continue;
            }
            let node = self.verify_vote(&authorities, &header_hash, index, &signature)?;
            tally.voters.push(index);
            tally.voted_stake += self.authority.stake_of(&node.pub_key) as u128;
        }

        debug!(
            "sub-block {} stake-verified: {} voters, {}/{} stake",
            hex::encode(header_hash),
            tally.voters.len(),
            tally.voted_stake,
            tally.total_stake
        );
        Ok(tally)
    }

    /// Sign `header` as this node and record the vote.
    pub fn cast_vote(&self, header: &SubBlockHeader) -> Result<VoteMessage, ConsensusError> {
        let validator_index = self.own_index()?.ok_or_else(|| ConsensusError::UnauthorizedVoter {
            voter: hex::encode(self.authority.validator_pub_key(POS_ROLE)),
        })?;
        let header_hash = header.hash();
        let signature = self.signer.sign(POS_ROLE, &header_hash)?;
        self.votes.record_vote(&header_hash, validator_index, signature.clone())?;
        Ok(VoteMessage {
            header_hash,
            validator_index,
            signature,
        })
    }

    /// Record a peer's vote after checking it. Returns `false` for a repeat.
    pub fn accept_vote(&self, vote: &VoteMessage) -> Result<bool, ConsensusError> {
        let authorities = self.authority.list_authorities(false)?;
        self.verify_vote(&authorities, &vote.header_hash, vote.validator_index, &vote.signature)?;
        let fresh = self
            .votes
            .record_vote(&vote.header_hash, vote.validator_index, vote.signature.clone())?;
        if fresh {
            info!(
                "accepted vote from validator #{} for sub-block {}",
                vote.validator_index,
                hex::encode(vote.header_hash)
            );
        }
        Ok(fresh)
    }

    fn verify_vote<'a>(
        &self,
        authorities: &'a [AuthorityNode],
        header_hash: &Hash32,
        index: u32,
        signature: &[u8],
    ) -> Result<&'a AuthorityNode, ConsensusError> {
        let node = authorities
            .get(index as usize)
            .filter(|node| node.active)
            .ok_or_else(|| {
                ConsensusError::UnauthorizedVoter {
                    voter: format!("index {}", index),
                }
                .audited()
            })?;
        check_signature_shape(index, signature)?;
        if !self.signer.verify(&node.pub_key, header_hash, signature) {
            return Err(ConsensusError::InvalidSignature { validator_index: index }.audited());
        }
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poh::validate_poh;
    use crate::proposer::build_sub_block;
    use synn_core::{Ed25519Signer, MemoryLedger, StaticAuthority};

    struct Fixture {
        ledger: Arc<MemoryLedger>,
        authority: Arc<StaticAuthority>,
        signer: Arc<Ed25519Signer>,
        validator: StakeValidator,
    }

    fn fixture() -> Fixture {
        let signer = Arc::new(Ed25519Signer::from_seed(POS_ROLE, [1; 32]));
        let own = signer.public_key(POS_ROLE).unwrap();
        let authority = Arc::new(StaticAuthority::new([0; 20]).with_own_key(POS_ROLE, own.clone()));
        authority.register(own, 100).unwrap();
        let ledger = Arc::new(MemoryLedger::new());
        let validator = StakeValidator::new(ledger.clone(), authority.clone(), signer.clone());
        Fixture {
            ledger,
            authority,
            signer,
            validator,
        }
    }

    fn own_sub_block(f: &Fixture) -> SubBlock<PoHVerified> {
        let own = f.signer.public_key(POS_ROLE).unwrap();
        validate_poh(build_sub_block(1, own, vec![b"tx1".to_vec()], 10).unwrap()).unwrap()
    }

    #[test]
    fn test_self_vote_validates() {
        let f = fixture();
        let sb = own_sub_block(&f);
        f.validator.cast_vote(sb.header()).unwrap();

        let verified = f.validator.validate_pos(sb).unwrap();
        assert_eq!(verified.tally().voters, vec![0]);
        assert_eq!(verified.tally().voted_stake, 100);
        assert_eq!(verified.tally().total_stake, 100);
    }

    #[test]
    fn test_missing_proposer_vote() {
        let f = fixture();
        let sb = own_sub_block(&f);
        assert!(matches!(
            f.validator.validate_pos(sb),
            Err(ConsensusError::MissingVote { validator_index: 0, .. })
        ));
    }

    #[test]
    fn test_inactive_proposer_rejected() {
        let f = fixture();
        let sb = own_sub_block(&f);
        f.validator.cast_vote(sb.header()).unwrap();
        f.authority
            .set_active(&f.signer.public_key(POS_ROLE).unwrap(), false)
            .unwrap();
        assert!(matches!(
            f.validator.validate_pos(sb),
            Err(ConsensusError::UnauthorizedVoter { .. })
        ));
    }

    #[test]
    fn test_forged_vote_rejected() {
        let f = fixture();
        let sb = own_sub_block(&f);
        f.validator.cast_vote(sb.header()).unwrap();

        let outsider = Ed25519Signer::from_seed(POS_ROLE, [9; 32]);
        let other_pk = outsider.public_key(POS_ROLE).unwrap();
        f.authority.register(other_pk, 50).unwrap();
        // signature by the wrong key stored directly under index 1
        let sig = f.signer.sign(POS_ROLE, &sb.hash()).unwrap();
        f.ledger
            .set_state(&crate::votes::vote_key(&sb.hash(), 1), sig)
            .unwrap();

        assert_eq!(
            f.validator.validate_pos(sb).unwrap_err(),
            ConsensusError::InvalidSignature { validator_index: 1 }
        );
    }

    #[test]
    fn test_vote_from_deactivated_validator_not_counted() {
        let f = fixture();
        let sb = own_sub_block(&f);
        f.validator.cast_vote(sb.header()).unwrap();

        let other = Ed25519Signer::from_seed(POS_ROLE, [9; 32]);
        let other_pk = other.public_key(POS_ROLE).unwrap();
        f.authority.register(other_pk.clone(), 50).unwrap();
        let sig = other.sign(POS_ROLE, &sb.hash()).unwrap();
        f.validator
            .accept_vote(&VoteMessage {
                header_hash: sb.hash(),
                validator_index: 1,
                signature: sig,
            })
            .unwrap();
        assert_eq!(f.validator.tally_header(sb.header()).unwrap().voted_stake, 150);

        f.authority.set_active(&other_pk, false).unwrap();
        let verified = f.validator.validate_pos(sb).unwrap();
        assert_eq!(verified.tally().voters, vec![0]);
        assert_eq!(verified.tally().voted_stake, 100);
        assert_eq!(verified.tally().total_stake, 100);
    }

    #[test]
    fn test_vote_index_past_registry_is_rejected() {
        let f = fixture();
        let sb = own_sub_block(&f);
        f.validator.cast_vote(sb.header()).unwrap();
        f.ledger
            .set_state(&crate::votes::vote_key(&sb.hash(), 7), vec![0; 64])
            .unwrap();
        assert!(matches!(
            f.validator.validate_pos(sb),
            Err(ConsensusError::UnauthorizedVoter { .. })
        ));
    }

    #[test]
    fn test_accept_vote_checks_before_recording() {
        let f = fixture();
        let sb = own_sub_block(&f);
        let vote = VoteMessage {
            header_hash: sb.hash(),
            validator_index: 5,
            signature: vec![1; 64],
        };
        assert!(matches!(
            f.validator.accept_vote(&vote),
            Err(ConsensusError::UnauthorizedVoter { .. })
        ));
        assert!(!f.validator.votes().has_vote(&sb.hash(), 5).unwrap());

        let good = f.validator.cast_vote(sb.header()).unwrap();
        assert!(!f.validator.accept_vote(&good).unwrap());
    }
}

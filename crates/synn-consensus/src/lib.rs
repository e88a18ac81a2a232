pub mod adaptive;
pub mod config;
pub mod difficulty;
pub mod engine;
pub mod orchestrator;
pub mod poh;
pub mod pos_engine;
pub mod pow_engine;
pub mod proposer;
pub mod sub_block;
pub mod votes;

pub use adaptive::{calculate_weights, compute_threshold, AdaptiveManager, ConsensusWeights, WeightConfig};
pub use config::{ConsensusConfig, QuorumPolicy};
pub use difficulty::DifficultyController;
pub use engine::{ConsensusError, ErrorCategory};
pub use orchestrator::{Collaborators, SynnergyConsensus, TOPIC_BLOCK, TOPIC_SUB_BLOCK, TOPIC_VOTE};
pub use poh::{poh_digest, validate_poh, validate_poh_batch};
pub use pos_engine::StakeValidator;
pub use pow_engine::{
    max_target, meets_target, sealed_marker_key, solve_pow, target_for, verify_pow, BlockSealer,
    MAX_FUTURE_DRIFT_MS,
};
pub use proposer::{build_sub_block, SubBlockProposer};
pub use sub_block::{
    PoHVerified, Proposed, StakeVerified, SubBlock, SubBlockMessage, SubBlockStage, SubBlockState,
};
pub use votes::{vote_key, VoteMessage, VoteStore, VoteTally, MAX_SIGNATURE_LEN};

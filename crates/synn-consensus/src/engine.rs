// CONSENSUS ERRORS
// Every failure the hybrid engine can report, with its handling category.
//
// SAFETY: Integrity failures may indicate an adversarial peer. They are never
// retried automatically and are always logged at warn level for audit.

use log::warn;
use synn_core::{AuthorityError, CryptoError, LedgerError, NetworkError};
use synn_economics::EconomicsError;
use thiserror::Error;

/// How the caller should treat a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Bad or insufficient input. Recoverable: retry later or with fresh input.
    InputRejection,

    /// The sub-block or block under evaluation is invalid. Fatal to that item.
    IntegrityFailure,

    /// A bounded search ran out of budget or was cancelled. Recoverable.
    ResourceExhaustion,

    /// A collaborator (ledger, network, signer, authority registry) failed.
    Collaborator,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    #[error("transaction source returned no payloads")]
    EmptyBatch,

    #[error("PoH mismatch for sub-block {height}: header {expected}, computed {computed}")]
    PoHMismatch {
        height: u64,
        expected: String,
        computed: String,
    },

    #[error("voter {voter} is not an active authority")]
    UnauthorizedVoter { voter: String },

    #[error("no vote recorded for sub-block {header_hash} by validator #{validator_index}")]
    MissingVote {
        header_hash: String,
        validator_index: u32,
    },

    #[error("malformed signature from validator #{validator_index}: {len} bytes")]
    MalformedSignature { validator_index: u32, len: usize },

    #[error("invalid signature from validator #{validator_index}")]
    InvalidSignature { validator_index: u32 },

    #[error("quorum not reached: {voted} of {total} stake voted")]
    QuorumNotReached { voted: u128, total: u128 },

    #[error("no nonce found within {attempts} attempts at difficulty {difficulty}")]
    SealFailed { attempts: u64, difficulty: String },

    #[error("seal cancelled after {attempts} attempts")]
    SealCancelled { attempts: u64 },

    #[error("background task failed: {0}")]
    Task(String),

    #[error("invalid proof of work at height {height}: {reason}")]
    InvalidProofOfWork { height: u64, reason: String },

    #[error("block #{height} sealed at difficulty {got}, expected {expected}")]
    DifficultyMismatch {
        height: u64,
        expected: String,
        got: String,
    },

    #[error("block #{height} has an invalid timestamp: {reason}")]
    InvalidTimestamp { height: u64, reason: String },

    #[error("sub-block {header_hash} is already sealed")]
    AlreadySealed { header_hash: String },

    #[error("sub-block {header_hash} appears more than once in block #{height}")]
    DuplicateSubBlock { height: u64, header_hash: String },

    #[error("invalid consensus configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to decode {topic} message: {reason}")]
    Codec { topic: String, reason: String },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Authority(#[from] AuthorityError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Rewards(#[from] EconomicsError),
}

impl ConsensusError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ConsensusError::EmptyBatch
            | ConsensusError::MalformedSignature { .. }
            | ConsensusError::MissingVote { .. }
            | ConsensusError::QuorumNotReached { .. }
            | ConsensusError::InvalidConfig(_)
            | ConsensusError::Codec { .. } => ErrorCategory::InputRejection,

            ConsensusError::PoHMismatch { .. }
            | ConsensusError::UnauthorizedVoter { .. }
            | ConsensusError::InvalidSignature { .. }
            | ConsensusError::InvalidProofOfWork { .. }
            | ConsensusError::DifficultyMismatch { .. }
            | ConsensusError::InvalidTimestamp { .. }
            | ConsensusError::AlreadySealed { .. }
            | ConsensusError::DuplicateSubBlock { .. } => ErrorCategory::IntegrityFailure,

            ConsensusError::SealFailed { .. }
            | ConsensusError::SealCancelled { .. }
            | ConsensusError::Task(_) => ErrorCategory::ResourceExhaustion,

            ConsensusError::Ledger(_)
            | ConsensusError::Authority(_)
            | ConsensusError::Crypto(_)
            | ConsensusError::Network(_)
            | ConsensusError::Rewards(_) => ErrorCategory::Collaborator,
        }
    }

    /// Whether the same item may be retried later.
    pub fn is_recoverable(&self) -> bool {
        self.category() != ErrorCategory::IntegrityFailure
    }

    /// Log integrity failures for operator visibility and pass the error on.
    pub(crate) fn audited(self) -> Self {
        if self.category() == ErrorCategory::IntegrityFailure {
            warn!("consensus integrity failure: {}", self);
        }
        self
    }
}

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("block height {got} does not extend tip {tip}")]
    NonContiguousHeight { tip: u64, got: u64 },
    #[error("parent hash mismatch at height {0}")]
    ParentMismatch(u64),
    #[error("block body does not match header commitment at height {0}")]
    BodyMismatch(u64),
    #[error("state store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("failed to encode payload for topic {topic}: {reason}")]
    Encode { topic: String, reason: String },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("no signing key for role {0}")]
    UnknownRole(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthorityError {
    #[error("authority registry unavailable: {0}")]
    Unavailable(String),
    #[error("authority {0} already registered")]
    AlreadyRegistered(String),
    #[error("authority {0} not registered")]
    NotRegistered(String),
    #[error("stake amount must be > 0")]
    ZeroAmount,
    #[error("insufficient stake: have {have}, want {want}")]
    InsufficientStake { have: u64, want: u64 },
    #[error("stake {stake} below minimum {min}")]
    BelowMinimumStake { stake: u64, min: u64 },
}

// Collaborator contracts consumed by the consensus engine.
//
// The engine is constructed with trait objects for each of these so that it
// can run against the in-memory implementations in this crate, or against
// production transport/storage without change.
//
// CONTRACT NOTES:
// 1. Calls are expected to be fast; the consensus layer does not retry them
// 2. `Ledger` implementations synchronise internally; read-modify-write helpers
//    (`set_state_if_absent`) must be atomic
// 3. `AuthorityProvider::list_authorities(false)` returns a stable order; vote
//    keys address validators by their index in that list

use crate::block::{Block, Hash32};
use crate::error::{AuthorityError, CryptoError, LedgerError, NetworkError};
use async_trait::async_trait;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// 20-byte account address.
pub type Address = [u8; 20];

/// A registered validator as seen by the authority registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityNode {
    /// Public key the validator signs votes with
    pub pub_key: Vec<u8>,

    /// Whether the validator may currently vote
    pub active: bool,
}

/// A message received from a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Source of pending transaction payloads.
pub trait TransactionSource: Send + Sync {
    /// Remove and return up to `max` payloads in admission order.
    /// May return fewer than `max`, including none.
    fn pick(&self, max: usize) -> Vec<Vec<u8>>;
}

/// Peer-to-peer publish/subscribe.
#[async_trait]
pub trait Network: Send + Sync {
    async fn broadcast(&self, topic: &str, payload: Vec<u8>) -> Result<(), NetworkError>;

    fn subscribe(&self, topic: &str) -> mpsc::Receiver<InboundMessage>;
}

/// Role-scoped signing and signature verification.
pub trait Signer: Send + Sync {
    fn sign(&self, role: &str, data: &[u8]) -> Result<Vec<u8>, CryptoError>;

    fn verify(&self, pub_key: &[u8], data: &[u8], signature: &[u8]) -> bool;
}

/// Validator identities and stake weights.
pub trait AuthorityProvider: Send + Sync {
    /// This node's public key for `role`.
    fn validator_pub_key(&self, role: &str) -> Vec<u8>;

    fn stake_of(&self, pub_key: &[u8]) -> u64;

    fn list_authorities(&self, active_only: bool) -> Result<Vec<AuthorityNode>, AuthorityError>;

    /// Treasury account that receives the loan-pool share of block rewards.
    fn loan_pool_address(&self) -> Address;
}

/// State store, balances and the main chain.
pub trait Ledger: Send + Sync {
    fn set_state(&self, key: &str, value: Vec<u8>) -> Result<(), LedgerError>;

    /// Write `value` only if `key` is unset. Returns `true` when written.
    fn set_state_if_absent(&self, key: &str, value: Vec<u8>) -> Result<bool, LedgerError>;

    fn get_state(&self, key: &str) -> Result<Option<Vec<u8>>, LedgerError>;

    fn has_state(&self, key: &str) -> Result<bool, LedgerError>;

    /// All keys starting with `prefix`, in lexicographic order.
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, LedgerError>;

    /// Add `amount` to `account`. Credits are purely additive.
    fn credit(&self, account: &[u8], amount: &BigUint) -> Result<(), LedgerError>;

    fn balance_of(&self, account: &[u8]) -> Result<BigUint, LedgerError>;

    /// Every non-zero balance.
    fn balances(&self) -> Result<Vec<(Vec<u8>, BigUint)>, LedgerError>;

    /// Append a sealed block on top of the current tip.
    fn append_block(&self, block: Block) -> Result<(), LedgerError>;

    fn last_block_hash(&self) -> Hash32;

    /// Height of the tip, or 0 when the chain is empty.
    fn last_block_height(&self) -> u64;

    /// Highest sub-block height included in the chain, or 0.
    fn last_sub_block_height(&self) -> u64;

    /// Up to `n` most recent blocks, oldest first.
    fn recent_blocks(&self, n: usize) -> Vec<Block>;
}

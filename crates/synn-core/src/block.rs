// Sub-block and main block data model.
//
// INVARIANTS:
// 1. A sub-block header hash covers height, timestamp, validator key and PoH hash
// 2. Transaction order inside a sub-block body is the PoH commitment order
// 3. A main block header commits to its sub-headers through `sub_headers_root`
// 4. A main block's height is exactly one above its parent's

use chrono::Utc;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// SHA-256 digest.
pub type Hash32 = [u8; 32];

/// Parent hash of the first block.
pub const ZERO_HASH: Hash32 = [0u8; 32];

/// Milliseconds since the Unix epoch.
pub fn unix_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Header of a PoH-stamped sub-block.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubBlockHeader {
    /// Sub-block sequence number
    pub height: u64,

    /// Public key of the proposing validator
    pub validator: Vec<u8>,

    /// Ordering commitment over the body's transactions and `timestamp`
    pub poh_hash: Hash32,

    /// Commitment time in milliseconds
    pub timestamp: i64,
}

impl SubBlockHeader {
    /// Hash signed by endorsing validators and used in vote keys.
    pub fn hash(&self) -> Hash32 {
        let mut hasher = Sha256::new();
        hasher.update(self.height.to_le_bytes());
        hasher.update(self.timestamp.to_le_bytes());
        hasher.update(&self.validator);
        hasher.update(self.poh_hash);
        hasher.finalize().into()
    }
}

/// Ordered batch of opaque transaction payloads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubBlockBody {
    pub transactions: Vec<Vec<u8>>,
}

impl SubBlockBody {
    pub fn new(transactions: Vec<Vec<u8>>) -> Self {
        Self { transactions }
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

/// Main block header sealed by proof-of-work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Block height in the chain
    pub height: u64,

    /// Seal start time in milliseconds
    pub timestamp: i64,

    /// Hash of the parent block (`ZERO_HASH` for the first block)
    pub prev_hash: Hash32,

    /// Public key of the sealing miner
    pub miner_pk: Vec<u8>,

    /// Difficulty the proof-of-work was solved at
    pub difficulty: BigUint,

    /// Commitment over the ordered sub-block headers
    pub sub_headers_root: Hash32,

    /// Winning nonce
    pub nonce: u64,

    /// SHA-256 of the serialized header and nonce
    pub pow_hash: Hash32,
}

impl BlockHeader {
    /// Serialize every field covered by the proof-of-work except the nonce.
    ///
    /// Variable-length fields are length-prefixed so that no two headers
    /// share a preimage.
    pub fn serialize_without_nonce(&self) -> Vec<u8> {
        let difficulty = self.difficulty.to_bytes_be();
        let mut buf = Vec::with_capacity(8 + 8 + 32 + 32 + 8 + difficulty.len() + self.miner_pk.len());
        buf.extend_from_slice(&self.height.to_le_bytes());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&self.prev_hash);
        buf.extend_from_slice(&self.sub_headers_root);
        buf.extend_from_slice(&(self.miner_pk.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.miner_pk);
        buf.extend_from_slice(&(difficulty.len() as u32).to_le_bytes());
        buf.extend_from_slice(&difficulty);
        buf
    }

    /// Recompute the proof-of-work hash for the header's current nonce.
    pub fn compute_pow_hash(&self) -> Hash32 {
        let mut hasher = Sha256::new();
        hasher.update(self.serialize_without_nonce());
        hasher.update(self.nonce.to_le_bytes());
        hasher.finalize().into()
    }
}

/// Body of a main block: the sub-headers it aggregates, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockBody {
    pub sub_headers: Vec<SubBlockHeader>,
}

/// Sealed main block. Immutable once produced; the unit appended to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub body: BlockBody,
}

impl Block {
    pub fn new(header: BlockHeader, body: BlockBody) -> Self {
        Self { header, body }
    }

    pub fn height(&self) -> u64 {
        self.header.height
    }

    /// Block identity (the proof-of-work hash).
    pub fn hash(&self) -> Hash32 {
        self.header.pow_hash
    }

    /// Check that the body is the one the header committed to.
    pub fn body_matches_header(&self) -> bool {
        sub_headers_root(&self.body.sub_headers) == self.header.sub_headers_root
    }
}

/// Ordered commitment over sub-block headers.
pub fn sub_headers_root(headers: &[SubBlockHeader]) -> Hash32 {
    let mut hasher = Sha256::new();
    hasher.update((headers.len() as u64).to_le_bytes());
    for header in headers {
        hasher.update(header.hash());
    }
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(height: u64) -> SubBlockHeader {
        SubBlockHeader {
            height,
            validator: b"validator-1".to_vec(),
            poh_hash: [7u8; 32],
            timestamp: 1_700_000_000_000,
        }
    }

    #[test]
    fn test_sub_header_hash_is_deterministic() {
        assert_eq!(header(1).hash(), header(1).hash());
        assert_ne!(header(1).hash(), header(2).hash());
    }

    #[test]
    fn test_sub_header_hash_covers_timestamp() {
        let mut tampered = header(1);
        tampered.timestamp += 1;
        assert_ne!(header(1).hash(), tampered.hash());
    }

    #[test]
    fn test_sub_headers_root_is_order_sensitive() {
        let a = vec![header(1), header(2)];
        let b = vec![header(2), header(1)];
        assert_ne!(sub_headers_root(&a), sub_headers_root(&b));
    }

    #[test]
    fn test_pow_hash_changes_with_nonce() {
        let mut bh = BlockHeader {
            height: 1,
            timestamp: 0,
            prev_hash: ZERO_HASH,
            miner_pk: b"miner".to_vec(),
            difficulty: BigUint::from(1000u32),
            sub_headers_root: sub_headers_root(&[header(1)]),
            nonce: 0,
            pow_hash: ZERO_HASH,
        };
        let first = bh.compute_pow_hash();
        bh.nonce = 1;
        assert_ne!(first, bh.compute_pow_hash());
    }

    #[test]
    fn test_body_matches_header() {
        let subs = vec![header(1)];
        let bh = BlockHeader {
            height: 1,
            timestamp: 0,
            prev_hash: ZERO_HASH,
            miner_pk: vec![],
            difficulty: BigUint::from(1u32),
            sub_headers_root: sub_headers_root(&subs),
            nonce: 0,
            pow_hash: ZERO_HASH,
        };
        let mut block = Block::new(bh, BlockBody { sub_headers: subs });
        assert!(block.body_matches_header());

        block.body.sub_headers.push(header(2));
        assert!(!block.body_matches_header());
    }
}

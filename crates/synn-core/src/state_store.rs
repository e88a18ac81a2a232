use crate::block::{Block, Hash32, ZERO_HASH};
use crate::error::LedgerError;
use crate::interfaces::Ledger;
use log::{debug, info};
use num_bigint::BigUint;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Default)]
struct LedgerInner {
    state: BTreeMap<String, Vec<u8>>,
    balances: HashMap<Vec<u8>, BigUint>,
    blocks: Vec<Block>,
    last_sub_block_height: u64,
}

/// **In-memory ledger: key/value state, balances and the main chain**
///
/// All operations take a single lock, so `set_state_if_absent` and
/// `append_block` are atomic with respect to concurrent callers.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    inner: RwLock<LedgerInner>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blocks in the chain.
    pub fn len(&self) -> usize {
        self.inner.read().blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().blocks.is_empty()
    }

    pub fn block_at(&self, height: u64) -> Option<Block> {
        self.inner
            .read()
            .blocks
            .iter()
            .find(|b| b.header.height == height)
            .cloned()
    }
}

impl Ledger for MemoryLedger {
    fn set_state(&self, key: &str, value: Vec<u8>) -> Result<(), LedgerError> {
        self.inner.write().state.insert(key.to_string(), value);
        Ok(())
    }

    fn set_state_if_absent(&self, key: &str, value: Vec<u8>) -> Result<bool, LedgerError> {
        let mut inner = self.inner.write();
        if inner.state.contains_key(key) {
            return Ok(false);
        }
        inner.state.insert(key.to_string(), value);
        Ok(true)
    }

    fn get_state(&self, key: &str) -> Result<Option<Vec<u8>>, LedgerError> {
        Ok(self.inner.read().state.get(key).cloned())
    }

    fn has_state(&self, key: &str) -> Result<bool, LedgerError> {
        Ok(self.inner.read().state.contains_key(key))
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, LedgerError> {
        let inner = self.inner.read();
        Ok(inner
            .state
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    fn credit(&self, account: &[u8], amount: &BigUint) -> Result<(), LedgerError> {
        let mut inner = self.inner.write();
        let balance = inner.balances.entry(account.to_vec()).or_default();
        *balance += amount;
        debug!("credited {} to {}", amount, hex::encode(account));
        Ok(())
    }

    fn balance_of(&self, account: &[u8]) -> Result<BigUint, LedgerError> {
        Ok(self
            .inner
            .read()
            .balances
            .get(account)
            .cloned()
            .unwrap_or_default())
    }

    fn balances(&self) -> Result<Vec<(Vec<u8>, BigUint)>, LedgerError> {
        let zero = BigUint::default();
        Ok(self
            .inner
            .read()
            .balances
            .iter()
            .filter(|(_, v)| **v != zero)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn append_block(&self, block: Block) -> Result<(), LedgerError> {
        let mut inner = self.inner.write();
        let (tip_height, tip_hash) = inner
            .blocks
            .last()
            .map(|b| (b.header.height, b.hash()))
            .unwrap_or((0, ZERO_HASH));

        if block.header.height != tip_height + 1 {
            return Err(LedgerError::NonContiguousHeight {
                tip: tip_height,
                got: block.header.height,
            });
        }
        if block.header.prev_hash != tip_hash {
            return Err(LedgerError::ParentMismatch(block.header.height));
        }
        if !block.body_matches_header() {
            return Err(LedgerError::BodyMismatch(block.header.height));
        }

        if let Some(max_sub) = block.body.sub_headers.iter().map(|h| h.height).max() {
            inner.last_sub_block_height = inner.last_sub_block_height.max(max_sub);
        }
        info!(
            "ledger: appended block #{} with {} sub-blocks",
            block.header.height,
            block.body.sub_headers.len()
        );
        inner.blocks.push(block);
        Ok(())
    }

    fn last_block_hash(&self) -> Hash32 {
        self.inner
            .read()
            .blocks
            .last()
            .map(|b| b.hash())
            .unwrap_or(ZERO_HASH)
    }

    fn last_block_height(&self) -> u64 {
        self.inner
            .read()
            .blocks
            .last()
            .map(|b| b.header.height)
            .unwrap_or(0)
    }

    fn last_sub_block_height(&self) -> u64 {
        self.inner.read().last_sub_block_height
    }

    fn recent_blocks(&self, n: usize) -> Vec<Block> {
        let inner = self.inner.read();
        let start = inner.blocks.len().saturating_sub(n);
        inner.blocks[start..].to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{sub_headers_root, BlockBody, BlockHeader, SubBlockHeader};

    fn block(height: u64, prev_hash: Hash32, tag: u8) -> Block {
        let subs = vec![SubBlockHeader {
            height: height * 10,
            validator: vec![tag],
            poh_hash: [tag; 32],
            timestamp: 0,
        }];
        Block::new(
            BlockHeader {
                height,
                timestamp: 0,
                prev_hash,
                miner_pk: vec![tag],
                difficulty: BigUint::from(1u8),
                sub_headers_root: sub_headers_root(&subs),
                nonce: 0,
                pow_hash: [tag; 32],
            },
            BlockBody { sub_headers: subs },
        )
    }

    #[test]
    fn test_set_state_if_absent_is_write_once() {
        let ledger = MemoryLedger::new();
        assert!(ledger.set_state_if_absent("vote:aa:0", vec![1]).unwrap());
        assert!(!ledger.set_state_if_absent("vote:aa:0", vec![2]).unwrap());
        assert_eq!(ledger.get_state("vote:aa:0").unwrap(), Some(vec![1]));
    }

    #[test]
    fn test_keys_with_prefix() {
        let ledger = MemoryLedger::new();
        ledger.set_state("vote:aa:0", vec![1]).unwrap();
        ledger.set_state("vote:aa:1", vec![1]).unwrap();
        ledger.set_state("vote:ab:0", vec![1]).unwrap();
        ledger.set_state("reward:1", vec![1]).unwrap();

        let keys = ledger.keys_with_prefix("vote:aa:").unwrap();
        assert_eq!(keys, vec!["vote:aa:0".to_string(), "vote:aa:1".to_string()]);
    }

    #[test]
    fn test_credit_is_additive() {
        let ledger = MemoryLedger::new();
        ledger.credit(b"acct", &BigUint::from(5u8)).unwrap();
        ledger.credit(b"acct", &BigUint::from(7u8)).unwrap();
        assert_eq!(ledger.balance_of(b"acct").unwrap(), BigUint::from(12u8));
        assert_eq!(ledger.balance_of(b"other").unwrap(), BigUint::default());
    }

    #[test]
    fn test_append_enforces_height_and_parent() {
        let ledger = MemoryLedger::new();
        assert_eq!(
            ledger.append_block(block(2, ZERO_HASH, 1)),
            Err(LedgerError::NonContiguousHeight { tip: 0, got: 2 })
        );

        ledger.append_block(block(1, ZERO_HASH, 1)).unwrap();
        assert_eq!(ledger.last_block_height(), 1);
        assert_eq!(ledger.last_block_hash(), [1u8; 32]);
        assert_eq!(ledger.last_sub_block_height(), 10);

        assert_eq!(
            ledger.append_block(block(2, [9u8; 32], 2)),
            Err(LedgerError::ParentMismatch(2))
        );
        ledger.append_block(block(2, [1u8; 32], 2)).unwrap();
        assert_eq!(ledger.recent_blocks(1)[0].header.height, 2);
        assert_eq!(ledger.recent_blocks(10).len(), 2);
    }
}

use crate::interfaces::TransactionSource;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::{HashSet, VecDeque};

#[derive(Debug, Default)]
struct PoolInner {
    queue: VecDeque<Vec<u8>>,
    seen: HashSet<[u8; 32]>,
}

/// The pool stores opaque transaction payloads until a sub-block picks them.
///
/// Admission policy is FIFO with exact-duplicate rejection; fee ordering is
/// not modelled here.
#[derive(Debug, Default)]
pub struct MemoryPool {
    inner: Mutex<PoolInner>,
}

impl MemoryPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a payload. Returns `false` for empty or already-seen payloads.
    pub fn submit(&self, payload: Vec<u8>) -> bool {
        if payload.is_empty() {
            log::warn!("mempool: rejected empty payload");
            return false;
        }
        let id: [u8; 32] = Sha256::digest(&payload).into();
        let mut inner = self.inner.lock();
        if !inner.seen.insert(id) {
            log::debug!("mempool: duplicate payload {}", hex::encode(id));
            return false;
        }
        inner.queue.push_back(payload);
        true
    }

    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().queue.is_empty()
    }
}

impl TransactionSource for MemoryPool {
    fn pick(&self, max: usize) -> Vec<Vec<u8>> {
        let mut inner = self.inner.lock();
        let n = max.min(inner.queue.len());
        inner.queue.drain(..n).collect()
    }
}

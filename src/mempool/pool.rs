//! Single transaction pool
//!
//! One `RwLock` guards the heap, the entry map and the ban counters together,
//! so every mutation is atomic with respect to readers.

use super::heap::IndexedHeap;
use crate::config::MempoolConfig;
use crate::primitives::{Hash, PoolKind, Transaction};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

/// A verified transaction held by a pool
#[derive(Debug, Clone)]
pub struct PooledTransaction {
    pub tx: Arc<Transaction>,
    pub hash: Hash,
    /// Meaning depends on the pool kind (gas price, unlock height, target)
    pub priority: u64,
    /// Arrival order within the pool
    pub arrival: u64,
    /// Full target hash of a multi-sign transaction
    pub target: Option<Hash>,
}

/// Multi-sign priority: the first 8 bytes of the target hash, big-endian.
/// Orders the heap only; readiness compares the full target.
pub fn priority_from_hash(hash: &Hash) -> u64 {
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&hash[..8]);
    u64::from_be_bytes(prefix)
}

#[derive(Default)]
struct PoolState {
    heap: IndexedHeap<Hash>,
    entries: HashMap<Hash, PooledTransaction>,
    bans: HashMap<Hash, u32>,
    next_arrival: u64,
}

pub struct TransactionPool {
    kind: PoolKind,
    capacity: usize,
    ban_threshold: u32,
    ban_forget_after: u32,
    state: RwLock<PoolState>,
}

impl TransactionPool {
    pub fn new(kind: PoolKind, capacity: usize, ban_threshold: u32, ban_forget_after: u32) -> Self {
        Self {
            kind,
            capacity: capacity.max(1),
            ban_threshold,
            ban_forget_after,
            state: RwLock::new(PoolState::default()),
        }
    }

    /// Pool of `kind` sized from configuration
    pub fn from_config(kind: PoolKind, config: &MempoolConfig) -> Self {
        let capacity = match kind {
            PoolKind::Standard => config.standard_capacity,
            PoolKind::Escrow => config.escrow_capacity,
            PoolKind::MultiSign => config.multisign_capacity,
        };
        Self::new(kind, capacity, config.ban_threshold, config.ban_forget_after)
    }

    pub fn kind(&self) -> PoolKind {
        self.kind
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn read(&self) -> RwLockReadGuard<'_, PoolState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, PoolState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn priority_of(&self, tx: &Transaction, aux: Option<&Hash>) -> Option<u64> {
        match self.kind {
            PoolKind::Standard => Some(tx.gas_price),
            PoolKind::Escrow => Some(tx.height.saturating_add(tx.delay)),
            PoolKind::MultiSign => aux.map(priority_from_hash),
        }
    }

    fn is_ready(&self, priority: u64, context: u64) -> bool {
        match self.kind {
            PoolKind::Standard => true,
            PoolKind::Escrow => priority <= context,
            PoolKind::MultiSign => priority == context,
        }
    }

    /// Admit a verified transaction. `aux` is the target hash for multi-sign
    /// pools and ignored otherwise.
    ///
    /// Returns true only if the transaction is in the pool afterwards and was
    /// not before: duplicates, banned hashes and an immediately evicted
    /// newcomer all return false.
    pub fn admit(&self, tx: Transaction, aux: Option<&Hash>) -> bool {
        if tx.kind != self.kind {
            debug!(pool = ?self.kind, tx_kind = ?tx.kind, "transaction routed to wrong pool");
            return false;
        }
        let Some(priority) = self.priority_of(&tx, aux) else {
            warn!(pool = ?self.kind, "multi-sign transaction without target hash");
            return false;
        };
        let hash = tx.hash();

        let mut state = self.write();
        if let Some(count) = state.bans.get(&hash).copied() {
            if count >= self.ban_threshold {
                self.bump_ban(&mut state, hash);
                debug!(pool = ?self.kind, hash = %hex::encode(hash), "rejected banned transaction");
                return false;
            }
        }
        if state.entries.contains_key(&hash) {
            return false;
        }

        let arrival = state.next_arrival;
        state.next_arrival += 1;
        state.heap.push(hash, priority, arrival);
        state.entries.insert(
            hash,
            PooledTransaction {
                tx: Arc::new(tx),
                hash,
                priority,
                arrival,
                target: match self.kind {
                    PoolKind::MultiSign => aux.copied(),
                    _ => None,
                },
            },
        );

        if state.entries.len() > self.capacity {
            if let Some(evicted) = state.heap.pop_min() {
                state.entries.remove(&evicted.key);
                debug!(
                    pool = ?self.kind,
                    hash = %hex::encode(evicted.key),
                    priority = evicted.priority,
                    "evicted lowest-priority transaction"
                );
                if evicted.key == hash {
                    return false;
                }
            }
        }
        true
    }

    /// Up to `n` ready entries, highest priority first (earlier arrival wins
    /// ties). `context` is the chain height for escrow pools and the target
    /// priority for multi-sign pools; [`peek_target`](Self::peek_target)
    /// matches a multi-sign target exactly.
    pub fn peek(&self, n: usize, context: u64) -> Vec<PooledTransaction> {
        self.select(n, |e| self.is_ready(e.priority, context))
    }

    /// Up to `n` entries admitted for exactly `target`
    pub fn peek_target(&self, n: usize, target: &Hash) -> Vec<PooledTransaction> {
        self.select(n, |e| e.target.as_ref() == Some(target))
    }

    fn select<F>(&self, n: usize, ready: F) -> Vec<PooledTransaction>
    where
        F: Fn(&PooledTransaction) -> bool,
    {
        let state = self.read();
        let mut picked: Vec<&PooledTransaction> =
            state.entries.values().filter(|e| ready(e)).collect();
        picked.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.arrival.cmp(&b.arrival)));
        picked.into_iter().take(n).cloned().collect()
    }

    /// Remove and return up to `n` ready entries (block assembly)
    pub fn drain_ready(&self, n: usize, context: u64) -> Vec<PooledTransaction> {
        self.take_all(self.peek(n, context))
    }

    /// Remove and return up to `n` entries admitted for exactly `target`
    pub fn drain_target(&self, n: usize, target: &Hash) -> Vec<PooledTransaction> {
        self.take_all(self.peek_target(n, target))
    }

    fn take_all(&self, picked: Vec<PooledTransaction>) -> Vec<PooledTransaction> {
        let mut state = self.write();
        picked
            .into_iter()
            .filter_map(|p| Self::take(&mut state, &p.hash))
            .collect()
    }

    pub fn remove(&self, hash: &Hash) -> bool {
        Self::take(&mut self.write(), hash).is_some()
    }

    pub fn pop(&self, hash: &Hash) -> Option<PooledTransaction> {
        Self::take(&mut self.write(), hash)
    }

    fn take(state: &mut PoolState, hash: &Hash) -> Option<PooledTransaction> {
        state.heap.remove(hash)?;
        state.entries.remove(hash)
    }

    /// Increment the ban counter of `hash`; returns the new count (0 once forgotten)
    pub fn ban(&self, hash: &Hash) -> u32 {
        let mut state = self.write();
        self.bump_ban(&mut state, *hash)
    }

    fn bump_ban(&self, state: &mut PoolState, hash: Hash) -> u32 {
        let count = state.bans.entry(hash).or_insert(0);
        *count = count.saturating_add(1);
        let count = *count;
        if count > self.ban_forget_after {
            state.bans.remove(&hash);
            return 0;
        }
        count
    }

    pub fn is_banned(&self, hash: &Hash) -> bool {
        self.read()
            .bans
            .get(hash)
            .is_some_and(|&c| c >= self.ban_threshold)
    }

    pub fn count(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.read().entries.contains_key(hash)
    }

    pub fn get(&self, hash: &Hash) -> Option<PooledTransaction> {
        self.read().entries.get(hash).cloned()
    }

    /// Hashes of every pooled transaction, in no particular order
    pub fn transaction_hashes(&self) -> Vec<Hash> {
        self.read().entries.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::address_from_pubkey;

    fn tx(kind: PoolKind, gas_price: u64, height: u64, delay: u64) -> Transaction {
        let pubkey = vec![3u8; 32];
        Transaction {
            kind,
            chain_id: 1,
            height,
            nonce: gas_price ^ height ^ delay,
            sender: address_from_pubkey(&pubkey),
            recipient: [0u8; 20],
            amount: 1,
            gas_price,
            delay,
            pubkey,
            signature: vec![],
        }
    }

    #[test]
    fn test_wrong_kind_is_rejected() {
        let pool = TransactionPool::new(PoolKind::Escrow, 4, 3, 10);
        assert!(!pool.admit(tx(PoolKind::Standard, 1, 0, 0), None));
        assert!(pool.is_empty());
    }

    #[test]
    fn test_multisign_requires_target() {
        let pool = TransactionPool::new(PoolKind::MultiSign, 4, 3, 10);
        assert!(!pool.admit(tx(PoolKind::MultiSign, 1, 0, 0), None));
        assert!(pool.admit(tx(PoolKind::MultiSign, 1, 0, 0), Some(&[1u8; 32])));
    }

    #[test]
    fn test_newcomer_below_floor_is_evicted_immediately() {
        let pool = TransactionPool::new(PoolKind::Standard, 1, 3, 10);
        assert!(pool.admit(tx(PoolKind::Standard, 50, 0, 0), None));
        assert!(!pool.admit(tx(PoolKind::Standard, 10, 0, 0), None));
        assert_eq!(pool.count(), 1);
        assert_eq!(pool.peek(1, 0)[0].priority, 50);
    }

    #[test]
    fn test_equal_priority_evicts_latest_arrival() {
        let pool = TransactionPool::new(PoolKind::Standard, 2, 3, 10);
        let first = tx(PoolKind::Standard, 10, 1, 0);
        let second = tx(PoolKind::Standard, 10, 2, 0);
        let third = tx(PoolKind::Standard, 10, 3, 0);
        pool.admit(first.clone(), None);
        pool.admit(second.clone(), None);
        assert!(!pool.admit(third.clone(), None));
        assert!(pool.contains(&first.hash()));
        assert!(pool.contains(&second.hash()));
    }

    #[test]
    fn test_ban_counter_is_forgotten_past_maximum() {
        let pool = TransactionPool::new(PoolKind::Standard, 4, 2, 3);
        let hash = [9u8; 32];
        assert_eq!(pool.ban(&hash), 1);
        assert!(!pool.is_banned(&hash));
        assert_eq!(pool.ban(&hash), 2);
        assert!(pool.is_banned(&hash));
        assert_eq!(pool.ban(&hash), 3);
        assert_eq!(pool.ban(&hash), 0);
        assert!(!pool.is_banned(&hash));
    }

    #[test]
    fn test_drain_ready_removes_entries() {
        let pool = TransactionPool::new(PoolKind::Escrow, 4, 3, 10);
        pool.admit(tx(PoolKind::Escrow, 1, 10, 5), None);
        pool.admit(tx(PoolKind::Escrow, 1, 10, 50), None);

        let drained = pool.drain_ready(10, 20);
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].priority, 15);
        assert_eq!(pool.count(), 1);
    }

    #[test]
    fn test_priority_from_hash_uses_leading_bytes() {
        let mut hash = [0u8; 32];
        hash[7] = 1;
        hash[31] = 0xff;
        assert_eq!(priority_from_hash(&hash), 1);
    }
}

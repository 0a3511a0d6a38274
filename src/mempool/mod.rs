//! Transaction pools
//!
//! Three independent pools, one per [`PoolKind`], each behind its own lock.
//! No operation here takes two pool locks at once.

pub mod heap;
pub mod pool;

pub use pool::{priority_from_hash, PooledTransaction, TransactionPool};
pub use crate::primitives::PoolKind;

use crate::config::MempoolConfig;
use crate::primitives::{Hash, Transaction};
use tracing::debug;

/// The standard, escrow and multi-sign pools of one node
pub struct Mempool {
    standard: TransactionPool,
    escrow: TransactionPool,
    multisign: TransactionPool,
}

impl Mempool {
    pub fn new(config: &MempoolConfig) -> Self {
        Self {
            standard: TransactionPool::from_config(PoolKind::Standard, config),
            escrow: TransactionPool::from_config(PoolKind::Escrow, config),
            multisign: TransactionPool::from_config(PoolKind::MultiSign, config),
        }
    }

    pub fn pool(&self, kind: PoolKind) -> &TransactionPool {
        match kind {
            PoolKind::Standard => &self.standard,
            PoolKind::Escrow => &self.escrow,
            PoolKind::MultiSign => &self.multisign,
        }
    }

    /// Route a verified transaction to the pool of its kind
    pub fn admit(&self, tx: Transaction, aux: Option<&Hash>) -> bool {
        let kind = tx.kind;
        let admitted = self.pool(kind).admit(tx, aux);
        if admitted {
            debug!(pool = ?kind, "transaction admitted");
        }
        admitted
    }

    /// Remove `hash` from whichever pool holds it
    pub fn remove(&self, hash: &Hash) -> Option<PooledTransaction> {
        [&self.standard, &self.escrow, &self.multisign]
            .into_iter()
            .find_map(|pool| pool.pop(hash))
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.standard.contains(hash) || self.escrow.contains(hash) || self.multisign.contains(hash)
    }

    /// Transactions held across all pools
    pub fn count(&self) -> usize {
        self.standard.count() + self.escrow.count() + self.multisign.count()
    }

    pub fn peek_standard(&self, n: usize) -> Vec<PooledTransaction> {
        self.standard.peek(n, 0)
    }

    pub fn peek_escrow(&self, n: usize, height: u64) -> Vec<PooledTransaction> {
        self.escrow.peek(n, height)
    }

    pub fn peek_multisign(&self, n: usize, target: &Hash) -> Vec<PooledTransaction> {
        self.multisign.peek_target(n, target)
    }
}

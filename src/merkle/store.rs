//! Merkle tree persistence
//!
//! Each tree is kept as three records under one key: the serialized node
//! list, the root hash, and the flat leaf list. The three records are written
//! and deleted in one atomic batch. A store-wide lock serializes writers
//! against readers that fetch more than one record.

use super::tree::{MerkleNode, MerkleTree};
use crate::primitives::Hash;
use crate::storage::hashing::sha256;
use crate::storage::{prefixes, BatchOp, Storage};
use anyhow::{Context, Result};
use std::sync::{PoisonError, RwLock};
use tracing::debug;

/// What a stored tree is keyed by
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeKey {
    /// Transactions of the block at this height
    Height(u64),
    /// Per-account tree
    Address(Vec<u8>),
}

impl TreeKey {
    fn record_keys(&self) -> [Vec<u8>; 3] {
        match self {
            TreeKey::Height(height) => {
                let suffix = height.to_be_bytes();
                [
                    prefixes::key(prefixes::MERKLE_TREE_HEIGHT, &suffix),
                    prefixes::key(prefixes::MERKLE_ROOT_HEIGHT, &suffix),
                    prefixes::key(prefixes::MERKLE_LEAVES_HEIGHT, &suffix),
                ]
            }
            TreeKey::Address(address) => [
                prefixes::key(prefixes::MERKLE_TREE_ADDRESS, address),
                prefixes::key(prefixes::MERKLE_ROOT_ADDRESS, address),
                prefixes::key(prefixes::MERKLE_LEAVES_ADDRESS, address),
            ],
        }
    }
}

pub struct MerkleStore {
    storage: Storage,
    lock: RwLock<()>,
}

impl MerkleStore {
    pub fn new(storage: Storage) -> Self {
        Self {
            storage,
            lock: RwLock::new(()),
        }
    }

    /// Persist nodes, root and leaves of `tree` under `key`
    pub fn store(&self, tree: &MerkleTree, key: &TreeKey) -> Result<()> {
        let [nodes_key, root_key, leaves_key] = key.record_keys();
        let nodes = bincode::serialize(tree.nodes()).context("serializing merkle nodes")?;
        let leaves = bincode::serialize(tree.leaves()).context("serializing merkle leaves")?;
        let root = tree.root_hash();

        let _guard = self.lock.write().unwrap_or_else(PoisonError::into_inner);
        self.storage.write_batch(&[
            BatchOp::Put(&nodes_key, &nodes),
            BatchOp::Put(&root_key, &root),
            BatchOp::Put(&leaves_key, &leaves),
        ])?;
        debug!(key = ?key, root = %hex::encode(root), "merkle tree stored");
        Ok(())
    }

    /// Full reload: nodes and leaves
    pub fn load(&self, key: &TreeKey) -> Result<Option<MerkleTree>> {
        let _guard = self.lock.read().unwrap_or_else(PoisonError::into_inner);
        let Some(nodes) = self.read_nodes(key)? else {
            return Ok(None);
        };
        let leaves = self.read_leaves(key)?.unwrap_or_default();
        Ok(Some(MerkleTree::from_parts(nodes, leaves)))
    }

    /// Root-only reload. Only the root hash can be queried on the result;
    /// membership below the root needs [`load_leaves`](Self::load_leaves).
    pub fn load_without_leaves(&self, key: &TreeKey) -> Result<Option<MerkleTree>> {
        let _guard = self.lock.read().unwrap_or_else(PoisonError::into_inner);
        Ok(self.read_root(key)?.map(MerkleTree::root_only))
    }

    pub fn load_leaves(&self, key: &TreeKey) -> Result<Option<Vec<Vec<u8>>>> {
        let _guard = self.lock.read().unwrap_or_else(PoisonError::into_inner);
        self.read_leaves(key)
    }

    /// `Some(height)` if `target` is committed to by the tree stored at `height`.
    ///
    /// The root-only reload is checked first; since it cannot prove absence,
    /// a miss falls back to a linear scan of the stored leaves, matching
    /// either the leaf item or its leaf hash.
    pub fn find_height_of_hash(&self, target: &Hash, height: u64) -> Result<Option<u64>> {
        let key = TreeKey::Height(height);
        let _guard = self.lock.read().unwrap_or_else(PoisonError::into_inner);
        let Some(root) = self.read_root(&key)? else {
            return Ok(None);
        };
        if MerkleTree::root_only(root).contains_hash(target).0 {
            return Ok(Some(height));
        }

        let leaves = self.read_leaves(&key)?.unwrap_or_default();
        let found = leaves
            .iter()
            .any(|item| item.as_slice() == target.as_slice() || &sha256(item) == target);
        Ok(found.then_some(height))
    }

    /// Delete every record stored under `key`
    pub fn remove(&self, key: &TreeKey) -> Result<()> {
        let [nodes_key, root_key, leaves_key] = key.record_keys();
        let _guard = self.lock.write().unwrap_or_else(PoisonError::into_inner);
        self.storage.write_batch(&[
            BatchOp::Delete(&nodes_key),
            BatchOp::Delete(&root_key),
            BatchOp::Delete(&leaves_key),
        ])
    }

    fn read_nodes(&self, key: &TreeKey) -> Result<Option<Vec<MerkleNode>>> {
        let [nodes_key, _, _] = key.record_keys();
        match self.storage.get(&nodes_key)? {
            Some(bytes) => Ok(Some(
                bincode::deserialize(&bytes).context("decoding stored merkle nodes")?,
            )),
            None => Ok(None),
        }
    }

    fn read_root(&self, key: &TreeKey) -> Result<Option<Hash>> {
        let [_, root_key, _] = key.record_keys();
        let Some(bytes) = self.storage.get(&root_key)? else {
            return Ok(None);
        };
        let root: Hash = bytes
            .as_slice()
            .try_into()
            .map_err(|_| anyhow::anyhow!("stored merkle root has {} bytes", bytes.len()))?;
        Ok(Some(root))
    }

    fn read_leaves(&self, key: &TreeKey) -> Result<Option<Vec<Vec<u8>>>> {
        let [_, _, leaves_key] = key.record_keys();
        match self.storage.get(&leaves_key)? {
            Some(bytes) => Ok(Some(
                bincode::deserialize(&bytes).context("decoding stored merkle leaves")?,
            )),
            None => Ok(None),
        }
    }
}

//! Binary Merkle tree
//!
//! Leaves are `sha256(item)`; a parent is `sha256(left || right)`. A level
//! with an odd number of nodes pairs its last node with a copy of itself, so
//! `[a, b, c]` and `[a, b, c, c]` commit to the same root on every node.

use crate::primitives::{Hash, EMPTY_HASH};
use crate::storage::hashing::{sha256, sha256_pair};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleNode {
    pub hash: Hash,
    pub left: Option<Box<MerkleNode>>,
    pub right: Option<Box<MerkleNode>>,
}

impl MerkleNode {
    pub fn leaf(item: &[u8]) -> Self {
        Self::from_hash(sha256(item))
    }

    /// Childless node carrying only a hash
    pub fn from_hash(hash: Hash) -> Self {
        Self {
            hash,
            left: None,
            right: None,
        }
    }

    pub fn parent(left: MerkleNode, right: MerkleNode) -> Self {
        Self {
            hash: sha256_pair(&left.hash, &right.hash),
            left: Some(Box::new(left)),
            right: Some(Box::new(right)),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.left.is_none() && self.right.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MerkleTree {
    /// Top-level nodes; a built tree has zero or one
    pub(crate) nodes: Vec<MerkleNode>,
    /// Leaf items in input order
    pub(crate) leaves: Vec<Vec<u8>>,
}

impl MerkleTree {
    /// Build over `items` in order
    pub fn build<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        let leaves: Vec<Vec<u8>> = items.into_iter().map(|i| i.as_ref().to_vec()).collect();
        let mut level: Vec<MerkleNode> = leaves.iter().map(|i| MerkleNode::leaf(i)).collect();

        while level.len() > 1 {
            if level.len() % 2 == 1 {
                if let Some(last) = level.last().cloned() {
                    level.push(last);
                }
            }
            let mut next = Vec::with_capacity(level.len() / 2);
            let mut iter = level.into_iter();
            while let (Some(left), Some(right)) = (iter.next(), iter.next()) {
                next.push(MerkleNode::parent(left, right));
            }
            level = next;
        }

        Self {
            nodes: level,
            leaves,
        }
    }

    /// Tree reduced to a single childless root (no leaf data)
    pub fn root_only(root: Hash) -> Self {
        Self {
            nodes: vec![MerkleNode::from_hash(root)],
            leaves: Vec::new(),
        }
    }

    pub(crate) fn from_parts(nodes: Vec<MerkleNode>, leaves: Vec<Vec<u8>>) -> Self {
        Self { nodes, leaves }
    }

    /// Root hash, or [`EMPTY_HASH`] when there are no leaves
    pub fn root_hash(&self) -> Hash {
        match self.nodes.as_slice() {
            [] => EMPTY_HASH,
            [root] => root.hash,
            [left, right, ..] => sha256_pair(&left.hash, &right.hash),
        }
    }

    pub fn nodes(&self) -> &[MerkleNode] {
        &self.nodes
    }

    pub fn leaves(&self) -> &[Vec<u8>] {
        &self.leaves
    }

    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Depth-first search for `target` among every node hash, then among the
    /// raw leaf items, so both a leaf hash and the item it was built from
    /// (typically a transaction hash) are found.
    ///
    /// The counter is the number of nodes and items visited when the search
    /// stopped; it is a traversal count, not a leaf index.
    pub fn contains_hash(&self, target: &Hash) -> (bool, usize) {
        let mut visited = 0usize;
        let mut stack: Vec<&MerkleNode> = self.nodes.iter().rev().collect();
        while let Some(node) = stack.pop() {
            visited += 1;
            if &node.hash == target {
                return (true, visited);
            }
            if let Some(right) = &node.right {
                stack.push(right);
            }
            if let Some(left) = &node.left {
                stack.push(left);
            }
        }
        for item in &self.leaves {
            visited += 1;
            if item.as_slice() == target.as_slice() {
                return (true, visited);
            }
        }
        (false, visited)
    }
}

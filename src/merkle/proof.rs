//! Inclusion proofs
//!
//! A proof lists the sibling hash at every level from the leaf up, with the
//! side the sibling sits on. Odd levels pair the last node with itself,
//! exactly as in [`MerkleTree::build`].

use super::tree::MerkleTree;
use crate::primitives::Hash;
use crate::storage::hashing::{sha256, sha256_pair};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub leaf_index: usize,
    pub siblings: Vec<(Side, Hash)>,
}

impl MerkleTree {
    /// Proof for the leaf at `index`; `None` if out of range or the tree has
    /// no leaf data (root-only reload)
    pub fn proof(&self, index: usize) -> Option<MerkleProof> {
        if index >= self.leaves.len() {
            return None;
        }

        let mut level: Vec<Hash> = self.leaves.iter().map(|i| sha256(i)).collect();
        let mut position = index;
        let mut siblings = Vec::new();

        while level.len() > 1 {
            if level.len() % 2 == 1 {
                let last = level[level.len() - 1];
                level.push(last);
            }
            let sibling = if position % 2 == 0 {
                (Side::Right, level[position + 1])
            } else {
                (Side::Left, level[position - 1])
            };
            siblings.push(sibling);

            level = level
                .chunks_exact(2)
                .map(|pair| sha256_pair(&pair[0], &pair[1]))
                .collect();
            position /= 2;
        }

        Some(MerkleProof {
            leaf_index: index,
            siblings,
        })
    }
}

/// Check that `item` is committed to by `root` under `proof`
pub fn verify_proof(root: &Hash, item: &[u8], proof: &MerkleProof) -> bool {
    let computed = proof
        .siblings
        .iter()
        .fold(sha256(item), |acc, (side, sibling)| match side {
            Side::Left => sha256_pair(sibling, &acc),
            Side::Right => sha256_pair(&acc, sibling),
        });
    &computed == root
}

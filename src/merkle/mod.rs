//! Merkle engine
//!
//! Block commitments and membership proofs over ordered leaf items
//! (transaction hashes or addresses).

pub mod proof;
pub mod store;
pub mod tree;

pub use proof::{verify_proof, MerkleProof, Side};
pub use store::{MerkleStore, TreeKey};
pub use tree::{MerkleNode, MerkleTree};

//! Chain primitives shared by the wire layer, the pools and the Merkle engine

pub mod transaction;
pub mod verify;

pub use transaction::{address_from_pubkey, Address, PoolKind, Transaction};
pub use verify::{verify_transaction, SigSchemes, SignatureVerifier};

/// 32-byte digest
pub type Hash = [u8; 32];

/// Root of an empty Merkle tree and placeholder for absent hashes
pub const EMPTY_HASH: Hash = [0u8; 32];

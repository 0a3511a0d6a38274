//! Transaction type consumed by the pools
//!
//! Serialized with bincode. The hash key is SHA256 over every field except
//! the signature, so it is stable under re-signing and identical on every node.

use super::Hash;
use crate::storage::hashing::sha256;
use serde::{Deserialize, Serialize};

/// 20-byte account address
pub type Address = [u8; 20];

/// Pool a transaction belongs to; also fixes the meaning of its priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PoolKind {
    /// Priority = gas price, always ready
    Standard,
    /// Priority = height + delay, ready once the chain reaches it
    Escrow,
    /// Priority = externally supplied hash, ready on exact match
    MultiSign,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub kind: PoolKind,
    pub chain_id: u16,
    /// Height the transaction was created at
    pub height: u64,
    pub nonce: u64,
    pub sender: Address,
    pub recipient: Address,
    pub amount: u64,
    pub gas_price: u64,
    /// Blocks to wait past `height` (escrow only)
    pub delay: u64,
    pub pubkey: Vec<u8>,
    pub signature: Vec<u8>,
}

impl Transaction {
    /// Bytes covered by the signature
    pub fn signing_bytes(&self) -> Vec<u8> {
        let body = (
            self.kind,
            self.chain_id,
            self.height,
            self.nonce,
            self.sender,
            self.recipient,
            self.amount,
            self.gas_price,
            self.delay,
            &self.pubkey,
        );
        // Fixed-layout tuple of plain fields; bincode cannot fail on it
        bincode::serialize(&body).unwrap_or_default()
    }

    /// Canonical hash key
    pub fn hash(&self) -> Hash {
        sha256(&self.signing_bytes())
    }

    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Address derived from a public key: the last 20 bytes of its SHA256
pub fn address_from_pubkey(pubkey: &[u8]) -> Address {
    let digest = sha256(pubkey);
    let mut address = [0u8; 20];
    address.copy_from_slice(&digest[12..]);
    address
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Transaction {
        let pubkey = vec![7u8; 32];
        Transaction {
            kind: PoolKind::Standard,
            chain_id: 3,
            height: 10,
            nonce: 1,
            sender: address_from_pubkey(&pubkey),
            recipient: [9u8; 20],
            amount: 500,
            gas_price: 20,
            delay: 0,
            pubkey,
            signature: vec![1, 2, 3],
        }
    }

    #[test]
    fn test_hash_ignores_signature() {
        let tx = sample();
        let mut resigned = tx.clone();
        resigned.signature = vec![4, 5, 6, 7];
        assert_eq!(tx.hash(), resigned.hash());

        let mut repriced = tx.clone();
        repriced.gas_price += 1;
        assert_ne!(tx.hash(), repriced.hash());
    }

    #[test]
    fn test_encode_decode() {
        let tx = sample();
        let bytes = tx.encode().unwrap();
        assert_eq!(Transaction::decode(&bytes).unwrap(), tx);
        assert!(Transaction::decode(&bytes[..bytes.len() / 2]).is_err());
    }
}

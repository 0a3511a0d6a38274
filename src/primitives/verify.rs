//! Signature verification seam
//!
//! Post-quantum signature schemes live outside this crate; the node only
//! needs a yes/no answer from whatever implementation is plugged in.

use super::transaction::{address_from_pubkey, Transaction};
use serde::{Deserialize, Serialize};

/// Active signature schemes and their pause flags
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigSchemes {
    pub primary: String,
    pub secondary: String,
    pub primary_paused: bool,
    pub secondary_paused: bool,
}

impl Default for SigSchemes {
    fn default() -> Self {
        Self {
            primary: "dilithium".to_string(),
            secondary: "sphincs".to_string(),
            primary_paused: false,
            secondary_paused: false,
        }
    }
}

/// External signature verifier
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, message: &[u8], signature: &[u8], pubkey: &[u8], schemes: &SigSchemes)
        -> bool;
}

/// Address derivation + signature check
pub fn verify_transaction(
    tx: &Transaction,
    verifier: &dyn SignatureVerifier,
    schemes: &SigSchemes,
) -> bool {
    if address_from_pubkey(&tx.pubkey) != tx.sender {
        return false;
    }
    verifier.verify(&tx.signing_bytes(), &tx.signature, &tx.pubkey, schemes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::PoolKind;

    struct AcceptAll;

    impl SignatureVerifier for AcceptAll {
        fn verify(&self, _: &[u8], _: &[u8], _: &[u8], _: &SigSchemes) -> bool {
            true
        }
    }

    #[test]
    fn test_sender_must_match_pubkey() {
        let pubkey = vec![1u8; 32];
        let mut tx = Transaction {
            kind: PoolKind::Standard,
            chain_id: 1,
            height: 0,
            nonce: 0,
            sender: address_from_pubkey(&pubkey),
            recipient: [0u8; 20],
            amount: 1,
            gas_price: 1,
            delay: 0,
            pubkey,
            signature: vec![],
        };
        assert!(verify_transaction(&tx, &AcceptAll, &SigSchemes::default()));

        tx.sender = [2u8; 20];
        assert!(!verify_transaction(&tx, &AcceptAll, &SigSchemes::default()));
    }
}

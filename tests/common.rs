//! Shared fixtures for integration tests

#![allow(dead_code)]

use pqchain_node::config::P2pConfig;
use pqchain_node::network::Topic;
use pqchain_node::primitives::{address_from_pubkey, SigSchemes, SignatureVerifier};
use pqchain_node::{PoolKind, Transaction};
use std::net::{IpAddr, Ipv4Addr};

pub const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Verifier that accepts every signature
pub struct AcceptAll;

impl SignatureVerifier for AcceptAll {
    fn verify(&self, _: &[u8], _: &[u8], _: &[u8], _: &SigSchemes) -> bool {
        true
    }
}

/// Verifier that rejects every signature
pub struct RejectAll;

impl SignatureVerifier for RejectAll {
    fn verify(&self, _: &[u8], _: &[u8], _: &[u8], _: &SigSchemes) -> bool {
        false
    }
}

/// Loopback config with OS-assigned ports and fast timers
pub fn loopback_config() -> P2pConfig {
    let mut config = P2pConfig {
        listen_ip: LOCALHOST,
        max_trust: 2,
        connect_retries: 2,
        connect_backoff_ms: 1,
        connect_timeout_ms: 500,
        write_timeout_ms: 500,
        peer_diff_interval_ms: 20,
        read_retry_delay_ms: 10,
        ..P2pConfig::default()
    };
    for topic in Topic::ALL {
        config.ports.set_port(topic, 0);
    }
    config
}

pub struct TestTransactionBuilder {
    tx: Transaction,
}

impl TestTransactionBuilder {
    pub fn new(kind: PoolKind) -> Self {
        let pubkey = vec![0xab; 32];
        Self {
            tx: Transaction {
                kind,
                chain_id: 1,
                height: 1,
                nonce: 0,
                sender: address_from_pubkey(&pubkey),
                recipient: [0x11; 20],
                amount: 100,
                gas_price: 1,
                delay: 0,
                pubkey,
                signature: vec![0x5a; 32],
            },
        }
    }

    pub fn chain_id(mut self, chain_id: u16) -> Self {
        self.tx.chain_id = chain_id;
        self
    }

    pub fn nonce(mut self, nonce: u64) -> Self {
        self.tx.nonce = nonce;
        self
    }

    pub fn gas_price(mut self, gas_price: u64) -> Self {
        self.tx.gas_price = gas_price;
        self
    }

    pub fn amount(mut self, amount: u64) -> Self {
        self.tx.amount = amount;
        self
    }

    pub fn height(mut self, height: u64) -> Self {
        self.tx.height = height;
        self
    }

    pub fn delay(mut self, delay: u64) -> Self {
        self.tx.delay = delay;
        self
    }

    /// Break address derivation so verification fails
    pub fn foreign_sender(mut self) -> Self {
        self.tx.sender = [0xee; 20];
        self
    }

    pub fn build(self) -> Transaction {
        self.tx
    }
}

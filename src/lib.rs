//! pqchain node - peer-to-peer transport and transaction admission
//!
//! This crate carries the parts of a node that sit between the wire and the
//! ledger: per-topic TCP peer management with trust and bans, the framed
//! message codec, the three transaction pools, and Merkle commitments over
//! block contents.
//!
//! ## Layout
//!
//! - [`network`]: peer connection manager, framing and wire messages
//! - [`mempool`]: standard, escrow and multi-sign pools
//! - [`merkle`]: tree construction, proofs and persistence
//! - [`node`]: wiring and inbound dispatch
//! - [`storage`]: prefixed key-value store over redb, sled or memory
//!
//! Consensus, balances and signature schemes live outside this crate; a
//! [`primitives::SignatureVerifier`] is plugged in by the embedder.

#[cfg(not(target_os = "windows"))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod config;
pub mod mempool;
pub mod merkle;
pub mod network;
pub mod node;
pub mod primitives;
pub mod storage;
pub mod utils;

pub use config::{LoggingConfig, MempoolConfig, NodeConfig, P2pConfig, StorageConfig};
pub use mempool::{Mempool, PooledTransaction, TransactionPool};
pub use merkle::{MerkleStore, MerkleTree, TreeKey};
pub use network::{PeerManager, Topic};
pub use node::{Node, NodeStreams};
pub use primitives::{Hash, PoolKind, SigSchemes, SignatureVerifier, Transaction};
pub use storage::Storage;

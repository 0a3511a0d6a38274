//! Node orchestration
//!
//! Wires the peer manager, the mempool and the Merkle store together. Inbound
//! frames are consumed by the dispatcher (see [`dispatcher`]); everything the
//! node accepts is handed to the embedding application through the
//! [`NodeStreams`] receivers.

pub mod dispatcher;

use crate::config::NodeConfig;
use crate::mempool::Mempool;
use crate::merkle::{MerkleStore, MerkleTree, TreeKey};
use crate::network::{
    InboundFrame, MessageTag, PeerEvent, PeerManager, Topic, TransactionsMessage,
};
use crate::primitives::{Hash, SigSchemes, SignatureVerifier, Transaction};
use crate::storage::Storage;
use anyhow::{bail, Result};
use bytes::Bytes;
use std::net::IpAddr;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{info, warn};

/// A non-transaction message forwarded to the application
#[derive(Debug, Clone)]
pub struct PeerMessage {
    pub topic: Topic,
    pub peer: IpAddr,
    pub tag: MessageTag,
    /// Full message bytes, header included
    pub payload: Bytes,
}

/// Consumer ends of everything the node produces
pub struct NodeStreams {
    /// Transactions newly admitted to a pool
    pub transactions: mpsc::Receiver<Arc<Transaction>>,
    /// Block and reject-block messages
    pub blocks: mpsc::Receiver<PeerMessage>,
    /// Height, header and transaction queries
    pub queries: mpsc::Receiver<PeerMessage>,
    pub peer_events: mpsc::Receiver<PeerEvent>,
}

pub struct Node {
    chain_id: u16,
    network: Arc<PeerManager>,
    mempool: Arc<Mempool>,
    merkle: MerkleStore,
    verifier: Arc<dyn SignatureVerifier>,
    schemes: RwLock<SigSchemes>,
    multisign_target: RwLock<Option<Hash>>,
    /// Taken by the dispatcher when the node starts
    inbound: Mutex<Option<mpsc::Receiver<InboundFrame>>>,
    verified_tx: mpsc::Sender<Arc<Transaction>>,
    blocks: mpsc::Sender<PeerMessage>,
    queries: mpsc::Sender<PeerMessage>,
    shutdown: watch::Receiver<bool>,
}

impl Node {
    /// Build a node from configuration. Nothing is bound until [`start`](Self::start).
    pub fn new(
        config: NodeConfig,
        verifier: Arc<dyn SignatureVerifier>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(Arc<Self>, NodeStreams)> {
        config.validate()?;
        let storage = Storage::from_config(config.storage.as_ref())?;
        let capacity = config.p2p.queue_capacity;
        let (network, channels) = PeerManager::new(config.p2p, shutdown.clone());

        let (verified_tx, transactions) = mpsc::channel(capacity);
        let (blocks_tx, blocks) = mpsc::channel(capacity);
        let (queries_tx, queries) = mpsc::channel(capacity);

        let node = Arc::new(Self {
            chain_id: config.chain_id,
            network,
            mempool: Arc::new(Mempool::new(&config.mempool)),
            merkle: MerkleStore::new(storage),
            verifier,
            schemes: RwLock::new(SigSchemes::default()),
            multisign_target: RwLock::new(None),
            inbound: Mutex::new(Some(channels.inbound)),
            verified_tx,
            blocks: blocks_tx,
            queries: queries_tx,
            shutdown,
        });

        Ok((
            node,
            NodeStreams {
                transactions,
                blocks,
                queries,
                peer_events: channels.events,
            },
        ))
    }

    /// Bind every topic and start the dispatcher
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        info!(chain_id = self.chain_id, "starting node");
        self.network.start().await?;

        let Some(inbound) = self.inbound.lock().await.take() else {
            bail!("node already started");
        };
        let node = Arc::clone(self);
        tokio::spawn(async move { node.dispatch_loop(inbound).await });
        Ok(())
    }

    pub fn chain_id(&self) -> u16 {
        self.chain_id
    }

    pub fn network(&self) -> &Arc<PeerManager> {
        &self.network
    }

    pub fn mempool(&self) -> &Arc<Mempool> {
        &self.mempool
    }

    pub fn merkle(&self) -> &MerkleStore {
        &self.merkle
    }

    pub fn sig_schemes(&self) -> SigSchemes {
        self.schemes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_sig_schemes(&self, schemes: SigSchemes) {
        *self.schemes.write().unwrap_or_else(PoisonError::into_inner) = schemes;
    }

    /// Target hash multi-sign transactions are currently admitted against
    pub fn set_multisign_target(&self, target: Option<Hash>) {
        *self
            .multisign_target
            .write()
            .unwrap_or_else(PoisonError::into_inner) = target;
    }

    fn multisign_target(&self) -> Option<Hash> {
        *self
            .multisign_target
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Encode `transactions` under `tag` and queue them for every peer of `topic`.
    ///
    /// Returns false if the outbound queue shed the message.
    pub fn broadcast_transactions(
        &self,
        topic: Topic,
        tag: MessageTag,
        transactions: &[Transaction],
    ) -> Result<bool> {
        if !tag.is_transaction_container() {
            bail!("{:?} messages do not carry transactions", tag);
        }
        let message = TransactionsMessage::from_transactions(tag, self.chain_id, tag, transactions)?;
        let queued = self.network.broadcast(topic, Bytes::from(message.encode()));
        if !queued {
            warn!(topic = %topic, count = transactions.len(), "transaction broadcast dropped");
        }
        Ok(queued)
    }

    /// Header commitment over ordered transaction hashes
    pub fn block_merkle_root(hashes: &[Hash]) -> Hash {
        MerkleTree::build(hashes).root_hash()
    }

    /// Persist the Merkle tree of a block and drop its transactions from the pools.
    ///
    /// Returns the block's Merkle root.
    pub fn commit_block(&self, height: u64, hashes: &[Hash]) -> Result<Hash> {
        let tree = MerkleTree::build(hashes);
        self.merkle.store(&tree, &TreeKey::Height(height))?;
        let removed = hashes
            .iter()
            .filter(|hash| self.mempool.remove(hash).is_some())
            .count();
        info!(height, transactions = hashes.len(), removed, "block committed");
        Ok(tree.root_hash())
    }

    /// Close every peer connection; loops exit on the shutdown watch
    pub async fn stop(&self) {
        info!("stopping node");
        self.network.close_all().await;
    }
}

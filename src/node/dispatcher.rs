//! Inbound message dispatch
//!
//! Every complete frame is checked against the node's chain before anything
//! else looks at it. Invalid frames cost the sender trust.

use super::{Node, PeerMessage};
use crate::network::{BaseMessage, InboundFrame, MessageTag, TransactionsMessage, WireError};
use crate::primitives::{PoolKind, Transaction};
use crate::utils::shutdown_requested;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

impl Node {
    pub(super) async fn dispatch_loop(self: Arc<Self>, mut inbound: mpsc::Receiver<InboundFrame>) {
        let mut shutdown = self.shutdown.clone();
        loop {
            let frame = tokio::select! {
                _ = shutdown_requested(&mut shutdown) => break,
                frame = inbound.recv() => match frame {
                    Some(frame) => frame,
                    None => break,
                },
            };
            self.handle_frame(frame).await;
        }
        debug!("dispatcher stopped");
    }

    /// Validate and route one inbound frame.
    ///
    /// Returns the number of transactions newly admitted to a pool.
    pub async fn handle_frame(&self, frame: InboundFrame) -> usize {
        let base = match BaseMessage::peek(&frame.payload)
            .and_then(|base| base.validate(self.chain_id).map(|()| base))
        {
            Ok(base) => base,
            Err(e) => {
                self.reject(&frame, e).await;
                return 0;
            }
        };

        match base.tag {
            MessageTag::Nonce
            | MessageTag::SelfNonce
            | MessageTag::Transaction
            | MessageTag::SyncTransaction => match TransactionsMessage::decode(&frame.payload) {
                Ok(message) => self.admit_transactions(&frame, &message),
                Err(e) => {
                    self.reject(&frame, e).await;
                    0
                }
            },
            MessageTag::Block | MessageTag::RejectBlock => {
                Self::forward(&self.blocks, &frame, base.tag);
                0
            }
            MessageTag::GetTransaction | MessageTag::HeightQuery | MessageTag::HeaderQuery => {
                Self::forward(&self.queries, &frame, base.tag);
                0
            }
            MessageTag::Ping => {
                debug!(peer = %frame.peer, topic = %frame.topic, "ping");
                0
            }
        }
    }

    async fn reject(&self, frame: &InboundFrame, error: WireError) {
        warn!(
            peer = %frame.peer,
            topic = %frame.topic,
            len = frame.payload.len(),
            "dropping invalid message: {}",
            error
        );
        self.network.reduce_trust_and_maybe_ban(frame.peer).await;
    }

    fn admit_transactions(&self, frame: &InboundFrame, message: &TransactionsMessage) -> usize {
        let schemes = self.sig_schemes();
        let target = self.multisign_target();
        let mut admitted = 0;

        for tx in message.extract_transactions(self.verifier.as_ref(), &schemes) {
            let aux = match tx.kind {
                PoolKind::MultiSign => target.as_ref(),
                _ => None,
            };
            let tx = Arc::new(tx);
            if !self.mempool.admit(Transaction::clone(&tx), aux) {
                continue;
            }
            admitted += 1;
            if self.verified_tx.try_send(tx).is_err() {
                warn!(peer = %frame.peer, "verified transaction stream full, dropping");
            }
        }

        debug!(
            peer = %frame.peer,
            topic = %frame.topic,
            payloads = message.payload_count(),
            admitted,
            "transactions processed"
        );
        admitted
    }

    fn forward(queue: &mpsc::Sender<PeerMessage>, frame: &InboundFrame, tag: MessageTag) {
        let message = PeerMessage {
            topic: frame.topic,
            peer: frame.peer,
            tag,
            payload: frame.payload.clone(),
        };
        if queue.try_send(message).is_err() {
            warn!(peer = %frame.peer, tag = ?tag, "message queue full, dropping");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;
    use crate::network::Topic;
    use crate::primitives::{address_from_pubkey, SigSchemes, SignatureVerifier};
    use crate::utils::shutdown_channel;
    use bytes::Bytes;
    use std::net::IpAddr;

    struct AcceptAll;

    impl SignatureVerifier for AcceptAll {
        fn verify(&self, _: &[u8], _: &[u8], _: &[u8], _: &SigSchemes) -> bool {
            true
        }
    }

    fn tx(kind: PoolKind, nonce: u64) -> Transaction {
        let pubkey = vec![8u8; 32];
        Transaction {
            kind,
            chain_id: 1,
            height: 2,
            nonce,
            sender: address_from_pubkey(&pubkey),
            recipient: [2u8; 20],
            amount: 5,
            gas_price: 9,
            delay: 0,
            pubkey,
            signature: vec![1u8; 16],
        }
    }

    fn frame(payload: Vec<u8>) -> InboundFrame {
        InboundFrame {
            topic: Topic::Transactions,
            peer: IpAddr::from([10, 0, 0, 1]),
            payload: Bytes::from(payload),
        }
    }

    fn node() -> (Arc<Node>, crate::node::NodeStreams) {
        let (_tx, rx) = shutdown_channel();
        Node::new(NodeConfig::default(), Arc::new(AcceptAll), rx).unwrap()
    }

    #[tokio::test]
    async fn test_transactions_reach_pool_and_stream() {
        let (node, mut streams) = node();
        let txs = [tx(PoolKind::Standard, 1), tx(PoolKind::Standard, 2)];
        let message =
            TransactionsMessage::from_transactions(MessageTag::Transaction, 1, MessageTag::Transaction, &txs)
                .unwrap();

        assert_eq!(node.handle_frame(frame(message.encode())).await, 2);
        assert_eq!(node.mempool().count(), 2);
        assert!(streams.transactions.try_recv().is_ok());
        assert!(streams.transactions.try_recv().is_ok());

        // Replays are not admitted twice
        assert_eq!(node.handle_frame(frame(message.encode())).await, 0);
        assert!(streams.transactions.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_wrong_chain_bans_untrusted_sender() {
        let (node, _streams) = node();
        let header = BaseMessage::new(MessageTag::Ping, 2).encode().to_vec();

        assert_eq!(node.handle_frame(frame(header)).await, 0);
        assert!(node.network().is_banned(IpAddr::from([10, 0, 0, 1])).await);
    }

    #[tokio::test]
    async fn test_multisign_waits_for_target() {
        let (node, _streams) = node();
        let multisign = [tx(PoolKind::MultiSign, 1)];
        let message =
            TransactionsMessage::from_transactions(MessageTag::Transaction, 1, MessageTag::Transaction, &multisign)
                .unwrap();

        assert_eq!(node.handle_frame(frame(message.encode())).await, 0);
        node.set_multisign_target(Some([4u8; 32]));
        assert_eq!(node.handle_frame(frame(message.encode())).await, 1);
        assert_eq!(node.mempool().peek_multisign(10, &[4u8; 32]).len(), 1);
    }

    #[tokio::test]
    async fn test_blocks_are_forwarded() {
        let (node, mut streams) = node();
        let mut payload = BaseMessage::new(MessageTag::Block, 1).encode().to_vec();
        payload.extend_from_slice(b"block body");

        node.handle_frame(frame(payload.clone())).await;
        let forwarded = streams.blocks.try_recv().unwrap();
        assert_eq!(forwarded.tag, MessageTag::Block);
        assert_eq!(forwarded.payload.as_ref(), payload.as_slice());
    }
}

//! End-to-end node tests: wire bytes in, pooled transactions out

use pqchain_node::config::NodeConfig;
use pqchain_node::network::framing::frame;
use pqchain_node::network::{MessageTag, Topic, TransactionsMessage};
use pqchain_node::utils::shutdown_channel;
use pqchain_node::{Node, PoolKind};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
mod common;
use common::*;

fn node_config() -> NodeConfig {
    NodeConfig {
        p2p: loopback_config(),
        ..NodeConfig::default()
    }
}

#[tokio::test]
async fn test_framed_transactions_are_admitted() {
    let (_tx, rx) = shutdown_channel();
    let (node, mut streams) = Node::new(node_config(), Arc::new(AcceptAll), rx).unwrap();
    node.start().await.unwrap();
    let addr = node.network().local_addr(Topic::Transactions).unwrap();

    let txs: Vec<_> = (0..3)
        .map(|n| {
            TestTransactionBuilder::new(PoolKind::Standard)
                .nonce(n)
                .gas_price(n + 1)
                .build()
        })
        .collect();
    let message = TransactionsMessage::from_transactions(
        MessageTag::Transaction,
        node.chain_id(),
        MessageTag::Transaction,
        &txs,
    )
    .unwrap();

    let mut peer = TcpStream::connect(addr).await.unwrap();
    peer.write_all(&frame(&message.encode())).await.unwrap();

    for _ in 0..3 {
        let admitted = tokio::time::timeout(Duration::from_secs(5), streams.transactions.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(txs.contains(&admitted));
    }
    assert_eq!(node.mempool().count(), 3);
    let best = node.mempool().peek_standard(1);
    assert_eq!(best[0].priority, 3);
}

#[tokio::test]
async fn test_second_start_is_rejected() {
    let (_tx, rx) = shutdown_channel();
    let (node, _streams) = Node::new(node_config(), Arc::new(AcceptAll), rx).unwrap();
    node.start().await.unwrap();
    assert!(node.start().await.is_err());
}

#[test]
fn test_invalid_config_is_refused() {
    let (_tx, rx) = shutdown_channel();
    let mut config = node_config();
    config.mempool.ban_forget_after = config.mempool.ban_threshold;
    assert!(Node::new(config, Arc::new(AcceptAll), rx).is_err());
}

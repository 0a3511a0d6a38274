//! Peer manager tests over loopback TCP

use bytes::Bytes;
use pqchain_node::network::framing::frame;
use pqchain_node::network::{NetworkError, PeerEvent, PeerManager, Topic, Transport};
use pqchain_node::utils::{current_timestamp, shutdown_channel};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
mod common;
use common::*;

const WAIT: Duration = Duration::from_secs(5);

/// Connected (client, server-side) pair on loopback
async fn socket_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let client = TcpStream::connect(addr).await.unwrap();
    let (server, _) = listener.accept().await.unwrap();
    (client, server)
}

async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

struct FailingTransport;

#[async_trait::async_trait]
impl Transport for FailingTransport {
    async fn listen(&self, addr: SocketAddr) -> anyhow::Result<TcpListener> {
        Ok(TcpListener::bind(addr).await?)
    }

    async fn connect(&self, addr: SocketAddr, _timeout: Duration) -> anyhow::Result<TcpStream> {
        anyhow::bail!("refusing to dial {}", addr)
    }
}

#[tokio::test]
async fn test_second_registration_rejected_while_first_is_alive() {
    let (_tx, rx) = shutdown_channel();
    let (manager, _channels) = PeerManager::new(loopback_config(), rx);

    let (_client1, server1) = socket_pair().await;
    let (_client2, server2) = socket_pair().await;

    manager
        .register_peer(Topic::Transactions, server1)
        .await
        .unwrap();
    match manager.register_peer(Topic::Transactions, server2).await {
        Err(NetworkError::AlreadyConnected { topic, ip }) => {
            assert_eq!(topic, Topic::Transactions);
            assert_eq!(ip, LOCALHOST);
        }
        other => panic!("expected AlreadyConnected, got {:?}", other.map(|c| c.id())),
    }
    assert_eq!(manager.peers(Topic::Transactions).await, vec![LOCALHOST]);
}

#[tokio::test]
async fn test_same_ip_on_other_topic_is_independent() {
    let (_tx, rx) = shutdown_channel();
    let (manager, _channels) = PeerManager::new(loopback_config(), rx);

    let (_client1, server1) = socket_pair().await;
    let (_client2, server2) = socket_pair().await;

    manager.register_peer(Topic::Transactions, server1).await.unwrap();
    manager.register_peer(Topic::BlockSync, server2).await.unwrap();
    assert_eq!(manager.peers(Topic::BlockSync).await, vec![LOCALHOST]);
}

#[tokio::test]
async fn test_registration_resets_trust_to_max() {
    let (_tx, rx) = shutdown_channel();
    let (manager, _channels) = PeerManager::new(loopback_config(), rx);
    let (_client, server) = socket_pair().await;

    manager.register_peer(Topic::Transactions, server).await.unwrap();
    assert_eq!(manager.trust_of(LOCALHOST).await, Some(2));
}

#[tokio::test]
async fn test_banned_address_cannot_register() {
    let (_tx, rx) = shutdown_channel();
    let (manager, _channels) = PeerManager::new(loopback_config(), rx);
    assert!(manager.ban_ip(LOCALHOST).await);

    let (_client, server) = socket_pair().await;
    assert!(matches!(
        manager.register_peer(Topic::Transactions, server).await,
        Err(NetworkError::Banned(_))
    ));
}

#[tokio::test]
async fn test_oversized_frames_exhaust_trust_and_ban() {
    let (_tx, rx) = shutdown_channel();
    let mut config = loopback_config();
    config.max_message_size = 16;
    let (manager, mut channels) = PeerManager::new(config, rx);

    let (mut client, server) = socket_pair().await;
    manager.register_peer(Topic::Transactions, server).await.unwrap();

    let oversized = frame(&[7u8; 64]);
    client.write_all(&oversized).await.unwrap();
    client.write_all(&oversized).await.unwrap();

    let m = Arc::clone(&manager);
    assert!(eventually(|| {
        let m = Arc::clone(&m);
        async move { m.is_banned(LOCALHOST).await }
    })
    .await);
    assert!(manager.ban_expiry(LOCALHOST).await.unwrap() > current_timestamp());
    assert!(manager.stats().protocol_violations >= 2);
    assert!(manager.peers(Topic::Transactions).await.is_empty());
    // Nothing from the offending stream was delivered
    assert!(channels.inbound.try_recv().is_err());
}

#[tokio::test]
async fn test_payload_containing_sentinel_is_delivered_whole() {
    let (_tx, rx) = shutdown_channel();
    let (manager, mut channels) = PeerManager::new(loopback_config(), rx);

    let (mut client, server) = socket_pair().await;
    manager.register_peer(Topic::Transactions, server).await.unwrap();

    let payload = b"user data <-END-> more user data".to_vec();
    let mut wire = frame(&payload);
    wire.extend_from_slice(&frame(&payload));
    client.write_all(&wire).await.unwrap();

    for _ in 0..2 {
        let received = tokio::time::timeout(WAIT, channels.inbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.payload, Bytes::from(payload.clone()));
    }
    assert_eq!(manager.stats().protocol_violations, 0);
    assert!(!manager.is_banned(LOCALHOST).await);
}

#[tokio::test]
async fn test_concurrent_registrations_keep_one_connection() {
    let (_tx, rx) = shutdown_channel();
    let (manager, _channels) = PeerManager::new(loopback_config(), rx);

    let (_client1, server1) = socket_pair().await;
    let (_client2, server2) = socket_pair().await;

    let (first, second) = tokio::join!(
        manager.register_peer(Topic::Transactions, server1),
        manager.register_peer(Topic::Transactions, server2),
    );
    let registered: Vec<u64> = [first, second]
        .into_iter()
        .filter_map(|r| r.ok().map(|c| c.id()))
        .collect();
    assert_eq!(registered.len(), 1);

    assert_eq!(manager.peers(Topic::Transactions).await, vec![LOCALHOST]);
    assert_eq!(
        manager.connection_id(Topic::Transactions, LOCALHOST).await,
        Some(registered[0])
    );
}

#[tokio::test]
async fn test_dial_failures_ban_the_address() {
    let (_tx, rx) = shutdown_channel();
    let (manager, _channels) =
        PeerManager::with_transport(loopback_config(), Arc::new(FailingTransport), rx);
    let target = "10.9.9.9".parse().unwrap();

    match manager.connect(Topic::Transactions, target).await {
        Err(NetworkError::DialFailed { attempts, .. }) => assert_eq!(attempts, 2),
        other => panic!("expected DialFailed, got {:?}", other.map(|c| c.id())),
    }
    assert!(manager.is_banned(target).await);

    // Further dials are refused outright
    assert!(matches!(
        manager.connect(Topic::Transactions, target).await,
        Err(NetworkError::Banned(_))
    ));
}

#[tokio::test]
async fn test_send_reaches_remote_inbound_queue() {
    let (_tx, rx) = shutdown_channel();
    let (listener_side, mut listener_channels) = PeerManager::new(loopback_config(), rx.clone());
    let bound = listener_side.listen(Topic::Transactions).await.unwrap();

    let mut dialer_config = loopback_config();
    dialer_config.ports.set_port(Topic::Transactions, bound.port());
    let (dialer, _dialer_channels) = PeerManager::new(dialer_config, rx);

    dialer.connect(Topic::Transactions, LOCALHOST).await.unwrap();
    dialer
        .send(Topic::Transactions, LOCALHOST, b"hello peer")
        .await
        .unwrap();

    let received = tokio::time::timeout(WAIT, listener_channels.inbound.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received.topic, Topic::Transactions);
    assert_eq!(received.peer, LOCALHOST);
    assert_eq!(received.payload, Bytes::from_static(b"hello peer"));
}

#[tokio::test]
async fn test_broadcast_drains_through_send_loop() {
    let (_tx, rx) = shutdown_channel();
    let (hub, _hub_channels) = PeerManager::new(loopback_config(), rx.clone());
    hub.start().await.unwrap();
    let bound = hub.local_addr(Topic::NonceBroadcast).unwrap();

    let mut leaf_config = loopback_config();
    leaf_config.ports.set_port(Topic::NonceBroadcast, bound.port());
    let (leaf, mut leaf_channels) = PeerManager::new(leaf_config, rx);
    leaf.connect(Topic::NonceBroadcast, LOCALHOST).await.unwrap();

    let h = Arc::clone(&hub);
    assert!(eventually(|| {
        let h = Arc::clone(&h);
        async move { !h.peers(Topic::NonceBroadcast).await.is_empty() }
    })
    .await);

    assert!(hub.broadcast(Topic::NonceBroadcast, Bytes::from_static(b"nonce")));
    let received = tokio::time::timeout(WAIT, leaf_channels.inbound.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received.payload, Bytes::from_static(b"nonce"));
    assert_eq!(received.topic, Topic::NonceBroadcast);
}

#[tokio::test]
async fn test_peer_diff_reports_added_and_removed() {
    let (_tx, rx) = shutdown_channel();
    let (manager, mut channels) = PeerManager::new(loopback_config(), rx);
    manager.start().await.unwrap();

    let (client, server) = socket_pair().await;
    manager.register_peer(Topic::BlockSync, server).await.unwrap();

    let mut saw_added = false;
    let mut saw_disconnect = false;
    let mut saw_removed = false;
    let mut client = Some(client);

    while !saw_removed {
        let event = tokio::time::timeout(WAIT, channels.events.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            PeerEvent::Added { topic, ip } => {
                assert_eq!((topic, ip), (Topic::BlockSync, LOCALHOST));
                saw_added = true;
                // Closing the remote end removes the peer
                drop(client.take());
            }
            PeerEvent::Disconnected { topic, .. } => {
                assert_eq!(topic, Topic::BlockSync);
                saw_disconnect = true;
            }
            PeerEvent::Removed { topic, ip } => {
                assert_eq!((topic, ip), (Topic::BlockSync, LOCALHOST));
                saw_removed = true;
            }
            PeerEvent::Banned { ip, .. } => panic!("unexpected ban of {}", ip),
        }
    }
    assert!(saw_added);
    assert!(saw_disconnect);
}

#[tokio::test]
async fn test_shutdown_stops_listeners() {
    let (tx, rx) = shutdown_channel();
    let (manager, _channels) = PeerManager::new(loopback_config(), rx);
    manager.start().await.unwrap();
    let bound = manager.local_addr(Topic::Rpc).unwrap();

    tx.send(true).unwrap();

    assert!(eventually(|| async move { TcpStream::connect(bound).await.is_err() }).await);
}

//! Peer connection manager
//!
//! Owns the per-topic connection tables, the trust and ban tables, and the
//! long-running loops: one accept loop and one send-drain loop per topic, one
//! receive loop per connection, and a periodic peer-set diff. All table
//! mutation goes through a single `RwLock`; no lock is held across a socket
//! write.

use super::error::NetworkError;
use super::framing::FrameAccumulator;
use super::peer_table::{Penalty, PeerTable};
use super::queue::BoundedQueue;
use super::stats::{NetworkStats, NetworkStatsSnapshot};
use super::tcp_transport::{recv_chunk, Direction, PeerConnection, RecvOutcome, TcpTransport};
use super::topic::Topic;
use super::transport::Transport;
use crate::config::P2pConfig;
use crate::utils::{current_timestamp, is_shutdown, shutdown_requested, RetryConfig};
use bytes::Bytes;
use futures::future::join_all;
use std::collections::{BTreeSet, HashMap};
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// A complete frame received from a peer
#[derive(Debug, Clone)]
pub struct InboundFrame {
    pub topic: Topic,
    pub peer: IpAddr,
    pub payload: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendTarget {
    Peer(IpAddr),
    All,
}

#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub target: SendTarget,
    pub payload: Bytes,
}

/// Peer-set changes and ban notifications for higher-level components
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    Added { topic: Topic, ip: IpAddr },
    Removed { topic: Topic, ip: IpAddr },
    Disconnected { topic: Topic, ip: IpAddr },
    Banned { ip: IpAddr, until: u64 },
}

/// Consumer ends of the manager's queues
pub struct PeerChannels {
    pub inbound: mpsc::Receiver<InboundFrame>,
    pub events: mpsc::Receiver<PeerEvent>,
}

pub struct PeerManager {
    config: P2pConfig,
    transport: Arc<dyn Transport>,
    table: RwLock<PeerTable>,
    outbound: HashMap<Topic, BoundedQueue<OutboundMessage>>,
    /// Taken by the send loop of each topic when it starts
    outbound_rx: Mutex<HashMap<Topic, mpsc::Receiver<OutboundMessage>>>,
    inbound: BoundedQueue<InboundFrame>,
    events: BoundedQueue<PeerEvent>,
    stats: Arc<NetworkStats>,
    shutdown: watch::Receiver<bool>,
    local_addrs: std::sync::RwLock<HashMap<Topic, SocketAddr>>,
    retry: RetryConfig,
}

impl PeerManager {
    /// Manager over plain TCP
    pub fn new(config: P2pConfig, shutdown: watch::Receiver<bool>) -> (Arc<Self>, PeerChannels) {
        Self::with_transport(config, Arc::new(TcpTransport::new()), shutdown)
    }

    pub fn with_transport(
        config: P2pConfig,
        transport: Arc<dyn Transport>,
        shutdown: watch::Receiver<bool>,
    ) -> (Arc<Self>, PeerChannels) {
        let stats = Arc::new(NetworkStats::new());
        let capacity = config.queue_capacity;

        let mut outbound = HashMap::new();
        let mut outbound_rx = HashMap::new();
        for topic in Topic::ALL {
            let (tx, rx) = BoundedQueue::new("outbound", capacity, Arc::clone(&stats));
            outbound.insert(topic, tx);
            outbound_rx.insert(topic, rx);
        }
        let (inbound, inbound_rx) = BoundedQueue::new("inbound", capacity, Arc::clone(&stats));
        let (events, events_rx) = BoundedQueue::new("peer-events", capacity, Arc::clone(&stats));

        let retry = RetryConfig {
            max_attempts: config.connect_retries,
            initial_delay: Duration::from_millis(config.connect_backoff_ms),
            ..RetryConfig::default()
        };

        let manager = Arc::new(Self {
            table: RwLock::new(PeerTable::new(
                config.max_trust,
                config.whitelist.iter().copied(),
            )),
            config,
            transport,
            outbound,
            outbound_rx: Mutex::new(outbound_rx),
            inbound,
            events,
            stats,
            shutdown,
            local_addrs: std::sync::RwLock::new(HashMap::new()),
            retry,
        });

        (
            manager,
            PeerChannels {
                inbound: inbound_rx,
                events: events_rx,
            },
        )
    }

    pub fn config(&self) -> &P2pConfig {
        &self.config
    }

    pub fn stats(&self) -> NetworkStatsSnapshot {
        self.stats.snapshot()
    }

    /// Address a topic listener actually bound to
    pub fn local_addr(&self, topic: Topic) -> Option<SocketAddr> {
        self.local_addrs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&topic)
            .copied()
    }

    /// Bind every topic, then start the send-drain and peer-diff loops.
    ///
    /// A bind failure is returned immediately; that topic cannot be served.
    pub async fn start(self: &Arc<Self>) -> Result<(), NetworkError> {
        for topic in Topic::ALL {
            self.listen(topic).await?;
            self.spawn_send_loop(topic);
        }
        self.spawn_peer_diff_loop();
        Ok(())
    }

    /// Bind the topic's port and spawn its accept loop
    pub async fn listen(self: &Arc<Self>, topic: Topic) -> Result<SocketAddr, NetworkError> {
        let addr = SocketAddr::new(self.config.listen_ip, self.config.ports.port(topic));
        let listener = self
            .transport
            .listen(addr)
            .await
            .map_err(|e| NetworkError::Bind {
                topic,
                addr,
                reason: e.to_string(),
            })?;
        let bound = listener.local_addr()?;
        self.local_addrs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(topic, bound);
        info!(topic = %topic, addr = %bound, "p2p listening");

        let manager = Arc::clone(self);
        tokio::spawn(async move { manager.accept_loop(topic, listener).await });
        Ok(bound)
    }

    async fn accept_loop(self: Arc<Self>, topic: Topic, listener: TcpListener) {
        let mut shutdown = self.shutdown.clone();
        loop {
            let accepted = tokio::select! {
                _ = shutdown_requested(&mut shutdown) => break,
                accepted = listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, addr)) => {
                    let manager = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(e) = manager.register_peer(topic, stream).await {
                            debug!(peer = %addr, topic = %topic, "inbound connection rejected: {}", e);
                        }
                    });
                }
                Err(e) => {
                    warn!(topic = %topic, error = ?e, "listener accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
        debug!(topic = %topic, "accept loop stopped");
    }

    /// Admit an inbound connection and start its receive loop.
    ///
    /// Rejected when the address is banned, or when a live connection for the
    /// same (topic, ip) answers the liveness probe. A dead one is replaced.
    pub async fn register_peer(
        self: &Arc<Self>,
        topic: Topic,
        stream: TcpStream,
    ) -> Result<PeerConnection, NetworkError> {
        let (conn, reader) = PeerConnection::new(topic, stream, Direction::Inbound)?;
        let ip = conn.ip();

        if self.is_banned(ip).await {
            conn.close().await;
            return Err(NetworkError::Banned(ip));
        }

        let existing = self.table.read().await.connection(topic, &ip).cloned();
        if let Some(old) = &existing {
            if old.probe(self.config.write_timeout()).await {
                conn.close().await;
                return Err(NetworkError::AlreadyConnected { topic, ip });
            }
            debug!(peer = %ip, topic = %topic, "replacing dead connection");
        }

        {
            let mut table = self.table.write().await;
            if table.is_banned(&ip, current_timestamp()) {
                drop(table);
                conn.close().await;
                return Err(NetworkError::Banned(ip));
            }
            // The slot may have been taken while the probe ran without the lock
            match table.insert_if_unchanged(conn.clone(), existing.as_ref().map(|c| c.id())) {
                Ok(Some(replaced)) => replaced.tear_down(),
                Ok(None) => {}
                Err(winner) => {
                    drop(table);
                    debug!(peer = %ip, topic = %topic, winner, "concurrent registration won the slot");
                    conn.close().await;
                    return Err(NetworkError::AlreadyConnected { topic, ip });
                }
            }
            table.reset_trust(ip);
        }

        info!(peer = %ip, topic = %topic, "peer registered");
        self.spawn_receive_loop(conn.clone(), reader);
        Ok(conn)
    }

    /// Dial `ip` on the topic's port with bounded retries.
    ///
    /// Every failed dial costs a trusted peer one trust point; exhausting
    /// trust or the retry budget bans the address.
    pub async fn connect(
        self: &Arc<Self>,
        topic: Topic,
        ip: IpAddr,
    ) -> Result<PeerConnection, NetworkError> {
        let addr = SocketAddr::new(ip, self.config.ports.port(topic));
        let attempts = self.retry.max_attempts.max(1);

        for attempt in 0..attempts {
            if self.is_banned(ip).await {
                return Err(NetworkError::Banned(ip));
            }
            match self
                .transport
                .connect(addr, self.config.connect_timeout())
                .await
            {
                Ok(stream) => return self.adopt_outbound(topic, stream).await,
                Err(e) => {
                    warn!(peer = %ip, topic = %topic, attempt = attempt + 1, "dial failed: {}", e);
                    let exhausted = {
                        let mut table = self.table.write().await;
                        table.trust_of(&ip).is_some() && table.penalize(&ip) == Penalty::Exhausted
                    };
                    if exhausted {
                        self.ban_ip(ip).await;
                        return Err(NetworkError::Banned(ip));
                    }
                }
            }
            if attempt + 1 < attempts {
                tokio::time::sleep(self.retry.jittered_delay_for(attempt)).await;
            }
        }

        self.ban_ip(ip).await;
        Err(NetworkError::DialFailed { addr, attempts })
    }

    async fn adopt_outbound(
        self: &Arc<Self>,
        topic: Topic,
        stream: TcpStream,
    ) -> Result<PeerConnection, NetworkError> {
        let (conn, reader) = PeerConnection::new(topic, stream, Direction::Outbound)?;
        let ip = conn.ip();

        {
            let mut table = self.table.write().await;
            if table.is_banned(&ip, current_timestamp()) {
                drop(table);
                conn.close().await;
                return Err(NetworkError::Banned(ip));
            }
            let keep_inbound = table
                .connection(topic, &ip)
                .is_some_and(|c| c.direction() == Direction::Inbound && !c.is_closed());
            if keep_inbound {
                // Both sides dialled: the inbound link keeps sending, this one only receives
                debug!(peer = %ip, topic = %topic, "inbound link kept for sending");
            } else if let Some(replaced) = table.insert(conn.clone()) {
                replaced.tear_down();
            }
            table.reset_trust(ip);
        }

        info!(peer = %ip, topic = %topic, "connected to peer");
        self.spawn_receive_loop(conn.clone(), reader);
        Ok(conn)
    }

    fn spawn_receive_loop(self: &Arc<Self>, conn: PeerConnection, reader: OwnedReadHalf) {
        let manager = Arc::clone(self);
        tokio::spawn(async move { manager.receive_loop(conn, reader).await });
    }

    async fn receive_loop(self: Arc<Self>, conn: PeerConnection, mut reader: OwnedReadHalf) {
        let topic = conn.topic();
        let ip = conn.ip();
        let mut shutdown = self.shutdown.clone();
        let mut acc = FrameAccumulator::new(self.config.max_message_size);
        let mut buf = vec![0u8; self.config.read_chunk_size];
        let mut errors = 0u32;
        let mut redial = false;

        loop {
            let outcome = tokio::select! {
                _ = shutdown_requested(&mut shutdown) => break,
                _ = conn.cancelled() => break,
                outcome = recv_chunk(&mut reader, &mut buf) => outcome,
            };
            match outcome {
                RecvOutcome::Data(n) => {
                    errors = 0;
                    if !self.handle_chunk(&conn, &mut acc, &buf[..n]).await {
                        break;
                    }
                }
                RecvOutcome::Closed => {
                    debug!(peer = %ip, topic = %topic, "peer closed connection");
                    self.events.push(PeerEvent::Disconnected { topic, ip });
                    break;
                }
                RecvOutcome::Error(e) => {
                    errors += 1;
                    if errors >= self.config.read_error_ceiling {
                        warn!(peer = %ip, topic = %topic, errors, "read error ceiling reached: {}", e);
                        redial = true;
                        break;
                    }
                    debug!(peer = %ip, topic = %topic, errors, "read error: {}", e);
                    tokio::time::sleep(self.config.read_retry_delay()).await;
                }
            }
        }

        self.table.write().await.remove_if(topic, &ip, conn.id());
        conn.close().await;

        if redial && !is_shutdown(&self.shutdown) {
            let manager = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = manager.connect(topic, ip).await {
                    warn!(peer = %ip, topic = %topic, "redial failed: {}", e);
                }
            });
        }
    }

    /// Feed one read into the accumulator; false once the connection must stop.
    async fn handle_chunk(
        &self,
        conn: &PeerConnection,
        acc: &mut FrameAccumulator,
        chunk: &[u8],
    ) -> bool {
        let topic = conn.topic();
        let ip = conn.ip();

        for frame in acc.push(chunk) {
            match frame {
                Ok(payload) if payload.is_empty() => {}
                Ok(payload) => {
                    {
                        let mut table = self.table.write().await;
                        if table.is_banned(&ip, current_timestamp()) {
                            return false;
                        }
                        table.reward(&ip);
                    }
                    self.stats.record_frame_received();
                    self.inbound.push(InboundFrame {
                        topic,
                        peer: ip,
                        payload,
                    });
                }
                Err(e) => {
                    self.stats.record_violation();
                    warn!(peer = %ip, topic = %topic, "protocol violation: {}", e);
                    if self.reduce_trust_and_maybe_ban(ip).await {
                        return false;
                    }
                }
            }
        }
        true
    }

    fn spawn_send_loop(self: &Arc<Self>, topic: Topic) {
        let rx = self
            .outbound_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&topic);
        let Some(rx) = rx else {
            debug!(topic = %topic, "send loop already running");
            return;
        };
        let manager = Arc::clone(self);
        tokio::spawn(async move { manager.send_loop(topic, rx).await });
    }

    async fn send_loop(self: Arc<Self>, topic: Topic, mut rx: mpsc::Receiver<OutboundMessage>) {
        let mut shutdown = self.shutdown.clone();
        loop {
            let message = tokio::select! {
                _ = shutdown_requested(&mut shutdown) => break,
                message = rx.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };

            let targets: Vec<PeerConnection> = {
                let table = self.table.read().await;
                match message.target {
                    SendTarget::Peer(ip) => table.connection(topic, &ip).cloned().into_iter().collect(),
                    SendTarget::All => table.connections(topic),
                }
            };
            if targets.is_empty() {
                debug!(topic = %topic, dest = ?message.target, "no peers to send to");
                continue;
            }
            join_all(targets.iter().map(|conn| self.deliver(conn, &message.payload))).await;
        }
        debug!(topic = %topic, "send loop stopped");
    }

    async fn deliver(&self, conn: &PeerConnection, payload: &[u8]) -> Result<(), NetworkError> {
        match conn.send(payload, self.config.write_timeout()).await {
            Ok(()) => {
                self.stats.record_frame_sent();
                Ok(())
            }
            Err(e) => {
                self.stats.record_send_failure();
                warn!(peer = %conn.ip(), topic = %conn.topic(), "send failed: {}", e);
                self.reduce_trust_and_maybe_ban(conn.ip()).await;
                Err(e)
            }
        }
    }

    /// Send one payload right away; the error is returned, not retried
    pub async fn send(&self, topic: Topic, ip: IpAddr, payload: &[u8]) -> Result<(), NetworkError> {
        let conn = self
            .table
            .read()
            .await
            .connection(topic, &ip)
            .cloned()
            .ok_or(NetworkError::NotConnected { topic, ip })?;
        self.deliver(&conn, payload).await
    }

    /// Queue a payload for the topic's send loop; false if the queue shed it
    pub fn enqueue(&self, topic: Topic, target: SendTarget, payload: Bytes) -> bool {
        match self.outbound.get(&topic) {
            Some(queue) => queue.push(OutboundMessage { target, payload }),
            None => false,
        }
    }

    pub fn broadcast(&self, topic: Topic, payload: Bytes) -> bool {
        self.enqueue(topic, SendTarget::All, payload)
    }

    fn spawn_peer_diff_loop(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move { manager.peer_diff_loop().await });
    }

    async fn peer_diff_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown.clone();
        let mut interval = tokio::time::interval(self.config.peer_diff_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut previous = BTreeSet::new();

        loop {
            tokio::select! {
                _ = shutdown_requested(&mut shutdown) => break,
                _ = interval.tick() => {}
            }
            previous = self.diff_peers(&previous).await;
        }
        debug!("peer diff loop stopped");
    }

    /// Emit Added/Removed for changes since `previous`; returns the new snapshot
    async fn diff_peers(&self, previous: &BTreeSet<(Topic, IpAddr)>) -> BTreeSet<(Topic, IpAddr)> {
        let (current, expired) = {
            let mut table = self.table.write().await;
            (table.live_set(), table.sweep_expired_bans(current_timestamp()))
        };
        for ip in expired {
            info!(peer = %ip, "ban expired");
        }
        for (topic, ip) in current.difference(previous) {
            self.events.push(PeerEvent::Added {
                topic: *topic,
                ip: *ip,
            });
        }
        for (topic, ip) in previous.difference(&current) {
            self.events.push(PeerEvent::Removed {
                topic: *topic,
                ip: *ip,
            });
        }
        current
    }

    /// Ban `ip` for the configured duration and tear down its connections.
    ///
    /// Returns false for whitelisted addresses.
    pub async fn ban_ip(&self, ip: IpAddr) -> bool {
        let until = current_timestamp() + self.config.ban_duration_secs;
        let removed = self.table.write().await.ban(ip, until);
        match removed {
            None => {
                debug!(peer = %ip, "whitelisted peer not banned");
                false
            }
            Some(connections) => {
                for conn in &connections {
                    conn.tear_down();
                }
                self.stats.record_ban();
                warn!(peer = %ip, until, closed = connections.len(), "peer banned");
                self.events.push(PeerEvent::Banned { ip, until });
                true
            }
        }
    }

    /// Decrement trust; ban once it is exhausted or the peer was untrusted.
    ///
    /// Returns true if the peer was banned.
    pub async fn reduce_trust_and_maybe_ban(&self, ip: IpAddr) -> bool {
        let penalty = self.table.write().await.penalize(&ip);
        match penalty {
            Penalty::Exempt => false,
            Penalty::Reduced(trust) => {
                debug!(peer = %ip, trust, "peer trust reduced");
                false
            }
            Penalty::Exhausted => self.ban_ip(ip).await,
        }
    }

    pub async fn is_banned(&self, ip: IpAddr) -> bool {
        self.table.read().await.is_banned(&ip, current_timestamp())
    }

    /// Unban timestamp, if a ban is recorded
    pub async fn ban_expiry(&self, ip: IpAddr) -> Option<u64> {
        self.table.read().await.ban_expiry(&ip)
    }

    pub async fn unban(&self, ip: IpAddr) -> bool {
        self.table.write().await.unban(&ip)
    }

    pub async fn trust_of(&self, ip: IpAddr) -> Option<u8> {
        self.table.read().await.trust_of(&ip)
    }

    pub async fn whitelist(&self, ip: IpAddr) {
        self.table.write().await.add_to_whitelist(ip);
    }

    pub async fn peers(&self, topic: Topic) -> Vec<IpAddr> {
        self.table.read().await.peers(topic)
    }

    /// Id of the connection stored for (topic, ip)
    pub async fn connection_id(&self, topic: Topic, ip: IpAddr) -> Option<u64> {
        self.table.read().await.connection(topic, &ip).map(|c| c.id())
    }

    /// Close every connection. Loops exit on the shutdown watch.
    pub async fn close_all(&self) {
        let connections = self.table.write().await.drain();
        for conn in connections {
            conn.close().await;
        }
    }
}

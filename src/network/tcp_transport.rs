//! TCP transport implementation and per-connection I/O

use crate::network::error::NetworkError;
use crate::network::framing;
use crate::network::topic::Topic;
use crate::network::transport::Transport;
use anyhow::Result;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// TCP transport
#[derive(Debug, Clone, Default)]
pub struct TcpTransport;

impl TcpTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl Transport for TcpTransport {
    async fn listen(&self, addr: SocketAddr) -> Result<TcpListener> {
        Ok(TcpListener::bind(addr).await?)
    }

    async fn connect(&self, addr: SocketAddr, timeout: Duration) -> Result<TcpStream> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| anyhow::anyhow!("connect to {} timed out", addr))??;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

/// Result of a single socket read
#[derive(Debug)]
pub enum RecvOutcome {
    /// `n` bytes were read into the buffer
    Data(usize),
    /// Clean EOF from the peer
    Closed,
    Error(std::io::Error),
}

/// Read one bounded chunk into `buf`
pub async fn recv_chunk(reader: &mut OwnedReadHalf, buf: &mut [u8]) -> RecvOutcome {
    match reader.read(buf).await {
        Ok(0) => RecvOutcome::Closed,
        Ok(n) => RecvOutcome::Data(n),
        Err(e) => RecvOutcome::Error(e),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Sending side of an established connection.
///
/// Cheap to clone; the peer table holds one copy and the loops hold others.
/// The read half is owned by the connection's receive loop.
#[derive(Clone)]
pub struct PeerConnection {
    id: u64,
    topic: Topic,
    remote: SocketAddr,
    direction: Direction,
    writer: Arc<Mutex<OwnedWriteHalf>>,
    closed: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerConnection")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .field("remote", &self.remote)
            .field("direction", &self.direction)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl PeerConnection {
    /// Split `stream`, returning the shareable sender and the read half
    pub fn new(
        topic: Topic,
        stream: TcpStream,
        direction: Direction,
    ) -> std::io::Result<(Self, OwnedReadHalf)> {
        let remote = stream.peer_addr()?;
        let (reader, writer) = stream.into_split();
        let conn = Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            topic,
            remote,
            direction,
            writer: Arc::new(Mutex::new(writer)),
            closed: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
        };
        Ok((conn, reader))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    pub fn ip(&self) -> IpAddr {
        self.remote.ip()
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.cancel.is_cancelled()
    }

    /// Resolves once the connection has been torn down
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Mark closed and stop the receive loop; the socket is shut down by that loop
    pub fn tear_down(&self) {
        self.closed.store(true, Ordering::Release);
        self.cancel.cancel();
    }

    /// Write one framed payload under the write deadline. Not retried.
    pub async fn send(&self, payload: &[u8], deadline: Duration) -> Result<(), NetworkError> {
        if self.is_closed() {
            return Err(NetworkError::Closed(self.remote));
        }
        self.write_raw(&framing::frame(payload), deadline).await
    }

    /// Liveness probe: closed flag first, then a keepalive frame
    pub async fn probe(&self, deadline: Duration) -> bool {
        if self.is_closed() {
            return false;
        }
        match self.write_raw(&framing::keepalive(), deadline).await {
            Ok(()) => true,
            Err(e) => {
                debug!(peer = %self.remote, topic = %self.topic, "liveness probe failed: {}", e);
                self.closed.store(true, Ordering::Release);
                false
            }
        }
    }

    async fn write_raw(&self, bytes: &[u8], deadline: Duration) -> Result<(), NetworkError> {
        let write = async {
            let mut writer = self.writer.lock().await;
            writer.write_all(bytes).await?;
            writer.flush().await
        };
        match tokio::time::timeout(deadline, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(NetworkError::Io(e)),
            Err(_) => Err(NetworkError::WriteTimeout(self.remote)),
        }
    }

    /// Shut down the write side of the socket
    pub async fn close(&self) {
        self.tear_down();
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}

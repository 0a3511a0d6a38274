//! Transport abstraction layer
//!
//! The peer manager only needs to bind listeners and dial peers; everything
//! after that works on the resulting TCP stream. Tests substitute transports
//! that fail or delay dials.

use anyhow::Result;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};

#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Bind a listener on `addr`
    async fn listen(&self, addr: SocketAddr) -> Result<TcpListener>;

    /// Dial `addr`, giving up after `timeout`
    async fn connect(&self, addr: SocketAddr, timeout: Duration) -> Result<TcpStream>;
}

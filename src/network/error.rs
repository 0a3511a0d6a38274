use std::io;
use std::net::{IpAddr, SocketAddr};
use thiserror::Error;

use super::framing::FrameError;
use super::topic::Topic;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("failed to bind {topic} listener on {addr}: {reason}")]
    Bind {
        topic: Topic,
        addr: SocketAddr,
        reason: String,
    },
    #[error("peer {0} is banned")]
    Banned(IpAddr),
    #[error("live {topic} connection to {ip} already registered")]
    AlreadyConnected { topic: Topic, ip: IpAddr },
    #[error("dial to {addr} failed after {attempts} attempts")]
    DialFailed { addr: SocketAddr, attempts: u32 },
    #[error("no {topic} connection to {ip}")]
    NotConnected { topic: Topic, ip: IpAddr },
    #[error("write to {0} timed out")]
    WriteTimeout(SocketAddr),
    #[error("connection to {0} is closed")]
    Closed(SocketAddr),
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

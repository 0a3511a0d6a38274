//! Network layer
//!
//! Per-topic TCP links to other nodes with trust scoring, bans, reconnection
//! and sentinel-delimited framing, plus the typed wire messages carried on
//! top of them.

pub mod error;
pub mod framing;
pub mod message;
pub mod peer_manager;
pub mod peer_table;
pub mod queue;
pub mod stats;
pub mod tcp_transport;
pub mod topic;
pub mod transport;

pub use error::NetworkError;
pub use message::{BaseMessage, MessageTag, TransactionsMessage, WireError};
pub use peer_manager::{
    InboundFrame, OutboundMessage, PeerChannels, PeerEvent, PeerManager, SendTarget,
};
pub use stats::NetworkStatsSnapshot;
pub use tcp_transport::{Direction, PeerConnection, RecvOutcome, TcpTransport};
pub use topic::Topic;
pub use transport::Transport;

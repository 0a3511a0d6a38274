//! Logical peer channels
//!
//! Every topic listens on its own port and keeps its own connection table.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Topic {
    NonceBroadcast,
    SelfNonce,
    Transactions,
    BlockSync,
    Rpc,
}

impl Topic {
    pub const ALL: [Topic; 5] = [
        Topic::NonceBroadcast,
        Topic::SelfNonce,
        Topic::Transactions,
        Topic::BlockSync,
        Topic::Rpc,
    ];

    /// Two-byte channel tag
    pub fn tag(self) -> [u8; 2] {
        match self {
            Topic::NonceBroadcast => *b"NB",
            Topic::SelfNonce => *b"SN",
            Topic::Transactions => *b"TX",
            Topic::BlockSync => *b"BS",
            Topic::Rpc => *b"RP",
        }
    }

    pub fn from_tag(tag: [u8; 2]) -> Option<Topic> {
        Topic::ALL.into_iter().find(|t| t.tag() == tag)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Topic::NonceBroadcast => "nonce-broadcast",
            Topic::SelfNonce => "self-nonce",
            Topic::Transactions => "transactions",
            Topic::BlockSync => "block-sync",
            Topic::Rpc => "rpc",
        };
        f.write_str(name)
    }
}

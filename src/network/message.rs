//! Wire message layer
//!
//! Every message starts with a 4-byte header `tag(2) || chain_id(2)`. Batches
//! of transactions or blocks travel in a container:
//!
//! ```text
//! header(4) || entry_count(4) || { key(2) || payload_count(4) || { len(4) || bytes }* }*
//! ```
//!
//! All integers are big-endian. Decoding fails closed: any declared length
//! past the end of the input, or bytes left over after the last entry, reject
//! the whole message.

use crate::primitives::{verify_transaction, SigSchemes, SignatureVerifier, Transaction};
use bytes::{Buf, BufMut, BytesMut};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, warn};

/// Payloads shorter than this cannot hold an encoded transaction
pub const MIN_TRANSACTION_SIZE: usize = 64;

pub const HEADER_LEN: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("header must be 4 bytes, got {0}")]
    HeaderLength(usize),
    #[error("unknown message tag {0:?}")]
    UnknownTag([u8; 2]),
    #[error("chain id mismatch: expected {expected}, got {got}")]
    ChainMismatch { expected: u16, got: u16 },
    #[error("truncated message: {needed} bytes declared, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },
    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),
    #[error("duplicate entry key {0:?}")]
    DuplicateKey([u8; 2]),
}

/// Recognised message tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageTag {
    Nonce,
    SelfNonce,
    Block,
    RejectBlock,
    Transaction,
    GetTransaction,
    SyncTransaction,
    HeightQuery,
    HeaderQuery,
    Ping,
}

impl MessageTag {
    pub const ALL: [MessageTag; 10] = [
        MessageTag::Nonce,
        MessageTag::SelfNonce,
        MessageTag::Block,
        MessageTag::RejectBlock,
        MessageTag::Transaction,
        MessageTag::GetTransaction,
        MessageTag::SyncTransaction,
        MessageTag::HeightQuery,
        MessageTag::HeaderQuery,
        MessageTag::Ping,
    ];

    pub fn as_bytes(self) -> [u8; 2] {
        match self {
            MessageTag::Nonce => *b"nn",
            MessageTag::SelfNonce => *b"sn",
            MessageTag::Block => *b"bl",
            MessageTag::RejectBlock => *b"rb",
            MessageTag::Transaction => *b"tx",
            MessageTag::GetTransaction => *b"gt",
            MessageTag::SyncTransaction => *b"st",
            MessageTag::HeightQuery => *b"hq",
            MessageTag::HeaderQuery => *b"hd",
            MessageTag::Ping => *b"pi",
        }
    }

    pub fn from_bytes(tag: [u8; 2]) -> Result<Self, WireError> {
        MessageTag::ALL
            .into_iter()
            .find(|t| t.as_bytes() == tag)
            .ok_or(WireError::UnknownTag(tag))
    }

    /// Entries under this key carry serialized transactions
    pub fn is_transaction_container(self) -> bool {
        matches!(
            self,
            MessageTag::Nonce
                | MessageTag::SelfNonce
                | MessageTag::Transaction
                | MessageTag::SyncTransaction
        )
    }

    /// The node's own in-flight nonce state; accepted without re-verification
    pub fn is_nonce(self) -> bool {
        matches!(self, MessageTag::Nonce | MessageTag::SelfNonce)
    }
}

/// Message header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaseMessage {
    pub tag: MessageTag,
    pub chain_id: u16,
}

impl BaseMessage {
    pub fn new(tag: MessageTag, chain_id: u16) -> Self {
        Self { tag, chain_id }
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let [a, b] = self.tag.as_bytes();
        let [c, d] = self.chain_id.to_be_bytes();
        [a, b, c, d]
    }

    /// Decode exactly four bytes
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() != HEADER_LEN {
            return Err(WireError::HeaderLength(bytes.len()));
        }
        let tag = MessageTag::from_bytes([bytes[0], bytes[1]])?;
        let chain_id = u16::from_be_bytes([bytes[2], bytes[3]]);
        Ok(Self { tag, chain_id })
    }

    /// Decode the header at the front of a full message
    pub fn peek(message: &[u8]) -> Result<Self, WireError> {
        match message.get(..HEADER_LEN) {
            Some(header) => Self::decode(header),
            None => Err(WireError::HeaderLength(message.len())),
        }
    }

    /// True if this message belongs to `chain_id`
    pub fn check_message(&self, chain_id: u16) -> bool {
        self.chain_id == chain_id
    }

    pub fn validate(&self, chain_id: u16) -> Result<(), WireError> {
        if self.check_message(chain_id) {
            Ok(())
        } else {
            Err(WireError::ChainMismatch {
                expected: chain_id,
                got: self.chain_id,
            })
        }
    }
}

/// Header plus payload lists keyed by 2-byte sub-topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionsMessage {
    pub base: BaseMessage,
    pub entries: BTreeMap<[u8; 2], Vec<Vec<u8>>>,
}

impl TransactionsMessage {
    pub fn new(base: BaseMessage) -> Self {
        Self {
            base,
            entries: BTreeMap::new(),
        }
    }

    /// Container with one entry of encoded transactions under `sub_topic`
    pub fn from_transactions(
        tag: MessageTag,
        chain_id: u16,
        sub_topic: MessageTag,
        transactions: &[Transaction],
    ) -> anyhow::Result<Self> {
        let mut message = Self::new(BaseMessage::new(tag, chain_id));
        for tx in transactions {
            message.push(sub_topic.as_bytes(), tx.encode()?);
        }
        Ok(message)
    }

    pub fn push(&mut self, key: [u8; 2], payload: Vec<u8>) {
        self.entries.entry(key).or_default().push(payload);
    }

    /// Total number of payloads across all entries
    pub fn payload_count(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn encode(&self) -> Vec<u8> {
        let size = HEADER_LEN
            + 4
            + self
                .entries
                .values()
                .map(|p| 6 + p.iter().map(|b| 4 + b.len()).sum::<usize>())
                .sum::<usize>();
        let mut out = BytesMut::with_capacity(size);
        out.put_slice(&self.base.encode());
        out.put_u32(self.entries.len() as u32);
        for (key, payloads) in &self.entries {
            out.put_slice(key);
            out.put_u32(payloads.len() as u32);
            for payload in payloads {
                out.put_u32(payload.len() as u32);
                out.put_slice(payload);
            }
        }
        out.to_vec()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let base = BaseMessage::peek(bytes)?;
        let mut buf = &bytes[HEADER_LEN..];

        let entry_count = read_u32(&mut buf)? as usize;
        let mut entries = BTreeMap::new();
        for _ in 0..entry_count {
            let key_bytes = take(&mut buf, 2)?;
            let key = [key_bytes[0], key_bytes[1]];
            let payload_count = read_u32(&mut buf)? as usize;
            // Every payload needs at least its 4-byte length
            let mut payloads = Vec::with_capacity(payload_count.min(buf.remaining() / 4));
            for _ in 0..payload_count {
                let len = read_u32(&mut buf)? as usize;
                payloads.push(take(&mut buf, len)?.to_vec());
            }
            if entries.insert(key, payloads).is_some() {
                return Err(WireError::DuplicateKey(key));
            }
        }

        if buf.has_remaining() {
            return Err(WireError::TrailingBytes(buf.remaining()));
        }
        Ok(Self { base, entries })
    }

    /// Decode and verify every transaction in the container entries.
    ///
    /// Bad payloads are skipped one by one; they never fail the batch. Nonce
    /// entries skip signature verification.
    pub fn extract_transactions(
        &self,
        verifier: &dyn SignatureVerifier,
        schemes: &SigSchemes,
    ) -> Vec<Transaction> {
        let mut accepted = Vec::new();
        for (key, payloads) in &self.entries {
            let sub_topic = match MessageTag::from_bytes(*key) {
                Ok(tag) if tag.is_transaction_container() => tag,
                _ => {
                    debug!(key = ?key, "skipping non-transaction entry");
                    continue;
                }
            };

            for payload in payloads {
                if payload.len() < MIN_TRANSACTION_SIZE {
                    warn!(
                        sub_topic = ?sub_topic,
                        len = payload.len(),
                        "payload too short to be a transaction"
                    );
                    continue;
                }
                let tx = match Transaction::decode(payload) {
                    Ok(tx) => tx,
                    Err(e) => {
                        warn!(sub_topic = ?sub_topic, "undecodable transaction: {}", e);
                        continue;
                    }
                };
                if tx.chain_id != self.base.chain_id {
                    warn!(sub_topic = ?sub_topic, chain_id = tx.chain_id, "transaction for another chain");
                    continue;
                }
                if !sub_topic.is_nonce() && !verify_transaction(&tx, verifier, schemes) {
                    warn!(
                        sub_topic = ?sub_topic,
                        hash = %hex::encode(tx.hash()),
                        "transaction failed verification"
                    );
                    continue;
                }
                accepted.push(tx);
            }
        }
        accepted
    }
}

fn read_u32(buf: &mut &[u8]) -> Result<u32, WireError> {
    if buf.remaining() < 4 {
        return Err(WireError::Truncated {
            needed: 4,
            remaining: buf.remaining(),
        });
    }
    Ok(buf.get_u32())
}

fn take<'a>(buf: &mut &'a [u8], len: usize) -> Result<&'a [u8], WireError> {
    if buf.len() < len {
        return Err(WireError::Truncated {
            needed: len,
            remaining: buf.len(),
        });
    }
    let (head, tail) = buf.split_at(len);
    *buf = tail;
    Ok(head)
}

//! Byte-exact frame format
//!
//! `MAGIC(4) || payload || "<-END->"(7)`. A frame with an empty payload is a
//! keepalive used by the liveness probe and is never surfaced to callers.

use bytes::{Bytes, BytesMut};
use thiserror::Error;

pub const MAGIC: [u8; 4] = [0x50, 0x51, 0xC4, 0x1A];
pub const END: &[u8; 7] = b"<-END->";

/// Bytes added around every payload
pub const FRAME_OVERHEAD: usize = MAGIC.len() + END.len();

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame does not start with the network magic")]
    BadMagic,
    #[error("frame exceeds maximum message size ({size} > {max})")]
    TooLarge { size: usize, max: usize },
}

/// Wrap `payload` for the wire
pub fn frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + FRAME_OVERHEAD);
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(payload);
    out.extend_from_slice(END);
    out
}

/// Keepalive frame (empty payload)
pub fn keepalive() -> Vec<u8> {
    frame(&[])
}

/// Reassembles frames from arbitrary read chunks of one connection.
pub struct FrameAccumulator {
    buf: BytesMut,
    /// Offset where the next sentinel search starts
    scanned: usize,
    max_message_size: usize,
}

impl FrameAccumulator {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            scanned: 0,
            max_message_size,
        }
    }

    /// Bytes held while waiting for an end sentinel
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Feed a chunk; returns every completed frame payload or violation, in order.
    ///
    /// A sentinel closes a frame only when it ends the buffer or is directly
    /// followed by the next frame's magic; any other occurrence is payload.
    /// Keepalives yield an empty payload. A violation discards the offending
    /// bytes so the stream can resynchronise on the next sentinel.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<Bytes, FrameError>> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();

        loop {
            let Some(pos) = find(&self.buf[self.scanned..], END) else {
                self.scanned = self.buf.len().saturating_sub(END.len() - 1);
                break;
            };
            let end = self.scanned + pos;
            match Boundary::after(&self.buf[end + END.len()..]) {
                Boundary::FrameEnd => {
                    let mut raw = self.buf.split_to(end + END.len());
                    raw.truncate(end);
                    self.scanned = 0;
                    out.push(self.payload(raw));
                }
                Boundary::Payload => self.scanned = end + 1,
                Boundary::Undecided => {
                    self.scanned = end;
                    break;
                }
            }
        }

        let limit = self.max_message_size + FRAME_OVERHEAD;
        if self.buf.len() > limit {
            out.push(Err(FrameError::TooLarge {
                size: self.buf.len(),
                max: self.max_message_size,
            }));
            self.buf.clear();
            self.scanned = 0;
        }
        out
    }

    fn payload(&self, mut raw: BytesMut) -> Result<Bytes, FrameError> {
        if !raw.starts_with(&MAGIC) {
            return Err(FrameError::BadMagic);
        }
        let payload = raw.split_off(MAGIC.len()).freeze();
        if payload.len() > self.max_message_size {
            return Err(FrameError::TooLarge {
                size: payload.len(),
                max: self.max_message_size,
            });
        }
        Ok(payload)
    }
}

/// What a sentinel is, judged by the bytes that follow it
enum Boundary {
    FrameEnd,
    Payload,
    /// Followed by a strict prefix of the magic; needs more bytes
    Undecided,
}

impl Boundary {
    fn after(rest: &[u8]) -> Self {
        if rest.is_empty() || rest.starts_with(&MAGIC) {
            Boundary::FrameEnd
        } else if rest.len() < MAGIC.len() && MAGIC.starts_with(rest) {
            Boundary::Undecided
        } else {
            Boundary::Payload
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_layout() {
        let framed = frame(b"hello");
        assert_eq!(&framed[..4], &MAGIC);
        assert_eq!(&framed[4..9], b"hello");
        assert_eq!(&framed[9..], END);
    }

    #[test]
    fn test_reassembles_fragmented_frames() {
        let mut acc = FrameAccumulator::new(1024);
        let mut wire = frame(b"first");
        wire.extend_from_slice(&frame(b"second"));

        let mut got = Vec::new();
        // Split inside the sentinel to exercise the scan offset
        for chunk in wire.chunks(3) {
            got.extend(acc.push(chunk));
        }
        let payloads: Vec<_> = got.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(payloads, vec![Bytes::from("first"), Bytes::from("second")]);
        assert_eq!(acc.pending(), 0);
    }

    #[test]
    fn test_sentinel_inside_payload_is_not_a_boundary() {
        let payload = b"amount<-END->tail".to_vec();
        let mut wire = frame(&payload);
        wire.extend_from_slice(&frame(&payload));

        let mut acc = FrameAccumulator::new(1024);
        let out = acc.push(&wire);
        assert_eq!(out, vec![Ok(Bytes::from(payload.clone())), Ok(Bytes::from(payload))]);
        assert_eq!(acc.pending(), 0);
    }

    #[test]
    fn test_sentinel_before_partial_magic_waits() {
        let payload = b"x<-END->PQ".to_vec();
        let wire = frame(&payload);
        // Cut right after the inner "<-END->P"
        let cut = MAGIC.len() + 9;

        let mut acc = FrameAccumulator::new(1024);
        assert!(acc.push(&wire[..cut]).is_empty());
        assert_eq!(acc.push(&wire[cut..]), vec![Ok(Bytes::from(payload))]);
    }

    #[test]
    fn test_keepalive_is_empty_payload() {
        let mut acc = FrameAccumulator::new(16);
        let out = acc.push(&keepalive());
        assert_eq!(out, vec![Ok(Bytes::new())]);
    }

    #[test]
    fn test_bad_magic_is_reported_and_skipped() {
        let mut acc = FrameAccumulator::new(1024);
        let mut wire = b"JUNKpayload".to_vec();
        wire.extend_from_slice(END);
        wire.extend_from_slice(&frame(b"ok"));

        let out = acc.push(&wire);
        assert_eq!(out, vec![Err(FrameError::BadMagic), Ok(Bytes::from("ok"))]);
    }

    #[test]
    fn test_oversized_buffer_is_a_violation() {
        let mut acc = FrameAccumulator::new(8);
        let mut out = acc.push(&MAGIC);
        out.extend(acc.push(&[0u8; 32]));
        assert!(matches!(out.as_slice(), [Err(FrameError::TooLarge { .. })]));
        assert_eq!(acc.pending(), 0);
    }

    #[test]
    fn test_complete_oversized_frame_is_a_violation() {
        let mut acc = FrameAccumulator::new(4);
        let out = acc.push(&frame(b"too long"));
        assert!(matches!(out.as_slice(), [Err(FrameError::TooLarge { size: 8, max: 4 })]));
    }
}

//! Packet codec: a batch of messages as one frame body.
//!
//! A packet body is the postcard encoding of a sequence of optional
//! messages. `None` slots are placeholders some brokers leave in a packet;
//! decoding skips them. Order on the wire is batch order.

use std::collections::LinkedList;

use serde::{Serialize, Serializer};
use thiserror::Error;

use super::message::Message;

/// Default upper bound for an encoded packet body.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 4 * 1024 * 1024;

/// Errors from encoding or decoding a packet body.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Serialization or deserialization failed.
    #[error("packet serialization failed: {0}")]
    Serialize(#[from] postcard::Error),
    /// Body exceeds the configured size limit.
    #[error("packet of {len} bytes exceeds limit of {max} bytes")]
    TooLarge { len: usize, max: usize },
}

struct Batch<'a>(&'a LinkedList<Message>);

impl Serialize for Batch<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.iter().map(Some))
    }
}

/// Encodes and decodes packet bodies under a size limit.
#[derive(Debug, Clone, Copy)]
pub struct PacketCodec {
    max_len: usize,
}

impl PacketCodec {
    /// Creates a codec refusing bodies larger than `max_len` bytes.
    #[must_use]
    pub const fn new(max_len: usize) -> Self {
        Self { max_len }
    }

    /// Largest body this codec accepts.
    #[must_use]
    pub const fn max_len(&self) -> usize {
        self.max_len
    }

    /// Encodes `batch` into `buf` (cleared first, capacity kept).
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::TooLarge`] if the body would exceed the limit.
    /// `buf` is left empty in that case.
    pub fn encode(&self, batch: &LinkedList<Message>, buf: &mut Vec<u8>) -> Result<(), FrameError> {
        self.encode_value(&Batch(batch), buf)
    }

    /// Encodes an explicit slot list, placeholders included.
    ///
    /// # Errors
    ///
    /// Same as [`encode`](Self::encode).
    pub fn encode_slots(
        &self,
        slots: &[Option<Message>],
        buf: &mut Vec<u8>,
    ) -> Result<(), FrameError> {
        self.encode_value(&slots, buf)
    }

    fn encode_value<T: Serialize + ?Sized>(
        &self,
        value: &T,
        buf: &mut Vec<u8>,
    ) -> Result<(), FrameError> {
        buf.clear();
        let out = postcard::to_extend(value, std::mem::take(buf))?;
        if out.len() > self.max_len {
            return Err(FrameError::TooLarge {
                len: out.len(),
                max: self.max_len,
            });
        }
        *buf = out;
        Ok(())
    }

    /// Decodes a body into messages, dropping placeholder slots.
    ///
    /// # Errors
    ///
    /// Returns an error if the body is over the limit or malformed.
    pub fn decode(&self, bytes: &[u8]) -> Result<LinkedList<Message>, FrameError> {
        if bytes.len() > self.max_len {
            return Err(FrameError::TooLarge {
                len: bytes.len(),
                max: self.max_len,
            });
        }
        let slots: Vec<Option<Message>> = postcard::from_bytes(bytes)?;
        Ok(slots.into_iter().flatten().collect())
    }
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PACKET_SIZE)
    }
}

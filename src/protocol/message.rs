//! Owned protocol message envelope.

use std::fmt::Write as _;

use crate::error::{Error, Result};
use crate::protocol::codec::read_i32_at;

/// An owned protocol message.
///
/// Built messages hold exactly one frame. Messages produced by a transport read hold one
/// raw receive chunk, which may contain several frames or only part of one; `kind` is
/// then simply the first byte of the chunk.
///
/// `kind` is `0` for untagged messages (SSL request, startup packet), whose first four
/// bytes are a length field rather than a tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    kind: u8,
    data: Vec<u8>,
}

impl Message {
    /// Create a message from a kind and its complete byte representation.
    pub fn new(kind: u8, data: Vec<u8>) -> Self {
        Self { kind, data }
    }

    /// Create a message from received bytes; the kind is the first byte.
    pub fn from_received(data: Vec<u8>) -> Self {
        let kind = data.first().copied().unwrap_or(0);
        Self { kind, data }
    }

    /// Kind tag.
    pub fn kind(&self) -> u8 {
        self.kind
    }

    /// Number of bytes in the message.
    pub fn length(&self) -> usize {
        self.data.len()
    }

    /// Check if the message holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Complete byte representation, including kind and length.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Take the byte buffer.
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Payload of a tagged frame (everything after kind and length).
    pub fn payload(&self) -> &[u8] {
        self.data.get(5..).unwrap_or_default()
    }

    /// Request code of an untagged client message (SSL request, startup, cancel).
    ///
    /// This is the int32 following the length field, e.g. `80877103` for an SSL request
    /// or `196608` for a protocol 3.0 startup packet.
    pub fn request_code(&self) -> Result<i32> {
        if self.data.len() < 8 {
            return Err(Error::Protocol(format!(
                "request code: message too short ({} bytes)",
                self.data.len()
            )));
        }
        read_i32_at(&self.data, 4)
    }

    /// Hex dump the message at trace level.
    pub fn log(&self) {
        if tracing::enabled!(tracing::Level::TRACE) {
            log_mem(&self.data);
        }
    }
}

/// Hex dump `data` at trace level, 32 bytes per line with a printable column.
pub fn log_mem(data: &[u8]) {
    for (line, chunk) in data.chunks(32).enumerate() {
        let mut hex = String::with_capacity(96);
        let mut text = String::with_capacity(32);
        for byte in chunk {
            let _ = write!(hex, "{byte:02x} ");
            text.push(if byte.is_ascii_graphic() || *byte == b' ' {
                char::from(*byte)
            } else {
                '.'
            });
        }
        tracing::trace!("{:08x}: {:<96}{}", line * 32, hex, text);
    }
}

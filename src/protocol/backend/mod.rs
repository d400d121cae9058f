//! PostgreSQL backend (server → client) messages.
//!
//! Server output arrives as an unbounded byte stream of back-to-back frames:
//! `kind(1) + length(4, includes itself) + payload`. [`split_frame`] cuts one frame off
//! the front of a buffer, [`Frames`] walks a whole buffer and [`has_message`] is the
//! scan primitive used by the response assembler.

pub mod auth;
pub mod error;
pub mod outbound;
pub mod query;

pub use auth::{AuthenticationMessage, BackendKeyData, ParameterStatus, ReadyForQuery};
pub use error::{ErrorResponse, NoticeResponse, extract_field};
pub use query::{CommandComplete, DataRow, RowDescription};

use crate::error::{Error, Result};
use crate::protocol::codec::read_i32_at;
use crate::protocol::message::Message;

/// Backend message type bytes.
pub mod msg_type {
    /// Authentication message
    pub const AUTHENTICATION: u8 = b'R';
    /// BackendKeyData
    pub const BACKEND_KEY_DATA: u8 = b'K';
    /// ParameterStatus
    pub const PARAMETER_STATUS: u8 = b'S';
    /// ReadyForQuery
    pub const READY_FOR_QUERY: u8 = b'Z';
    /// RowDescription
    pub const ROW_DESCRIPTION: u8 = b'T';
    /// DataRow
    pub const DATA_ROW: u8 = b'D';
    /// CommandComplete
    pub const COMMAND_COMPLETE: u8 = b'C';
    /// EmptyQueryResponse
    pub const EMPTY_QUERY_RESPONSE: u8 = b'I';
    /// ErrorResponse
    pub const ERROR_RESPONSE: u8 = b'E';
    /// NoticeResponse
    pub const NOTICE_RESPONSE: u8 = b'N';
    /// NotificationResponse
    pub const NOTIFICATION_RESPONSE: u8 = b'A';
    /// CopyOutResponse
    pub const COPY_OUT_RESPONSE: u8 = b'H';
    /// CopyBothResponse
    pub const COPY_BOTH_RESPONSE: u8 = b'W';
    /// CopyData
    pub const COPY_DATA: u8 = b'd';
    /// CopyDone
    pub const COPY_DONE: u8 = b'c';
    /// CopyFail
    pub const COPY_FAIL: u8 = b'f';
    /// NegotiateProtocolVersion
    pub const NEGOTIATE_PROTOCOL_VERSION: u8 = b'v';
}

/// Size of the `kind + length` frame header.
pub const HEADER_SIZE: usize = 5;

/// One complete frame borrowed from a receive buffer.
#[derive(Debug, Clone, Copy)]
pub struct RawMessage<'a> {
    /// Message type byte
    pub type_byte: u8,
    /// Message payload (after length field)
    pub payload: &'a [u8],
    /// Whole frame, header included
    pub frame: &'a [u8],
}

impl<'a> RawMessage<'a> {
    /// Check if this is an error response.
    pub fn is_error(&self) -> bool {
        self.type_byte == msg_type::ERROR_RESPONSE
    }

    /// Check if this is a notice response.
    pub fn is_notice(&self) -> bool {
        self.type_byte == msg_type::NOTICE_RESPONSE
    }

    /// Check if this is an async message (can arrive at any time).
    pub fn is_async(&self) -> bool {
        matches!(
            self.type_byte,
            msg_type::NOTICE_RESPONSE
                | msg_type::NOTIFICATION_RESPONSE
                | msg_type::PARAMETER_STATUS
        )
    }

    /// Copy the frame into an owned [`Message`].
    pub fn to_message(&self) -> Message {
        Message::new(self.type_byte, self.frame.to_vec())
    }
}

/// Cut one frame off the front of `buf`.
///
/// Returns `Ok(None)` when `buf` does not yet hold a complete frame, and an error when
/// the length field is smaller than the 4 bytes it occupies.
pub fn split_frame(buf: &[u8]) -> Result<Option<(RawMessage<'_>, &[u8])>> {
    if buf.len() < HEADER_SIZE {
        return Ok(None);
    }

    let length = read_i32_at(buf, 1)?;
    if length < 4 {
        return Err(Error::Protocol(format!(
            "frame '{}' has invalid length {}",
            buf[0].escape_ascii(),
            length
        )));
    }

    let total = 1 + length as usize;
    if buf.len() < total {
        return Ok(None);
    }

    let (frame, rest) = buf.split_at(total);
    let msg = RawMessage {
        type_byte: frame[0],
        payload: &frame[HEADER_SIZE..],
        frame,
    };
    Ok(Some((msg, rest)))
}

/// Iterator over the complete frames of a buffer.
///
/// Iteration stops at the first incomplete frame; [`Frames::remainder`] then holds the
/// unconsumed tail.
#[derive(Debug, Clone)]
pub struct Frames<'a> {
    rest: &'a [u8],
    failed: bool,
}

impl<'a> Frames<'a> {
    /// Walk `buf` from its first byte.
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            rest: buf,
            failed: false,
        }
    }

    /// Bytes not yet consumed.
    pub fn remainder(&self) -> &'a [u8] {
        self.rest
    }
}

impl<'a> Iterator for Frames<'a> {
    type Item = Result<RawMessage<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match split_frame(self.rest) {
            Ok(Some((msg, rest))) => {
                self.rest = rest;
                Some(Ok(msg))
            }
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Walk every frame of a fully accumulated buffer.
///
/// Unlike [`Frames`], a truncated trailing frame is an error here.
pub fn complete_frames(buf: &[u8]) -> Result<Vec<RawMessage<'_>>> {
    let mut frames = Frames::new(buf);
    let mut out = Vec::new();
    for frame in frames.by_ref() {
        out.push(frame?);
    }
    if !frames.remainder().is_empty() {
        return Err(Error::Protocol(format!(
            "truncated frame: {} trailing bytes",
            frames.remainder().len()
        )));
    }
    Ok(out)
}

/// Check whether `buf` contains a complete frame of the given kind.
///
/// Frames are walked one by one from the start; an incomplete trailing frame ends the
/// scan. When an `ErrorResponse` is found its fields are logged.
pub fn has_message(kind: u8, buf: &[u8]) -> Result<bool> {
    for frame in Frames::new(buf) {
        let frame = frame?;
        if frame.type_byte == kind {
            if frame.is_error() {
                error::log_error_response(frame.payload);
            }
            return Ok(true);
        }
    }
    Ok(false)
}

/// Find the first complete frame of the given kind.
pub fn find_message(kind: u8, buf: &[u8]) -> Result<Option<RawMessage<'_>>> {
    for frame in Frames::new(buf) {
        let frame = frame?;
        if frame.type_byte == kind {
            return Ok(Some(frame));
        }
    }
    Ok(None)
}

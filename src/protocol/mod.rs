//! PostgreSQL wire protocol implementation.
//!
//! This module contains the low-level protocol encoding and decoding.
//!
//! # Structure
//!
//! - `backend`: Server → Client messages (frame splitting, parsing, server-side replies)
//! - `frontend`: Client → Server messages (encoding)
//! - `codec`: Low-level encoding/decoding primitives
//! - `message`: The owned [`Message`] envelope
//! - `types`: Common protocol types (Oid, TransactionStatus, Lsn)

pub mod backend;
pub mod codec;
pub mod frontend;
pub mod message;
pub mod types;

// Re-export commonly used types
pub use backend::{RawMessage, has_message};
pub use message::Message;
pub use types::{Lsn, Oid, TransactionStatus};

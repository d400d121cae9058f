//! Action types for state machine I/O requests.

use crate::protocol::message::Message;

/// Action requested by a state machine.
///
/// The caller performs the requested I/O and feeds the result back into the state
/// machine.
#[derive(Debug)]
pub enum Action {
    /// Write the message, then read a single byte.
    ///
    /// Used for SSL negotiation: the server answers an SSL request with 'S' or 'N'.
    WriteAndReadByte(Message),

    /// Write the message, then read the next server message.
    WriteAndReadMessage(Message),

    /// Read the next server message.
    ReadMessage,

    /// Perform the TLS handshake, then call `tls_handshake_complete()`.
    TlsHandshake,

    /// The state machine has finished successfully.
    Finished,
}

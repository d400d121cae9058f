//! Server-side messages written by the agent when it answers a client.
//!
//! These mirror the frontend builders: each computes its exact size and writes through a
//! [`MessageWriter`].

use crate::error::Result;
use crate::protocol::backend::auth::auth_type;
use crate::protocol::backend::msg_type;
use crate::protocol::codec::MessageWriter;
use crate::protocol::frontend::auth::SCRAM_SHA_256;
use crate::protocol::message::Message;

/// SCRAM iteration count announced in the server-first-message.
pub const SCRAM_ITERATIONS: u32 = 4096;

/// SQLSTATE `too_many_connections`.
const TOO_MANY_CONNECTIONS: &str = "53300";

fn single_byte(kind: u8) -> Result<Message> {
    let mut msg = MessageWriter::raw(kind, 1);
    msg.write_u8(kind)?;
    msg.finish()
}

/// A single zero byte.
pub fn empty() -> Result<Message> {
    single_byte(0)
}

/// A single `N`, refusing an SSL request.
pub fn notice() -> Result<Message> {
    single_byte(msg_type::NOTICE_RESPONSE)
}

/// A single `S`, accepting an SSL request.
pub fn tls_accept() -> Result<Message> {
    single_byte(b'S')
}

/// AuthenticationOk.
pub fn auth_success() -> Result<Message> {
    let mut msg = MessageWriter::tagged(msg_type::AUTHENTICATION, 1 + 4 + 4)?;
    msg.write_i32(auth_type::OK)?;
    msg.finish()
}

/// AuthenticationSASL advertising `SCRAM-SHA-256` as the only mechanism.
pub fn auth_sasl() -> Result<Message> {
    let size = 1 + 4 + 4 + SCRAM_SHA_256.len() + 1 + 1;
    let mut msg = MessageWriter::tagged(msg_type::AUTHENTICATION, size)?;
    msg.write_i32(auth_type::SASL)?;
    msg.write_cstr(SCRAM_SHA_256)?;
    // End of mechanism list
    msg.write_u8(0)?;
    msg.finish()
}

/// AuthenticationSASLContinue carrying the server-first-message.
///
/// `r=<client nonce><server nonce>,s=<salt>,i=4096`
pub fn sasl_continue(client_nonce: &str, server_nonce: &str, salt: &str) -> Result<Message> {
    let iterations = format!(",i={SCRAM_ITERATIONS}");
    let size = 1 + 4 + 4 + 2 + client_nonce.len() + server_nonce.len() + 3 + salt.len()
        + iterations.len();
    let mut msg = MessageWriter::tagged(msg_type::AUTHENTICATION, size)?;
    msg.write_i32(auth_type::SASL_CONTINUE)?;
    msg.write_str("r=")?;
    msg.write_str(client_nonce)?;
    msg.write_str(server_nonce)?;
    msg.write_str(",s=")?;
    msg.write_str(salt)?;
    msg.write_str(&iterations)?;
    msg.finish()
}

/// AuthenticationSASLFinal carrying `v=<server signature>`.
pub fn sasl_final(server_signature: &str) -> Result<Message> {
    let size = 1 + 4 + 4 + 2 + server_signature.len();
    let mut msg = MessageWriter::tagged(msg_type::AUTHENTICATION, size)?;
    msg.write_i32(auth_type::SASL_FINAL)?;
    msg.write_str("v=")?;
    msg.write_str(server_signature)?;
    msg.finish()
}

/// FATAL ErrorResponse with SQLSTATE 53300, sent when a client is turned away.
pub fn connection_refused() -> Result<Message> {
    let fields = [
        "SFATAL".to_string(),
        "VFATAL".to_string(),
        format!("C{TOO_MANY_CONNECTIONS}"),
        "Mconnection refused".to_string(),
    ];
    let size = 1 + 4 + fields.iter().map(|f| f.len() + 1).sum::<usize>() + 1;
    let mut msg = MessageWriter::tagged(msg_type::ERROR_RESPONSE, size)?;
    for field in &fields {
        msg.write_cstr(field)?;
    }
    msg.write_u8(0)?;
    msg.finish()
}

/// Connection refusal for pre-3.0 clients: `E` followed by a bare string.
pub fn connection_refused_legacy() -> Result<Message> {
    const TEXT: &str = "connection refused";
    let mut msg = MessageWriter::raw(msg_type::ERROR_RESPONSE, 1 + TEXT.len() + 1);
    msg.write_u8(msg_type::ERROR_RESPONSE)?;
    msg.write_cstr(TEXT)?;
    msg.finish()
}

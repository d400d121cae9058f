//! Simple query protocol messages.

use crate::error::Result;
use crate::protocol::codec::MessageWriter;
use crate::protocol::message::Message;

/// Build a Query message.
///
/// The query string may contain multiple SQL statements separated by semicolons.
pub fn query(sql: &str) -> Result<Message> {
    let size = 1 + 4 + sql.len() + 1;
    let mut msg = MessageWriter::tagged(super::msg_type::QUERY, size)?;
    msg.write_cstr(sql)?;
    msg.finish()
}

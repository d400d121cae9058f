//! COPY protocol frontend messages.

use crate::error::Result;
use crate::protocol::codec::MessageWriter;
use crate::protocol::message::Message;

/// Build a CopyData message around a raw payload.
pub fn copy_data(data: &[u8]) -> Result<Message> {
    let mut msg = MessageWriter::tagged(super::msg_type::COPY_DATA, 1 + 4 + data.len())?;
    msg.write_bytes(data)?;
    msg.finish()
}

/// Build a CopyDone message.
pub fn copy_done() -> Result<Message> {
    MessageWriter::tagged(super::msg_type::COPY_DONE, 5)?.finish()
}

/// Build a CopyFail message.
pub fn copy_fail(error_message: &str) -> Result<Message> {
    let size = 1 + 4 + error_message.len() + 1;
    let mut msg = MessageWriter::tagged(super::msg_type::COPY_FAIL, size)?;
    msg.write_cstr(error_message)?;
    msg.finish()
}

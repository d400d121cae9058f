//! Startup and termination messages.

use crate::error::Result;
use crate::protocol::codec::MessageWriter;
use crate::protocol::message::Message;

/// Protocol version 3.0 (0x00030000)
pub const PROTOCOL_VERSION_3_0: i32 = 196608;

/// SSL request code
pub const SSL_REQUEST_CODE: i32 = 80877103;

/// GSSAPI encryption request code
pub const GSSENC_REQUEST_CODE: i32 = 80877104;

/// Cancel request code
pub const CANCEL_REQUEST_CODE: i32 = 80877102;

/// Application name reported in the startup packet.
pub const APPLICATION_NAME: &str = "pgvictoria";

/// Build an SSLRequest message.
///
/// This is sent before StartupMessage to request TLS encryption.
/// Server responds with single byte: 'S' (accepted) or 'N' (rejected).
pub fn ssl_request() -> Result<Message> {
    let mut msg = MessageWriter::untagged(8)?;
    msg.write_i32(SSL_REQUEST_CODE)?;
    msg.finish()
}

/// Build a StartupMessage reporting [`APPLICATION_NAME`].
///
/// With `replication` set the session is opened as a physical replication connection.
pub fn startup(username: &str, database: &str, replication: bool) -> Result<Message> {
    startup_with_application_name(username, database, APPLICATION_NAME, replication)
}

/// Build a StartupMessage with an explicit application name.
pub fn startup_with_application_name(
    username: &str,
    database: &str,
    application_name: &str,
    replication: bool,
) -> Result<Message> {
    let mut size = 4 + 4
        + "user".len() + 1 + username.len() + 1
        + "database".len() + 1 + database.len() + 1
        + "application_name".len() + 1 + application_name.len() + 1
        + 1;
    if replication {
        size += "replication".len() + 1 + "1".len() + 1;
    }

    let mut msg = MessageWriter::untagged(size)?;
    msg.write_i32(PROTOCOL_VERSION_3_0)?;
    msg.write_cstr("user")?;
    msg.write_cstr(username)?;
    msg.write_cstr("database")?;
    msg.write_cstr(database)?;
    msg.write_cstr("application_name")?;
    msg.write_cstr(application_name)?;
    if replication {
        msg.write_cstr("replication")?;
        msg.write_cstr("1")?;
    }

    // Terminator
    msg.write_u8(0)?;
    msg.finish()
}

/// Build a Terminate message.
///
/// Sent to cleanly close the connection.
pub fn terminate() -> Result<Message> {
    MessageWriter::tagged(super::msg_type::TERMINATE, 5)?.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codec::{read_i32_at, read_string_at};

    #[test]
    fn test_ssl_request() {
        let msg = ssl_request().unwrap();

        assert_eq!(msg.kind(), 0);
        assert_eq!(msg.length(), 8);
        assert_eq!(&msg.data()[0..4], &8_i32.to_be_bytes());
        assert_eq!(&msg.data()[4..8], &SSL_REQUEST_CODE.to_be_bytes());
        assert_eq!(msg.request_code().unwrap(), SSL_REQUEST_CODE);
    }

    #[test]
    fn test_startup() {
        let msg = startup("postgres", "test", false).unwrap();
        let buf = msg.data();

        // Length covers the whole packet
        assert_eq!(read_i32_at(buf, 0).unwrap() as usize, buf.len());
        assert_eq!(read_i32_at(buf, 4).unwrap(), PROTOCOL_VERSION_3_0);

        let mut offset = 8;
        let mut strings = Vec::new();
        while buf[offset] != 0 {
            let s = read_string_at(buf, offset).unwrap();
            offset += s.len() + 1;
            strings.push(s);
        }
        assert_eq!(
            strings,
            ["user", "postgres", "database", "test", "application_name", "pgvictoria"]
        );
        // Only the terminator remains
        assert_eq!(offset + 1, buf.len());
    }

    #[test]
    fn test_startup_replication() {
        let plain = startup("repl", "replication", false).unwrap();
        let msg = startup("repl", "replication", true).unwrap();

        assert_eq!(msg.length(), plain.length() + 14);
        assert!(msg.data().ends_with(b"replication\x001\x00\x00"));
        assert_eq!(read_i32_at(msg.data(), 0).unwrap() as usize, msg.length());
    }

    #[test]
    fn test_terminate() {
        let msg = terminate().unwrap();

        assert_eq!(msg.length(), 5);
        assert_eq!(msg.kind(), b'X');
        assert_eq!(&msg.data()[1..5], &4_i32.to_be_bytes());
    }
}

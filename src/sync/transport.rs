//! Blocking message transport over a plain socket.
//!
//! A read returns whatever one `read` call produced: possibly several frames, possibly
//! part of one. Reassembly is the job of the response assembler.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::os::unix::net::UnixStream;
use std::time::Duration;

use crate::buffer_pool::{DEFAULT_BUFFER_SIZE, GLOBAL_BUFFER_POOL, PooledBuffer};
use crate::error::Result;
use crate::protocol::message::Message;

/// Socket timeout applied by [`Transport::read_blocking`].
pub const BLOCKING_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause between retries of a non-blocking socket that reported `WouldBlock`.
const WOULD_BLOCK_BACKOFF: Duration = Duration::from_millis(1);

/// Pause after a session read that decrypted nothing while a deadline is pending.
#[cfg_attr(not(any(feature = "tls", test)), expect(dead_code))]
pub(crate) const ZERO_RETURN_BACKOFF: Duration = Duration::from_millis(100);

/// Outcome of a successful read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadStatus {
    /// Bytes were received.
    Ok(Message),
    /// The peer produced no bytes. Not fatal; the caller may retry.
    Zero,
}

/// Synchronous read/write of protocol messages.
///
/// Fatal conditions are returned as `Err`; partial I/O and retryable conditions are
/// absorbed by the implementation.
pub trait Transport {
    /// Write the whole message.
    fn write(&mut self, msg: &Message) -> Result<()>;

    /// Read one chunk.
    ///
    /// With `block` set, conditions that only mean "try again" are retried instead of
    /// yielding [`ReadStatus::Zero`]. A `timeout` bounds the wait.
    fn read(&mut self, block: bool, timeout: Option<Duration>) -> Result<ReadStatus>;

    /// Read one chunk, waiting at most [`BLOCKING_READ_TIMEOUT`].
    fn read_blocking(&mut self) -> Result<ReadStatus> {
        self.read(true, Some(BLOCKING_READ_TIMEOUT))
    }

    /// Read one chunk, waiting at most `timeout`.
    fn read_with_timeout(&mut self, timeout: Duration) -> Result<ReadStatus> {
        self.read(true, Some(timeout))
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&mut self, msg: &Message) -> Result<()> {
        (**self).write(msg)
    }

    fn read(&mut self, block: bool, timeout: Option<Duration>) -> Result<ReadStatus> {
        (**self).read(block, timeout)
    }
}

/// A byte stream whose read timeout can be set.
pub trait Socket: Read + Write {
    /// Set (or clear, with `None`) the read timeout.
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;
}

impl Socket for TcpStream {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }
}

impl Socket for UnixStream {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        UnixStream::set_read_timeout(self, timeout)
    }
}

/// Write `data` in chunks of at most [`DEFAULT_BUFFER_SIZE`] bytes.
///
/// Partial writes advance the offset; `WouldBlock` and `Interrupted` are retried. A
/// zero-byte write or any other error is fatal.
pub(crate) fn write_chunked<W: Write + ?Sized>(writer: &mut W, data: &[u8]) -> Result<()> {
    let total = data.len();
    let mut offset = 0;

    while offset < total {
        let end = total.min(offset + DEFAULT_BUFFER_SIZE);
        match writer.write(&data[offset..end]) {
            Ok(0) => {
                tracing::error!("write returned 0 bytes at {}/{}", offset, total);
                return Err(io::Error::from(io::ErrorKind::WriteZero).into());
            }
            Ok(n) => {
                offset += n;
                if offset < total {
                    tracing::debug!("partial write: {}/{}", offset, total);
                }
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {
                tracing::debug!("write retry at {}/{}: {}", offset, total, e);
                if e.kind() == io::ErrorKind::WouldBlock {
                    std::thread::sleep(WOULD_BLOCK_BACKOFF);
                }
            }
            Err(e) => {
                tracing::error!("write failed at {}/{}: {}", offset, total, e);
                return Err(e.into());
            }
        }
    }

    loop {
        match writer.flush() {
            Ok(()) => return Ok(()),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {}
            Err(e) => {
                tracing::error!("flush failed: {}", e);
                return Err(e.into());
            }
        }
    }
}

/// Clear the read timeout installed for one call, keeping the call's own error first.
pub(crate) fn restore_read_timeout<S, T>(socket: &S, result: Result<T>) -> Result<T>
where
    S: Socket + ?Sized,
{
    if let Err(e) = socket.set_read_timeout(None) {
        tracing::debug!("failed to clear read timeout: {}", e);
        if result.is_ok() {
            return Err(e.into());
        }
    }
    result
}

/// Next step after a session read that produced no bytes.
#[cfg_attr(not(any(feature = "tls", test)), expect(dead_code))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IdleRead {
    /// Report [`ReadStatus::Zero`].
    Zero,
    /// Sleep for the given pause, then read again.
    Retry(Duration),
}

/// Whether a read error only means that no data was available yet.
#[cfg_attr(not(any(feature = "tls", test)), expect(dead_code))]
pub(crate) fn is_idle_error(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::TimedOut
    )
}

/// Decide how a session read continues after it produced nothing.
///
/// `eof` is a zero-byte read, otherwise the read failed with an idle error. `elapsed` is
/// measured from the start of the call.
#[cfg_attr(not(any(feature = "tls", test)), expect(dead_code))]
pub(crate) fn idle_read(
    eof: bool,
    block: bool,
    timeout: Option<Duration>,
    elapsed: Duration,
) -> IdleRead {
    match timeout {
        Some(limit) if elapsed >= limit => IdleRead::Zero,
        Some(_) if eof => IdleRead::Retry(ZERO_RETURN_BACKOFF),
        Some(_) => IdleRead::Retry(WOULD_BLOCK_BACKOFF),
        None if eof || !block => IdleRead::Zero,
        None => IdleRead::Retry(WOULD_BLOCK_BACKOFF),
    }
}

/// [`Transport`] over a plain socket.
pub struct SocketTransport<S> {
    socket: S,
    buffer: PooledBuffer,
}

impl<S: Socket> SocketTransport<S> {
    /// Wrap a connected socket.
    pub fn new(socket: S) -> Self {
        Self {
            socket,
            buffer: GLOBAL_BUFFER_POOL.receive_buffer(),
        }
    }

    /// Get a reference to the socket.
    pub fn get_ref(&self) -> &S {
        &self.socket
    }

    /// Unwrap the socket, e.g. to start a TLS handshake on it.
    pub fn into_inner(self) -> S {
        self.socket
    }
}

fn read_socket<S: Socket>(
    socket: &mut S,
    buffer: &mut [u8],
    block: bool,
    timeout: Option<Duration>,
) -> Result<ReadStatus> {
    loop {
        match socket.read(buffer) {
            Ok(0) => return Ok(ReadStatus::Zero),
            Ok(n) => return Ok(ReadStatus::Ok(Message::from_received(buffer[..n].to_vec()))),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                if block && timeout.is_none() {
                    std::thread::sleep(WOULD_BLOCK_BACKOFF);
                    continue;
                }
                return Ok(ReadStatus::Zero);
            }
            Err(e) => {
                tracing::debug!("read failed: {}", e);
                return Err(e.into());
            }
        }
    }
}

impl<S: Socket> Transport for SocketTransport<S> {
    fn write(&mut self, msg: &Message) -> Result<()> {
        write_chunked(&mut self.socket, msg.data())
    }

    fn read(&mut self, block: bool, timeout: Option<Duration>) -> Result<ReadStatus> {
        let Self { socket, buffer } = self;
        let timeout = timeout.filter(|t| !t.is_zero());
        let Some(limit) = timeout else {
            return read_socket(socket, buffer, block, None);
        };

        socket.set_read_timeout(Some(limit))?;
        let result = read_socket(socket, buffer, block, timeout);
        restore_read_timeout(socket, result)
    }
}

//! Blocking message transport over a TLS session.

use std::io::Read;
use std::time::{Duration, Instant};

use native_tls::{HandshakeError, TlsConnector, TlsStream};

use crate::buffer_pool::{GLOBAL_BUFFER_POOL, PooledBuffer};
use crate::error::{Error, Result};
use crate::protocol::message::Message;

use super::transport::{
    IdleRead, ReadStatus, Socket, Transport, idle_read, is_idle_error, restore_read_timeout,
    write_chunked,
};

/// [`Transport`] over a TLS session wrapping a [`Socket`].
pub struct TlsTransport<S: Socket> {
    stream: TlsStream<S>,
    buffer: PooledBuffer,
}

impl<S: Socket> TlsTransport<S> {
    /// Perform the client handshake on a socket whose SSL request was accepted.
    pub fn connect(socket: S, domain: &str, accept_invalid_certs: bool) -> Result<Self> {
        let connector = TlsConnector::builder()
            .danger_accept_invalid_certs(accept_invalid_certs)
            .danger_accept_invalid_hostnames(accept_invalid_certs)
            .build()?;

        let stream = match connector.connect(domain, socket) {
            Ok(stream) => stream,
            Err(HandshakeError::Failure(e)) => {
                tracing::error!("TLS handshake with {} failed: {}", domain, e);
                return Err(Error::Tls(e));
            }
            Err(HandshakeError::WouldBlock(_)) => {
                return Err(Error::Protocol(
                    "TLS handshake interrupted on a non-blocking socket".into(),
                ));
            }
        };

        Ok(Self {
            stream,
            buffer: GLOBAL_BUFFER_POOL.receive_buffer(),
        })
    }

    fn read_session(&mut self, block: bool, timeout: Option<Duration>) -> Result<ReadStatus> {
        let start = Instant::now();

        loop {
            let eof = match self.stream.read(&mut self.buffer[..]) {
                // Session closed or nothing decrypted yet
                Ok(0) => true,
                Ok(n) => {
                    return Ok(ReadStatus::Ok(Message::from_received(
                        self.buffer[..n].to_vec(),
                    )));
                }
                Err(e) if is_idle_error(e.kind()) => false,
                Err(e) => {
                    tracing::error!("TLS read failed: {}", e);
                    return Err(e.into());
                }
            };

            match idle_read(eof, block, timeout, start.elapsed()) {
                IdleRead::Zero => return Ok(ReadStatus::Zero),
                IdleRead::Retry(pause) => std::thread::sleep(pause),
            }
        }
    }
}

impl<S: Socket> Transport for TlsTransport<S> {
    fn write(&mut self, msg: &Message) -> Result<()> {
        write_chunked(&mut self.stream, msg.data())
    }

    fn read(&mut self, block: bool, timeout: Option<Duration>) -> Result<ReadStatus> {
        let timeout = timeout.filter(|t| !t.is_zero());
        let Some(limit) = timeout else {
            return self.read_session(block, None);
        };

        self.stream.get_ref().set_read_timeout(Some(limit))?;
        let result = self.read_session(block, timeout);
        restore_read_timeout(self.stream.get_ref(), result)
    }
}

//! Synchronous PostgreSQL connection.

use std::net::TcpStream;
use std::os::unix::net::UnixStream;
use std::time::{Duration, Instant};

use crate::buffer_pool::PooledBuffer;
use crate::error::{Error, Result};
use crate::opts::{Opts, SslMode};
use crate::protocol::backend::error::{log_copy_fail, log_notice_response};
use crate::protocol::backend::{
    ErrorResponse, RawMessage, ReadyForQuery, find_message, msg_type, split_frame,
};
use crate::protocol::frontend;
use crate::protocol::message::Message;
use crate::protocol::types::{Lsn, TransactionStatus};
use crate::response::{QueryResponse, SystemIdentity, extract_response};
use crate::state::{Action, BackendKey, StartupStateMachine};

use super::exchange::{
    ExchangeOptions, ResponseAssembler, ZERO_READ_BACKOFF, log_request, log_response,
    read_response_into,
};
use super::stream::Stream;
use super::transport::{BLOCKING_READ_TIMEOUT, ReadStatus, SocketTransport, Transport};

/// Deadline for connection startup when no query timeout is configured.
const STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

fn raw_message(msg: &Message) -> Result<RawMessage<'_>> {
    split_frame(msg.data())?
        .map(|(raw, _)| raw)
        .ok_or_else(|| Error::Protocol("incomplete frame".into()))
}

/// Read the single-byte answer to an SSL request.
fn read_ssl_response<T: Transport>(transport: &mut T, deadline: Instant) -> Result<u8> {
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(Error::Timeout);
        }
        match transport.read_with_timeout(remaining.min(BLOCKING_READ_TIMEOUT))? {
            ReadStatus::Ok(msg) if msg.length() == 1 => return Ok(msg.kind()),
            ReadStatus::Ok(msg) => {
                return Err(Error::Protocol(format!(
                    "SSL response: expected 1 byte, got {}",
                    msg.length()
                )));
            }
            ReadStatus::Zero => std::thread::sleep(ZERO_READ_BACKOFF),
        }
    }
}

/// Synchronous PostgreSQL connection.
///
/// Holds one transport, chosen at connect time, and the bytes received past the last
/// complete frame.
pub struct Conn {
    transport: Box<dyn Transport + Send>,
    pending: Vec<u8>,
    opts: Opts,
    backend_key: Option<BackendKey>,
    server_params: Vec<(String, String)>,
    transaction_status: TransactionStatus,
    is_broken: bool,
    in_copy: bool,
    terminated: bool,
}

impl Conn {
    /// Connect to a PostgreSQL server.
    pub fn connect<O: TryInto<Opts>>(opts: O) -> Result<Self>
    where
        Error: From<O::Error>,
    {
        let opts = opts.try_into()?;

        let stream = if let Some(socket) = &opts.socket {
            let path = Stream::unix_socket_path(socket, opts.port);
            tracing::debug!("connecting to {}", path);
            Stream::unix(UnixStream::connect(&path)?)
        } else {
            if opts.host.is_empty() {
                return Err(Error::InvalidUsage("host is empty".into()));
            }
            tracing::debug!("connecting to {}:{}", opts.host, opts.port);
            let tcp = TcpStream::connect((opts.host.as_str(), opts.port))?;
            tcp.set_nodelay(true)?;
            Stream::tcp(tcp)
        };

        Self::connect_with_stream(stream, opts)
    }

    /// Run SSL negotiation and startup on an already connected stream.
    pub fn connect_with_stream(stream: Stream, opts: Opts) -> Result<Self> {
        let deadline = Instant::now() + opts.query_timeout.unwrap_or(STARTUP_TIMEOUT);
        let mut machine = StartupStateMachine::new(opts.clone());
        let plain = SocketTransport::new(stream);

        let (transport, action) = match machine.start()? {
            Action::WriteAndReadByte(request) => {
                Self::negotiate_ssl(plain, &request, &mut machine, &opts, deadline)?
            }
            action => (Box::new(plain) as Box<dyn Transport + Send>, action),
        };

        Self::startup(transport, machine, action, opts, deadline)
    }

    /// Run startup over an arbitrary transport, without SSL negotiation.
    pub fn with_transport<T>(transport: T, opts: Opts) -> Result<Self>
    where
        T: Transport + Send + 'static,
    {
        if opts.ssl_mode == SslMode::Require {
            return Err(Error::InvalidUsage(
                "sslmode=require needs a socket connection".into(),
            ));
        }
        let deadline = Instant::now() + opts.query_timeout.unwrap_or(STARTUP_TIMEOUT);
        let mut machine = StartupStateMachine::new(Opts {
            ssl_mode: SslMode::Disable,
            ..opts.clone()
        });
        let action = machine.start()?;
        Self::startup(Box::new(transport), machine, action, opts, deadline)
    }

    fn negotiate_ssl(
        mut plain: SocketTransport<Stream>,
        request: &Message,
        machine: &mut StartupStateMachine,
        opts: &Opts,
        deadline: Instant,
    ) -> Result<(Box<dyn Transport + Send>, Action)> {
        plain.write(request)?;
        let response = read_ssl_response(&mut plain, deadline)?;

        match machine.process_ssl_response(response)? {
            Action::TlsHandshake => {
                #[cfg(feature = "tls")]
                {
                    let tls = super::tls::TlsTransport::connect(
                        plain.into_inner(),
                        &opts.host,
                        opts.accept_invalid_certs,
                    )?;
                    tracing::debug!("TLS established with {}", opts.host);
                    let action = machine.tls_handshake_complete()?;
                    Ok((Box::new(tls), action))
                }
                #[cfg(not(feature = "tls"))]
                {
                    let _ = opts;
                    Err(Error::Unsupported(
                        "TLS requested but the tls feature is not enabled".into(),
                    ))
                }
            }
            action => Ok((Box::new(plain), action)),
        }
    }

    fn startup(
        transport: Box<dyn Transport + Send>,
        mut machine: StartupStateMachine,
        mut action: Action,
        opts: Opts,
        deadline: Instant,
    ) -> Result<Self> {
        let mut conn = Self {
            transport,
            pending: Vec::new(),
            opts,
            backend_key: None,
            server_params: Vec::new(),
            transaction_status: TransactionStatus::Idle,
            is_broken: false,
            in_copy: false,
            terminated: false,
        };

        loop {
            match action {
                Action::WriteAndReadMessage(msg) => conn.transport.write(&msg)?,
                Action::ReadMessage => {}
                Action::Finished => break,
                other => {
                    return Err(Error::Protocol(format!(
                        "Unexpected action during startup: {:?}",
                        other
                    )));
                }
            }
            let msg = conn.read_frame(Some(deadline))?.ok_or(Error::Timeout)?;
            action = machine.step(raw_message(&msg)?)?;
        }

        conn.backend_key = machine.backend_key();
        conn.server_params = machine.server_params().to_vec();
        conn.transaction_status = machine.transaction_status();
        tracing::debug!(
            "connected as {} (backend pid {:?})",
            conn.opts.user,
            conn.backend_key.map(|k| k.process_id)
        );
        Ok(conn)
    }

    /// Next complete frame, reading as needed. `None` once `deadline` passes.
    fn read_frame(&mut self, deadline: Option<Instant>) -> Result<Option<Message>> {
        loop {
            if let Some((frame, _)) = split_frame(&self.pending)? {
                let msg = frame.to_message();
                self.pending.drain(..msg.length());
                return Ok(Some(msg));
            }

            let status = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Ok(None);
                    }
                    self.transport
                        .read_with_timeout(remaining.min(BLOCKING_READ_TIMEOUT))?
                }
                None => self.transport.read_blocking()?,
            };

            match status {
                ReadStatus::Ok(chunk) => self.pending.extend_from_slice(chunk.data()),
                ReadStatus::Zero => std::thread::sleep(ZERO_READ_BACKOFF),
            }
        }
    }

    fn check_usable(&self) -> Result<()> {
        if self.is_broken {
            return Err(Error::ConnectionBroken);
        }
        if self.in_copy {
            return Err(Error::InvalidUsage(
                "connection is streaming replication data".into(),
            ));
        }
        Ok(())
    }

    fn mark_broken_on<T>(&mut self, result: Result<T>) -> Result<T> {
        if result
            .as_ref()
            .is_err_and(|e| e.is_connection_broken() || matches!(e, Error::Timeout | Error::Cancelled))
        {
            self.is_broken = true;
        }
        result
    }

    /// Options for one exchange on this connection.
    pub fn exchange_options(&self) -> ExchangeOptions {
        ExchangeOptions {
            timeout: self.opts.query_timeout,
            cancel: None,
        }
    }

    /// Get the connection options.
    pub fn opts(&self) -> &Opts {
        &self.opts
    }

    /// Get the backend key data (for cancellation).
    pub fn backend_key(&self) -> Option<BackendKey> {
        self.backend_key
    }

    /// Get the backend process ID.
    pub fn connection_id(&self) -> u32 {
        self.backend_key.map_or(0, |k| k.process_id)
    }

    /// Get server parameters.
    pub fn server_params(&self) -> &[(String, String)] {
        &self.server_params
    }

    /// Get one server parameter.
    pub fn server_param(&self, name: &str) -> Option<&str> {
        self.server_params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Get the transaction status reported by the last `ReadyForQuery`.
    pub fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    /// Check if the connection is broken.
    pub fn is_broken(&self) -> bool {
        self.is_broken
    }

    /// Check if the connection is in replication streaming mode.
    pub fn is_in_copy(&self) -> bool {
        self.in_copy
    }

    /// Execute a simple query and return its complete response.
    pub fn query_execute(&mut self, sql: &str) -> Result<QueryResponse> {
        let msg = frontend::query(sql)?;
        self.execute(&msg)
    }

    /// Send a request and decode its complete response.
    pub fn execute(&mut self, msg: &Message) -> Result<QueryResponse> {
        let options = self.exchange_options();
        self.execute_with(msg, &options)
    }

    /// Send a request and decode its complete response, bounded by `options`.
    ///
    /// Only failures while the response is in flight break the connection. Once
    /// `ReadyForQuery` has arrived the stream is back on a frame boundary, so a response
    /// that fails to decode is reported without poisoning the connection.
    pub fn execute_with(
        &mut self,
        msg: &Message,
        options: &ExchangeOptions,
    ) -> Result<QueryResponse> {
        self.check_usable()?;
        let exchanged = self.exchange(msg, options);
        let response = self.mark_broken_on(exchanged)?;

        let result = extract_response(&response)?;
        result.debug();
        Ok(result)
    }

    /// Write `msg` and read its response through `ReadyForQuery`.
    fn exchange(&mut self, msg: &Message, options: &ExchangeOptions) -> Result<PooledBuffer> {
        log_request(msg);
        self.transport.write(msg)?;

        let mut assembler = ResponseAssembler::with_pending(&std::mem::take(&mut self.pending))?;
        read_response_into(&mut self.transport, &mut assembler, options)?;
        let (response, leftover) = assembler.into_parts();
        self.pending = leftover;
        log_response(&response);

        if let Some(ready) = find_message(msg_type::READY_FOR_QUERY, &response)? {
            let ready = ReadyForQuery::parse(ready.payload)?;
            self.transaction_status = ready.transaction_status().unwrap_or_default();
        }
        Ok(response)
    }

    /// Run `IDENTIFY_SYSTEM` on a replication connection.
    pub fn identify_system(&mut self) -> Result<SystemIdentity> {
        let response = self.execute(&frontend::identify_system()?)?;
        SystemIdentity::try_from(&response)
    }

    /// Run `TIMELINE_HISTORY`. The response holds the history file name and content.
    pub fn timeline_history(&mut self, timeline: u32) -> Result<QueryResponse> {
        self.execute(&frontend::timeline_history(timeline)?)
    }

    /// Run `READ_REPLICATION_SLOT`.
    pub fn read_replication_slot(&mut self, slot: &str) -> Result<QueryResponse> {
        self.execute(&frontend::read_replication_slot(slot)?)
    }

    /// Start physical replication and wait for the server to enter CopyBoth mode.
    pub fn start_replication(&mut self, slot: Option<&str>, lsn: Lsn, timeline: u32) -> Result<()> {
        self.check_usable()?;
        let result = self.start_replication_inner(slot, lsn, timeline);
        self.mark_broken_on(result)
    }

    fn start_replication_inner(
        &mut self,
        slot: Option<&str>,
        lsn: Lsn,
        timeline: u32,
    ) -> Result<()> {
        let msg = frontend::start_replication(slot, lsn, timeline)?;
        log_request(&msg);
        self.transport.write(&msg)?;

        let deadline = self.opts.query_timeout.map(|t| Instant::now() + t);
        loop {
            let msg = self.read_frame(deadline)?.ok_or(Error::Timeout)?;
            let raw = raw_message(&msg)?;
            match raw.type_byte {
                msg_type::COPY_BOTH_RESPONSE => {
                    tracing::debug!("replication started at {} on timeline {}", lsn, timeline);
                    self.in_copy = true;
                    return Ok(());
                }
                msg_type::ERROR_RESPONSE => {
                    let error = ErrorResponse::parse(raw.payload)?.into_error();
                    self.skip_to_ready(deadline)?;
                    return Err(error);
                }
                msg_type::NOTICE_RESPONSE => log_notice_response(raw.payload),
                msg_type::PARAMETER_STATUS => {}
                other => {
                    return Err(Error::Protocol(format!(
                        "Unexpected message '{}' while starting replication",
                        other.escape_ascii()
                    )));
                }
            }
        }
    }

    /// Discard frames through the next `ReadyForQuery`.
    fn skip_to_ready(&mut self, deadline: Option<Instant>) -> Result<()> {
        loop {
            let msg = self.read_frame(deadline)?.ok_or(Error::Timeout)?;
            if msg.kind() == msg_type::READY_FOR_QUERY {
                let ready = ReadyForQuery::parse(raw_message(&msg)?.payload)?;
                self.transaction_status = ready.transaction_status().unwrap_or_default();
                return Ok(());
            }
        }
    }

    /// Next CopyData payload of the replication stream.
    ///
    /// Returns `None` when nothing arrives within `timeout`, or when the server ends the
    /// stream with CopyDone. In the latter case the connection leaves streaming mode.
    pub fn next_copy_message(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        if self.is_broken {
            return Err(Error::ConnectionBroken);
        }
        if !self.in_copy {
            return Err(Error::InvalidUsage("connection is not streaming".into()));
        }
        let result = self.next_copy_message_inner(timeout);
        self.mark_broken_on(result)
    }

    fn next_copy_message_inner(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        let deadline = Instant::now() + timeout;
        loop {
            let Some(msg) = self.read_frame(Some(deadline))? else {
                return Ok(None);
            };
            let raw = raw_message(&msg)?;
            match raw.type_byte {
                msg_type::COPY_DATA => return Ok(Some(raw.payload.to_vec())),
                msg_type::COPY_DONE => {
                    tracing::debug!("server ended the replication stream");
                    self.in_copy = false;
                    self.transport.write(&frontend::copy_done()?)?;
                    let deadline = self.opts.query_timeout.map(|t| Instant::now() + t);
                    self.skip_to_ready(deadline)?;
                    return Ok(None);
                }
                msg_type::ERROR_RESPONSE => {
                    self.in_copy = false;
                    let error = ErrorResponse::parse(raw.payload)?.into_error();
                    self.is_broken = true;
                    return Err(error);
                }
                msg_type::COPY_FAIL => log_copy_fail(raw.payload),
                msg_type::NOTICE_RESPONSE => log_notice_response(raw.payload),
                msg_type::PARAMETER_STATUS => {}
                other => {
                    return Err(Error::Protocol(format!(
                        "Unexpected message '{}' in replication stream",
                        other.escape_ascii()
                    )));
                }
            }
        }
    }

    /// Report WAL positions to the server (standby status update).
    pub fn send_standby_status(&mut self, received: Lsn, flushed: Lsn, applied: Lsn) -> Result<()> {
        let msg = frontend::standby_status_update(received, flushed, applied)?;
        self.send_copy_message(&msg)
    }

    /// Send raw CopyData.
    pub fn send_copy_data(&mut self, data: &[u8]) -> Result<()> {
        let msg = frontend::copy_data(data)?;
        self.send_copy_message(&msg)
    }

    fn send_copy_message(&mut self, msg: &Message) -> Result<()> {
        if self.is_broken {
            return Err(Error::ConnectionBroken);
        }
        if !self.in_copy {
            return Err(Error::InvalidUsage("connection is not streaming".into()));
        }
        let result = self.transport.write(msg);
        self.mark_broken_on(result)
    }

    /// Close the connection gracefully.
    pub fn close(mut self) -> Result<()> {
        self.terminated = true;
        self.transport.write(&frontend::terminate()?)
    }
}

impl Drop for Conn {
    fn drop(&mut self) {
        if self.terminated || self.is_broken {
            return;
        }
        // Best effort
        if let Ok(msg) = frontend::terminate() {
            let _ = self.transport.write(&msg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::backend::outbound;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Transport replaying scripted chunks and recording writes.
    #[derive(Clone, Default)]
    struct Script {
        reads: Arc<Mutex<VecDeque<Vec<u8>>>>,
        written: Arc<Mutex<Vec<Message>>>,
    }

    impl Script {
        fn push(&self, chunk: Vec<u8>) {
            self.reads.lock().unwrap().push_back(chunk);
        }

        fn written_kinds(&self) -> Vec<u8> {
            self.written.lock().unwrap().iter().map(Message::kind).collect()
        }
    }

    impl Transport for Script {
        fn write(&mut self, msg: &Message) -> Result<()> {
            self.written.lock().unwrap().push(msg.clone());
            Ok(())
        }

        fn read(&mut self, _block: bool, _timeout: Option<Duration>) -> Result<ReadStatus> {
            Ok(match self.reads.lock().unwrap().pop_front() {
                Some(chunk) => ReadStatus::Ok(Message::from_received(chunk)),
                None => ReadStatus::Zero,
            })
        }
    }

    fn frame(kind: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![kind];
        out.extend_from_slice(&(payload.len() as i32 + 4).to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    fn row_description_payload(name: &str) -> Vec<u8> {
        let mut out = 1_i16.to_be_bytes().to_vec();
        out.extend_from_slice(name.as_bytes());
        out.push(0);
        out.extend_from_slice(&[0; 6]);
        out.extend_from_slice(&25_u32.to_be_bytes());
        out.extend_from_slice(&(-1_i16).to_be_bytes());
        out.extend_from_slice(&(-1_i32).to_be_bytes());
        out.extend_from_slice(&0_i16.to_be_bytes());
        out
    }

    fn connected(script: &Script, opts: Opts) -> Conn {
        let mut startup = outbound::auth_success().unwrap().into_data();
        startup.extend(frame(b'S', b"server_version\x0017.2\0"));
        startup.extend(frame(b'K', &[0, 0, 0, 42, 0, 0, 0, 7]));
        startup.extend(frame(b'Z', b"I"));
        script.push(startup);
        Conn::with_transport(script.clone(), opts).unwrap()
    }

    fn opts() -> Opts {
        Opts {
            user: "pgvictoria".into(),
            replication: true,
            query_timeout: Some(Duration::from_millis(200)),
            ..Opts::default()
        }
    }

    #[test]
    fn startup_then_query() {
        let script = Script::default();
        let mut conn = connected(&script, opts());
        assert_eq!(conn.connection_id(), 42);
        assert_eq!(conn.server_param("server_version"), Some("17.2"));

        let mut response = frame(b'C', b"CHECKPOINT\0");
        response.extend(frame(b'Z', b"T"));
        script.push(response);

        let result = conn.query_execute("CHECKPOINT;").unwrap();
        assert!(result.is_command_complete());
        assert_eq!(conn.transaction_status(), TransactionStatus::InTransaction);
        assert_eq!(script.written_kinds(), [0, b'Q']);
    }

    #[test]
    fn server_error_keeps_connection() {
        let script = Script::default();
        let mut conn = connected(&script, opts());

        let mut response = frame(b'E', b"SERROR\0C42P01\0Mrelation does not exist\0\0");
        response.extend(frame(b'Z', b"I"));
        script.push(response);

        let err = conn.query_execute("SELECT * FROM nope;").unwrap_err();
        assert_eq!(err.sqlstate(), Some("42P01"));
        assert!(!conn.is_broken());
    }

    #[test]
    fn undecodable_response_keeps_connection() {
        let script = Script::default();
        let mut conn = connected(&script, opts());

        // EmptyQueryResponse, then the reply to the next query already queued
        let mut empty = frame(b'I', b"");
        empty.extend(frame(b'Z', b"I"));
        script.push(empty);
        let mut checkpoint = frame(b'C', b"CHECKPOINT\0");
        checkpoint.extend(frame(b'Z', b"I"));
        script.push(checkpoint);

        assert!(matches!(conn.query_execute(""), Err(Error::Protocol(_))));
        assert!(!conn.is_broken());

        let result = conn.query_execute("CHECKPOINT;").unwrap();
        assert_eq!(result.tuples()[0].get(0), Some("CHECKPOINT"));
    }

    #[test]
    fn mismatched_row_keeps_connection() {
        let script = Script::default();
        let mut conn = connected(&script, opts());

        let mut response = frame(b'T', &row_description_payload("n"));
        response.extend(frame(b'D', &[0, 2, 0, 0, 0, 1, b'1', 0xff, 0xff, 0xff, 0xff]));
        response.extend(frame(b'C', b"SELECT 1\0"));
        response.extend(frame(b'Z', b"I"));
        // Trailing bytes of the next reply stay pending
        response.extend(frame(b'C', b"CHECKPOINT\0"));
        script.push(response);
        script.push(frame(b'Z', b"I"));

        assert!(conn.query_execute("SELECT 1;").is_err());
        assert!(!conn.is_broken());
        assert!(conn.query_execute("CHECKPOINT;").unwrap().is_command_complete());
    }

    #[test]
    fn timeout_breaks_connection() {
        let script = Script::default();
        let mut conn = connected(&script, opts());
        script.push(frame(b'C', b"SELECT 1\0"));

        assert!(matches!(conn.query_execute("SELECT 1;"), Err(Error::Timeout)));
        assert!(conn.is_broken());
        assert!(matches!(
            conn.query_execute("SELECT 1;"),
            Err(Error::ConnectionBroken)
        ));
    }

    #[test]
    fn replication_stream() {
        let script = Script::default();
        let mut conn = connected(&script, opts());

        // CopyBothResponse and the first CopyData arrive in one chunk
        let mut chunk = frame(b'W', &[0, 0, 0]);
        chunk.extend(frame(b'd', b"w-wal"));
        script.push(chunk);

        conn.start_replication(Some("slot"), Lsn(0x100_0000), 1).unwrap();
        assert!(conn.is_in_copy());
        assert!(matches!(conn.query_execute("SELECT 1;"), Err(Error::InvalidUsage(_))));

        assert_eq!(
            conn.next_copy_message(Duration::from_millis(50)).unwrap(),
            Some(b"w-wal".to_vec())
        );
        assert_eq!(conn.next_copy_message(Duration::from_millis(20)).unwrap(), None);
        assert!(conn.is_in_copy());

        conn.send_standby_status(Lsn(1), Lsn(1), Lsn(0)).unwrap();

        let mut end = frame(b'c', b"");
        end.extend(frame(b'C', b"START_STREAMING\0"));
        end.extend(frame(b'Z', b"I"));
        script.push(end);
        assert_eq!(conn.next_copy_message(Duration::from_millis(50)).unwrap(), None);
        assert!(!conn.is_in_copy());

        assert_eq!(script.written_kinds(), [0, b'Q', b'd', b'c']);
    }

    #[test]
    fn start_replication_error() {
        let script = Script::default();
        let mut conn = connected(&script, opts());

        let mut response = frame(
            b'E',
            b"SERROR\0C42704\0Mreplication slot \"x\" does not exist\0\0",
        );
        response.extend(frame(b'Z', b"I"));
        script.push(response);

        let err = conn.start_replication(Some("x"), Lsn::ZERO, 1).unwrap_err();
        assert_eq!(err.sqlstate(), Some("42704"));
        assert!(!conn.is_in_copy());
        assert!(!conn.is_broken());
    }

    #[test]
    fn require_ssl_needs_socket() {
        let opts = Opts {
            ssl_mode: SslMode::Require,
            ..opts()
        };
        assert!(matches!(
            Conn::with_transport(Script::default(), opts),
            Err(Error::InvalidUsage(_))
        ));
    }

    #[test]
    fn close_sends_terminate_once() {
        let script = Script::default();
        let conn = connected(&script, opts());
        conn.close().unwrap();
        assert_eq!(script.written_kinds(), [0, b'X']);
    }
}

//! Request/response exchange: write a request, accumulate chunks up to `ReadyForQuery`,
//! decode the result.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::buffer_pool::{GLOBAL_BUFFER_POOL, PooledBuffer};
use crate::error::{Error, Result};
use crate::protocol::backend::{msg_type, split_frame};
use crate::protocol::message::{Message, log_mem};
use crate::response::{QueryResponse, extract_response};

use super::transport::{BLOCKING_READ_TIMEOUT, ReadStatus, Transport};

/// Pause after a read that produced no bytes.
pub(crate) const ZERO_READ_BACKOFF: Duration = Duration::from_millis(1);

/// Shared flag that aborts an exchange between two reads.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Every clone observes it.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Bounds on one exchange.
#[derive(Debug, Clone, Default)]
pub struct ExchangeOptions {
    /// Overall deadline for receiving the complete response.
    pub timeout: Option<Duration>,
    /// Checked before every read.
    pub cancel: Option<CancelToken>,
}

impl ExchangeOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }
}

/// Accumulates received chunks until a complete `ReadyForQuery` frame is present.
///
/// Frames are scanned incrementally: each push only walks bytes not yet covered by a
/// complete frame.
#[derive(Debug)]
pub struct ResponseAssembler {
    buf: PooledBuffer,
    /// Offset of the first frame not yet seen complete.
    scanned: usize,
    /// End of the `ReadyForQuery` frame, once seen.
    end: Option<usize>,
}

impl Default for ResponseAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseAssembler {
    pub fn new() -> Self {
        Self {
            buf: GLOBAL_BUFFER_POOL.accumulation_buffer(),
            scanned: 0,
            end: None,
        }
    }

    /// Start from bytes left over by a previous exchange.
    pub fn with_pending(pending: &[u8]) -> Result<Self> {
        let mut assembler = Self::new();
        if !pending.is_empty() {
            assembler.push(pending)?;
        }
        Ok(assembler)
    }

    /// Append a chunk. Returns true once the response is complete.
    pub fn push(&mut self, chunk: &[u8]) -> Result<bool> {
        if self.end.is_some() {
            self.buf.extend_from_slice(chunk);
            return Ok(true);
        }

        self.buf.extend_from_slice(chunk);
        while let Some((frame, _)) = split_frame(&self.buf[self.scanned..])? {
            self.scanned += frame.frame.len();
            if frame.type_byte == msg_type::READY_FOR_QUERY {
                self.end = Some(self.scanned);
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn is_complete(&self) -> bool {
        self.end.is_some()
    }

    /// Accumulated bytes, including any received past `ReadyForQuery`.
    pub fn data(&self) -> &[u8] {
        &self.buf
    }

    /// Split into the response (through `ReadyForQuery`) and the bytes received after it.
    pub fn into_parts(mut self) -> (PooledBuffer, Vec<u8>) {
        let end = self.end.unwrap_or(self.buf.len());
        let leftover = self.buf.split_off(end);
        (self.buf, leftover)
    }
}

/// Read chunks into `assembler` until it holds a complete response.
pub fn read_response_into<T: Transport + ?Sized>(
    transport: &mut T,
    assembler: &mut ResponseAssembler,
    options: &ExchangeOptions,
) -> Result<()> {
    let deadline = options.timeout.map(|t| Instant::now() + t);

    while !assembler.is_complete() {
        if options.is_cancelled() {
            tracing::debug!("exchange cancelled after {} bytes", assembler.data().len());
            return Err(Error::Cancelled);
        }

        let status = match deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    tracing::debug!("exchange timed out after {} bytes", assembler.data().len());
                    return Err(Error::Timeout);
                }
                transport.read_with_timeout(remaining.min(BLOCKING_READ_TIMEOUT))?
            }
            None => transport.read_blocking()?,
        };

        match status {
            ReadStatus::Ok(msg) => {
                assembler.push(msg.data())?;
            }
            ReadStatus::Zero => std::thread::sleep(ZERO_READ_BACKOFF),
        }
    }
    Ok(())
}

/// Read one complete response, up to and including `ReadyForQuery`.
pub fn read_response<T: Transport + ?Sized>(
    transport: &mut T,
    options: &ExchangeOptions,
) -> Result<PooledBuffer> {
    let mut assembler = ResponseAssembler::new();
    read_response_into(transport, &mut assembler, options)?;
    let (response, leftover) = assembler.into_parts();
    if !leftover.is_empty() {
        tracing::debug!("discarding {} bytes after ReadyForQuery", leftover.len());
    }
    Ok(response)
}

pub(crate) fn log_request(msg: &Message) {
    if tracing::enabled!(tracing::Level::TRACE) {
        tracing::trace!("Query request -- BEGIN");
        msg.log();
        tracing::trace!("Query request -- END");
    }
}

pub(crate) fn log_response(data: &[u8]) {
    if tracing::enabled!(tracing::Level::TRACE) {
        tracing::trace!("Query response -- BEGIN");
        log_mem(data);
        tracing::trace!("Query response -- END");
    }
}

/// Send `msg` and decode the server's complete response.
pub fn query_execute<T: Transport + ?Sized>(
    transport: &mut T,
    msg: &Message,
    options: &ExchangeOptions,
) -> Result<QueryResponse> {
    log_request(msg);
    transport.write(msg)?;

    let response = read_response(transport, options)?;
    log_response(&response);

    let result = extract_response(&response)?;
    result.debug();
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct Scripted {
        reads: VecDeque<Result<ReadStatus>>,
        written: Vec<u8>,
    }

    impl Scripted {
        fn new(reads: Vec<Result<ReadStatus>>) -> Self {
            Self {
                reads: reads.into(),
                written: Vec::new(),
            }
        }
    }

    impl Transport for Scripted {
        fn write(&mut self, msg: &Message) -> Result<()> {
            self.written.extend_from_slice(msg.data());
            Ok(())
        }

        fn read(&mut self, _block: bool, _timeout: Option<Duration>) -> Result<ReadStatus> {
            self.reads.pop_front().unwrap_or(Ok(ReadStatus::Zero))
        }
    }

    fn chunk(bytes: &[u8]) -> Result<ReadStatus> {
        Ok(ReadStatus::Ok(Message::from_received(bytes.to_vec())))
    }

    const COMPLETE: &[u8] = b"C\0\0\0\x0fCHECKPOINT\0Z\0\0\0\x05I";

    #[test]
    fn assembler_waits_for_ready_for_query() {
        let mut assembler = ResponseAssembler::new();
        assert!(!assembler.push(&COMPLETE[..3]).unwrap());
        assert!(!assembler.push(&COMPLETE[3..15]).unwrap());
        assert_eq!(assembler.scanned, 0);
        assert!(!assembler.push(&COMPLETE[15..19]).unwrap());
        assert_eq!(assembler.scanned, 16);
        assert!(assembler.push(&COMPLETE[19..]).unwrap());
        assert_eq!(assembler.data(), COMPLETE);
    }

    #[test]
    fn assembler_keeps_bytes_after_ready_for_query() {
        let mut bytes = COMPLETE.to_vec();
        bytes.extend_from_slice(b"d\0\0");
        let mut assembler = ResponseAssembler::new();
        assert!(assembler.push(&bytes).unwrap());

        let (response, leftover) = assembler.into_parts();
        assert_eq!(&response[..], COMPLETE);
        assert_eq!(leftover, b"d\0\0");
    }

    #[test]
    fn assembler_rejects_bad_length() {
        let mut assembler = ResponseAssembler::new();
        assert!(matches!(
            assembler.push(b"C\0\0\0\x02"),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn zero_reads_are_retried() {
        let mut transport = Scripted::new(vec![
            Ok(ReadStatus::Zero),
            chunk(&COMPLETE[..7]),
            Ok(ReadStatus::Zero),
            chunk(&COMPLETE[7..]),
        ]);
        let msg = crate::protocol::frontend::query("CHECKPOINT;").unwrap();
        let response = query_execute(&mut transport, &msg, &ExchangeOptions::default()).unwrap();

        assert!(response.is_command_complete());
        assert_eq!(response.get_data(0), Some("CHECKPOINT"));
        assert_eq!(transport.written, msg.data());
    }

    #[test]
    fn transport_failure_aborts() {
        let mut transport = Scripted::new(vec![
            chunk(&COMPLETE[..7]),
            Err(Error::Io(std::io::ErrorKind::ConnectionReset.into())),
        ]);
        let result = read_response(&mut transport, &ExchangeOptions::default());
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn deadline_bounds_the_exchange() {
        let mut transport = Scripted::new(vec![chunk(&COMPLETE[..7])]);
        let options = ExchangeOptions::default().with_timeout(Duration::from_millis(20));
        let result = read_response(&mut transport, &options);
        assert!(matches!(result, Err(Error::Timeout)));
    }

    #[test]
    fn cancellation_is_observed() {
        let cancel = CancelToken::new();
        let options = ExchangeOptions::default().with_cancel(cancel.clone());
        cancel.cancel();

        let mut transport = Scripted::new(vec![chunk(COMPLETE)]);
        let result = read_response(&mut transport, &options);
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(transport.reads.len(), 1);
    }
}

//! Synchronous transports and connection.

mod conn;
pub mod exchange;
mod stream;
#[cfg(feature = "tls")]
mod tls;
pub mod transport;

pub use conn::Conn;
pub use exchange::{
    CancelToken, ExchangeOptions, ResponseAssembler, query_execute, read_response,
    read_response_into,
};
pub use stream::Stream;
#[cfg(feature = "tls")]
pub use tls::TlsTransport;
pub use transport::{BLOCKING_READ_TIMEOUT, ReadStatus, Socket, SocketTransport, Transport};

//! PostgreSQL wire-protocol transport and protocol engine for the pgvictoria agent.
//!
//! # Features
//!
//! - **Exact framing**: every outgoing message is built with its size computed up front
//! - **Chunk reassembly**: responses are accumulated until `ReadyForQuery` regardless of how
//!   the bytes were split by the transport
//! - **Sans-I/O startup**: authentication (cleartext, MD5, SCRAM-SHA-256) is a state machine
//! - **Physical replication**: `IDENTIFY_SYSTEM`, `START_REPLICATION`, standby status updates
//! - **Server side**: the replies a proxy front end sends to its own clients
//!
//! # Example
//!
//! ```no_run
//! use pgvictoria::sync::Conn;
//! use pgvictoria::Opts;
//!
//! fn main() -> pgvictoria::Result<()> {
//!     let opts = Opts {
//!         host: "localhost".into(),
//!         user: "postgres".into(),
//!         password: Some("secret".into()),
//!         ..Default::default()
//!     };
//!
//!     let mut conn = Conn::connect(opts)?;
//!
//!     let response = conn.query_execute("SELECT pg_is_in_recovery();")?;
//!     println!("in recovery: {:?}", response.get_data(0));
//!
//!     conn.close()?;
//!     Ok(())
//! }
//! ```

pub mod buffer_pool;
pub mod error;
pub mod opts;
pub mod protocol;
pub mod response;
pub mod state;
pub mod sync;

pub use error::{Error, ErrorFields, Result};
pub use opts::{Opts, SslMode};
pub use protocol::message::Message;
pub use protocol::types::{Lsn, Oid, TransactionStatus};
pub use response::{QueryResponse, SystemIdentity, Tuple, extract_response};

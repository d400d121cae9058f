//! PostgreSQL frontend (client → server) messages.
//!
//! Every builder computes the exact size of its message, then writes it through a
//! [`MessageWriter`](crate::protocol::codec::MessageWriter).

pub mod auth;
pub mod copy;
pub mod replication;
pub mod simple;
pub mod startup;

pub use auth::{ScramClient, md5_password, password, sasl_initial_response, sasl_response};
pub use copy::{copy_data, copy_done, copy_fail};
pub use replication::{
    identify_system, read_replication_slot, standby_status_update, start_replication,
    timeline_history,
};
pub use simple::query;
pub use startup::{ssl_request, startup, terminate};

/// Frontend message type bytes.
pub mod msg_type {
    /// Password/SASL response (all auth response types use 'p')
    pub const PASSWORD: u8 = b'p';
    /// Query (simple query protocol)
    pub const QUERY: u8 = b'Q';
    /// CopyData
    pub const COPY_DATA: u8 = b'd';
    /// CopyDone
    pub const COPY_DONE: u8 = b'c';
    /// CopyFail
    pub const COPY_FAIL: u8 = b'f';
    /// Terminate
    pub const TERMINATE: u8 = b'X';
}

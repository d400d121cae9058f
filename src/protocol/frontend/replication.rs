//! Replication protocol commands and feedback messages.
//!
//! Replication commands travel as simple Query messages on a connection opened with
//! `replication=1`; standby feedback travels inside CopyData once streaming has begun.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::Result;
use crate::protocol::codec::MessageWriter;
use crate::protocol::message::Message;
use crate::protocol::types::Lsn;

/// Microseconds between the Unix epoch and the PostgreSQL epoch (2000-01-01).
const PG_EPOCH_OFFSET_MICROS: i64 = 946_684_800_000_000;

/// Sub-tag of a standby status update inside CopyData.
const STANDBY_STATUS_UPDATE: u8 = b'r';

/// Build an `IDENTIFY_SYSTEM;` command.
pub fn identify_system() -> Result<Message> {
    super::query("IDENTIFY_SYSTEM;")
}

/// Build a `TIMELINE_HISTORY <timeline>;` command.
pub fn timeline_history(timeline: u32) -> Result<Message> {
    super::query(&format!("TIMELINE_HISTORY {timeline};"))
}

/// Build a `READ_REPLICATION_SLOT <slot>;` command.
pub fn read_replication_slot(slot: &str) -> Result<Message> {
    super::query(&format!("READ_REPLICATION_SLOT {slot};"))
}

/// Build a physical `START_REPLICATION` command.
///
/// An empty slot name is treated as no slot. [`Lsn::ZERO`] renders as `0/0`, which lets
/// the server pick the start position.
pub fn start_replication(slot: Option<&str>, lsn: Lsn, timeline: u32) -> Result<Message> {
    let sql = match slot.filter(|s| !s.is_empty()) {
        Some(slot) => format!("START_REPLICATION SLOT {slot} PHYSICAL {lsn} TIMELINE {timeline};"),
        None => format!("START_REPLICATION PHYSICAL {lsn} TIMELINE {timeline};"),
    };
    super::query(&sql)
}

/// Build a standby status update stamped with the current time.
pub fn standby_status_update(received: Lsn, flushed: Lsn, applied: Lsn) -> Result<Message> {
    standby_status_update_at(received, flushed, applied, pg_epoch_micros())
}

/// Build a standby status update with an explicit timestamp (µs since 2000-01-01).
///
/// Layout inside CopyData: `r`, three int64 positions, int64 clock, reply-requested byte.
pub fn standby_status_update_at(
    received: Lsn,
    flushed: Lsn,
    applied: Lsn,
    timestamp: i64,
) -> Result<Message> {
    let size = 1 + 4 + 1 + 8 + 8 + 8 + 8 + 1;
    let mut msg = MessageWriter::tagged(super::msg_type::COPY_DATA, size)?;
    msg.write_u8(STANDBY_STATUS_UPDATE)?;
    msg.write_u64(received.get())?;
    msg.write_u64(flushed.get())?;
    msg.write_u64(applied.get())?;
    msg.write_i64(timestamp)?;
    msg.write_u8(0)?;
    msg.finish()
}

/// Current time in microseconds since the PostgreSQL epoch.
pub fn pg_epoch_micros() -> i64 {
    let unix_micros = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_micros()).unwrap_or(i64::MAX))
        .unwrap_or(0);
    unix_micros - PG_EPOCH_OFFSET_MICROS
}

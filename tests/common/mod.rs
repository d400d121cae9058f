//! Shared helpers: frame builders and a scripted transport.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::time::Duration;

use pgvictoria::Result;
use pgvictoria::protocol::Message;
use pgvictoria::sync::{ReadStatus, Transport};

pub fn frame(kind: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![kind];
    out.extend_from_slice(&(payload.len() as i32 + 4).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

pub fn row_description(names: &[&str]) -> Vec<u8> {
    let mut payload = (names.len() as i16).to_be_bytes().to_vec();
    for name in names {
        payload.extend_from_slice(name.as_bytes());
        payload.push(0);
        // table oid, column, type oid (int4), size, modifier, format
        payload.extend_from_slice(&0_i32.to_be_bytes());
        payload.extend_from_slice(&0_i16.to_be_bytes());
        payload.extend_from_slice(&23_i32.to_be_bytes());
        payload.extend_from_slice(&4_i16.to_be_bytes());
        payload.extend_from_slice(&(-1_i32).to_be_bytes());
        payload.extend_from_slice(&0_i16.to_be_bytes());
    }
    frame(b'T', &payload)
}

pub fn data_row(values: &[Option<&str>]) -> Vec<u8> {
    let mut payload = (values.len() as i16).to_be_bytes().to_vec();
    for value in values {
        match value {
            Some(v) => {
                payload.extend_from_slice(&(v.len() as i32).to_be_bytes());
                payload.extend_from_slice(v.as_bytes());
            }
            None => payload.extend_from_slice(&(-1_i32).to_be_bytes()),
        }
    }
    frame(b'D', &payload)
}

/// The server's complete answer to `SELECT 1;`.
pub fn select_one_response() -> Vec<u8> {
    let mut buf = row_description(&["?column?"]);
    buf.extend(data_row(&[Some("1")]));
    buf.extend(frame(b'C', b"SELECT 1\0"));
    buf.extend(frame(b'Z', b"I"));
    buf
}

/// Transport that replays a fixed list of read results and records writes.
pub struct ScriptedTransport {
    reads: VecDeque<ReadStatus>,
    pub written: Vec<u8>,
}

impl ScriptedTransport {
    pub fn new(chunks: Vec<Vec<u8>>) -> Self {
        Self {
            reads: chunks
                .into_iter()
                .map(|c| ReadStatus::Ok(Message::from_received(c)))
                .collect(),
            written: Vec::new(),
        }
    }

    /// Insert a `Zero` read before every chunk.
    pub fn with_zero_reads(mut self) -> Self {
        self.reads = self
            .reads
            .into_iter()
            .flat_map(|r| [ReadStatus::Zero, r])
            .collect();
        self
    }

    pub fn remaining(&self) -> usize {
        self.reads.len()
    }
}

impl Transport for ScriptedTransport {
    fn write(&mut self, msg: &Message) -> Result<()> {
        self.written.extend_from_slice(msg.data());
        Ok(())
    }

    fn read(&mut self, _block: bool, _timeout: Option<Duration>) -> Result<ReadStatus> {
        Ok(self.reads.pop_front().unwrap_or(ReadStatus::Zero))
    }
}

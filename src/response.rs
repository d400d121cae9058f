//! Structured results of a query or replication-command exchange.

use crate::error::{Error, Result};
use crate::protocol::backend::error::log_notice_response;
use crate::protocol::backend::{
    CommandComplete, DataRow, ErrorResponse, RowDescription, complete_frames, find_message,
    has_message, msg_type,
};
use crate::protocol::types::Lsn;

/// One row of a [`QueryResponse`]. `None` is SQL NULL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tuple {
    data: Vec<Option<String>>,
}

impl Tuple {
    /// Create a tuple from its column values.
    pub fn new(data: Vec<Option<String>>) -> Self {
        Self { data }
    }

    /// Value of a column; `None` for NULL or an out-of-range index.
    pub fn get(&self, column: usize) -> Option<&str> {
        self.data.get(column).and_then(|v| v.as_deref())
    }

    /// Returns true if the column holds SQL NULL.
    pub fn is_null(&self, column: usize) -> bool {
        matches!(self.data.get(column), Some(None))
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the tuple has no columns.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// All column values.
    pub fn values(&self) -> &[Option<String>] {
        &self.data
    }
}

/// Result of one request/response exchange.
///
/// Either a row set (`RowDescription` + `DataRow`s) or, for statements returning no rows,
/// the command tag as the single value of a one-column, one-row response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryResponse {
    number_of_columns: usize,
    names: Vec<String>,
    tuples: Vec<Tuple>,
    is_command_complete: bool,
}

impl QueryResponse {
    /// Number of columns of every tuple.
    pub fn number_of_columns(&self) -> usize {
        self.number_of_columns
    }

    /// Column names. Empty for a command-complete response.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Rows in the order the server sent them.
    pub fn tuples(&self) -> &[Tuple] {
        &self.tuples
    }

    /// Take ownership of the rows.
    pub fn into_tuples(self) -> Vec<Tuple> {
        self.tuples
    }

    /// True when the response carries a command tag rather than a row set.
    pub fn is_command_complete(&self) -> bool {
        self.is_command_complete
    }

    /// Value of `column` in the first tuple.
    pub fn get_data(&self, column: usize) -> Option<&str> {
        if column >= self.number_of_columns {
            return None;
        }
        self.tuples.first().and_then(|t| t.get(column))
    }

    /// Index of the column with the given name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Dump the response at trace level.
    pub fn debug(&self) {
        if !tracing::enabled!(tracing::Level::TRACE) {
            return;
        }
        tracing::trace!("Query Response");
        tracing::trace!("Columns: {}", self.number_of_columns);
        for name in &self.names {
            tracing::trace!("Column: {}", name);
        }
        for (i, tuple) in self.tuples.iter().enumerate() {
            for value in tuple.values() {
                tracing::trace!("Tuple {}: {}", i, value.as_deref().unwrap_or("<NULL>"));
            }
        }
        tracing::trace!("Tuples: {}", self.tuples.len());
    }
}

/// Decode a fully accumulated response buffer.
///
/// An `ErrorResponse` anywhere in the buffer fails the exchange with the server's fields.
/// Otherwise a `RowDescription` yields a row set built from every `DataRow`, and a lone
/// `CommandComplete` yields its tag. Anything else is a protocol error.
pub fn extract_response(buf: &[u8]) -> Result<QueryResponse> {
    let frames = complete_frames(buf)?;

    for frame in frames.iter().filter(|f| f.is_notice()) {
        log_notice_response(frame.payload);
    }

    if has_message(msg_type::ERROR_RESPONSE, buf)? {
        let frame = find_message(msg_type::ERROR_RESPONSE, buf)?
            .ok_or_else(|| Error::Protocol("ErrorResponse vanished".into()))?;
        return Err(ErrorResponse::parse(frame.payload)?.into_error());
    }

    if has_message(msg_type::ROW_DESCRIPTION, buf)? {
        let frame = find_message(msg_type::ROW_DESCRIPTION, buf)?
            .ok_or_else(|| Error::Protocol("RowDescription vanished".into()))?;
        let description = RowDescription::parse(frame.payload)?;
        let number_of_columns = description.len();

        let mut tuples = Vec::new();
        for frame in frames.iter().filter(|f| f.type_byte == msg_type::DATA_ROW) {
            let row = DataRow::parse(frame.payload)?;
            if row.len() != number_of_columns {
                return Err(Error::Protocol(format!(
                    "DataRow has {} columns, RowDescription has {}",
                    row.len(),
                    number_of_columns
                )));
            }
            tuples.push(Tuple::new(row.to_text()?));
        }

        return Ok(QueryResponse {
            number_of_columns,
            names: description.names(),
            tuples,
            is_command_complete: false,
        });
    }

    if has_message(msg_type::COMMAND_COMPLETE, buf)? {
        let frame = find_message(msg_type::COMMAND_COMPLETE, buf)?
            .ok_or_else(|| Error::Protocol("CommandComplete vanished".into()))?;
        let complete = CommandComplete::parse(frame.payload)?;
        return Ok(QueryResponse {
            number_of_columns: 1,
            names: Vec::new(),
            tuples: vec![Tuple::new(vec![Some(complete.tag.to_string())])],
            is_command_complete: true,
        });
    }

    Err(Error::Protocol(
        "response holds neither RowDescription nor CommandComplete".into(),
    ))
}

/// Answer to `IDENTIFY_SYSTEM`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemIdentity {
    /// Unique cluster identifier
    pub system_id: String,
    /// Current timeline
    pub timeline: u32,
    /// Current WAL flush location
    pub xlogpos: Lsn,
    /// Database connected to, if any
    pub dbname: Option<String>,
}

fn identity_column<'a>(response: &'a QueryResponse, name: &str) -> Result<Option<&'a str>> {
    let index = response
        .column_index(name)
        .ok_or_else(|| Error::Protocol(format!("IDENTIFY_SYSTEM: missing column {name}")))?;
    Ok(response.get_data(index))
}

fn required_identity_column<'a>(response: &'a QueryResponse, name: &str) -> Result<&'a str> {
    identity_column(response, name)?
        .ok_or_else(|| Error::Protocol(format!("IDENTIFY_SYSTEM: {name} is NULL")))
}

impl TryFrom<&QueryResponse> for SystemIdentity {
    type Error = Error;

    fn try_from(response: &QueryResponse) -> Result<Self> {
        let timeline = required_identity_column(response, "timeline")?;
        Ok(Self {
            system_id: required_identity_column(response, "systemid")?.to_string(),
            timeline: timeline
                .parse()
                .map_err(|_| Error::Protocol(format!("IDENTIFY_SYSTEM: bad timeline {timeline}")))?,
            xlogpos: required_identity_column(response, "xlogpos")?
                .parse()
                .map_err(|e| Error::Protocol(format!("IDENTIFY_SYSTEM: {e}")))?,
            dbname: identity_column(response, "dbname")?.map(str::to_string),
        })
    }
}

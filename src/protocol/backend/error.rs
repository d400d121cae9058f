//! Error and notice response messages.
//!
//! Both messages carry a list of `field_type(1) + text NUL` entries closed by a zero
//! field type.

use crate::error::{Error, ErrorFields, Result};
use crate::protocol::codec::{read_cstr, read_u8};

/// Error field type codes from PostgreSQL protocol.
pub mod field_type {
    /// Severity (localized)
    pub const SEVERITY: u8 = b'S';
    /// Severity (non-localized, PostgreSQL 9.6+)
    pub const SEVERITY_NON_LOCALIZED: u8 = b'V';
    /// SQLSTATE code
    pub const CODE: u8 = b'C';
    /// Message
    pub const MESSAGE: u8 = b'M';
    /// Detail
    pub const DETAIL: u8 = b'D';
    /// Hint
    pub const HINT: u8 = b'H';
    /// Position in query
    pub const POSITION: u8 = b'P';
    /// Where (context)
    pub const WHERE: u8 = b'W';
    /// Schema name
    pub const SCHEMA: u8 = b's';
    /// Table name
    pub const TABLE: u8 = b't';
    /// Column name
    pub const COLUMN: u8 = b'c';
    /// Constraint name
    pub const CONSTRAINT: u8 = b'n';
    /// File name
    pub const FILE: u8 = b'F';
    /// Line number
    pub const LINE: u8 = b'L';
    /// Routine name
    pub const ROUTINE: u8 = b'R';
}

/// Iterate `(field_type, text)` entries of an error/notice payload.
fn for_each_field<'a>(payload: &'a [u8], mut f: impl FnMut(u8, &'a str)) -> Result<()> {
    let mut data = payload;
    loop {
        let (field_type, rest) = read_u8(data)?;
        if field_type == 0 {
            return Ok(());
        }
        let (value, rest) = read_cstr(rest)?;
        f(field_type, value);
        data = rest;
    }
}

/// Parse error/notice fields from payload.
fn parse_fields(payload: &[u8]) -> Result<ErrorFields> {
    let mut fields = ErrorFields::default();

    for_each_field(payload, |field_type, value| match field_type {
        field_type::SEVERITY => fields.severity = Some(value.to_string()),
        field_type::SEVERITY_NON_LOCALIZED => {
            fields.severity_non_localized = Some(value.to_string())
        }
        field_type::CODE => fields.code = Some(value.to_string()),
        field_type::MESSAGE => fields.message = Some(value.to_string()),
        field_type::DETAIL => fields.detail = Some(value.to_string()),
        field_type::HINT => fields.hint = Some(value.to_string()),
        field_type::POSITION => fields.position = value.parse().ok(),
        field_type::WHERE => fields.where_ = Some(value.to_string()),
        field_type::SCHEMA => fields.schema = Some(value.to_string()),
        field_type::TABLE => fields.table = Some(value.to_string()),
        field_type::COLUMN => fields.column = Some(value.to_string()),
        field_type::CONSTRAINT => fields.constraint = Some(value.to_string()),
        field_type::FILE => fields.file = Some(value.to_string()),
        field_type::LINE => fields.line = value.parse().ok(),
        field_type::ROUTINE => fields.routine = Some(value.to_string()),
        _ => {
            tracing::debug!("Unknown error field type: {}", field_type as char);
        }
    })?;

    Ok(fields)
}

/// Extract a single field from an error/notice payload.
pub fn extract_field(field: u8, payload: &[u8]) -> Result<Option<String>> {
    let mut found = None;
    for_each_field(payload, |field_type, value| {
        if found.is_none() && field_type == field {
            found = Some(value.to_string());
        }
    })?;
    Ok(found)
}

fn log_fields(kind: &str, payload: &[u8], primary: tracing::Level) {
    let fields = match parse_fields(payload) {
        Ok(fields) => fields,
        Err(e) => {
            tracing::error!("malformed {} response: {}", kind, e);
            return;
        }
    };

    let message = fields.message.as_deref().unwrap_or_default();
    let code = fields.code.as_deref().unwrap_or_default();
    if primary == tracing::Level::ERROR {
        tracing::error!("{} response message: {} (SQLSTATE code: {})", kind, message, code);
    } else {
        tracing::warn!("{} response message: {} (SQLSTATE code: {})", kind, message, code);
    }

    if tracing::enabled!(tracing::Level::DEBUG) {
        let _ = for_each_field(payload, |field_type, value| {
            if field_type != field_type::MESSAGE && field_type != field_type::CODE {
                tracing::debug!(
                    "{} response field type: {}, message: {}",
                    kind,
                    field_type as char,
                    value
                );
            }
        });
    }
}

/// Log an `ErrorResponse` payload: message and SQLSTATE at error level, the rest at debug.
pub fn log_error_response(payload: &[u8]) {
    log_fields("error", payload, tracing::Level::ERROR);
}

/// Log a `NoticeResponse` payload: message and SQLSTATE at warn level, the rest at debug.
pub fn log_notice_response(payload: &[u8]) {
    log_fields("notice", payload, tracing::Level::WARN);
}

/// Log the reason carried by a CopyFail payload.
pub fn log_copy_fail(payload: &[u8]) {
    let reason = read_cstr(payload).map(|(s, _)| s).unwrap_or("<malformed>");
    tracing::error!("COPY-failure: {}", reason);
}

/// ErrorResponse message - fatal error from server.
#[derive(Debug, Clone)]
pub struct ErrorResponse {
    /// Parsed error fields
    pub fields: ErrorFields,
}

impl ErrorResponse {
    /// Parse an ErrorResponse message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        Ok(Self {
            fields: parse_fields(payload)?,
        })
    }

    /// Convert to an Error.
    pub fn into_error(self) -> Error {
        Error::Server(self.fields)
    }

    /// Get the SQLSTATE code.
    pub fn code(&self) -> Option<&str> {
        self.fields.code.as_deref()
    }

    /// Get the primary message.
    pub fn message(&self) -> Option<&str> {
        self.fields.message.as_deref()
    }

    /// Get the severity.
    pub fn severity(&self) -> Option<&str> {
        self.fields
            .severity_non_localized
            .as_deref()
            .or(self.fields.severity.as_deref())
    }
}

/// NoticeResponse message - non-fatal warning/info from server.
#[derive(Debug, Clone)]
pub struct NoticeResponse {
    /// Parsed notice fields
    pub fields: ErrorFields,
}

impl NoticeResponse {
    /// Parse a NoticeResponse message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        Ok(Self {
            fields: parse_fields(payload)?,
        })
    }

    /// Get the primary message.
    pub fn message(&self) -> Option<&str> {
        self.fields.message.as_deref()
    }
}

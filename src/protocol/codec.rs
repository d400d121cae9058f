//! PostgreSQL wire protocol encoding and decoding primitives.
//!
//! PostgreSQL uses big-endian (network byte order) for all integers.
//!
//! Two families of helpers live here:
//!
//! - Offset accessors (`read_i32_at`, `write_i32_at`, ...) operate at a caller-supplied
//!   byte offset and are bounds-checked: an access past the end of the buffer is a
//!   [`Error::Protocol`], never a silent overflow.
//! - Slice readers (`read_i16`, `read_cstr`, ...) consume from the front of a slice and
//!   return the remainder, which is what the frame extractors use to walk payloads.
//!
//! Outbound messages are written through [`MessageWriter`], which checks that the
//! analytically computed size matches the bytes actually written.

use zerocopy::FromBytes;
use zerocopy::byteorder::big_endian::{I16 as I16BE, I32 as I32BE, U16 as U16BE, U32 as U32BE};

use crate::error::{Error, Result};
use crate::protocol::message::Message;

fn range_error(what: &str, offset: usize, len: usize, buf_len: usize) -> Error {
    Error::Protocol(format!(
        "{what}: {len} bytes at offset {offset} exceed buffer of {buf_len} bytes"
    ))
}

#[inline]
fn window<const N: usize>(buf: &[u8], offset: usize, what: &str) -> Result<[u8; N]> {
    offset
        .checked_add(N)
        .and_then(|end| buf.get(offset..end))
        .and_then(|bytes| <[u8; N]>::try_from(bytes).ok())
        .ok_or_else(|| range_error(what, offset, N, buf.len()))
}

#[inline]
fn window_mut<'a>(buf: &'a mut [u8], offset: usize, len: usize, what: &str) -> Result<&'a mut [u8]> {
    let buf_len = buf.len();
    offset
        .checked_add(len)
        .and_then(|end| buf.get_mut(offset..end))
        .ok_or_else(|| range_error(what, offset, len, buf_len))
}

macro_rules! be_scalar {
    ($read:ident, $write:ident, $ty:ty) => {
        #[doc = concat!("Read a big-endian `", stringify!($ty), "` at `offset`.")]
        #[inline]
        pub fn $read(buf: &[u8], offset: usize) -> Result<$ty> {
            Ok(<$ty>::from_be_bytes(window(buf, offset, stringify!($read))?))
        }

        #[doc = concat!("Write a big-endian `", stringify!($ty), "` at `offset`.")]
        #[inline]
        pub fn $write(buf: &mut [u8], offset: usize, value: $ty) -> Result<()> {
            let bytes = value.to_be_bytes();
            window_mut(buf, offset, bytes.len(), stringify!($write))?.copy_from_slice(&bytes);
            Ok(())
        }
    };
}

be_scalar!(read_i8_at, write_i8_at, i8);
be_scalar!(read_u8_at, write_u8_at, u8);
be_scalar!(read_i16_at, write_i16_at, i16);
be_scalar!(read_u16_at, write_u16_at, u16);
be_scalar!(read_i32_at, write_i32_at, i32);
be_scalar!(read_u32_at, write_u32_at, u32);
be_scalar!(read_i64_at, write_i64_at, i64);
be_scalar!(read_u64_at, write_u64_at, u64);

/// Read a one-byte boolean at `offset` (any non-zero byte is `true`).
#[inline]
pub fn read_bool_at(buf: &[u8], offset: usize) -> Result<bool> {
    Ok(read_u8_at(buf, offset)? != 0)
}

/// Write a one-byte boolean at `offset`.
#[inline]
pub fn write_bool_at(buf: &mut [u8], offset: usize, value: bool) -> Result<()> {
    write_u8_at(buf, offset, u8::from(value))
}

/// Read a null-terminated string at `offset`, returning an owned copy without the NUL.
pub fn read_string_at(buf: &[u8], offset: usize) -> Result<String> {
    let tail = buf
        .get(offset..)
        .ok_or_else(|| range_error("read_string_at", offset, 1, buf.len()))?;
    let (s, _) = read_cstr(tail)?;
    Ok(s.to_owned())
}

/// Write `s` followed by a NUL at `offset`. Returns the number of bytes written.
pub fn write_string_at(buf: &mut [u8], offset: usize, s: &str) -> Result<usize> {
    let len = s.len() + 1;
    let dst = window_mut(buf, offset, len, "write_string_at")?;
    let (body, nul) = dst.split_at_mut(s.len());
    body.copy_from_slice(s.as_bytes());
    nul.fill(0);
    Ok(len)
}

/// Read 1-byte unsigned integer.
#[inline]
pub fn read_u8(data: &[u8]) -> Result<(u8, &[u8])> {
    match data.split_first() {
        Some((first, rest)) => Ok((*first, rest)),
        None => Err(Error::Protocol("read_u8: empty buffer".into())),
    }
}

/// Read 2-byte big-endian signed integer.
#[inline]
pub fn read_i16(data: &[u8]) -> Result<(i16, &[u8])> {
    let (value, rest) = I16BE::read_from_prefix(data).map_err(|_| {
        Error::Protocol(format!("read_i16: buffer too short: {} < 2", data.len()))
    })?;
    Ok((value.get(), rest))
}

/// Read 2-byte big-endian unsigned integer.
#[inline]
pub fn read_u16(data: &[u8]) -> Result<(u16, &[u8])> {
    let (value, rest) = U16BE::read_from_prefix(data).map_err(|_| {
        Error::Protocol(format!("read_u16: buffer too short: {} < 2", data.len()))
    })?;
    Ok((value.get(), rest))
}

/// Read 4-byte big-endian signed integer.
#[inline]
pub fn read_i32(data: &[u8]) -> Result<(i32, &[u8])> {
    let (value, rest) = I32BE::read_from_prefix(data).map_err(|_| {
        Error::Protocol(format!("read_i32: buffer too short: {} < 4", data.len()))
    })?;
    Ok((value.get(), rest))
}

/// Read 4-byte big-endian unsigned integer.
#[inline]
pub fn read_u32(data: &[u8]) -> Result<(u32, &[u8])> {
    let (value, rest) = U32BE::read_from_prefix(data).map_err(|_| {
        Error::Protocol(format!("read_u32: buffer too short: {} < 4", data.len()))
    })?;
    Ok((value.get(), rest))
}

/// Read fixed-length bytes.
#[inline]
pub fn read_bytes(data: &[u8], len: usize) -> Result<(&[u8], &[u8])> {
    data.split_at_checked(len).ok_or_else(|| {
        Error::Protocol(format!(
            "read_bytes: buffer too short: {} < {}",
            data.len(),
            len
        ))
    })
}

/// Read null-terminated string (PostgreSQL String type).
/// Returns the string bytes (without the null terminator) and remaining data.
#[inline]
pub fn read_cstring(data: &[u8]) -> Result<(&[u8], &[u8])> {
    match memchr::memchr(0, data) {
        Some(pos) => Ok((&data[..pos], &data[pos + 1..])),
        None => Err(Error::Protocol(
            "read_cstring: no null terminator found".into(),
        )),
    }
}

/// Read null-terminated string as &str.
#[inline]
pub fn read_cstr(data: &[u8]) -> Result<(&str, &[u8])> {
    let (bytes, rest) = read_cstring(data)?;
    let s = simdutf8::compat::from_utf8(bytes)
        .map_err(|e| Error::Protocol(format!("read_cstr: invalid UTF-8: {e}")))?;
    Ok((s, rest))
}

/// Cursor over a pre-sized, zeroed message buffer.
///
/// Every builder computes the total size of its message up front, creates a writer of
/// exactly that size and writes the fields in order. [`MessageWriter::finish`] rejects the
/// message if the cursor did not land exactly on the end of the buffer, so an off-by-one
/// in the size arithmetic becomes an error instead of a desynchronized peer.
#[derive(Debug)]
pub struct MessageWriter {
    kind: u8,
    data: Vec<u8>,
    offset: usize,
}

impl MessageWriter {
    /// Start a tagged message: kind byte followed by a length covering the rest.
    pub fn tagged(kind: u8, size: usize) -> Result<Self> {
        let length = size
            .checked_sub(1)
            .and_then(|len| i32::try_from(len).ok())
            .filter(|len| *len >= 4)
            .ok_or_else(|| Error::Protocol(format!("invalid tagged message size: {size}")))?;
        let mut writer = Self::raw(kind, size);
        writer.write_u8(kind)?;
        writer.write_i32(length)?;
        Ok(writer)
    }

    /// Start an untagged message whose length field covers the whole message.
    pub fn untagged(size: usize) -> Result<Self> {
        let length = i32::try_from(size)
            .ok()
            .filter(|len| *len >= 4)
            .ok_or_else(|| Error::Protocol(format!("invalid untagged message size: {size}")))?;
        let mut writer = Self::raw(0, size);
        writer.write_i32(length)?;
        Ok(writer)
    }

    /// Start a message without any header; the caller writes every byte.
    pub fn raw(kind: u8, size: usize) -> Self {
        Self {
            kind,
            data: vec![0; size],
            offset: 0,
        }
    }

    /// Current cursor position.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Write a u8.
    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        write_u8_at(&mut self.data, self.offset, value)?;
        self.offset += 1;
        Ok(())
    }

    /// Write an i32.
    pub fn write_i32(&mut self, value: i32) -> Result<()> {
        write_i32_at(&mut self.data, self.offset, value)?;
        self.offset += 4;
        Ok(())
    }

    /// Write an i64.
    pub fn write_i64(&mut self, value: i64) -> Result<()> {
        write_i64_at(&mut self.data, self.offset, value)?;
        self.offset += 8;
        Ok(())
    }

    /// Write a u64.
    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        write_u64_at(&mut self.data, self.offset, value)?;
        self.offset += 8;
        Ok(())
    }

    /// Write raw bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        window_mut(&mut self.data, self.offset, bytes.len(), "write_bytes")?
            .copy_from_slice(bytes);
        self.offset += bytes.len();
        Ok(())
    }

    /// Write string bytes without a terminator.
    pub fn write_str(&mut self, s: &str) -> Result<()> {
        self.write_bytes(s.as_bytes())
    }

    /// Write null-terminated string.
    ///
    /// Strings with an embedded NUL are rejected.
    pub fn write_cstr(&mut self, s: &str) -> Result<()> {
        if memchr::memchr(0, s.as_bytes()).is_some() {
            return Err(Error::InvalidUsage(format!(
                "string contains a NUL byte: {s:?}"
            )));
        }
        self.offset += write_string_at(&mut self.data, self.offset, s)?;
        Ok(())
    }

    /// Finish the message, checking that exactly the computed size was written.
    pub fn finish(self) -> Result<Message> {
        if self.offset != self.data.len() {
            return Err(Error::Protocol(format!(
                "message '{}' size mismatch: computed {} bytes, wrote {}",
                self.kind.escape_ascii(),
                self.data.len(),
                self.offset
            )));
        }
        Ok(Message::new(self.kind, self.data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_round_trip_at_boundaries() {
        let mut buf = [0u8; 16];

        for value in [0i8, -1, i8::MIN, i8::MAX] {
            write_i8_at(&mut buf, 3, value).unwrap();
            assert_eq!(read_i8_at(&buf, 3).unwrap(), value);
        }
        for value in [0u8, 1, u8::MAX] {
            write_u8_at(&mut buf, 3, value).unwrap();
            assert_eq!(read_u8_at(&buf, 3).unwrap(), value);
        }
        for value in [0i16, -1, i16::MIN, i16::MAX] {
            write_i16_at(&mut buf, 3, value).unwrap();
            assert_eq!(read_i16_at(&buf, 3).unwrap(), value);
        }
        for value in [0u16, 1, u16::MAX] {
            write_u16_at(&mut buf, 3, value).unwrap();
            assert_eq!(read_u16_at(&buf, 3).unwrap(), value);
        }
        for value in [0i32, -1, i32::MIN, i32::MAX] {
            write_i32_at(&mut buf, 3, value).unwrap();
            assert_eq!(read_i32_at(&buf, 3).unwrap(), value);
        }
        for value in [0u32, 1, u32::MAX] {
            write_u32_at(&mut buf, 3, value).unwrap();
            assert_eq!(read_u32_at(&buf, 3).unwrap(), value);
        }
        for value in [0i64, -1, i64::MIN, i64::MAX] {
            write_i64_at(&mut buf, 3, value).unwrap();
            assert_eq!(read_i64_at(&buf, 3).unwrap(), value);
        }
        for value in [0u64, 1, u64::MAX] {
            write_u64_at(&mut buf, 3, value).unwrap();
            assert_eq!(read_u64_at(&buf, 3).unwrap(), value);
        }
        for value in [true, false] {
            write_bool_at(&mut buf, 15, value).unwrap();
            assert_eq!(read_bool_at(&buf, 15).unwrap(), value);
        }
    }

    #[test]
    fn network_byte_order() {
        let mut buf = [0u8; 8];
        write_i32_at(&mut buf, 0, 0x0102_0304).unwrap();
        assert_eq!(&buf[..4], &[1, 2, 3, 4]);

        write_u16_at(&mut buf, 4, 0xABCD).unwrap();
        assert_eq!(&buf[4..6], &[0xAB, 0xCD]);

        write_i64_at(&mut buf, 0, -2).unwrap();
        assert_eq!(buf, [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFE]);
    }

    #[test]
    fn out_of_bounds_is_an_error() {
        let mut buf = [0u8; 4];
        assert!(read_i32_at(&buf, 1).is_err());
        assert!(write_i64_at(&mut buf, 0, 1).is_err());
        assert!(read_u8_at(&buf, usize::MAX).is_err());
        assert!(write_string_at(&mut buf, 0, "abcd").is_err());
    }

    #[test]
    fn string_round_trip() {
        let mut buf = [0xFFu8; 12];
        let written = write_string_at(&mut buf, 2, "hello").unwrap();
        assert_eq!(written, 6);
        assert_eq!(buf[7], 0);
        assert_eq!(read_string_at(&buf, 2).unwrap(), "hello");
        assert!(read_string_at(&[b'a', b'b'], 0).is_err());
    }

    #[test]
    fn slice_readers() {
        let data = [0x00, 0x02, b'h', b'i', 0, 0xFF, 0xFF, 0xFF, 0xFF];
        let (count, rest) = read_i16(&data).unwrap();
        assert_eq!(count, 2);
        let (s, rest) = read_cstr(rest).unwrap();
        assert_eq!(s, "hi");
        let (len, rest) = read_i32(rest).unwrap();
        assert_eq!(len, -1);
        assert!(rest.is_empty());
        assert!(read_u32(rest).is_err());
    }

    #[test]
    fn writer_enforces_computed_size() {
        let mut writer = MessageWriter::tagged(b'Q', 1 + 4 + 2).unwrap();
        writer.write_cstr("x").unwrap();
        let msg = writer.finish().unwrap();
        assert_eq!(msg.data(), &[b'Q', 0, 0, 0, 6, b'x', 0]);

        // One byte too many computed: finish must refuse.
        let mut writer = MessageWriter::tagged(b'Q', 1 + 4 + 3).unwrap();
        writer.write_cstr("x").unwrap();
        assert!(writer.finish().is_err());

        // One byte too few computed: the write itself must refuse.
        let mut writer = MessageWriter::tagged(b'Q', 1 + 4 + 1).unwrap();
        assert!(writer.write_cstr("x").is_err());
    }
}

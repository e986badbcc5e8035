//! RESP2 (REdis Serialization Protocol) codec for the remote backend
//!
//! Requests go out as arrays of bulk strings; replies are decoded
//! incrementally from a [`BytesMut`] read buffer.

use bytes::{Buf, BytesMut};
use std::io::Cursor;

use crate::error::{Error, Result};

/// Largest bulk string accepted from the wire (512 MiB)
const MAX_BULK_STRING_SIZE: usize = 512 * 1024 * 1024;

/// Longest array accepted from the wire
const MAX_ARRAY_SIZE: usize = 1024 * 1024;

/// One RESP2 frame
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    /// `+OK`
    SimpleString(String),
    /// `-ERR message`
    Error(String),
    /// `:1000`
    Integer(i64),
    /// `$6 foobar`, or `$-1` for nil
    BulkString(Option<Vec<u8>>),
    /// `*2 ...`, or `*-1` for nil
    Array(Option<Vec<RespValue>>),
}

impl RespValue {
    /// Build a command frame from its words
    pub fn command<A: AsRef<[u8]>>(args: &[A]) -> Self {
        RespValue::Array(Some(
            args.iter()
                .map(|arg| RespValue::BulkString(Some(arg.as_ref().to_vec())))
                .collect(),
        ))
    }

    /// Encode the frame
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write_to(&mut out);
        out
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        match self {
            RespValue::SimpleString(s) => out.extend_from_slice(format!("+{}\r\n", s).as_bytes()),
            RespValue::Error(e) => out.extend_from_slice(format!("-{}\r\n", e).as_bytes()),
            RespValue::Integer(i) => out.extend_from_slice(format!(":{}\r\n", i).as_bytes()),
            RespValue::BulkString(None) => out.extend_from_slice(b"$-1\r\n"),
            RespValue::BulkString(Some(data)) => {
                out.extend_from_slice(format!("${}\r\n", data.len()).as_bytes());
                out.extend_from_slice(data);
                out.extend_from_slice(b"\r\n");
            }
            RespValue::Array(None) => out.extend_from_slice(b"*-1\r\n"),
            RespValue::Array(Some(arr)) => {
                out.extend_from_slice(format!("*{}\r\n", arr.len()).as_bytes());
                for val in arr {
                    val.write_to(out);
                }
            }
        }
    }

    /// Parse one frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` and leaves `buf` untouched when the frame is
    /// incomplete; on success exactly the frame's bytes are consumed.
    pub fn parse(buf: &mut BytesMut) -> Result<Option<RespValue>> {
        if buf.is_empty() {
            return Ok(None);
        }

        let mut cursor = Cursor::new(&buf[..]);
        match parse_value(&mut cursor)? {
            Some(value) => {
                let pos = cursor.position() as usize;
                buf.advance(pos);
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Turn an error reply into [`Error::Remote`]
    pub fn into_result(self) -> Result<RespValue> {
        match self {
            RespValue::Error(message) => Err(Error::Remote(message)),
            other => Ok(other),
        }
    }

    /// Payload of a bulk string reply; `None` for a null bulk string
    pub fn into_bulk(self) -> Result<Option<Vec<u8>>> {
        match self.into_result()? {
            RespValue::BulkString(data) => Ok(data),
            RespValue::SimpleString(s) => Ok(Some(s.into_bytes())),
            other => Err(unexpected("bulk string", &other)),
        }
    }

    /// Value of an integer reply
    pub fn into_integer(self) -> Result<i64> {
        match self.into_result()? {
            RespValue::Integer(i) => Ok(i),
            other => Err(unexpected("integer", &other)),
        }
    }

    /// Accept `+OK` (or any simple string status)
    pub fn into_status(self) -> Result<String> {
        match self.into_result()? {
            RespValue::SimpleString(s) => Ok(s),
            other => Err(unexpected("status", &other)),
        }
    }
}

fn unexpected(expected: &str, got: &RespValue) -> Error {
    Error::Protocol(format!("expected {} reply, got {:?}", expected, got))
}

fn parse_value(cursor: &mut Cursor<&[u8]>) -> Result<Option<RespValue>> {
    if !cursor.has_remaining() {
        return Ok(None);
    }

    let type_byte = cursor.get_u8();

    match type_byte {
        b'+' => Ok(read_text(cursor)?.map(RespValue::SimpleString)),
        b'-' => Ok(read_text(cursor)?.map(RespValue::Error)),
        b':' => Ok(read_number(cursor)?.map(RespValue::Integer)),
        b'$' => parse_bulk_string(cursor),
        b'*' => parse_array(cursor),
        _ => Err(Error::Protocol(format!(
            "unknown RESP type: {}",
            type_byte as char
        ))),
    }
}

fn parse_bulk_string(cursor: &mut Cursor<&[u8]>) -> Result<Option<RespValue>> {
    let len = match read_number(cursor)? {
        Some(len) => len,
        None => return Ok(None),
    };

    if len < 0 {
        return Ok(Some(RespValue::BulkString(None)));
    }

    let len = len as usize;
    if len > MAX_BULK_STRING_SIZE {
        return Err(Error::Protocol(format!(
            "bulk string too large: {} bytes (max: {} bytes)",
            len, MAX_BULK_STRING_SIZE
        )));
    }

    // payload + \r\n
    if cursor.remaining() < len + 2 {
        return Ok(None);
    }

    let mut data = vec![0u8; len];
    cursor.copy_to_slice(&mut data);

    if cursor.get_u8() != b'\r' || cursor.get_u8() != b'\n' {
        return Err(Error::Protocol(
            "expected \\r\\n after bulk string".to_string(),
        ));
    }

    Ok(Some(RespValue::BulkString(Some(data))))
}

fn parse_array(cursor: &mut Cursor<&[u8]>) -> Result<Option<RespValue>> {
    let len = match read_number(cursor)? {
        Some(len) => len,
        None => return Ok(None),
    };

    if len < 0 {
        return Ok(Some(RespValue::Array(None)));
    }

    let len = len as usize;
    if len > MAX_ARRAY_SIZE {
        return Err(Error::Protocol(format!(
            "array too large: {} elements (max: {} elements)",
            len, MAX_ARRAY_SIZE
        )));
    }

    let mut arr = Vec::with_capacity(len);
    for _ in 0..len {
        match parse_value(cursor)? {
            Some(val) => arr.push(val),
            None => return Ok(None),
        }
    }

    Ok(Some(RespValue::Array(Some(arr))))
}

fn read_text(cursor: &mut Cursor<&[u8]>) -> Result<Option<String>> {
    match read_line(cursor) {
        Some(line) => String::from_utf8(line)
            .map(Some)
            .map_err(|e| Error::Protocol(e.to_string())),
        None => Ok(None),
    }
}

fn read_number(cursor: &mut Cursor<&[u8]>) -> Result<Option<i64>> {
    match read_text(cursor)? {
        Some(text) => text
            .parse::<i64>()
            .map(Some)
            .map_err(|e| Error::Protocol(format!("invalid length or integer {:?}: {}", text, e))),
        None => Ok(None),
    }
}

fn read_line(cursor: &mut Cursor<&[u8]>) -> Option<Vec<u8>> {
    let start = cursor.position() as usize;
    let slice = &cursor.get_ref()[start..];

    let end = start + slice.windows(2).position(|window| window == b"\r\n")?;
    cursor.set_position((end + 2) as u64);
    Some(cursor.get_ref()[start..end].to_vec())
}

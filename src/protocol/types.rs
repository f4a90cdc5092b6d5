//! RESP (Redis Serialization Protocol) Reply Types
//!
//! Replies are built explicitly by each command handler as one of the
//! variants below and serialized straight into a connection's output buffer.
//!
//! ## Wire Format
//!
//! Each type starts with a type prefix byte:
//! - `+` Simple String
//! - `-` Error
//! - `:` Integer
//! - `$` Bulk String
//! - `*` Array
//!
//! All types are terminated with CRLF (`\r\n`).
//!
//! ## Examples
//!
//! Simple String: `+OK\r\n`
//! Error: `-ERR unknown command 'FOO'\r\n`
//! Integer: `:1000\r\n`
//! Bulk String: `$5\r\nhello\r\n`
//! Array: `*2\r\n$3\r\nGET\r\n$4\r\nname\r\n`
//! Null Bulk String: `$-1\r\n`

use bytes::{Bytes, BytesMut};
use std::fmt;

/// The CRLF terminator used in RESP protocol
pub const CRLF: &[u8] = b"\r\n";

/// Prefix placed before every error message
pub const ERROR_PREFIX: &[u8] = b"ERR ";

/// RESP protocol type prefixes
pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// A reply value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// Status replies such as `OK`, `PONG` and `QUEUED`.
    /// Format: `+<string>\r\n`
    SimpleString(String),

    /// An error. The message is sent after the `ERR` prefix.
    /// Format: `-ERR <message>\r\n`
    Error(String),

    /// 64-bit signed integers.
    /// Format: `:<integer>\r\n`
    Integer(i64),

    /// Binary-safe strings.
    /// Format: `$<length>\r\n<data>\r\n`
    BulkString(Bytes),

    /// Null bulk string: `$-1\r\n`
    Null,

    /// Ordered collection of replies, possibly nested.
    /// Format: `*<count>\r\n<element1><element2>...`
    Array(Vec<RespValue>),

    /// Bytes already in wire form, copied to the output unchanged.
    Raw(Bytes),
}

impl RespValue {
    pub fn simple_string(s: impl Into<String>) -> Self {
        RespValue::SimpleString(s.into())
    }

    /// Creates an error reply. `msg` must not repeat the `ERR` prefix.
    pub fn error(msg: impl Into<String>) -> Self {
        RespValue::Error(msg.into())
    }

    pub fn integer(n: i64) -> Self {
        RespValue::Integer(n)
    }

    /// Creates a new bulk string response.
    ///
    /// # Example
    /// ```
    /// use boltkv::protocol::types::RespValue;
    /// use bytes::Bytes;
    /// let bulk = RespValue::bulk_string(Bytes::from("hello"));
    /// assert_eq!(bulk.serialize(), b"$5\r\nhello\r\n");
    /// ```
    pub fn bulk_string(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(data.into())
    }

    pub fn null() -> Self {
        RespValue::Null
    }

    pub fn array(values: Vec<RespValue>) -> Self {
        RespValue::Array(values)
    }

    /// Common response for successful operations
    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    /// Common response for PONG
    pub fn pong() -> Self {
        RespValue::SimpleString("PONG".to_string())
    }

    /// Acknowledgement for a command queued inside MULTI
    pub fn queued() -> Self {
        RespValue::SimpleString("QUEUED".to_string())
    }

    /// Serializes the value to a fresh buffer.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        self.serialize_into(&mut buf);
        buf.to_vec()
    }

    /// Serializes the value onto the end of `buf`.
    pub fn serialize_into(&self, buf: &mut BytesMut) {
        match self {
            RespValue::SimpleString(s) => {
                buf.extend_from_slice(&[prefix::SIMPLE_STRING]);
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(CRLF);
            }
            RespValue::Error(msg) => {
                buf.extend_from_slice(&[prefix::ERROR]);
                buf.extend_from_slice(ERROR_PREFIX);
                buf.extend_from_slice(msg.as_bytes());
                buf.extend_from_slice(CRLF);
            }
            RespValue::Integer(n) => {
                buf.extend_from_slice(&[prefix::INTEGER]);
                buf.extend_from_slice(n.to_string().as_bytes());
                buf.extend_from_slice(CRLF);
            }
            RespValue::BulkString(data) => {
                buf.extend_from_slice(&[prefix::BULK_STRING]);
                buf.extend_from_slice(data.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                buf.extend_from_slice(data);
                buf.extend_from_slice(CRLF);
            }
            RespValue::Null => {
                buf.extend_from_slice(b"$-1\r\n");
            }
            RespValue::Array(values) => {
                buf.extend_from_slice(&[prefix::ARRAY]);
                buf.extend_from_slice(values.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                for value in values {
                    value.serialize_into(buf);
                }
            }
            RespValue::Raw(bytes) => {
                buf.extend_from_slice(bytes);
            }
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, RespValue::Null)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::Error(_))
    }
}

impl From<Option<Bytes>> for RespValue {
    fn from(value: Option<Bytes>) -> Self {
        value.map_or(RespValue::Null, RespValue::BulkString)
    }
}

impl fmt::Display for RespValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RespValue::SimpleString(s) => write!(f, "\"{}\"", s),
            RespValue::Error(s) => write!(f, "(error) ERR {}", s),
            RespValue::Integer(n) => write!(f, "(integer) {}", n),
            RespValue::BulkString(data) => {
                if let Ok(s) = std::str::from_utf8(data) {
                    write!(f, "\"{}\"", s)
                } else {
                    write!(f, "(binary data, {} bytes)", data.len())
                }
            }
            RespValue::Null => write!(f, "(nil)"),
            RespValue::Array(values) => {
                if values.is_empty() {
                    write!(f, "(empty array)")
                } else {
                    writeln!(f)?;
                    for (i, v) in values.iter().enumerate() {
                        writeln!(f, "{}) {}", i + 1, v)?;
                    }
                    Ok(())
                }
            }
            RespValue::Raw(bytes) => write!(f, "(raw, {} bytes)", bytes.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_string_serialize() {
        assert_eq!(RespValue::simple_string("OK").serialize(), b"+OK\r\n");
    }

    #[test]
    fn test_error_serialize() {
        let value = RespValue::error("unknown command 'FOO'");
        assert_eq!(value.serialize(), b"-ERR unknown command 'FOO'\r\n");
    }

    #[test]
    fn test_integer_serialize() {
        assert_eq!(RespValue::integer(42).serialize(), b":42\r\n");
        assert_eq!(RespValue::integer(-42).serialize(), b":-42\r\n");
    }

    #[test]
    fn test_bulk_string_serialize() {
        let value = RespValue::bulk_string(Bytes::from("hello"));
        assert_eq!(value.serialize(), b"$5\r\nhello\r\n");

        let empty = RespValue::bulk_string(Bytes::new());
        assert_eq!(empty.serialize(), b"$0\r\n\r\n");
    }

    #[test]
    fn test_null_serialize() {
        assert_eq!(RespValue::null().serialize(), b"$-1\r\n");
        assert_eq!(RespValue::from(None::<Bytes>).serialize(), b"$-1\r\n");
    }

    #[test]
    fn test_array_serialize() {
        let value = RespValue::array(vec![
            RespValue::bulk_string(Bytes::from("GET")),
            RespValue::bulk_string(Bytes::from("name")),
        ]);
        assert_eq!(value.serialize(), b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n");
    }

    #[test]
    fn test_nested_array_with_null() {
        let value = RespValue::array(vec![
            RespValue::integer(1),
            RespValue::null(),
            RespValue::array(vec![RespValue::integer(2), RespValue::ok()]),
        ]);
        assert_eq!(value.serialize(), b"*3\r\n:1\r\n$-1\r\n*2\r\n:2\r\n+OK\r\n");
    }

    #[test]
    fn test_raw_passthrough() {
        let value = RespValue::array(vec![
            RespValue::Raw(Bytes::from_static(b":7\r\n")),
            RespValue::bulk_string(Bytes::from("x")),
        ]);
        assert_eq!(value.serialize(), b"*2\r\n:7\r\n$1\r\nx\r\n");
    }

    #[test]
    fn test_common_responses() {
        assert_eq!(RespValue::ok().serialize(), b"+OK\r\n");
        assert_eq!(RespValue::pong().serialize(), b"+PONG\r\n");
        assert_eq!(RespValue::queued().serialize(), b"+QUEUED\r\n");
    }
}

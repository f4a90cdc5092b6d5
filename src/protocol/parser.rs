//! Resumable RESP Request Parser
//!
//! Clients send every command as an array of bulk strings:
//!
//! ```text
//! *<argc>\r\n
//! $<len>\r\n<len bytes>\r\n      (repeated argc times)
//! ```
//!
//! ## How the Parser Works
//!
//! The parser is stateless and always starts from the beginning of the
//! buffer. It returns either:
//! - `Ok(Some((request, consumed)))` - a complete request, `consumed` bytes were used
//! - `Ok(None)` - the request is incomplete, nothing was consumed
//! - `Err(ParseError)` - the framing is invalid and the connection must be closed
//!
//! This design allows the caller to:
//! 1. Append incoming network data to a buffer
//! 2. Call [`parse_request`] in a loop, advancing the buffer by `consumed`
//! 3. Stop on `Ok(None)` and retry once more bytes arrive
//!
//! Because an incomplete request is simply re-scanned later, splitting a
//! request into chunks of any size yields the same result as receiving it at
//! once.

use crate::protocol::types::{prefix, CRLF};
use bytes::Bytes;
use thiserror::Error;

/// Errors that can occur during request parsing. All of them are fatal for
/// the connection: the stream can no longer be framed reliably.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// A header byte other than the one the grammar requires
    #[error("expected '{}', found {found:#04x}", *expected as char)]
    UnexpectedByte { expected: u8, found: u8 },

    /// A count or length that is not a plain non-negative decimal
    #[error("invalid length line: {0:?}")]
    InvalidLength(String),

    /// The argument count must be at least one
    #[error("invalid argument count: {0}")]
    InvalidArgumentCount(usize),

    /// A bulk payload not followed by CRLF
    #[error("protocol error: missing CRLF after bulk string")]
    MissingCrlf,

    /// The request exceeds a configured limit
    #[error("request too large: {size} (max: {max})")]
    TooLarge { size: usize, max: usize },
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size for a single bulk string (512 MB, same as Redis)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum number of arguments in one request
pub const MAX_ARGUMENTS: usize = 1024 * 1024;

/// Longest count/length line accepted before giving up on finding CRLF
const MAX_LENGTH_DIGITS: usize = 20;

/// A parsed command. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Command name exactly as sent
    pub command: Bytes,
    /// Arguments after the command name
    pub args: Vec<Bytes>,
}

impl Request {
    pub fn new(command: impl Into<Bytes>, args: Vec<Bytes>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }

    /// Upper-cased command name used for dispatch.
    pub fn name(&self) -> String {
        String::from_utf8_lossy(&self.command).to_ascii_uppercase()
    }

    /// Number of words including the command name.
    pub fn argc(&self) -> usize {
        self.args.len() + 1
    }

    /// Encodes the request the way a client would send it.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(prefix::ARRAY);
        out.extend_from_slice(self.argc().to_string().as_bytes());
        out.extend_from_slice(CRLF);
        for part in std::iter::once(&self.command).chain(self.args.iter()) {
            out.push(prefix::BULK_STRING);
            out.extend_from_slice(part.len().to_string().as_bytes());
            out.extend_from_slice(CRLF);
            out.extend_from_slice(part);
            out.extend_from_slice(CRLF);
        }
        out
    }
}

/// Attempts to parse one request from the front of `buf`.
pub fn parse_request(buf: &[u8]) -> ParseResult<Option<(Request, usize)>> {
    let Some((argc, mut pos)) = parse_length_line(buf, 0, prefix::ARRAY)? else {
        return Ok(None);
    };
    if argc == 0 {
        return Err(ParseError::InvalidArgumentCount(argc));
    }
    if argc > MAX_ARGUMENTS {
        return Err(ParseError::TooLarge {
            size: argc,
            max: MAX_ARGUMENTS,
        });
    }

    let mut parts = Vec::with_capacity(argc.min(64));
    for _ in 0..argc {
        let Some((len, data_start)) = parse_length_line(buf, pos, prefix::BULK_STRING)? else {
            return Ok(None);
        };
        if len > MAX_BULK_SIZE {
            return Err(ParseError::TooLarge {
                size: len,
                max: MAX_BULK_SIZE,
            });
        }

        let data_end = data_start + len;
        if buf.len() < data_end + 2 {
            return Ok(None);
        }
        if &buf[data_end..data_end + 2] != CRLF {
            return Err(ParseError::MissingCrlf);
        }

        parts.push(Bytes::copy_from_slice(&buf[data_start..data_end]));
        pos = data_end + 2;
    }

    let mut parts = parts.into_iter();
    let command = parts.next().unwrap_or_default();
    Ok(Some((
        Request {
            command,
            args: parts.collect(),
        },
        pos,
    )))
}

/// Parses `<prefix><digits>\r\n` at `pos`, returning the number and the
/// offset just past the CRLF.
fn parse_length_line(buf: &[u8], pos: usize, expected: u8) -> ParseResult<Option<(usize, usize)>> {
    let Some(&found) = buf.get(pos) else {
        return Ok(None);
    };
    if found != expected {
        return Err(ParseError::UnexpectedByte { expected, found });
    }

    let rest = &buf[pos + 1..];
    let Some(end) = find_crlf(rest) else {
        // only digits so far: the line may still be arriving
        let partial = rest.strip_suffix(b"\r").unwrap_or(rest);
        if partial.len() <= MAX_LENGTH_DIGITS && partial.iter().all(u8::is_ascii_digit) {
            return Ok(None);
        }
        return Err(ParseError::InvalidLength(
            String::from_utf8_lossy(&rest[..rest.len().min(MAX_LENGTH_DIGITS + 1)]).into_owned(),
        ));
    };

    let line = &rest[..end];
    let invalid = || ParseError::InvalidLength(String::from_utf8_lossy(line).into_owned());
    if line.is_empty() || line.len() > MAX_LENGTH_DIGITS || !line.iter().all(u8::is_ascii_digit) {
        return Err(invalid());
    }
    let value = std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or_else(invalid)?;

    Ok(Some((value, pos + 1 + end + 2)))
}

/// Finds the position of CRLF in the buffer.
///
/// Returns the position of `\r` if found, or None if CRLF is not present.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

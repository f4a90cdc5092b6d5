//! RESP Protocol Implementation
//!
//! The codec sits between the reactor's byte buffers and the command layer.
//!
//! ## Overview
//!
//! Requests always arrive as arrays of bulk strings, so the parser only
//! understands that shape and produces a [`Request`]. Replies are the
//! explicit [`RespValue`] variants chosen by each command handler.
//!
//! ## Modules
//!
//! - `types`: Defines the `RespValue` enum and serialization
//! - `parser`: Resumable parser for incoming requests
//!
//! ## Example
//!
//! ```
//! use boltkv::protocol::{parse_request, RespValue};
//! use bytes::Bytes;
//!
//! // Parsing incoming data
//! let data = b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n";
//! let (request, consumed) = parse_request(data).unwrap().unwrap();
//! assert_eq!(request.name(), "GET");
//! assert_eq!(consumed, data.len());
//!
//! // Creating responses
//! let response = RespValue::bulk_string(Bytes::from("Ariz"));
//! assert_eq!(response.serialize(), b"$4\r\nAriz\r\n");
//! ```

pub mod parser;
pub mod types;

// Re-export commonly used types for convenience
pub use parser::{parse_request, ParseError, ParseResult, Request};
pub use types::RespValue;

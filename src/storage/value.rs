//! Stored values and their metadata.

use crate::storage::compact_list::CompactList;
use bytes::Bytes;
use std::fmt;
use std::time::Instant;

/// Fixed per-key overhead added to memory estimates.
pub const ENTRY_OVERHEAD: usize = 64;

/// Longest string that still reports the `embstr` encoding.
pub const EMBSTR_SIZE_LIMIT: usize = 44;

/// The value held by a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Str(Bytes),
    List(CompactList),
}

/// Kind of a stored value, as reported by `TYPE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    String,
    List,
}

/// Internal encoding of a stored value, as reported by `OBJECT ENCODING`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Int,
    Embstr,
    Raw,
    CompactList,
}

impl Value {
    pub fn kind(&self) -> ObjectKind {
        match self {
            Value::Str(_) => ObjectKind::String,
            Value::List(_) => ObjectKind::List,
        }
    }

    pub fn encoding(&self) -> Encoding {
        match self {
            Value::Str(s) => {
                let is_int = std::str::from_utf8(s)
                    .ok()
                    .and_then(|s| s.parse::<i64>().ok())
                    .is_some();
                if is_int {
                    Encoding::Int
                } else if s.len() <= EMBSTR_SIZE_LIMIT {
                    Encoding::Embstr
                } else {
                    Encoding::Raw
                }
            }
            Value::List(_) => Encoding::CompactList,
        }
    }

    /// Approximate payload size in bytes.
    pub fn size(&self) -> usize {
        match self {
            Value::Str(s) => s.len(),
            Value::List(l) => l.blob_len(),
        }
    }
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::String => "string",
            ObjectKind::List => "list",
        }
    }
}

impl Encoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Int => "int",
            Encoding::Embstr => "embstr",
            Encoding::Raw => "raw",
            Encoding::CompactList => "ziplist",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value together with its access metadata.
#[derive(Debug, Clone)]
pub struct Entry {
    pub value: Value,
    /// Last read or write, drives LRU idle time
    pub last_access: Instant,
}

impl Entry {
    pub fn new(value: Value, now: Instant) -> Self {
        Self {
            value,
            last_access: now,
        }
    }

    /// Time since the entry was last touched.
    pub fn idle_time(&self, now: Instant) -> std::time::Duration {
        now.saturating_duration_since(self.last_access)
    }
}

/// Estimated memory held by `key` and `value`.
#[inline]
pub fn estimate_size(key: &[u8], value: &Value) -> usize {
    key.len() + value.size() + ENTRY_OVERHEAD
}

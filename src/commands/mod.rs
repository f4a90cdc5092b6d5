//! Command Layer
//!
//! Every supported command is described by a [`CommandSpec`]: its name, its
//! arity and a set of flags, plus the handler function that implements it.
//! The specs are collected into a [`CommandTable`] that the server uses to
//! dispatch requests in O(1).
//!
//! ## Architecture
//!
//! ```text
//! Request ──> Server::dispatch ──> CommandTable lookup
//!                  │                     │
//!          subscribe-mode check    arity check
//!          MULTI queueing          eviction (DENY_OOM)
//!                  │                     │
//!                  └──────> handler(&mut Server, ClientId, &Request)
//!                                        │
//!                                        ▼
//!                               Reply (one or more RespValues,
//!                                      or Blocked)
//! ```
//!
//! ## Supported Commands
//!
//! - Strings and keys: `GET`, `SET`, `DEL`, `EXISTS`, `TYPE`, `EXPIRE`,
//!   `PEXPIRE`, `PERSIST`, `TTL`, `PTTL`, `KEYS`, `OBJECT ENCODING`
//! - Lists: `LPUSH`, `RPUSH`, `LPOP`, `RPOP`, `LLEN`, `LINDEX`, `LRANGE`,
//!   `BLPOP`, `BRPOP`
//! - Transactions: `MULTI`, `EXEC`, `DISCARD`, `WATCH`, `UNWATCH`
//! - Pub/sub: `SUBSCRIBE`, `UNSUBSCRIBE`, `PUBLISH`
//! - Server: `PING`, `ECHO`, `QUIT`, `AUTH`, `SELECT`, `INFO`, `DBSIZE`,
//!   `FLUSHDB`, `FLUSHALL`

pub mod keys;
pub mod lists;
pub mod pubsub;
pub mod server;
pub mod strings;
pub mod transactions;

use crate::connection::ClientId;
use crate::protocol::{Request, RespValue};
use crate::server::Server;
use crate::storage::{ListError, StorageError};
use bytes::Bytes;
use std::collections::HashMap;
use thiserror::Error;

/// Errors a command reports to the client. The serializer adds the `ERR`
/// prefix, so messages never include it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("wrong number of arguments for '{0}' command")]
    WrongArity(String),

    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    #[error("value is not an integer or out of range")]
    NotInteger,

    #[error("invalid expire time in '{0}' command")]
    InvalidExpire(String),

    #[error("timeout is not a float or out of range")]
    InvalidTimeout,

    #[error("timeout is negative")]
    NegativeTimeout,

    #[error("syntax error")]
    Syntax,

    #[error("DB index is out of range")]
    DbIndexOutOfRange,

    #[error("MULTI calls can not be nested")]
    NestedMulti,

    #[error("EXEC without MULTI")]
    ExecWithoutMulti,

    #[error("DISCARD without MULTI")]
    DiscardWithoutMulti,

    #[error("WATCH inside MULTI is not allowed")]
    WatchInsideMulti,

    #[error("EXECABORT Transaction discarded because a watched key was modified")]
    ExecAbort,

    #[error("OOM command not allowed when used memory > 'maxmemory'")]
    OutOfMemory,

    #[error("Can't execute '{0}': only SUBSCRIBE / UNSUBSCRIBE / PING / QUIT are allowed in this context")]
    SubscribeContext(String),

    #[error("{0}")]
    List(#[from] ListError),

    #[error("{0}")]
    Internal(String),
}

impl From<StorageError> for CommandError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::WrongType => CommandError::WrongType,
            StorageError::List(e) => CommandError::List(e),
        }
    }
}

impl From<CommandError> for RespValue {
    fn from(err: CommandError) -> Self {
        RespValue::error(err.to_string())
    }
}

/// What a handler produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Single(RespValue),
    /// Several top-level replies, e.g. one confirmation per channel
    Multiple(Vec<RespValue>),
    /// The client is suspended and will be answered later
    Blocked,
}

impl Reply {
    /// Collapses the reply into one value, as needed for an EXEC array.
    pub fn into_value(self) -> RespValue {
        match self {
            Reply::Single(value) => value,
            Reply::Multiple(values) => RespValue::Array(values),
            Reply::Blocked => RespValue::Null,
        }
    }
}

impl From<CommandError> for Reply {
    fn from(err: CommandError) -> Self {
        Reply::Single(err.into())
    }
}

impl From<RespValue> for Reply {
    fn from(value: RespValue) -> Self {
        Reply::Single(value)
    }
}

pub type CommandResult = Result<Reply, CommandError>;

pub type Handler = fn(&mut Server, ClientId, &Request) -> CommandResult;

/// Command flags.
pub mod flags {
    /// Modifies the keyspace
    pub const WRITE: u8 = 1 << 0;
    /// May grow memory usage: eviction runs first, and the command is
    /// rejected if it cannot free enough
    pub const DENY_OOM: u8 = 1 << 1;
    /// Runs immediately even inside MULTI
    pub const NO_QUEUE: u8 = 1 << 2;
    /// Allowed while the client has subscriptions
    pub const PUBSUB: u8 = 1 << 3;
}

#[derive(Clone, Copy)]
pub struct CommandSpec {
    pub name: &'static str,
    /// Positive: exact word count including the name. Negative: minimum.
    pub arity: i32,
    pub flags: u8,
    pub handler: Handler,
}

impl CommandSpec {
    pub fn has_flag(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }

    pub fn arity_ok(&self, argc: usize) -> bool {
        let argc = argc as i64;
        let arity = self.arity as i64;
        if arity >= 0 {
            argc == arity
        } else {
            argc >= -arity
        }
    }
}

impl std::fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSpec")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("flags", &self.flags)
            .finish()
    }
}

/// Name to spec lookup table.
#[derive(Debug)]
pub struct CommandTable {
    commands: HashMap<&'static str, CommandSpec>,
}

impl CommandTable {
    /// Builds the table of every supported command.
    pub fn new() -> Self {
        let mut commands = HashMap::new();
        for group in [
            strings::COMMANDS,
            keys::COMMANDS,
            lists::COMMANDS,
            transactions::COMMANDS,
            pubsub::COMMANDS,
            server::COMMANDS,
        ] {
            for spec in group {
                commands.insert(spec.name, *spec);
            }
        }
        Self { commands }
    }

    /// Adds or replaces a command.
    pub fn register(&mut self, spec: CommandSpec) {
        self.commands.insert(spec.name, spec);
    }

    /// Looks up an upper-cased command name.
    pub fn get(&self, name: &str) -> Option<&CommandSpec> {
        self.commands.get(name)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Sorted command names.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.commands.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl Default for CommandTable {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Argument helpers
// ============================================================================

/// Parses an argument as a signed 64-bit integer.
pub(crate) fn parse_i64(arg: &[u8]) -> Result<i64, CommandError> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or(CommandError::NotInteger)
}

/// Parses a blocking timeout in seconds. `None` means wait forever.
pub(crate) fn parse_timeout(arg: &[u8]) -> Result<Option<std::time::Duration>, CommandError> {
    let seconds = std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|t| t.is_finite())
        .ok_or(CommandError::InvalidTimeout)?;
    if seconds < 0.0 {
        return Err(CommandError::NegativeTimeout);
    }
    if seconds == 0.0 {
        return Ok(None);
    }
    std::time::Duration::try_from_secs_f64(seconds)
        .map(Some)
        .map_err(|_| CommandError::InvalidTimeout)
}

/// Case-insensitive comparison of an argument against an option name.
pub(crate) fn arg_is(arg: &[u8], option: &str) -> bool {
    arg.eq_ignore_ascii_case(option.as_bytes())
}

/// Bulk string reply for a static text.
pub(crate) fn bulk(text: &'static str) -> RespValue {
    RespValue::BulkString(Bytes::from_static(text.as_bytes()))
}

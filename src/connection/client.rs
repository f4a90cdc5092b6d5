//! Per-connection state.
//!
//! A [`Client`] owns everything that belongs to one TCP connection except the
//! socket itself, which stays with the reactor. Keeping the socket out of the
//! client lets the command layer run entirely in memory.

use crate::protocol::{Request, RespValue};
use crate::storage::ListEnd;
use bytes::{Bytes, BytesMut};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;

/// Initial input buffer capacity
pub const INITIAL_BUFFER_SIZE: usize = 4096;

/// Free space below which the input buffer is grown before a read
const MIN_READ_SPACE: usize = 1024;

/// Input a blocked client may buffer before the reactor stops reading it
pub const MAX_BLOCKED_INPUT: usize = 64 * 1024;

/// Identifies a connection for the lifetime of the server. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Mutually exclusive connection states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientState {
    #[default]
    Normal,
    /// Between MULTI and EXEC/DISCARD: commands are queued
    InTransaction,
    /// Waiting in BLPOP/BRPOP: input stays buffered
    Blocked,
}

/// What a blocked client is waiting for.
#[derive(Debug, Clone)]
pub struct BlockState {
    pub db: usize,
    pub keys: Vec<Bytes>,
    pub end: ListEnd,
    /// `None` waits forever
    pub deadline: Option<Instant>,
}

#[derive(Debug)]
pub struct Client {
    pub id: ClientId,
    pub addr: SocketAddr,
    /// Selected database index
    pub db: usize,
    pub input: BytesMut,
    pub output: BytesMut,
    pub state: ClientState,
    /// Set when a watched key is modified, cleared by EXEC/DISCARD/UNWATCH
    pub watch_dirty: bool,
    /// (database, key) pairs this client watches
    pub watched: HashSet<(usize, Bytes)>,
    /// Requests queued since MULTI
    pub queued: VecDeque<Request>,
    pub blocking: Option<BlockState>,
    pub subscriptions: HashSet<Bytes>,
    /// Close the connection once the output buffer is flushed
    pub close_after_reply: bool,
}

impl Client {
    pub fn new(id: ClientId, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            db: 0,
            input: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            output: BytesMut::new(),
            state: ClientState::Normal,
            watch_dirty: false,
            watched: HashSet::new(),
            queued: VecDeque::new(),
            blocking: None,
            subscriptions: HashSet::new(),
            close_after_reply: false,
        }
    }

    /// Appends a serialized reply to the output buffer.
    pub fn reply(&mut self, value: &RespValue) {
        value.serialize_into(&mut self.output);
    }

    /// Appends bytes that are already in wire form.
    pub fn reply_raw(&mut self, bytes: &[u8]) {
        self.output.extend_from_slice(bytes);
    }

    pub fn has_pending_output(&self) -> bool {
        !self.output.is_empty()
    }

    /// Whether the reactor should read more from this connection.
    ///
    /// Reads stop while more than `output_limit` bytes of replies are
    /// unsent, and while a blocked client already holds
    /// [`MAX_BLOCKED_INPUT`] bytes it cannot execute yet.
    pub fn accepts_input(&self, output_limit: usize) -> bool {
        if self.close_after_reply || self.output.len() > output_limit {
            return false;
        }
        self.state != ClientState::Blocked || self.input.len() < MAX_BLOCKED_INPUT
    }

    pub fn is_subscribed(&self) -> bool {
        !self.subscriptions.is_empty()
    }

    /// Makes room for the next read, doubling the buffer when it runs low.
    pub fn reserve_input(&mut self) {
        let spare = self.input.capacity() - self.input.len();
        if spare < MIN_READ_SPACE {
            let grow = self.input.capacity().max(INITIAL_BUFFER_SIZE);
            self.input.reserve(grow);
        }
    }
}

//! Server State
//!
//! [`Server`] is the single context value that owns every piece of mutable
//! state: the keyspace, the client table, the pub/sub and blocking
//! registries, and the statistics. The reactor owns the server and the
//! sockets; everything in here is synchronous and runs on the reactor
//! thread, so no locking is needed anywhere.
//!
//! ## Request Flow
//!
//! ```text
//! feed() ──> process_input() ──> parse_request() ──> dispatch()
//!                                                       │
//!                      ┌────────────────────────────────┼───────────────────┐
//!                      ▼                                ▼                   ▼
//!              subscribe-mode error            queued (+QUEUED)         call()
//!                                                                         │
//!                                              arity, eviction, handler ──┘
//!                                                       │
//!                                                       ▼
//!                              reply ──> output buffer ──> after_command()
//!                                                         (serve blocked
//!                                                          waiters, dirty
//!                                                          watchers)
//! ```
//!
//! ## Time
//!
//! The server caches one `Instant` per reactor iteration. Every expiry and
//! idle-time decision made while handling that iteration's events uses the
//! same value.

pub mod blocking;
pub mod pubsub;

use crate::commands::{flags, CommandError, CommandTable, Reply};
use crate::config::Config;
use crate::connection::{BlockState, Client, ClientId, ClientState};
use crate::protocol::{parse_request, Request, RespValue};
use crate::storage::{active_expire_cycle, free_memory, ExpiryConfig, Keyspace};
use blocking::BlockingRegistry;
use bytes::{Buf, Bytes};
use pubsub::PubSub;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;
use tracing::{debug, error, trace, warn};

/// Buckets migrated per database on each maintenance tick
const REHASH_STEPS_PER_TICK: usize = 100;

/// Server-wide counters reported by INFO.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ServerStats {
    pub connections_received: u64,
    pub commands_processed: u64,
    pub evicted_keys: u64,
    pub keyspace_hits: u64,
    pub keyspace_misses: u64,
    pub rejected_writes: u64,
}

impl ServerStats {
    pub fn record_lookup(&mut self, hit: bool) {
        if hit {
            self.keyspace_hits += 1;
        } else {
            self.keyspace_misses += 1;
        }
    }
}

pub struct Server {
    pub(crate) config: Config,
    pub(crate) keyspace: Keyspace,
    pub(crate) clients: HashMap<ClientId, Client>,
    pub(crate) pubsub: PubSub,
    pub(crate) blocking: BlockingRegistry,
    commands: CommandTable,
    pub(crate) stats: ServerStats,
    pub(crate) now: Instant,
    pub(crate) started: Instant,
    pub(crate) rng: StdRng,
    expiry: ExpiryConfig,
    next_client_id: u64,
    /// Clients released from a blocking wait whose buffered input still
    /// needs processing
    unblocked: VecDeque<ClientId>,
    /// True while EXEC runs queued commands; blocking pops never block then
    pub(crate) in_exec: bool,
}

impl Server {
    pub fn new(config: Config) -> Self {
        let now = Instant::now();
        Self {
            keyspace: Keyspace::new(config.databases),
            config,
            clients: HashMap::new(),
            pubsub: PubSub::new(),
            blocking: BlockingRegistry::new(),
            commands: CommandTable::new(),
            stats: ServerStats::default(),
            now,
            started: now,
            rng: StdRng::from_entropy(),
            expiry: ExpiryConfig::default(),
            next_client_id: 1,
            unblocked: VecDeque::new(),
            in_exec: false,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn keyspace(&self) -> &Keyspace {
        &self.keyspace
    }

    pub fn stats(&self) -> ServerStats {
        self.stats
    }

    pub fn commands(&self) -> &CommandTable {
        &self.commands
    }

    // ========================================================================
    // Clock
    // ========================================================================

    pub fn now(&self) -> Instant {
        self.now
    }

    /// Re-reads the system clock. Called once per reactor iteration.
    pub fn refresh_clock(&mut self) {
        self.now = Instant::now();
    }

    /// Sets the cached clock explicitly.
    pub fn set_clock(&mut self, now: Instant) {
        self.now = now;
    }

    // ========================================================================
    // Clients
    // ========================================================================

    /// Registers a new connection on database 0.
    pub fn connect(&mut self, addr: SocketAddr) -> ClientId {
        let id = ClientId(self.next_client_id);
        self.next_client_id += 1;
        self.clients.insert(id, Client::new(id, addr));
        self.stats.connections_received += 1;
        id
    }

    /// Removes a connection and every registration it holds.
    pub fn disconnect(&mut self, id: ClientId) {
        self.unblock_client(id);
        self.unwatch_all(id);
        if let Some(client) = self.clients.remove(&id) {
            for channel in &client.subscriptions {
                self.pubsub.unsubscribe(channel, id);
            }
        }
        self.unblocked.retain(|c| *c != id);
    }

    pub fn client(&self, id: ClientId) -> Option<&Client> {
        self.clients.get(&id)
    }

    pub fn client_mut(&mut self, id: ClientId) -> Option<&mut Client> {
        self.clients.get_mut(&id)
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Number of clients waiting in a blocking pop.
    pub fn blocked_count(&self) -> usize {
        self.clients
            .values()
            .filter(|c| c.state == ClientState::Blocked)
            .count()
    }

    /// The calling client, for use inside command handlers.
    pub(crate) fn require_client(&mut self, id: ClientId) -> Result<&mut Client, CommandError> {
        self.clients
            .get_mut(&id)
            .ok_or_else(|| CommandError::Internal(format!("no client with id {}", id)))
    }

    /// Database selected by the calling client.
    pub(crate) fn client_db(&self, id: ClientId) -> Result<usize, CommandError> {
        self.clients
            .get(&id)
            .map(|c| c.db)
            .ok_or_else(|| CommandError::Internal(format!("no client with id {}", id)))
    }

    /// Appends bytes to a client's input buffer.
    pub fn feed(&mut self, id: ClientId, data: &[u8]) {
        if let Some(client) = self.clients.get_mut(&id) {
            client.input.extend_from_slice(data);
        }
    }

    /// Takes everything queued for the client so far.
    pub fn take_output(&mut self, id: ClientId) -> Bytes {
        self.clients
            .get_mut(&id)
            .map(|c| c.output.split().freeze())
            .unwrap_or_default()
    }

    // ========================================================================
    // Command execution
    // ========================================================================

    /// Executes every complete request buffered for `id`.
    ///
    /// Malformed input marks the connection for closing; the reactor drops it
    /// once pending output is flushed.
    pub fn process_input(&mut self, id: ClientId) {
        self.process_client(id);
        self.drain_unblocked();
    }

    fn process_client(&mut self, id: ClientId) {
        loop {
            let Some(client) = self.clients.get_mut(&id) else {
                return;
            };
            if client.state == ClientState::Blocked || client.close_after_reply {
                return;
            }

            let request = match parse_request(&client.input) {
                Ok(Some((request, consumed))) => {
                    client.input.advance(consumed);
                    request
                }
                Ok(None) => return,
                Err(err) => {
                    warn!(client = %id, addr = %client.addr, error = %err, "Protocol error, closing connection");
                    client.input.clear();
                    client.close_after_reply = true;
                    return;
                }
            };

            trace!(client = %id, command = %request.name(), args = request.args.len(), "Parsed request");
            self.execute(id, &request);
        }
    }

    /// Runs one request and writes its reply.
    pub fn execute(&mut self, id: ClientId, request: &Request) {
        let reply = self.dispatch(id, request);
        if let Some(client) = self.clients.get_mut(&id) {
            match &reply {
                Reply::Single(value) => client.reply(value),
                Reply::Multiple(values) => values.iter().for_each(|v| client.reply(v)),
                Reply::Blocked => {}
            }
        }
        self.after_command();
    }

    fn dispatch(&mut self, id: ClientId, request: &Request) -> Reply {
        let name = request.name();
        let spec = self.commands.get(&name).copied();

        let Some(client) = self.clients.get_mut(&id) else {
            return Reply::Multiple(Vec::new());
        };

        if client.is_subscribed() && !spec.is_some_and(|s| s.has_flag(flags::PUBSUB)) {
            return CommandError::SubscribeContext(name.to_ascii_lowercase()).into();
        }

        if client.state == ClientState::InTransaction
            && !spec.is_some_and(|s| s.has_flag(flags::NO_QUEUE))
        {
            client.queued.push_back(request.clone());
            return RespValue::queued().into();
        }

        self.call(id, request)
    }

    /// Looks up and runs a command, bypassing transaction queueing.
    pub(crate) fn call(&mut self, id: ClientId, request: &Request) -> Reply {
        let name = request.name();
        let Some(spec) = self.commands.get(&name).copied() else {
            let sent = String::from_utf8_lossy(&request.command).into_owned();
            return CommandError::UnknownCommand(sent).into();
        };

        if !spec.arity_ok(request.argc()) {
            return CommandError::WrongArity(name.to_ascii_lowercase()).into();
        }

        if spec.has_flag(flags::DENY_OOM) {
            match free_memory(
                &mut self.keyspace,
                self.config.eviction_policy,
                self.config.max_memory,
                self.now,
                &mut self.rng,
            ) {
                Ok(evicted) => self.stats.evicted_keys += evicted as u64,
                Err(oom) => {
                    self.stats.rejected_writes += 1;
                    debug!(client = %id, command = %name, used = oom.used, limit = oom.limit, "Write rejected, out of memory");
                    return CommandError::OutOfMemory.into();
                }
            }
        }

        self.stats.commands_processed += 1;
        let handler = spec.handler;
        match panic::catch_unwind(AssertUnwindSafe(|| handler(self, id, request))) {
            Ok(Ok(reply)) => reply,
            Ok(Err(err)) => err.into(),
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_default();
                error!(client = %id, command = %name, panic = %message, "Command handler panicked");
                CommandError::Internal(format!(
                    "internal error while executing '{}'",
                    name.to_ascii_lowercase()
                ))
                .into()
            }
        }
    }

    /// Work that follows every command: hand pushed elements to blocked
    /// clients and mark watchers of modified keys dirty.
    fn after_command(&mut self) {
        self.serve_blocked_clients();
        self.apply_invalidations();
    }

    fn apply_invalidations(&mut self) {
        for id in self.keyspace.take_invalidated() {
            if let Some(client) = self.clients.get_mut(&id) {
                client.watch_dirty = true;
            }
        }
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Drops every watch held by `id` and clears its dirty bit.
    pub(crate) fn unwatch_all(&mut self, id: ClientId) {
        let Some(client) = self.clients.get_mut(&id) else {
            return;
        };
        let watched = std::mem::take(&mut client.watched);
        client.watch_dirty = false;
        for (db, key) in watched {
            self.keyspace.db_mut(db).unwatch(&key, id);
        }
    }

    // ========================================================================
    // Blocking pops
    // ========================================================================

    /// Suspends `id` until one of the keys receives data or the deadline passes.
    pub(crate) fn block_client(&mut self, id: ClientId, state: BlockState) {
        let Some(client) = self.clients.get_mut(&id) else {
            return;
        };
        self.blocking.block(id, state.db, &state.keys);
        debug!(client = %id, keys = state.keys.len(), "Client blocked");
        client.state = ClientState::Blocked;
        client.blocking = Some(state);
    }

    /// Releases `id` from a blocking wait. Returns false if it was not blocked.
    fn unblock_client(&mut self, id: ClientId) -> bool {
        let Some(client) = self.clients.get_mut(&id) else {
            return false;
        };
        let Some(state) = client.blocking.take() else {
            return false;
        };
        client.state = ClientState::Normal;
        self.blocking.unblock(id, state.db, &state.keys);
        true
    }

    /// Hands elements pushed onto awaited keys to the longest-waiting clients.
    fn serve_blocked_clients(&mut self) {
        for (db, key) in self.blocking.take_ready() {
            while let Some(waiter) = self.blocking.first_waiter(db, &key) {
                let end = match self.clients.get(&waiter).and_then(|c| c.blocking.as_ref()) {
                    Some(state) => state.end,
                    None => {
                        self.blocking.unblock(waiter, db, std::slice::from_ref(&key));
                        continue;
                    }
                };

                let element = match self.keyspace.db_mut(db).list_pop(&key, end, self.now) {
                    Ok(Some(element)) => element,
                    _ => break,
                };

                self.unblock_client(waiter);
                if let Some(client) = self.clients.get_mut(&waiter) {
                    client.reply(&RespValue::array(vec![
                        RespValue::BulkString(key.clone()),
                        RespValue::BulkString(element),
                    ]));
                }
                debug!(client = %waiter, key = %String::from_utf8_lossy(&key), "Served blocked client");
                self.unblocked.push_back(waiter);
            }
        }
    }

    /// Replies nil to every blocked client whose deadline has passed.
    fn handle_blocked_timeouts(&mut self) {
        let now = self.now;
        let mut expired: Vec<ClientId> = self
            .clients
            .values()
            .filter(|c| {
                matches!(&c.blocking, Some(BlockState { deadline: Some(d), .. }) if *d <= now)
            })
            .map(|c| c.id)
            .collect();
        expired.sort_unstable();

        for id in expired {
            if self.unblock_client(id) {
                if let Some(client) = self.clients.get_mut(&id) {
                    client.reply(&RespValue::Null);
                }
                debug!(client = %id, "Blocking pop timed out");
                self.unblocked.push_back(id);
            }
        }
    }

    fn drain_unblocked(&mut self) {
        while let Some(id) = self.unblocked.pop_front() {
            self.process_client(id);
        }
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Periodic maintenance: active expiry, blocked-client timeouts and
    /// incremental rehashing.
    pub fn cron(&mut self) {
        let expired = active_expire_cycle(&mut self.keyspace, self.now, &self.expiry, &mut self.rng);
        if expired.expired > 0 {
            trace!(expired = expired.expired, "Active expiry cycle");
        }
        self.handle_blocked_timeouts();
        self.keyspace.rehash_step(REHASH_STEPS_PER_TICK);
        self.apply_invalidations();
        self.drain_unblocked();
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("clients", &self.clients.len())
            .field("keys", &self.keyspace.total_keys())
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn server() -> Server {
        Server::new(Config::default())
    }

    pub fn connect(server: &mut Server) -> ClientId {
        server.connect("127.0.0.1:40000".parse().unwrap())
    }

    pub fn encode(parts: &[&str]) -> Vec<u8> {
        Request::new(
            Bytes::from(parts[0].to_string()),
            parts[1..].iter().map(|p| Bytes::from(p.to_string())).collect(),
        )
        .encode()
    }

    /// Sends one command and returns everything written to the client.
    pub fn run(server: &mut Server, id: ClientId, parts: &[&str]) -> Vec<u8> {
        server.feed(id, &encode(parts));
        server.process_input(id);
        server.take_output(id).to_vec()
    }

    pub fn bulk(s: &str) -> RespValue {
        RespValue::bulk_string(Bytes::from(s.to_string()))
    }
}

//! # BoltKV - A Single-Threaded In-Memory Key-Value Server
//!
//! BoltKV speaks the Redis serialization protocol (RESP) and keeps every
//! piece of state on one thread: a reactor waits for socket readiness and a
//! periodic tick, and commands run to completion between two waits. Nothing
//! is locked and nothing is shared.
//!
//! ## Features
//!
//! - **Redis-Compatible**: RESP on the wire, 16 numbered databases
//! - **Strings and Lists**: lists are stored in a compact byte-packed buffer
//! - **TTL Support**: lazy expiry on access plus sampled active expiry
//! - **Eviction**: sampled LRU/TTL/random policies under a memory bound
//! - **Transactions**: MULTI/EXEC/DISCARD with optimistic WATCH
//! - **Pub/Sub**: SUBSCRIBE/UNSUBSCRIBE/PUBLISH
//! - **Blocking Pops**: BLPOP/BRPOP served in FIFO order
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                               Reactor                                   │
//! │   accept ─┐        readable ─┐          writable ─┐        tick ─┐      │
//! └───────────┼──────────────────┼────────────────────┼──────────────┼──────┘
//!             ▼                  ▼                    ▼              ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                               Server                                    │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌──────────────┐                 │
//! │  │ RESP parser │───>│  dispatch   │───>│ CommandTable │                 │
//! │  └─────────────┘    └─────────────┘    └──────┬───────┘                 │
//! │                                               │                         │
//! │                                               ▼                         │
//! │  ┌──────────┐ ┌──────────┐   ┌──────────────────────────────────────┐   │
//! │  │  PubSub  │ │ Blocking │   │              Keyspace                │   │
//! │  │ channels │ │ waiters  │   │  ┌──────┐ ┌──────┐       ┌───────┐   │   │
//! │  └──────────┘ └──────────┘   │  │ db 0 │ │ db 1 │  ...  │ db 15 │   │   │
//! │                              │  └──────┘ └──────┘       └───────┘   │   │
//! │                              └──────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use boltkv::{Config, Reactor};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config {
//!         port: 6380,
//!         ..Config::default()
//!     };
//!     let mut reactor = Reactor::bind(config).await?;
//!     reactor
//!         .run(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! The server can also be driven without sockets, which is how most of the
//! tests work:
//!
//! ```
//! use boltkv::{Config, Server};
//!
//! let mut server = Server::new(Config::default());
//! let client = server.connect("127.0.0.1:50000".parse().unwrap());
//!
//! server.feed(client, b"*3\r\n$3\r\nSET\r\n$4\r\nname\r\n$4\r\nAriz\r\n");
//! server.feed(client, b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n");
//! server.process_input(client);
//!
//! assert_eq!(&server.take_output(client)[..], b"+OK\r\n$4\r\nAriz\r\n");
//! ```
//!
//! ## Module Overview
//!
//! - [`protocol`]: RESP request parser and reply types
//! - [`storage`]: databases, dictionaries, compact lists, expiry, eviction
//! - [`commands`]: the command table and every command handler
//! - [`server`]: the state owner, dispatch, pub/sub and blocking registries
//! - [`connection`]: client state and the reactor
//! - [`config`]: server configuration

pub mod commands;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod server;
pub mod storage;

// Re-export commonly used types for convenience
pub use commands::{CommandError, CommandTable};
pub use config::{Config, ConfigError};
pub use connection::{ClientId, ConnectionError, Reactor};
pub use protocol::{parse_request, ParseError, Request, RespValue};
pub use server::Server;
pub use storage::{EvictionPolicy, Keyspace};

/// The default port BoltKV listens on (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// The default host BoltKV binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of BoltKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

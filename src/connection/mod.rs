//! Connection Module
//!
//! Everything between the TCP sockets and the [`Server`](crate::server::Server):
//!
//! - [`client`]: per-connection state (buffers, selected database,
//!   transaction queue, watches, subscriptions, blocking state)
//! - [`reactor`]: the single-threaded event loop that accepts connections,
//!   moves bytes in and out of client buffers and drives the periodic tick
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          Reactor                             │
//! │                                                              │
//! │   TcpListener        TcpStream x N          tick timer       │
//! │       │                   │                     │            │
//! │       ▼                   ▼                     ▼            │
//! │   connect()     input ──> process_input()     cron()         │
//! │                          output <──┘                         │
//! └──────────────────────────────┬───────────────────────────────┘
//!                                │ owns
//!                                ▼
//!                    Server { clients, keyspace, ... }
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use boltkv::config::Config;
//! use boltkv::connection::Reactor;
//!
//! # async fn example() -> Result<(), boltkv::connection::ConnectionError> {
//! let mut reactor = Reactor::bind(Config::default()).await?;
//! reactor.run(async { let _ = tokio::signal::ctrl_c().await; }).await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod reactor;

pub use client::{BlockState, Client, ClientId, ClientState};
pub use reactor::{ConnectionError, Reactor};

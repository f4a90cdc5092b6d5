//! Storage Engine Module
//!
//! Everything that holds data lives here: the logical databases, the
//! dictionary they are built on, the compact list encoding, and the
//! expiry and eviction machinery.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Keyspace                            │
//! │  ┌────────────┐ ┌────────────┐ ┌────────────┐               │
//! │  │ Database 0 │ │ Database 1 │ │    ...15   │               │
//! │  │  entries   │ │  entries   │ │            │               │
//! │  │  expires   │ │  expires   │ │            │               │
//! │  │  watchers  │ │  watchers  │ │            │               │
//! │  └────────────┘ └────────────┘ └────────────┘               │
//! └─────────────────────────────────────────────────────────────┘
//!        ▲                    ▲
//!        │                    │
//!  active expiry        eviction (sampled
//!  (every tick)         LRU / TTL / random)
//! ```
//!
//! ## Features
//!
//! - **Incremental Rehash**: dictionaries grow without a long pause
//! - **Lazy Expiry**: expired keys are removed when they are touched
//! - **Active Expiry**: the server tick samples and removes expired keys
//! - **Eviction**: sampled victims when memory reaches its bound
//! - **Compact Lists**: list values packed into one contiguous buffer
//!
//! ## Example
//!
//! ```
//! use boltkv::storage::{Keyspace, Value};
//! use bytes::Bytes;
//! use std::time::{Duration, Instant};
//!
//! let mut keyspace = Keyspace::new(16);
//! let now = Instant::now();
//!
//! let db = keyspace.db_mut(0);
//! db.set(Bytes::from("name"), Value::Str(Bytes::from("Ariz")), now);
//! db.set_expire(b"name", now + Duration::from_secs(1), now);
//!
//! assert!(db.get(b"name", now).is_some());
//! assert!(db.get(b"name", now + Duration::from_secs(2)).is_none());
//! ```

pub mod compact_list;
pub mod db;
pub mod dict;
pub mod eviction;
pub mod expiry;
pub mod keyspace;
pub mod pattern;
pub mod value;

// Re-export commonly used types
pub use compact_list::{CompactList, ListError};
pub use db::{Database, ListEnd, StorageError, TtlStatus};
pub use dict::Dict;
pub use eviction::{free_memory, EvictionPolicy, OutOfMemory};
pub use expiry::{active_expire_cycle, ExpiryConfig, ExpiryStats};
pub use keyspace::{Keyspace, DEFAULT_DATABASES};
pub use pattern::GlobPattern;
pub use value::{Encoding, Entry, ObjectKind, Value};

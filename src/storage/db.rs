//! A single logical database.
//!
//! Each database owns a primary dictionary (key → [`Entry`]), an expires
//! dictionary (key → absolute deadline) and the reverse watch index used by
//! optimistic transactions. The expires key set is always a subset of the
//! primary key set: every deletion path goes through [`Database::delete_key`].
//!
//! Methods take the current time explicitly. The server caches one `Instant`
//! per event-loop iteration and passes it down, which keeps expiry decisions
//! consistent within a command and makes them testable.

use crate::connection::ClientId;
use crate::storage::compact_list::{CompactList, ListError};
use crate::storage::dict::Dict;
use crate::storage::pattern::GlobPattern;
use crate::storage::value::{estimate_size, Entry, Value};
use bytes::Bytes;
use rand::Rng;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors raised by typed operations on a key.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    #[error(transparent)]
    List(#[from] ListError),
}

/// Which end of a list an operation works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListEnd {
    Head,
    Tail,
}

/// Result of a TTL query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlStatus {
    /// The key does not exist
    Missing,
    /// The key exists without a deadline
    Persistent,
    /// Time left before the key expires
    Remaining(Duration),
}

/// Outcome of one active-expire pass over a sample of volatile keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpireSample {
    pub sampled: usize,
    pub expired: usize,
}

#[derive(Debug)]
pub struct Database {
    id: usize,
    entries: Dict<Entry>,
    expires: Dict<Instant>,
    watchers: HashMap<Bytes, Vec<ClientId>>,
    /// Watchers of keys modified since the last drain
    invalidated: Vec<ClientId>,
    used_memory: usize,
    expired_keys: u64,
}

impl Database {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            entries: Dict::new(),
            expires: Dict::new(),
            watchers: HashMap::new(),
            invalidated: Vec::new(),
            used_memory: 0,
            expired_keys: 0,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Number of keys, including ones past their deadline not yet reclaimed.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of keys carrying a deadline.
    pub fn expires_len(&self) -> usize {
        self.expires.len()
    }

    pub fn used_memory(&self) -> usize {
        self.used_memory
    }

    /// Keys removed because their deadline passed.
    pub fn expired_keys(&self) -> u64 {
        self.expired_keys
    }

    // ========================================================================
    // Expiration
    // ========================================================================

    /// Deletes `key` if its deadline has passed. Returns true if it did.
    pub fn expire_if_needed(&mut self, key: &[u8], now: Instant) -> bool {
        match self.expires.get(key) {
            Some(&deadline) if deadline <= now => {
                self.delete_key(key);
                self.expired_keys += 1;
                true
            }
            _ => false,
        }
    }

    /// Sets an absolute deadline on an existing key.
    pub fn set_expire(&mut self, key: &[u8], deadline: Instant, now: Instant) -> bool {
        self.expire_if_needed(key, now);
        if !self.entries.contains_key(key) {
            return false;
        }
        self.expires.insert(Bytes::copy_from_slice(key), deadline);
        self.signal_modified(key);
        true
    }

    /// Removes the deadline from `key`. Returns true if one was removed.
    pub fn persist(&mut self, key: &[u8], now: Instant) -> bool {
        self.expire_if_needed(key, now);
        if self.expires.remove(key).is_some() {
            self.signal_modified(key);
            true
        } else {
            false
        }
    }

    pub fn ttl(&mut self, key: &[u8], now: Instant) -> TtlStatus {
        self.expire_if_needed(key, now);
        if !self.entries.contains_key(key) {
            return TtlStatus::Missing;
        }
        match self.expires.get(key) {
            Some(&deadline) => TtlStatus::Remaining(deadline.saturating_duration_since(now)),
            None => TtlStatus::Persistent,
        }
    }

    /// Deadline of `key`, if any.
    pub fn deadline(&self, key: &[u8]) -> Option<Instant> {
        self.expires.get(key).copied()
    }

    /// Samples up to `count` volatile keys and deletes the expired ones.
    pub fn expire_sample<R: Rng + ?Sized>(
        &mut self,
        count: usize,
        now: Instant,
        rng: &mut R,
    ) -> ExpireSample {
        let sample = self.expires.sample_keys(count, rng);
        let mut outcome = ExpireSample {
            sampled: sample.len(),
            expired: 0,
        };
        for key in sample {
            if self.expire_if_needed(&key, now) {
                outcome.expired += 1;
            }
        }
        outcome
    }

    // ========================================================================
    // Key access
    // ========================================================================

    /// Looks up `key`, expiring it lazily and refreshing its access time.
    pub fn get(&mut self, key: &[u8], now: Instant) -> Option<&Value> {
        self.expire_if_needed(key, now);
        self.entries.get_mut(key).map(|entry| {
            entry.last_access = now;
            &entry.value
        })
    }

    pub fn contains(&mut self, key: &[u8], now: Instant) -> bool {
        self.expire_if_needed(key, now);
        self.entries.contains_key(key)
    }

    /// Reads an entry without touching its access time or expiring it.
    pub fn peek(&self, key: &[u8]) -> Option<&Entry> {
        self.entries.get(key)
    }

    /// Stores `value` under `key`, clearing any deadline.
    pub fn set(&mut self, key: Bytes, value: Value, now: Instant) {
        self.expires.remove(&key);
        self.store(key, value, now);
    }

    /// Stores `value` under `key`, keeping an existing deadline.
    pub fn set_keep_ttl(&mut self, key: Bytes, value: Value, now: Instant) {
        self.expire_if_needed(&key, now);
        self.store(key, value, now);
    }

    fn store(&mut self, key: Bytes, value: Value, now: Instant) {
        self.signal_modified(&key);
        let added = estimate_size(&key, &value);
        if let Some(old) = self.entries.insert(key.clone(), Entry::new(value, now)) {
            self.used_memory -= estimate_size(&key, &old.value);
        }
        self.used_memory += added;
    }

    /// Deletes `key` if it is live. Returns true if something was removed.
    pub fn delete(&mut self, key: &[u8], now: Instant) -> bool {
        if self.expire_if_needed(key, now) {
            return false;
        }
        self.delete_key(key)
    }

    /// Removes `key` from both dictionaries regardless of its deadline.
    pub fn delete_key(&mut self, key: &[u8]) -> bool {
        self.expires.remove(key);
        match self.entries.remove(key) {
            Some(entry) => {
                self.used_memory -= estimate_size(key, &entry.value);
                self.signal_modified(key);
                true
            }
            None => false,
        }
    }

    /// Live keys matching `pattern`.
    pub fn keys(&self, pattern: &GlobPattern, now: Instant) -> Vec<Bytes> {
        let match_all = pattern.matches_all();
        self.entries
            .keys()
            .filter(|key| !matches!(self.expires.get(key), Some(&d) if d <= now))
            .filter(|key| match_all || pattern.matches(key))
            .cloned()
            .collect()
    }

    /// Removes every key, invalidating watchers of keys that existed.
    pub fn flush(&mut self) {
        let watched: Vec<Bytes> = self
            .watchers
            .keys()
            .filter(|k| self.entries.contains_key(k))
            .cloned()
            .collect();
        for key in watched {
            self.signal_modified(&key);
        }
        self.entries.clear();
        self.expires.clear();
        self.used_memory = 0;
    }

    /// Samples keys for eviction. `volatile` restricts to keys with a deadline.
    pub fn sample_keys<R: Rng + ?Sized>(
        &self,
        count: usize,
        volatile: bool,
        rng: &mut R,
    ) -> Vec<Bytes> {
        if volatile {
            self.expires.sample_keys(count, rng)
        } else {
            self.entries.sample_keys(count, rng)
        }
    }

    /// Advances incremental rehashing of both dictionaries.
    pub fn rehash_step(&mut self, steps: usize) {
        self.entries.rehash_step(steps);
        self.expires.rehash_step(steps);
    }

    // ========================================================================
    // Lists
    // ========================================================================

    /// Pushes `values` one at a time onto `end`, creating the list if needed.
    ///
    /// The whole batch is validated first: on error the key, the memory
    /// estimate and the watchers are left untouched. Returns the new length.
    pub fn list_push(
        &mut self,
        key: &[u8],
        values: &[Bytes],
        end: ListEnd,
        now: Instant,
    ) -> Result<usize, StorageError> {
        self.expire_if_needed(key, now);

        match self.entries.get(key).map(|entry| &entry.value) {
            Some(Value::Str(_)) => return Err(StorageError::WrongType),
            Some(Value::List(list)) => list.check_batch(values)?,
            None => CompactList::new().check_batch(values)?,
        }
        if values.is_empty() {
            return Ok(self.list(key, now)?.map_or(0, |list| list.len()));
        }

        if !self.entries.contains_key(key) {
            self.store(
                Bytes::copy_from_slice(key),
                Value::List(CompactList::new()),
                now,
            );
        }

        let Some(entry) = self.entries.get_mut(key) else {
            return Ok(0);
        };
        let Value::List(list) = &mut entry.value else {
            return Err(StorageError::WrongType);
        };
        entry.last_access = now;

        let before = list.blob_len();
        for value in values {
            match end {
                ListEnd::Head => list.push_head(value)?,
                ListEnd::Tail => list.push_tail(value)?,
            }
        }
        let after = list.blob_len();
        let len = list.len();

        self.used_memory = self.used_memory + after - before;
        self.signal_modified(key);
        Ok(len)
    }

    /// Pops one element from `end`, deleting the key once the list is empty.
    pub fn list_pop(
        &mut self,
        key: &[u8],
        end: ListEnd,
        now: Instant,
    ) -> Result<Option<Bytes>, StorageError> {
        self.expire_if_needed(key, now);

        let Some(entry) = self.entries.get_mut(key) else {
            return Ok(None);
        };
        let Value::List(list) = &mut entry.value else {
            return Err(StorageError::WrongType);
        };
        entry.last_access = now;

        let before = list.blob_len();
        let popped = match end {
            ListEnd::Head => list.pop_head(),
            ListEnd::Tail => list.pop_tail(),
        };
        let after = list.blob_len();
        let empty = list.is_empty();

        self.used_memory = self.used_memory + after - before;
        if popped.is_some() {
            self.signal_modified(key);
        }
        if empty {
            self.delete_key(key);
        }
        Ok(popped)
    }

    /// Borrows the list stored at `key`, `None` if the key is missing.
    pub fn list(&mut self, key: &[u8], now: Instant) -> Result<Option<&CompactList>, StorageError> {
        match self.get(key, now) {
            None => Ok(None),
            Some(Value::List(list)) => Ok(Some(list)),
            Some(Value::Str(_)) => Err(StorageError::WrongType),
        }
    }

    // ========================================================================
    // Watches
    // ========================================================================

    /// Registers `client` as watching `key`.
    pub fn watch(&mut self, key: Bytes, client: ClientId) {
        let watchers = self.watchers.entry(key).or_default();
        if !watchers.contains(&client) {
            watchers.push(client);
        }
    }

    /// Removes `client` from the watchers of `key`.
    pub fn unwatch(&mut self, key: &[u8], client: ClientId) {
        if let Some(watchers) = self.watchers.get_mut(key) {
            watchers.retain(|c| *c != client);
            if watchers.is_empty() {
                self.watchers.remove(key);
            }
        }
    }

    pub fn watchers(&self, key: &[u8]) -> &[ClientId] {
        self.watchers.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Marks every watcher of `key` for invalidation.
    fn signal_modified(&mut self, key: &[u8]) {
        if let Some(watchers) = self.watchers.get(key) {
            self.invalidated.extend_from_slice(watchers);
        }
    }

    /// Drains the clients whose watched keys changed.
    pub fn take_invalidated(&mut self) -> Vec<ClientId> {
        std::mem::take(&mut self.invalidated)
    }
}

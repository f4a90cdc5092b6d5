//! Waiters for blocking list pops.
//!
//! Each (database, key) pair has a FIFO of clients waiting on it, so the
//! longest-waiting client is served first. A push to a key with waiters
//! marks the key ready; the server serves ready keys right after the
//! command that caused the push.

use crate::connection::ClientId;
use bytes::Bytes;
use std::collections::{HashMap, HashSet, VecDeque};

type WaitKey = (usize, Bytes);

#[derive(Debug, Default)]
pub struct BlockingRegistry {
    waiters: HashMap<WaitKey, VecDeque<ClientId>>,
    ready: Vec<WaitKey>,
    ready_set: HashSet<WaitKey>,
}

impl BlockingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `client` to the waiter queue of every key in `keys`.
    pub fn block(&mut self, client: ClientId, db: usize, keys: &[Bytes]) {
        for key in keys {
            let queue = self.waiters.entry((db, key.clone())).or_default();
            if !queue.contains(&client) {
                queue.push_back(client);
            }
        }
    }

    /// Removes `client` from the waiter queues of `keys`.
    pub fn unblock(&mut self, client: ClientId, db: usize, keys: &[Bytes]) {
        for key in keys {
            let wait_key = (db, key.clone());
            if let Some(queue) = self.waiters.get_mut(&wait_key) {
                queue.retain(|c| *c != client);
                if queue.is_empty() {
                    self.waiters.remove(&wait_key);
                }
            }
        }
    }

    /// Records that `key` received data. Ignored when nobody waits on it.
    pub fn signal_ready(&mut self, db: usize, key: &[u8]) {
        let wait_key = (db, Bytes::copy_from_slice(key));
        if self.waiters.contains_key(&wait_key) && self.ready_set.insert(wait_key.clone()) {
            self.ready.push(wait_key);
        }
    }

    /// Drains the keys signalled since the last call, in signal order.
    pub fn take_ready(&mut self) -> Vec<(usize, Bytes)> {
        self.ready_set.clear();
        std::mem::take(&mut self.ready)
    }

    /// The longest-waiting client on `key`.
    pub fn first_waiter(&self, db: usize, key: &Bytes) -> Option<ClientId> {
        self.waiters
            .get(&(db, key.clone()))
            .and_then(|queue| queue.front().copied())
    }

    #[cfg(test)]
    pub fn waiter_count(&self, db: usize, key: &Bytes) -> usize {
        self.waiters
            .get(&(db, key.clone()))
            .map_or(0, VecDeque::len)
    }

    /// Number of keys with at least one waiter.
    pub fn key_count(&self) -> usize {
        self.waiters.len()
    }
}

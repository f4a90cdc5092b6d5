//! Channel to subscriber registry.
//!
//! The registry only tracks who listens where. Delivery is done by the
//! server, which owns the clients' output buffers.

use crate::connection::ClientId;
use bytes::Bytes;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct PubSub {
    channels: HashMap<Bytes, Vec<ClientId>>,
}

impl PubSub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `client` to `channel`. Returns false if it was already subscribed.
    pub fn subscribe(&mut self, channel: Bytes, client: ClientId) -> bool {
        let subscribers = self.channels.entry(channel).or_default();
        if subscribers.contains(&client) {
            return false;
        }
        subscribers.push(client);
        true
    }

    /// Removes `client` from `channel`. Returns false if it was not subscribed.
    pub fn unsubscribe(&mut self, channel: &[u8], client: ClientId) -> bool {
        let Some(subscribers) = self.channels.get_mut(channel) else {
            return false;
        };
        let before = subscribers.len();
        subscribers.retain(|c| *c != client);
        let removed = subscribers.len() != before;
        if subscribers.is_empty() {
            self.channels.remove(channel);
        }
        removed
    }

    /// Current subscribers of `channel`, in subscription order.
    pub fn subscribers(&self, channel: &[u8]) -> &[ClientId] {
        self.channels
            .get(channel)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Number of channels with at least one subscriber.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

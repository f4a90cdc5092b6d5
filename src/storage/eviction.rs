//! Memory-pressure eviction.
//!
//! When estimated usage reaches the configured bound, keys are deleted until
//! usage drops back below it. Victims are chosen by sampling: a handful of
//! candidate keys is drawn from every database and the best one according to
//! the policy is removed. Sampling keeps each decision O(1) while still
//! approximating true LRU / TTL ordering well.

use crate::storage::keyspace::Keyspace;
use bytes::Bytes;
use rand::seq::SliceRandom;
use rand::Rng;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

/// Candidates sampled per database for each eviction.
pub const EVICTION_SAMPLES: usize = 5;

/// What to do when memory usage reaches the bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionPolicy {
    /// Reject memory-sensitive writes
    #[default]
    NoEviction,
    /// Evict any key at random
    AllKeysRandom,
    /// Evict the key idle for the longest time
    AllKeysLru,
    /// Evict a random key that has a deadline
    VolatileRandom,
    /// Evict the longest-idle key that has a deadline
    VolatileLru,
    /// Evict the key closest to its deadline
    VolatileTtl,
}

impl EvictionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvictionPolicy::NoEviction => "noeviction",
            EvictionPolicy::AllKeysRandom => "allkeys-random",
            EvictionPolicy::AllKeysLru => "allkeys-lru",
            EvictionPolicy::VolatileRandom => "volatile-random",
            EvictionPolicy::VolatileLru => "volatile-lru",
            EvictionPolicy::VolatileTtl => "volatile-ttl",
        }
    }

    /// True if only keys with a deadline are candidates.
    pub fn is_volatile(&self) -> bool {
        matches!(
            self,
            EvictionPolicy::VolatileRandom | EvictionPolicy::VolatileLru | EvictionPolicy::VolatileTtl
        )
    }
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown eviction policy '{0}'")]
pub struct UnknownPolicy(pub String);

impl FromStr for EvictionPolicy {
    type Err = UnknownPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "noeviction" | "no-eviction" => Ok(EvictionPolicy::NoEviction),
            "allkeys-random" => Ok(EvictionPolicy::AllKeysRandom),
            "allkeys-lru" => Ok(EvictionPolicy::AllKeysLru),
            "volatile-random" => Ok(EvictionPolicy::VolatileRandom),
            "volatile-lru" => Ok(EvictionPolicy::VolatileLru),
            "volatile-ttl" => Ok(EvictionPolicy::VolatileTtl),
            _ => Err(UnknownPolicy(s.to_string())),
        }
    }
}

/// Eviction could not bring usage under the bound.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("could not free memory: {used} bytes used, limit {limit}")]
pub struct OutOfMemory {
    pub used: usize,
    pub limit: usize,
}

struct Candidate {
    db: usize,
    key: Bytes,
    idle: Duration,
    deadline: Option<Instant>,
}

/// Deletes keys until usage is below `max_memory`.
///
/// Returns the number of keys evicted. A `max_memory` of 0 means unlimited.
pub fn free_memory<R: Rng + ?Sized>(
    keyspace: &mut Keyspace,
    policy: EvictionPolicy,
    max_memory: usize,
    now: Instant,
    rng: &mut R,
) -> Result<usize, OutOfMemory> {
    if max_memory == 0 || keyspace.used_memory() < max_memory {
        return Ok(0);
    }
    if policy == EvictionPolicy::NoEviction {
        return Err(OutOfMemory {
            used: keyspace.used_memory(),
            limit: max_memory,
        });
    }

    let mut evicted = 0;
    while keyspace.used_memory() >= max_memory {
        let Some(victim) = pick_victim(keyspace, policy, now, rng) else {
            return Err(OutOfMemory {
                used: keyspace.used_memory(),
                limit: max_memory,
            });
        };

        keyspace.db_mut(victim.db).delete_key(&victim.key);
        evicted += 1;
        debug!(
            db = victim.db,
            key = %String::from_utf8_lossy(&victim.key),
            policy = %policy,
            "Evicted key"
        );
    }

    Ok(evicted)
}

/// Draws [`EVICTION_SAMPLES`] keys from every database, so up to
/// `EVICTION_SAMPLES * databases` candidates per round, and picks one by
/// `policy`.
fn pick_victim<R: Rng + ?Sized>(
    keyspace: &Keyspace,
    policy: EvictionPolicy,
    now: Instant,
    rng: &mut R,
) -> Option<Candidate> {
    let mut candidates = Vec::new();
    for db in keyspace.iter() {
        for key in db.sample_keys(EVICTION_SAMPLES, policy.is_volatile(), rng) {
            let Some(entry) = db.peek(&key) else {
                continue;
            };
            candidates.push(Candidate {
                db: db.id(),
                idle: entry.idle_time(now),
                deadline: db.deadline(&key),
                key,
            });
        }
    }

    match policy {
        EvictionPolicy::NoEviction => None,
        EvictionPolicy::AllKeysRandom | EvictionPolicy::VolatileRandom => {
            candidates.shuffle(rng);
            candidates.pop()
        }
        EvictionPolicy::AllKeysLru | EvictionPolicy::VolatileLru => {
            candidates.into_iter().max_by_key(|c| c.idle)
        }
        EvictionPolicy::VolatileTtl => candidates
            .into_iter()
            .filter(|c| c.deadline.is_some())
            .min_by_key(|c| c.deadline),
    }
}

//! Active Expiry
//!
//! Lazy expiry (checking on access) is cheap but never reclaims a key that is
//! not read again. The active cycle runs on every server tick and samples keys
//! that carry a deadline, deleting the ones that are past it.
//!
//! ## Adaptive Rounds
//!
//! A single sample per tick is enough when few keys are expiring. When a large
//! share of a sample turns out to be expired, the database probably holds many
//! more, so the cycle keeps sampling that database until the expired fraction
//! drops below the threshold or the round limit is reached.

use crate::storage::keyspace::Keyspace;
use rand::Rng;
use std::time::Instant;
use tracing::{debug, trace};

/// Configuration for the active expiry cycle.
#[derive(Debug, Clone)]
pub struct ExpiryConfig {
    /// Volatile keys sampled per round (default: 20)
    pub sample_size: usize,

    /// If more than this fraction of a sample was expired, sample again
    pub repeat_threshold: f64,

    /// Upper bound on rounds per database per cycle
    pub max_rounds: usize,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            sample_size: 20,
            repeat_threshold: 0.25,
            max_rounds: 16,
        }
    }
}

/// What one cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpiryStats {
    pub sampled: usize,
    pub expired: usize,
}

/// Runs one active expiry cycle over every database.
pub fn active_expire_cycle<R: Rng + ?Sized>(
    keyspace: &mut Keyspace,
    now: Instant,
    config: &ExpiryConfig,
    rng: &mut R,
) -> ExpiryStats {
    let mut stats = ExpiryStats::default();

    for db in keyspace.iter_mut() {
        for round in 0..config.max_rounds {
            if db.expires_len() == 0 {
                break;
            }

            let sample = db.expire_sample(config.sample_size, now, rng);
            stats.sampled += sample.sampled;
            stats.expired += sample.expired;

            let rate = sample.expired as f64 / sample.sampled.max(1) as f64;
            if rate <= config.repeat_threshold {
                break;
            }
            trace!(
                db = db.id(),
                round = round,
                rate = %format!("{:.2}%", rate * 100.0),
                "High expiry rate, sampling again"
            );
        }
    }

    if stats.expired > 0 {
        debug!(
            expired = stats.expired,
            sampled = stats.sampled,
            keys_remaining = keyspace.total_keys(),
            "Expired keys cleaned up"
        );
    }

    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::value::Value;
    use bytes::Bytes;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::time::Duration;

    fn populate(keyspace: &mut Keyspace, db: usize, count: usize, ttl: Option<Duration>, now: Instant) {
        for i in 0..count {
            let key = Bytes::from(format!("key{}", i));
            let db = keyspace.db_mut(db);
            db.set(key.clone(), Value::Str(Bytes::from("value")), now);
            if let Some(ttl) = ttl {
                db.set_expire(&key, now + ttl, now);
            }
        }
    }

    #[test]
    fn test_cycle_cleans_expired_keys() {
        let mut keyspace = Keyspace::new(2);
        let mut rng = StdRng::seed_from_u64(11);
        let now = Instant::now();

        populate(&mut keyspace, 0, 10, Some(Duration::from_millis(50)), now);
        keyspace
            .db_mut(0)
            .set(Bytes::from("persistent"), Value::Str(Bytes::from("value")), now);
        assert_eq!(keyspace.total_keys(), 11);

        let stats = active_expire_cycle(
            &mut keyspace,
            now + Duration::from_millis(100),
            &ExpiryConfig::default(),
            &mut rng,
        );

        assert_eq!(stats.expired, 10);
        assert_eq!(keyspace.total_keys(), 1);
        assert!(keyspace.db(0).peek(b"persistent").is_some());
    }

    #[test]
    fn test_cycle_leaves_live_keys() {
        let mut keyspace = Keyspace::new(1);
        let mut rng = StdRng::seed_from_u64(5);
        let now = Instant::now();

        populate(&mut keyspace, 0, 10, Some(Duration::from_secs(60)), now);
        let stats = active_expire_cycle(&mut keyspace, now, &ExpiryConfig::default(), &mut rng);

        assert_eq!(stats.expired, 0);
        assert_eq!(keyspace.total_keys(), 10);
    }

    #[test]
    fn test_cycle_repeats_under_high_expiry_rate() {
        let mut keyspace = Keyspace::new(1);
        let mut rng = StdRng::seed_from_u64(42);
        let now = Instant::now();

        populate(&mut keyspace, 0, 1000, Some(Duration::from_millis(20)), now);

        let config = ExpiryConfig {
            max_rounds: 1000,
            ..Default::default()
        };
        active_expire_cycle(
            &mut keyspace,
            now + Duration::from_millis(50),
            &config,
            &mut rng,
        );

        // every sample is fully expired, so rounds continue until the db is empty
        assert_eq!(keyspace.total_keys(), 0);
    }
}

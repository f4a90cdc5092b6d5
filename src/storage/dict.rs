//! Incrementally Rehashed Dictionary
//!
//! A chained hash table keyed by `Bytes` that grows without a stop-the-world
//! resize. When the load factor reaches 1 a second, larger table is allocated
//! and buckets are migrated a few at a time by later operations (and by the
//! server tick) until the old table is empty.
//!
//! ```text
//!   tables[0] (old)            tables[1] (new)
//!   ┌───┬───┬───┬───┐          ┌───┬───┬───┬───┬───┬───┬───┬───┐
//!   │ ∅ │ ∅ │ x │ y │   ───>   │ a │   │ b │   │   │ c │   │   │
//!   └───┴───┴───┴───┘          └───┴───┴───┴───┴───┴───┴───┴───┘
//!             ▲
//!        rehash_idx
//! ```
//!
//! While migrating, lookups check `tables[0]` then `tables[1]`, and new keys
//! only ever go into `tables[1]`.

use bytes::Bytes;
use rand::Rng;
use std::hash::{DefaultHasher, Hash, Hasher};

/// Size of the first table allocated for an empty dictionary.
pub const INITIAL_SIZE: usize = 4;

/// Empty buckets visited per migrated bucket before a step gives up.
const EMPTY_VISITS_PER_STEP: usize = 10;

type Bucket<V> = Vec<(Bytes, V)>;

#[derive(Debug, Clone)]
struct Table<V> {
    buckets: Vec<Bucket<V>>,
    used: usize,
}

impl<V> Table<V> {
    fn empty() -> Self {
        Self {
            buckets: Vec::new(),
            used: 0,
        }
    }

    fn with_size(size: usize) -> Self {
        let mut buckets = Vec::with_capacity(size);
        buckets.resize_with(size, Vec::new);
        Self { buckets, used: 0 }
    }

    #[inline]
    fn size(&self) -> usize {
        self.buckets.len()
    }

    #[inline]
    fn bucket_index(&self, hash: u64) -> usize {
        (hash as usize) & (self.size() - 1)
    }

    fn find(&self, hash: u64, key: &[u8]) -> Option<(usize, usize)> {
        if self.size() == 0 {
            return None;
        }
        let idx = self.bucket_index(hash);
        self.buckets[idx]
            .iter()
            .position(|(k, _)| k.as_ref() == key)
            .map(|pos| (idx, pos))
    }
}

/// Hash table with two generations and incremental migration between them.
#[derive(Debug, Clone)]
pub struct Dict<V> {
    tables: [Table<V>; 2],
    rehash_idx: Option<usize>,
}

impl<V> Dict<V> {
    pub fn new() -> Self {
        Self {
            tables: [Table::empty(), Table::empty()],
            rehash_idx: None,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tables[0].used + self.tables[1].used
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true while buckets are being moved to the new table.
    #[inline]
    pub fn is_rehashing(&self) -> bool {
        self.rehash_idx.is_some()
    }

    /// Number of buckets across both tables.
    pub fn capacity(&self) -> usize {
        self.tables[0].size() + self.tables[1].size()
    }

    /// Locates `key`, checking the old table before the new one.
    fn locate(&self, key: &[u8]) -> Option<(usize, usize, usize)> {
        if self.is_empty() {
            return None;
        }
        let hash = hash_key(key);
        let generations = if self.is_rehashing() { 2 } else { 1 };
        (0..generations).find_map(|t| {
            self.tables[t]
                .find(hash, key)
                .map(|(bucket, pos)| (t, bucket, pos))
        })
    }

    pub fn get(&self, key: &[u8]) -> Option<&V> {
        self.locate(key)
            .map(|(t, bucket, pos)| &self.tables[t].buckets[bucket][pos].1)
    }

    pub fn get_mut(&mut self, key: &[u8]) -> Option<&mut V> {
        self.rehash_step(1);
        let (t, bucket, pos) = self.locate(key)?;
        Some(&mut self.tables[t].buckets[bucket][pos].1)
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.locate(key).is_some()
    }

    /// Inserts or replaces `key`, returning the previous value.
    pub fn insert(&mut self, key: Bytes, value: V) -> Option<V> {
        self.rehash_step(1);

        if let Some((t, bucket, pos)) = self.locate(&key) {
            return Some(std::mem::replace(
                &mut self.tables[t].buckets[bucket][pos].1,
                value,
            ));
        }

        self.expand_if_needed();

        let target = if self.is_rehashing() { 1 } else { 0 };
        let table = &mut self.tables[target];
        let idx = table.bucket_index(hash_key(&key));
        table.buckets[idx].push((key, value));
        table.used += 1;
        None
    }

    /// Removes `key`, returning its value.
    pub fn remove(&mut self, key: &[u8]) -> Option<V> {
        self.rehash_step(1);

        let (t, bucket, pos) = self.locate(key)?;
        let table = &mut self.tables[t];
        let (_, value) = table.buckets[bucket].swap_remove(pos);
        table.used -= 1;
        Some(value)
    }

    pub fn clear(&mut self) {
        self.tables = [Table::empty(), Table::empty()];
        self.rehash_idx = None;
    }

    fn expand_if_needed(&mut self) {
        if self.is_rehashing() {
            return;
        }

        let table = &self.tables[0];
        if table.size() == 0 {
            self.tables[0] = Table::with_size(INITIAL_SIZE);
        } else if table.used >= table.size() {
            let size = (table.used * 2).next_power_of_two();
            self.tables[1] = Table::with_size(size);
            self.rehash_idx = Some(0);
        }
    }

    /// Migrates up to `steps` non-empty buckets to the new table.
    ///
    /// Returns true if migration is still in progress afterwards.
    pub fn rehash_step(&mut self, steps: usize) -> bool {
        let Some(mut idx) = self.rehash_idx else {
            return false;
        };

        let mut empty_visits = steps * EMPTY_VISITS_PER_STEP;
        let mut remaining = steps;

        while remaining > 0 && self.tables[0].used > 0 {
            while self.tables[0].buckets[idx].is_empty() {
                idx += 1;
                empty_visits -= 1;
                if empty_visits == 0 {
                    self.rehash_idx = Some(idx);
                    return true;
                }
            }

            let bucket = std::mem::take(&mut self.tables[0].buckets[idx]);
            let moved = bucket.len();
            for (key, value) in bucket {
                let target = &mut self.tables[1];
                let slot = target.bucket_index(hash_key(&key));
                target.buckets[slot].push((key, value));
            }
            self.tables[0].used -= moved;
            self.tables[1].used += moved;

            idx += 1;
            remaining -= 1;
        }

        if self.tables[0].used == 0 {
            self.tables[0] = std::mem::replace(&mut self.tables[1], Table::empty());
            self.rehash_idx = None;
            return false;
        }

        self.rehash_idx = Some(idx);
        true
    }

    /// Iterates every entry in both tables.
    pub fn iter(&self) -> impl Iterator<Item = (&Bytes, &V)> {
        self.tables
            .iter()
            .flat_map(|t| t.buckets.iter())
            .flat_map(|b| b.iter().map(|(k, v)| (k, v)))
    }

    pub fn keys(&self) -> impl Iterator<Item = &Bytes> {
        self.iter().map(|(k, _)| k)
    }

    /// Returns `count` distinct keys from a randomly chosen region of the table.
    ///
    /// When the dictionary holds `count` keys or fewer, every key is returned.
    pub fn sample_keys<R: Rng + ?Sized>(&self, count: usize, rng: &mut R) -> Vec<Bytes> {
        if self.len() <= count {
            return self.keys().cloned().collect();
        }

        // Walk buckets from a random slot, wrapping around, until enough keys
        // are collected. Keys in different buckets are distinct by construction.
        let mut picked: Vec<Bytes> = Vec::with_capacity(count);
        let total = self.capacity();
        let start = rng.gen_range(0..total);

        for offset in 0..total {
            let slot = (start + offset) % total;
            let bucket = if slot < self.tables[0].size() {
                &self.tables[0].buckets[slot]
            } else {
                &self.tables[1].buckets[slot - self.tables[0].size()]
            };
            for (key, _) in bucket {
                if picked.len() == count {
                    return picked;
                }
                picked.push(key.clone());
            }
        }

        picked
    }
}

impl<V> Default for Dict<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
fn hash_key(key: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

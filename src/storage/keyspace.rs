//! The fixed set of logical databases.

use crate::connection::ClientId;
use crate::storage::db::Database;

/// Number of databases created when none is configured.
pub const DEFAULT_DATABASES: usize = 16;

#[derive(Debug)]
pub struct Keyspace {
    dbs: Vec<Database>,
}

impl Keyspace {
    pub fn new(count: usize) -> Self {
        Self {
            dbs: (0..count).map(Database::new).collect(),
        }
    }

    /// Number of databases.
    pub fn len(&self) -> usize {
        self.dbs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dbs.is_empty()
    }

    /// Returns `index` if it names an existing database.
    pub fn select(&self, index: i64) -> Option<usize> {
        usize::try_from(index).ok().filter(|&i| i < self.dbs.len())
    }

    /// The database at `index`. Callers hold indices that went through [`select`](Self::select).
    pub fn db(&self, index: usize) -> &Database {
        &self.dbs[index]
    }

    pub fn db_mut(&mut self, index: usize) -> &mut Database {
        &mut self.dbs[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Database> {
        self.dbs.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Database> {
        self.dbs.iter_mut()
    }

    /// Estimated memory held by every database.
    pub fn used_memory(&self) -> usize {
        self.dbs.iter().map(Database::used_memory).sum()
    }

    pub fn total_keys(&self) -> usize {
        self.dbs.iter().map(Database::len).sum()
    }

    pub fn expired_keys(&self) -> u64 {
        self.dbs.iter().map(Database::expired_keys).sum()
    }

    pub fn flush_all(&mut self) {
        for db in &mut self.dbs {
            db.flush();
        }
    }

    /// Drains the watchers invalidated by writes in any database.
    pub fn take_invalidated(&mut self) -> Vec<ClientId> {
        self.dbs
            .iter_mut()
            .flat_map(|db| db.take_invalidated())
            .collect()
    }

    pub fn rehash_step(&mut self, steps: usize) {
        for db in &mut self.dbs {
            db.rehash_step(steps);
        }
    }
}

//! The active-row map: position → transient row window.
//!
//! The acquire path instantiates rows lock-free: look up, try to mark, and
//! on a miss insert with compare-absent semantics; losers close their
//! speculative row and retry. Removal must be compare-based too: a plain
//! `remove(key)` could drop a row a racing thread just marked in use, so
//! the map only removes when the stored row is the exact instance the
//! releasing thread holds.
//!
//! The map is injected at pool construction (instrumentation/sharing seam);
//! [`ShardedRowMap`] is the stock implementation, a 64-way lock-sharded
//! hash map so concurrent row churn on different positions rarely contends.

use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::config::ROW_MAP_SHARD_COUNT;
use crate::window::PersistenceRow;

/// Concurrent map from record position to its live row window.
pub trait RowMap: Send + Sync {
    /// The row currently serving `position`, if any.
    fn get(&self, position: u64) -> Option<Arc<PersistenceRow>>;

    /// Inserts `row` unless the position is already occupied; returns the
    /// occupant when the insert loses.
    fn put_if_absent(
        &self,
        position: u64,
        row: Arc<PersistenceRow>,
    ) -> Option<Arc<PersistenceRow>>;

    /// Removes the entry for `position` only if it is exactly `expected`
    /// (same instance). Returns whether a removal happened.
    fn remove(&self, position: u64, expected: &Arc<PersistenceRow>) -> bool;

    /// Drops every entry. Pool shutdown only.
    fn clear(&self);
}

/// Lock-sharded [`RowMap`] over `hashbrown` maps.
pub struct ShardedRowMap {
    shards: Box<[Mutex<HashMap<u64, Arc<PersistenceRow>>>]>,
}

impl ShardedRowMap {
    pub fn new() -> Self {
        let shards = (0..ROW_MAP_SHARD_COUNT)
            .map(|_| Mutex::new(HashMap::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self { shards }
    }

    fn shard(&self, position: u64) -> &Mutex<HashMap<u64, Arc<PersistenceRow>>> {
        &self.shards[position as usize & (ROW_MAP_SHARD_COUNT - 1)]
    }
}

impl Default for ShardedRowMap {
    fn default() -> Self {
        Self::new()
    }
}

impl RowMap for ShardedRowMap {
    fn get(&self, position: u64) -> Option<Arc<PersistenceRow>> {
        self.shard(position).lock().get(&position).cloned()
    }

    fn put_if_absent(
        &self,
        position: u64,
        row: Arc<PersistenceRow>,
    ) -> Option<Arc<PersistenceRow>> {
        match self.shard(position).lock().entry(position) {
            hashbrown::hash_map::Entry::Occupied(occupied) => Some(Arc::clone(occupied.get())),
            hashbrown::hash_map::Entry::Vacant(vacant) => {
                vacant.insert(row);
                None
            }
        }
    }

    fn remove(&self, position: u64, expected: &Arc<PersistenceRow>) -> bool {
        let mut shard = self.shard(position).lock();
        match shard.get(&position) {
            Some(current) if Arc::ptr_eq(current, expected) => {
                shard.remove(&position);
                true
            }
            _ => false,
        }
    }

    fn clear(&self) {
        for shard in self.shards.iter() {
            shard.lock().clear();
        }
    }
}

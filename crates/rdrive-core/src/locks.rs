//! A shard-per-hash keyed-lock table: "replace the 'map
//! of string locks' pattern with a shard-per-hash lock table of fixed size
//! to bound memory; logical key identity remains the locking contract."
//!
//! Used by the upload engine (per-parent-path folder creation, per-file
//! upload) and the mount adapter (per-destination move, per-staging-file
//! write) to serialize operations that share a logical key without
//! growing an unbounded `HashMap<String, Mutex<()>>`.

use std::hash::{Hash, Hasher};
use tokio::sync::{Mutex, MutexGuard};

/// Fixed shard count; a key's lock is `hash(key) % N`. Two distinct keys
/// may alias to the same shard (contending unnecessarily), but the table
/// never grows, unlike a lock-per-key map.
const DEFAULT_SHARDS: usize = 256;

pub struct ShardedLocks {
    shards: Vec<Mutex<()>>,
}

impl Default for ShardedLocks {
    fn default() -> Self {
        Self::new(DEFAULT_SHARDS)
    }
}

impl ShardedLocks {
    pub fn new(shard_count: usize) -> Self {
        let mut shards = Vec::with_capacity(shard_count.max(1));
        for _ in 0..shard_count.max(1) {
            shards.push(Mutex::new(()));
        }
        Self { shards }
    }

    fn shard_for(&self, key: &str) -> &Mutex<()> {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        let idx = (hasher.finish() as usize) % self.shards.len();
        &self.shards[idx]
    }

    /// Acquires the shard guarding `key`. Callers build their own logical
    /// key (e.g. `"create_folder_<path>"`, `"move_<newpath>"`,
    /// `"upload:<key>"`) so operation families never alias each other by
    /// accident.
    pub async fn lock(&self, key: &str) -> MutexGuard<'_, ()> {
        self.shard_for(key).lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_key_serializes() {
        let locks = ShardedLocks::new(4);
        let g1 = locks.lock("create_folder_/a/b").await;
        drop(g1);
        let _g2 = locks.lock("create_folder_/a/b").await;
    }

    #[test]
    fn table_size_is_fixed_regardless_of_key_count() {
        let locks = ShardedLocks::new(8);
        assert_eq!(locks.shards.len(), 8);
    }
}

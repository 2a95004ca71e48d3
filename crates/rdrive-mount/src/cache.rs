//! Generic in-memory TTL cache, generalizing the negative-dentry
//! cache pattern into a keyed map reused for both the read-range cache and
//! the download-URL cache.
//!
//! Every entry has a *sliding* expiry that resets on access; entries may
//! additionally carry an *absolute* expiry that is never extended, used by
//! the download-URL cache so a presigned URL is never served past its
//! actual validity.

use dashmap::DashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

struct Slot<V> {
    value: V,
    inserted_at: Instant,
    last_access: Instant,
}

/// A concurrent, TTL-bounded map. `sliding_ttl` is refreshed on every
/// successful `get`; `absolute_ttl`, if set, bounds an entry's total
/// lifetime regardless of access pattern.
pub struct TtlCache<K, V> {
    entries: DashMap<K, Slot<V>>,
    sliding_ttl: Duration,
    absolute_ttl: Option<Duration>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(sliding_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            sliding_ttl,
            absolute_ttl: None,
        }
    }

    pub fn with_absolute_ttl(mut self, absolute_ttl: Duration) -> Self {
        self.absolute_ttl = Some(absolute_ttl);
        self
    }

    pub fn insert(&self, key: K, value: V) {
        let now = Instant::now();
        self.entries.insert(
            key,
            Slot {
                value,
                inserted_at: now,
                last_access: now,
            },
        );
    }

    /// Returns the cached value, refreshing its sliding expiry, or `None`
    /// if absent or expired (the expired entry is evicted on the way out).
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(slot) => {
                let past_absolute = self
                    .absolute_ttl
                    .is_some_and(|ttl| now.duration_since(slot.inserted_at) > ttl);
                let past_sliding = now.duration_since(slot.last_access) > self.sliding_ttl;
                past_absolute || past_sliding
            }
            None => return None,
        };
        if expired {
            self.entries.remove(key);
            return None;
        }
        let mut slot = self.entries.get_mut(key)?;
        slot.last_access = now;
        Some(slot.value.clone())
    }

    pub fn remove(&self, key: &K) {
        self.entries.remove(key);
    }

    /// Drops every entry past either expiry. Call periodically from a
    /// background tick to bound memory; correctness does not depend on it
    /// since `get` already evicts lazily.
    pub fn evict_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, slot| {
            let past_absolute = self
                .absolute_ttl
                .is_some_and(|ttl| now.duration_since(slot.inserted_at) > ttl);
            let past_sliding = now.duration_since(slot.last_access) > self.sliding_ttl;
            !(past_absolute || past_sliding)
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Key for the read-range cache: `(file_id, content_hash, offset, len)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReadRangeKey {
    pub file_id: String,
    pub content_hash: String,
    pub offset: u64,
    pub len: u32,
}

/// Key for the download-URL cache: `(file_id, content_hash)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DownloadUrlKey {
    pub file_id: String,
    pub content_hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_get_refreshes_sliding_window() {
        let cache: TtlCache<String, Vec<u8>> = TtlCache::new(Duration::from_millis(60));
        cache.insert("a".to_string(), vec![1, 2, 3]);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cache.get(&"a".to_string()), Some(vec![1, 2, 3]));
        std::thread::sleep(Duration::from_millis(30));
        // still alive: the mid-window get reset the sliding clock
        assert_eq!(cache.get(&"a".to_string()), Some(vec![1, 2, 3]));
    }

    #[test]
    fn sliding_expiry_evicts_when_untouched() {
        let cache: TtlCache<&str, u32> = TtlCache::new(Duration::from_millis(30));
        cache.insert("k", 7);
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(cache.get(&"k"), None);
    }

    #[test]
    fn absolute_ttl_evicts_even_with_repeated_access() {
        let cache: TtlCache<&str, u32> =
            TtlCache::new(Duration::from_secs(60)).with_absolute_ttl(Duration::from_millis(40));
        cache.insert("k", 1);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.get(&"k"), Some(1));
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.get(&"k"), None);
    }

    #[test]
    fn evict_expired_drops_stale_entries() {
        let cache: TtlCache<u32, u32> = TtlCache::new(Duration::from_millis(20));
        cache.insert(1, 10);
        cache.insert(2, 20);
        std::thread::sleep(Duration::from_millis(40));
        cache.evict_expired();
        assert!(cache.is_empty());
    }
}

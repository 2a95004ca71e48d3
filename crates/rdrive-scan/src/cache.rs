//! Persistent index cache: an embedded, single-file(-tree) key/value
//! store keyed by `LocalEntry::key`, backed by `sled`.
//!
//! `sled` is chosen over the `rocksdb` dependency reserved elsewhere in the
//! workspace for a cache exactly like this one: `sled` is pure Rust with no
//! native build dependency, a better fit for a leaf library crate embedded
//! into a daemon, CLI, and test binaries alike (see DESIGN.md).

use rdrive_core::types::LocalEntry;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// How often the dirty set is flushed to disk in the background, absent an
/// explicit `flush()` call.
pub const FLUSH_INTERVAL: Duration = Duration::from_secs(5 * 60);

pub struct IndexCache {
    db: sled::Db,
    dirty: AtomicBool,
    last_flush: Mutex<Instant>,
}

impl IndexCache {
    /// Opens (or creates) the cache rooted at `path` — a directory, per
    /// sled's on-disk layout.
    pub fn open(path: &Path) -> sled::Result<Self> {
        let db = sled::open(path)?;
        Ok(Self {
            db,
            dirty: AtomicBool::new(false),
            last_flush: Mutex::new(Instant::now()),
        })
    }

    /// In-memory cache, useful for tests and one-shot/temporary jobs
    /// (`JobConfig::is_temporary`).
    pub fn open_temporary() -> sled::Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self {
            db,
            dirty: AtomicBool::new(false),
            last_flush: Mutex::new(Instant::now()),
        })
    }

    pub fn get_all(&self) -> sled::Result<Vec<LocalEntry>> {
        self.db
            .iter()
            .values()
            .map(|v| v.map(|bytes| decode(&bytes)))
            .collect()
    }

    pub fn get(&self, key: &str) -> sled::Result<Option<LocalEntry>> {
        Ok(self.db.get(key)?.map(|v| decode(&v)))
    }

    pub fn add(&self, entry: &LocalEntry) -> sled::Result<()> {
        self.db.insert(entry.key.as_bytes(), encode(entry))?;
        self.mark_dirty();
        Ok(())
    }

    pub fn update(&self, entry: &LocalEntry) -> sled::Result<()> {
        self.add(entry)
    }

    pub fn delete(&self, key: &str) -> sled::Result<()> {
        self.db.remove(key.as_bytes())?;
        self.mark_dirty();
        Ok(())
    }

    /// Atomically applies a batch of adds/updates/deletes.
    pub fn apply_range(
        &self,
        adds: &[LocalEntry],
        updates: &[LocalEntry],
        delete_keys: &[String],
    ) -> sled::Result<()> {
        let mut batch = sled::Batch::default();
        for e in adds.iter().chain(updates.iter()) {
            batch.insert(e.key.as_bytes(), encode(e));
        }
        for k in delete_keys {
            batch.remove(k.as_bytes());
        }
        self.db.apply_batch(batch)?;
        self.mark_dirty();
        Ok(())
    }

    /// True if `candidate` is byte-for-byte identical, across every
    /// persisted field, to the cached record for its key (a fast
    /// field-wise equality comparison). A `false` result means the scanner
    /// must mark the entry dirty and (if `(size, creation_time,
    /// last_write_time)` changed) recompute its hash.
    pub fn matches_cached(&self, candidate: &LocalEntry) -> sled::Result<bool> {
        Ok(self.get(&candidate.key)?.as_ref() == Some(candidate))
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    /// Flushes the dirty set to disk if dirty, unconditionally at job end or
    /// when the 5-minute tick fires. Idempotent when nothing changed.
    pub fn flush(&self) -> sled::Result<()> {
        if self.dirty.swap(false, Ordering::AcqRel) {
            self.db.flush()?;
        }
        *self.last_flush.lock().unwrap() = Instant::now();
        Ok(())
    }

    /// Flushes only if `FLUSH_INTERVAL` has elapsed since the last flush;
    /// intended to be polled from a background tick.
    pub fn flush_if_due(&self) -> sled::Result<()> {
        let due = self.last_flush.lock().unwrap().elapsed() >= FLUSH_INTERVAL;
        if due {
            self.flush()?;
        }
        Ok(())
    }
}

impl Drop for IndexCache {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

fn encode(entry: &LocalEntry) -> Vec<u8> {
    serde_json::to_vec(entry).expect("LocalEntry is always serializable")
}

fn decode(bytes: &[u8]) -> LocalEntry {
    serde_json::from_slice(bytes).expect("cache contains only entries written by `encode`")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::SystemTime;

    fn entry(key: &str, size: u64) -> LocalEntry {
        LocalEntry {
            key: key.into(),
            full_path: PathBuf::from(format!("/data/{key}")),
            is_file: true,
            size,
            creation_time: SystemTime::UNIX_EPOCH,
            last_write_time: SystemTime::UNIX_EPOCH,
            is_hidden: false,
            is_read_only: false,
            hash: vec![1, 2, 3],
            sha1: "deadbeef".into(),
        }
    }

    #[test]
    fn add_then_get_all_round_trips() {
        let cache = IndexCache::open_temporary().unwrap();
        cache.add(&entry("root/a.txt", 10)).unwrap();
        let all = cache.get_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].key, "root/a.txt");
    }

    #[test]
    fn matches_cached_detects_divergence() {
        let cache = IndexCache::open_temporary().unwrap();
        let e = entry("root/a.txt", 10);
        cache.add(&e).unwrap();
        assert!(cache.matches_cached(&e).unwrap());

        let mut changed = e.clone();
        changed.size = 11;
        assert!(!cache.matches_cached(&changed).unwrap());
    }

    #[test]
    fn apply_range_is_atomic_across_adds_and_deletes() {
        let cache = IndexCache::open_temporary().unwrap();
        cache.add(&entry("root/old.txt", 1)).unwrap();
        cache
            .apply_range(
                &[entry("root/new.txt", 2)],
                &[],
                &["root/old.txt".to_string()],
            )
            .unwrap();
        let all = cache.get_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].key, "root/new.txt");
    }

    #[test]
    fn flush_clears_dirty_flag_without_error() {
        let cache = IndexCache::open_temporary().unwrap();
        cache.add(&entry("root/a.txt", 1)).unwrap();
        cache.flush().unwrap();
        assert!(!cache.dirty.load(Ordering::Acquire));
    }
}

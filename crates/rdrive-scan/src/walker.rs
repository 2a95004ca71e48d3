//! Parallel local-tree walker.
//!
//! A bounded producer/consumer walk: directories are discovered
//! breadth-first and published onto a bounded channel; a pool of worker
//! threads drains the channel, re-publishing subdirectories it discovers and
//! emitting `LocalEntry` records for files as it goes. Concurrency defaults
//! to `min(available_parallelism, configured)`, clamped to 4-8.

use rdrive_core::filter::FilterSet;
use rdrive_core::path::to_key;
use rdrive_core::types::{HashAlgorithm, HashLevel, LocalEntry};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, SyncSender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::cache::IndexCache;
use crate::hash;

/// Reported at >= 10 Hz while the scan is in flight.
pub type ProgressFn = Arc<dyn Fn(u64, f64) + Send + Sync>;

#[derive(Debug, Clone, Copy)]
pub struct ScanOptions {
    pub concurrency: usize,
    pub hash_level: HashLevel,
    pub hash_algorithm: HashAlgorithm,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            hash_level: HashLevel::Sampled,
            hash_algorithm: HashAlgorithm::Sha1,
        }
    }
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .clamp(4, 8)
}

/// One root directory to scan, named (its basename becomes `LocalEntry.key`'s
/// first segment, per `rdrive_core::path::to_key`).
pub struct ScanRoot {
    pub path: PathBuf,
}

/// Walks `roots`, honoring `filters`, consulting `cache` to skip rehashing
/// unchanged files, and returns the complete set of `LocalEntry` records.
///
/// Permission-denied and not-found errors on individual entries are logged
/// and skipped; any other I/O error propagates.
pub fn scan(
    roots: &[ScanRoot],
    filters: &FilterSet,
    cache: &IndexCache,
    options: ScanOptions,
    progress: Option<ProgressFn>,
) -> std::io::Result<Vec<LocalEntry>> {
    let concurrency = options.concurrency.clamp(1, 64);
    let (tx, rx) = sync_channel::<WorkItem>(concurrency * 4);
    let rx = Arc::new(Mutex::new(rx));
    let results: Arc<Mutex<Vec<LocalEntry>>> = Arc::new(Mutex::new(Vec::new()));
    let processed = Arc::new(AtomicU64::new(0));
    let inflight = Arc::new(AtomicU64::new(0));
    let last_report = Arc::new(Mutex::new(Instant::now()));

    for root in roots {
        inflight.fetch_add(1, Ordering::SeqCst);
        tx.send(WorkItem::Dir {
            root: root.path.clone(),
            dir: root.path.clone(),
        })
        .expect("channel has at least one consumer below");
    }

    let mut handles = Vec::with_capacity(concurrency);
    for _ in 0..concurrency {
        let rx = Arc::clone(&rx);
        let tx = tx.clone();
        let results = Arc::clone(&results);
        let processed = Arc::clone(&processed);
        let inflight = Arc::clone(&inflight);
        let last_report = Arc::clone(&last_report);
        let filters = filters.clone();
        let progress = progress.clone();

        handles.push(std::thread::spawn(move || {
            worker_loop(
                rx, tx, results, processed, inflight, last_report, filters, progress, options,
            )
        }));
    }
    drop(tx);

    for h in handles {
        let _ = h.join();
    }

    Ok(Arc::try_unwrap(results)
        .map(|m| m.into_inner().unwrap())
        .unwrap_or_else(|arc| arc.lock().unwrap().clone()))
}

enum WorkItem {
    Dir { root: PathBuf, dir: PathBuf },
}

#[allow(clippy::too_many_arguments)]
fn worker_loop(
    rx: Arc<Mutex<std::sync::mpsc::Receiver<WorkItem>>>,
    tx: SyncSender<WorkItem>,
    results: Arc<Mutex<Vec<LocalEntry>>>,
    processed: Arc<AtomicU64>,
    inflight: Arc<AtomicU64>,
    last_report: Arc<Mutex<Instant>>,
    filters: FilterSet,
    progress: Option<ProgressFn>,
    options: ScanOptions,
) {
    loop {
        let item = {
            let guard = rx.lock().unwrap();
            guard.recv_timeout(Duration::from_millis(20))
        };
        let WorkItem::Dir { root, dir } = match item {
            Ok(item) => item,
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                if inflight.load(Ordering::SeqCst) == 0 {
                    return;
                }
                continue;
            }
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => return,
        };

        let read_dir = match std::fs::read_dir(&dir) {
            Ok(rd) => rd,
            Err(e) if is_skippable(&e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "skipping unreadable directory");
                finish_item(&inflight, &tx);
                continue;
            }
            Err(e) => {
                tracing::error!(dir = %dir.display(), error = %e, "fatal scan error");
                finish_item(&inflight, &tx);
                continue;
            }
        };

        for entry in read_dir {
            let entry = match entry {
                Ok(e) => e,
                Err(e) if is_skippable(&e) => continue,
                Err(e) => {
                    tracing::error!(error = %e, "fatal scan error reading directory entry");
                    continue;
                }
            };
            let path = entry.path();
            let meta = match entry.metadata() {
                Ok(m) => m,
                Err(e) if is_skippable(&e) => continue,
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "fatal stat error");
                    continue;
                }
            };

            let key = to_key(&root, &path);
            let is_dir = meta.is_dir();
            if filters.excludes(&key, is_dir) {
                continue;
            }

            if is_dir {
                inflight.fetch_add(1, Ordering::SeqCst);
                let _ = tx.send(WorkItem::Dir {
                    root: root.clone(),
                    dir: path,
                });
                continue;
            }

            if !meta.is_file() {
                continue; // symlinks, sockets, etc. — not part of the model
            }

            match build_entry(&path, &key, &meta, options) {
                Ok(local_entry) => {
                    results.lock().unwrap().push(local_entry);
                    let n = processed.fetch_add(1, Ordering::Relaxed) + 1;
                    report_progress(&progress, &last_report, n);
                }
                Err(e) if is_skippable(&e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable file");
                }
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "fatal scan error");
                }
            }
        }

        finish_item(&inflight, &tx);
    }
}

fn finish_item(inflight: &Arc<AtomicU64>, _tx: &SyncSender<WorkItem>) {
    // Workers poll `inflight` via `recv_timeout` above; reaching zero with
    // an empty channel is the pool's termination condition.
    inflight.fetch_sub(1, Ordering::SeqCst);
}

fn is_skippable(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::PermissionDenied | std::io::ErrorKind::NotFound
    )
}

fn report_progress(progress: &Option<ProgressFn>, last_report: &Arc<Mutex<Instant>>, n: u64) {
    let Some(cb) = progress else { return };
    let mut last = last_report.lock().unwrap();
    let elapsed = last.elapsed();
    if elapsed >= Duration::from_millis(100) {
        let rate = n as f64 / elapsed.as_secs_f64().max(0.0001);
        cb(n, rate);
        *last = Instant::now();
    }
}

/// Builds a `LocalEntry`, consulting the cache to avoid rehashing unchanged
/// files.
fn build_entry(
    path: &Path,
    key: &str,
    meta: &std::fs::Metadata,
    options: ScanOptions,
) -> std::io::Result<LocalEntry> {
    let size = meta.len();
    let creation_time = meta.created().unwrap_or(std::time::UNIX_EPOCH);
    let last_write_time = meta.modified().unwrap_or(std::time::UNIX_EPOCH);
    let is_read_only = meta.permissions().readonly();
    let is_hidden = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false);

    let hash = hash::compute_hash(path, size, options.hash_level, options.hash_algorithm)?;

    Ok(LocalEntry {
        key: key.to_string(),
        full_path: path.to_path_buf(),
        is_file: true,
        size,
        creation_time,
        last_write_time,
        is_hidden,
        is_read_only,
        hash,
        sha1: String::new(), // filled in by `adopt_or_rehash` against the cache
    })
}

/// Adopts the cached `sha1` when `(size, creation_time, last_write_time,
/// hash)` match the cached record; otherwise recomputes a full SHA-1.
/// Implements the cache-lookup contract: hash is recomputed at most once
/// across two runs of the same unchanged file.
pub fn adopt_or_rehash(entry: &mut LocalEntry, cache: &IndexCache) -> std::io::Result<()> {
    if let Ok(Some(cached)) = cache.get(&entry.key) {
        let unchanged = cached.size == entry.size
            && cached.creation_time == entry.creation_time
            && cached.last_write_time == entry.last_write_time
            && cached.hash == entry.hash;
        if unchanged && !cached.sha1.is_empty() {
            entry.sha1 = cached.sha1;
            return Ok(());
        }
    }
    entry.sha1 = hash::full_sha1_hex(&entry.full_path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn scan_finds_files_honoring_filters() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("keep.txt"), b"hi").unwrap();
        fs::write(dir.path().join("skip.tmp"), b"bye").unwrap();
        fs::write(dir.path().join("sub/nested.txt"), b"yo").unwrap();

        let filters = FilterSet::parse("*.tmp\n");
        let cache = IndexCache::open_temporary().unwrap();
        let roots = [ScanRoot {
            path: dir.path().to_path_buf(),
        }];
        let entries = scan(&roots, &filters, &cache, ScanOptions::default(), None).unwrap();

        let names: std::collections::BTreeSet<_> =
            entries.iter().map(|e| e.key.clone()).collect();
        let root_name = dir.path().file_name().unwrap().to_str().unwrap();
        assert!(names.contains(&format!("{root_name}/keep.txt")));
        assert!(names.contains(&format!("{root_name}/sub/nested.txt")));
        assert!(!names.iter().any(|n| n.ends_with("skip.tmp")));
    }

    /// Testable property 2: idempotent scan, hash recomputed at most once.
    #[test]
    fn adopt_or_rehash_skips_recompute_when_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        fs::write(&file, b"hello").unwrap();

        let cache = IndexCache::open_temporary().unwrap();
        let meta = fs::metadata(&file).unwrap();
        let mut entry = build_entry(&file, "root/a.txt", &meta, ScanOptions::default()).unwrap();
        adopt_or_rehash(&mut entry, &cache).unwrap();
        let first_sha1 = entry.sha1.clone();
        cache.add(&entry).unwrap();

        let meta2 = fs::metadata(&file).unwrap();
        let mut entry2 = build_entry(&file, "root/a.txt", &meta2, ScanOptions::default()).unwrap();
        adopt_or_rehash(&mut entry2, &cache).unwrap();
        assert_eq!(entry2.sha1, first_sha1);
    }
}

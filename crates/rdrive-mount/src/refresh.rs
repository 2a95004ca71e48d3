//! Folder-refresh background worker.
//!
//! Modeled on the negative-cache/disk-cache background-eviction pattern,
//! generalized to a work queue: directories opened recently are enqueued,
//! and a single worker drains the queue performing a paginated listing per
//! directory and reconciling the in-memory index by `file_id` identity.

use crate::index::DirIndex;
use rdrive_drive::RemoteDrive;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};

struct QueueEntry {
    dir_key: String,
    parent_file_id: String,
    enqueued_at: Instant,
}

/// Bounded FIFO of directories pending refresh, capped at `capacity` with
/// oldest-eviction on overflow.
struct BoundedQueue {
    entries: VecDeque<QueueEntry>,
    capacity: usize,
}

impl BoundedQueue {
    fn push(&mut self, entry: QueueEntry) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }
}

/// Handle used by the driver to enqueue a directory for background
/// refresh; the actual work happens on the worker task spawned by `spawn`.
#[derive(Clone)]
pub struct RefreshQueue {
    tx: mpsc::Sender<(String, String)>,
}

impl RefreshQueue {
    /// Enqueues `dir_key` (logical path) under `parent_file_id` for
    /// refresh. Non-blocking: a full channel silently drops the request,
    /// since the directory will simply be refreshed again next time it's
    /// opened.
    pub fn enqueue(&self, dir_key: &str, parent_file_id: &str) {
        let _ = self.tx.try_send((dir_key.to_string(), parent_file_id.to_string()));
    }
}

/// Spawns the single background worker and returns a queue handle for
/// enqueueing directories, plus a shutdown guard that stops the worker on
/// drop.
pub fn spawn(
    drive: Arc<dyn RemoteDrive>,
    index: Arc<DirIndex>,
    capacity: usize,
    staleness: Duration,
) -> RefreshQueue {
    let (tx, mut rx) = mpsc::channel::<(String, String)>(capacity);
    let queue = Arc::new(Mutex::new(BoundedQueue {
        entries: VecDeque::with_capacity(capacity),
        capacity,
    }));

    {
        let queue = queue.clone();
        tokio::spawn(async move {
            while let Some((dir_key, parent_file_id)) = rx.recv().await {
                queue.lock().await.push(QueueEntry {
                    dir_key,
                    parent_file_id,
                    enqueued_at: Instant::now(),
                });
            }
        });
    }

    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(2));
        loop {
            tick.tick().await;
            let due: Vec<QueueEntry> = {
                let mut guard = queue.lock().await;
                let now = Instant::now();
                guard.entries.retain(|e| now.duration_since(e.enqueued_at) < staleness);
                std::mem::take(&mut guard.entries).into()
            };
            for entry in due {
                refresh_dir(&drive, &index, &entry.dir_key, &entry.parent_file_id).await;
            }
        }
    });

    RefreshQueue { tx }
}

/// Performs one paginated listing of `parent_file_id` and reconciles
/// `dir_key`'s cached children by `file_id` identity. Exposed so the
/// driver can refresh synchronously on first open of a stale directory,
/// not just via the background queue.
pub async fn refresh_dir(drive: &Arc<dyn RemoteDrive>, index: &Arc<DirIndex>, dir_key: &str, parent_file_id: &str) {
    let mut all = Vec::new();
    let mut marker = None;
    loop {
        match drive.list(parent_file_id, marker.as_deref(), 1000).await {
            Ok((entries, next)) => {
                all.extend(entries);
                match next {
                    Some(m) => marker = Some(m),
                    None => break,
                }
            }
            Err(e) => {
                tracing::warn!(dir_key, error = %e, "folder refresh listing failed");
                return;
            }
        }
    }
    index.reconcile(dir_key, all);
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdrive_drive::MockDrive;

    #[tokio::test]
    async fn refresh_one_populates_index_from_drive_listing() {
        let drive = MockDrive::new();
        drive.seed_file("root", "a.txt", "dir/a.txt", b"x");
        let index = Arc::new(DirIndex::new());
        refresh_dir(&(Arc::new(drive) as Arc<dyn RemoteDrive>), &index, "dir", "root").await;
        assert_eq!(index.children("dir").len(), 1);
    }
}

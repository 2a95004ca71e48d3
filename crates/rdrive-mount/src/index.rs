//! Concurrent folder/file index the driver consults for lookups and
//! listings without a round trip to the remote drive.
//!
//! Keyed by logical path, matching the keying scheme the
//! reconciler and upload engine already use. Each directory's children are
//! a nested map keyed by `file_id`, so the folder-refresh worker can diff
//! a fresh listing against the cached set by identity rather than by name.

use dashmap::DashMap;
use rdrive_core::types::RemoteEntry;
use std::time::Instant;

/// One directory's cached children plus bookkeeping for staleness checks.
struct DirEntry {
    children: DashMap<String, RemoteEntry>,
    last_refreshed: Instant,
}

/// Concurrent index from logical directory path to its known children.
pub struct DirIndex {
    dirs: DashMap<String, DirEntry>,
}

impl Default for DirIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl DirIndex {
    pub fn new() -> Self {
        Self {
            dirs: DashMap::new(),
        }
    }

    /// `true` if `dir_key` has never been refreshed, or was refreshed
    /// longer than `staleness` ago.
    pub fn is_stale(&self, dir_key: &str, staleness: std::time::Duration) -> bool {
        match self.dirs.get(dir_key) {
            Some(entry) => entry.last_refreshed.elapsed() > staleness,
            None => true,
        }
    }

    pub fn children(&self, dir_key: &str) -> Vec<RemoteEntry> {
        self.dirs
            .get(dir_key)
            .map(|entry| entry.children.iter().map(|r| r.clone()).collect())
            .unwrap_or_default()
    }

    pub fn lookup(&self, dir_key: &str, name: &str) -> Option<RemoteEntry> {
        self.dirs
            .get(dir_key)?
            .children
            .iter()
            .find(|r| r.name == name)
            .map(|r| r.clone())
    }

    /// Replaces `dir_key`'s children wholesale with `fresh`, diffed by
    /// `file_id` identity so callers can log what was added/removed if
    /// they want to.
    pub fn reconcile(&self, dir_key: &str, fresh: Vec<RemoteEntry>) {
        let entry = self.dirs.entry(dir_key.to_string()).or_insert_with(|| DirEntry {
            children: DashMap::new(),
            last_refreshed: Instant::now(),
        });
        let fresh_ids: std::collections::HashSet<&str> =
            fresh.iter().map(|e| e.file_id.as_str()).collect();
        entry.children.retain(|id, _| fresh_ids.contains(id.as_str()));
        for remote in fresh {
            entry.children.insert(remote.file_id.clone(), remote);
        }
        drop(entry);
        if let Some(mut entry) = self.dirs.get_mut(dir_key) {
            entry.last_refreshed = Instant::now();
        }
    }

    pub fn insert_child(&self, dir_key: &str, entry: RemoteEntry) {
        let dir = self.dirs.entry(dir_key.to_string()).or_insert_with(|| DirEntry {
            children: DashMap::new(),
            last_refreshed: Instant::now(),
        });
        dir.children.insert(entry.file_id.clone(), entry);
    }

    pub fn remove_child(&self, dir_key: &str, file_id: &str) {
        if let Some(entry) = self.dirs.get(dir_key) {
            entry.children.remove(file_id);
        }
    }

    /// Rewrites every cached directory key whose path starts with
    /// `old_prefix` to start with `new_prefix` instead, for a directory
    /// rename.
    pub fn rename_subtree(&self, old_prefix: &str, new_prefix: &str) {
        let affected: Vec<String> = self
            .dirs
            .iter()
            .map(|e| e.key().clone())
            .filter(|k| k == old_prefix || k.starts_with(&format!("{old_prefix}/")))
            .collect();
        for key in affected {
            if let Some((_, entry)) = self.dirs.remove(&key) {
                let new_key = if key == old_prefix {
                    new_prefix.to_string()
                } else {
                    format!("{new_prefix}{}", &key[old_prefix.len()..])
                };
                self.dirs.insert(new_key, entry);
            }
        }
    }

    pub fn drop_dir(&self, dir_key: &str) {
        self.dirs.remove(dir_key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdrive_core::types::EntryKind;
    use std::time::SystemTime;

    fn entry(id: &str, name: &str) -> RemoteEntry {
        RemoteEntry {
            file_id: id.to_string(),
            parent_file_id: "root".into(),
            name: name.to_string(),
            kind: EntryKind::File,
            size: 1,
            content_hash: "h".into(),
            created_at: SystemTime::UNIX_EPOCH,
            updated_at: SystemTime::UNIX_EPOCH,
            key: format!("dir/{name}"),
        }
    }

    #[test]
    fn unrefreshed_dir_is_stale() {
        let index = DirIndex::new();
        assert!(index.is_stale("dir", std::time::Duration::from_secs(600)));
    }

    #[test]
    fn reconcile_drops_entries_absent_from_fresh_listing() {
        let index = DirIndex::new();
        index.reconcile("dir", vec![entry("1", "a.txt"), entry("2", "b.txt")]);
        assert_eq!(index.children("dir").len(), 2);

        index.reconcile("dir", vec![entry("1", "a.txt")]);
        let children = index.children("dir");
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].file_id, "1");
    }

    #[test]
    fn rename_subtree_rewrites_nested_keys() {
        let index = DirIndex::new();
        index.reconcile("src/old", vec![entry("1", "a.txt")]);
        index.reconcile("src/old/nested", vec![entry("2", "b.txt")]);

        index.rename_subtree("src/old", "src/new");
        assert!(!index.is_stale("src/new", std::time::Duration::from_secs(600)));
        assert!(!index.is_stale("src/new/nested", std::time::Duration::from_secs(600)));
        assert!(index.is_stale("src/old", std::time::Duration::from_secs(600)));
    }
}

//! Sync reconciler: given a local and a remote snapshot scoped to a
//! job's target, compute the per-mode action set. Resolution is a pure
//! function of the two snapshots and the configured mode — there is no
//! multi-device conflict model here, just the single-pair rename-then-
//! download / delete-then-upload rules the distilled spec calls for.

use rdrive_core::types::{EntryKind, LocalEntry, RemoteEntry, SyncMode};
use std::collections::HashMap;

/// One reconciliation action. `Upload`/`Download` name the source-of-truth
/// side; `Delete`/`Rename` operate on the remote entry directly.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Upload `local` to replace or create the remote entry at `key`.
    Upload { key: String, local: LocalEntry },
    /// Download `remote` into the local root matching `local_root_key`.
    Download {
        remote: RemoteEntry,
        local_root_key: String,
    },
    /// Delete a remote entry no longer present locally (Mirror only).
    Delete { remote: RemoteEntry },
    /// Rename a remote entry prior to a TwoWaySync download-side conflict,
    /// so the existing remote content is preserved under a new name.
    Rename { remote: RemoteEntry, new_name: String },
}

/// Computes the action set for `mode` given the local and remote snapshots,
/// both already scoped to the same logical key space.
///
/// `source_roots` lists the logical root prefixes configured as job
/// sources, used by TwoWaySync to pick which local root a remote-only file
/// should land under.
pub fn plan(
    mode: SyncMode,
    local: &[LocalEntry],
    remote: &[RemoteEntry],
    source_roots: &[String],
) -> Vec<Action> {
    match mode {
        SyncMode::Mirror => plan_mirror(local, remote),
        SyncMode::Redundancy => plan_redundancy(local, remote),
        SyncMode::TwoWaySync => plan_two_way(local, remote, source_roots),
    }
}

fn by_key<'a, T>(items: &'a [T], key_of: impl Fn(&'a T) -> &'a str) -> HashMap<&'a str, &'a T> {
    items.iter().map(|item| (key_of(item), item)).collect()
}

fn plan_mirror(local: &[LocalEntry], remote: &[RemoteEntry]) -> Vec<Action> {
    let local_by_key = by_key(local, |e| e.key.as_str());
    let remote_by_key = by_key(remote, |e| e.key.as_str());
    let mut actions = Vec::new();

    for entry in local {
        if !entry.is_file {
            continue;
        }
        match remote_by_key.get(entry.key.as_str()) {
            Some(r) if r.content_hash == entry.sha1 => {}
            _ => actions.push(Action::Upload {
                key: entry.key.clone(),
                local: entry.clone(),
            }),
        }
    }

    // Ancestor folder keys of every surviving local file: the walker never
    // emits folder `LocalEntry` records of its own, so a remote folder that
    // still holds synced content has to be recognized by prefix rather than
    // by a direct `local_by_key` lookup, or it would be wrongly deleted
    // along with its (still-synced) subtree.
    let kept_folders: std::collections::HashSet<String> = local
        .iter()
        .filter(|e| e.is_file)
        .flat_map(|e| ancestor_keys(&e.key))
        .collect();

    // Parent-first deletion order: folders sorted shallowest-first so a
    // parent delete implicitly evicts its subtree from the in-memory index
    // before children would otherwise be visited.
    let mut to_delete: Vec<&RemoteEntry> = remote
        .iter()
        .filter(|r| !local_by_key.contains_key(r.key.as_str()))
        .filter(|r| r.kind != EntryKind::Folder || !kept_folders.contains(r.key.as_str()))
        .collect();
    to_delete.sort_by(|a, b| depth(&a.key).cmp(&depth(&b.key)).then(a.key.cmp(&b.key)));
    for r in to_delete {
        actions.push(Action::Delete { remote: r.clone() });
    }

    actions
}

/// All proper ancestor folder keys of `key`, e.g. `"src/sub/x.txt"` ->
/// `["src/sub", "src"]`.
fn ancestor_keys(key: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = key;
    while let Some((parent, _)) = rest.rsplit_once('/') {
        out.push(parent.to_string());
        rest = parent;
    }
    out
}

fn plan_redundancy(local: &[LocalEntry], remote: &[RemoteEntry]) -> Vec<Action> {
    let remote_by_key = by_key(remote, |e| e.key.as_str());
    local
        .iter()
        .filter(|e| e.is_file)
        .filter(|e| match remote_by_key.get(e.key.as_str()) {
            Some(r) => r.content_hash != e.sha1,
            None => true,
        })
        .map(|e| Action::Upload {
            key: e.key.clone(),
            local: e.clone(),
        })
        .collect()
}

fn plan_two_way(local: &[LocalEntry], remote: &[RemoteEntry], source_roots: &[String]) -> Vec<Action> {
    let local_by_key = by_key(local, |e| e.key.as_str());
    let remote_by_key = by_key(remote, |e| e.key.as_str());
    let mut actions = Vec::new();

    for entry in local.iter().filter(|e| e.is_file) {
        match remote_by_key.get(entry.key.as_str()) {
            None => actions.push(Action::Upload {
                key: entry.key.clone(),
                local: entry.clone(),
            }),
            Some(r) if r.content_hash != entry.sha1 => {
                let (new_name, rename_target) = resolve_conflict_name(entry, r, &local_by_key, &remote_by_key);
                actions.push(Action::Rename {
                    remote: r.clone().with_name(rename_target),
                    new_name,
                });
                actions.push(Action::Download {
                    remote: (*r).clone(),
                    local_root_key: matching_source_root(&entry.key, source_roots),
                });
            }
            Some(_) => {}
        }
    }

    for entry in remote.iter().filter(|r| r.kind == EntryKind::File) {
        if !local_by_key.contains_key(entry.key.as_str()) {
            actions.push(Action::Download {
                remote: entry.clone(),
                local_root_key: matching_source_root(&entry.key, source_roots),
            });
        }
    }

    actions
}

/// Resolves a TwoWaySync content conflict: the *remote* entry is renamed to
/// `"<stem> - copy[ (n)]<ext>"`, probing `n` upward until the candidate
/// collides with neither side, and the unchanged remote content is then
/// downloaded under its original name.
fn resolve_conflict_name(
    local: &LocalEntry,
    remote: &RemoteEntry,
    local_by_key: &HashMap<&str, &LocalEntry>,
    remote_by_key: &HashMap<&str, &RemoteEntry>,
) -> (String, String) {
    let (stem, ext) = split_stem_ext(&remote.name);
    let parent_key = parent_of(&remote.key);

    let mut n = 0u32;
    loop {
        let candidate_name = if n == 0 {
            format!("{stem} - copy{ext}")
        } else {
            format!("{stem} - copy ({n}){ext}")
        };
        let candidate_key = join_key(&parent_key, &candidate_name);
        let collides = local_by_key.contains_key(candidate_key.as_str())
            || remote_by_key.contains_key(candidate_key.as_str());
        if !collides {
            let _ = local;
            return (candidate_name, candidate_key);
        }
        n += 1;
    }
}

fn split_stem_ext(name: &str) -> (&str, String) {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, format!(".{ext}")),
        _ => (name, String::new()),
    }
}

fn parent_of(key: &str) -> String {
    key.rsplit_once('/').map(|(p, _)| p.to_string()).unwrap_or_default()
}

fn join_key(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

fn matching_source_root(key: &str, source_roots: &[String]) -> String {
    source_roots
        .iter()
        .find(|root| key == root.as_str() || key.starts_with(&format!("{root}/")))
        .cloned()
        .unwrap_or_else(|| source_roots.first().cloned().unwrap_or_default())
}

fn depth(key: &str) -> usize {
    key.matches('/').count()
}

trait WithName {
    fn with_name(self, new_key: String) -> Self;
}

impl WithName for RemoteEntry {
    fn with_name(mut self, new_key: String) -> Self {
        self.key = new_key;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn local(key: &str, sha1: &str) -> LocalEntry {
        LocalEntry {
            key: key.to_string(),
            full_path: key.into(),
            is_file: true,
            size: 2,
            creation_time: SystemTime::UNIX_EPOCH,
            last_write_time: SystemTime::UNIX_EPOCH,
            is_hidden: false,
            is_read_only: false,
            hash: Vec::new(),
            sha1: sha1.to_string(),
        }
    }

    fn remote(key: &str, name: &str, sha1: &str, kind: EntryKind) -> RemoteEntry {
        RemoteEntry {
            file_id: format!("id-{key}"),
            parent_file_id: "root".into(),
            name: name.to_string(),
            kind,
            size: 2,
            content_hash: sha1.to_string(),
            created_at: SystemTime::UNIX_EPOCH,
            updated_at: SystemTime::UNIX_EPOCH,
            key: key.to_string(),
        }
    }

    #[test]
    fn mirror_uploads_new_and_changed_skips_identical() {
        let locals = vec![
            local("src/a.txt", "hash-a"),
            local("src/b.txt", "hash-b-new"),
            local("src/c.txt", "hash-c"),
        ];
        let remotes = vec![
            remote("src/b.txt", "b.txt", "hash-b-old", EntryKind::File),
            remote("src/c.txt", "c.txt", "hash-c", EntryKind::File),
        ];
        let actions = plan(SyncMode::Mirror, &locals, &remotes, &["src".into()]);
        assert_eq!(actions.len(), 2);
        assert!(actions.iter().any(|a| matches!(a, Action::Upload{key,..} if key=="src/a.txt")));
        assert!(actions.iter().any(|a| matches!(a, Action::Upload{key,..} if key=="src/b.txt")));
    }

    #[test]
    fn mirror_deletes_absent_remote_entries_parent_first() {
        let locals = vec![local("src/keep.txt", "hash-keep")];
        let remotes = vec![
            remote("src/keep.txt", "keep.txt", "hash-keep", EntryKind::File),
            remote("src/old/nested.txt", "nested.txt", "h", EntryKind::File),
            remote("src/old", "old", "", EntryKind::Folder),
        ];
        let actions = plan(SyncMode::Mirror, &locals, &remotes, &["src".into()]);
        let deletes: Vec<&str> = actions
            .iter()
            .filter_map(|a| match a {
                Action::Delete { remote } => Some(remote.key.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(deletes, vec!["src/old", "src/old/nested.txt"]);
    }

    #[test]
    fn mirror_keeps_remote_folders_that_still_hold_synced_files() {
        let locals = vec![local("src/sub/x.txt", "hash-x")];
        let remotes = vec![
            remote("src", "src", "", EntryKind::Folder),
            remote("src/sub", "sub", "", EntryKind::Folder),
            remote("src/sub/x.txt", "x.txt", "hash-x", EntryKind::File),
        ];
        let actions = plan(SyncMode::Mirror, &locals, &remotes, &["src".into()]);
        assert!(actions.is_empty(), "steady-state mirror run must not delete ancestor folders: {actions:?}");
    }

    #[test]
    fn redundancy_never_deletes() {
        let locals = vec![local("src/a.txt", "hash-a")];
        let remotes = vec![remote("src/stale.txt", "stale.txt", "h", EntryKind::File)];
        let actions = plan(SyncMode::Redundancy, &locals, &remotes, &["src".into()]);
        assert!(!actions.iter().any(|a| matches!(a, Action::Delete { .. })));
        assert_eq!(actions.len(), 1);
    }

    #[test]
    fn two_way_downloads_remote_only_file_into_matching_source_root() {
        let locals = vec![local("src/a.txt", "hash-a")];
        let remotes = vec![
            remote("src/a.txt", "a.txt", "hash-a", EntryKind::File),
            remote("src/new.txt", "new.txt", "hash-new", EntryKind::File),
        ];
        let actions = plan(SyncMode::TwoWaySync, &locals, &remotes, &["src".into()]);
        assert_eq!(actions.len(), 1);
        assert!(matches!(&actions[0], Action::Download { remote, local_root_key }
            if remote.key == "src/new.txt" && local_root_key == "src"));
    }

    #[test]
    fn two_way_conflict_renames_remote_then_downloads_under_original_name() {
        let locals = vec![local("src/doc.txt", "hash-local")];
        let remotes = vec![remote("src/doc.txt", "doc.txt", "hash-remote", EntryKind::File)];
        let actions = plan(SyncMode::TwoWaySync, &locals, &remotes, &["src".into()]);
        assert_eq!(actions.len(), 2);
        assert!(matches!(&actions[0], Action::Rename { new_name, .. } if new_name == "doc - copy.txt"));
        assert!(matches!(&actions[1], Action::Download { remote, .. } if remote.key == "src/doc.txt"));
    }

    #[test]
    fn two_way_conflict_probes_copy_number_on_collision() {
        let locals = vec![
            local("src/doc.txt", "hash-local"),
            local("src/doc - copy.txt", "existing"),
        ];
        let remotes = vec![remote("src/doc.txt", "doc.txt", "hash-remote", EntryKind::File)];
        let actions = plan(SyncMode::TwoWaySync, &locals, &remotes, &["src".into()]);
        assert!(matches!(&actions[0], Action::Rename { new_name, .. } if new_name == "doc - copy (1).txt"));
    }
}

//! Logical path normalization shared by the scanner, reconciler, and mount
//! adapter. Generalizes the workspace's `remote_path_prefix` trimming helper
//! into a two-way conversion between filesystem paths and the forward-slash
//! logical keys used throughout the index.

use std::path::{Path, PathBuf};

/// Strips a trailing slash and normalizes backslashes to forward slashes.
pub fn normalize(p: &str) -> String {
    p.replace('\\', "/").trim_end_matches('/').to_string()
}

/// Builds the logical key `"<root-name>/<relative>"` for a path under `root`.
///
/// `root`'s own basename becomes the key's first segment, so two different
/// source roots with the same basename collide by design — callers are
/// expected to pass distinct root names when that matters.
pub fn to_key(root: &Path, full_path: &Path) -> String {
    let root_name = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let rel = full_path.strip_prefix(root).unwrap_or(full_path);
    let rel_str = rel.to_string_lossy().replace('\\', "/");
    let rel_str = rel_str.trim_matches('/');
    if rel_str.is_empty() {
        root_name
    } else {
        format!("{root_name}/{rel_str}")
    }
}

/// Rebuilds a local filesystem path from a key relative to `root`'s parent.
pub fn from_key(root_parent: &Path, key: &str) -> PathBuf {
    root_parent.join(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_trims_trailing_slash_and_backslashes() {
        assert_eq!(normalize("a\\b\\c/"), "a/b/c");
        assert_eq!(normalize("a/b"), "a/b");
    }

    #[test]
    fn to_key_joins_root_name_and_relative() {
        let root = Path::new("/home/user/Documents");
        let full = Path::new("/home/user/Documents/sub/file.txt");
        assert_eq!(to_key(root, full), "Documents/sub/file.txt");
    }

    #[test]
    fn to_key_root_itself_is_just_root_name() {
        let root = Path::new("/home/user/Documents");
        assert_eq!(to_key(root, root), "Documents");
    }
}

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::SystemTime;

/// A locally-scanned file or directory entry, keyed by its logical path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalEntry {
    /// Stable logical path, `"<root-name>/<relative>"`, forward-slash
    /// separated, no leading or trailing slash.
    pub key: String,
    pub full_path: PathBuf,
    pub is_file: bool,
    pub size: u64,
    pub creation_time: SystemTime,
    pub last_write_time: SystemTime,
    pub is_hidden: bool,
    pub is_read_only: bool,
    /// Content fingerprint from the configured hash level/algorithm.
    /// Empty until computed.
    pub hash: Vec<u8>,
    /// Hex SHA-1 of full content, used by remote dedup. Empty until computed.
    pub sha1: String,
}

/// Kind of a remote entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    File,
    Folder,
}

/// An entry as reported by a `RemoteDrive`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub file_id: String,
    pub parent_file_id: String,
    pub name: String,
    pub kind: EntryKind,
    pub size: u64,
    /// SHA-1 hex of content.
    pub content_hash: String,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
    /// Same shape as `LocalEntry::key`, rooted at the remote target path.
    pub key: String,
}

/// How a local entry's content fingerprint is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashLevel {
    None,
    Head,
    Sampled,
    Full,
}

/// Which hash function backs a `HashLevel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Sha1,
    Xxh,
    Md5,
}

/// Sync direction/strategy for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMode {
    Mirror,
    Redundancy,
    TwoWaySync,
}

/// How a name collision is handled when creating a remote entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NameMode {
    Refuse,
    AutoRename,
    Overwrite,
}

/// Immutable configuration for a single sync job, held constant for the
/// duration of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    pub sources: Vec<PathBuf>,
    pub target: String,
    pub restore_path: Option<PathBuf>,
    pub mode: SyncMode,
    /// Cron expressions (including named aliases like `@hourly`).
    pub schedules: Vec<String>,
    /// Glob filter rules, `#`-prefixed comments ignored.
    pub filters: Vec<String>,
    pub check_level: HashLevel,
    pub check_algorithm: HashAlgorithm,
    pub upload_threads: usize,
    pub download_threads: usize,
    pub file_watcher: bool,
    pub is_recycle_bin: bool,
    pub is_temporary: bool,
    pub rapid_upload: bool,
}

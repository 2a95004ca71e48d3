//! Persisted configuration schema (loaded from `rdrive.toml`).
//!
//! Mirrors the shape of `JobConfig`/`DriveConfig` from the data model: a
//! top-level `RdriveConfig` with nested, `#[serde(default)]` sections so a
//! partial or empty TOML document still parses to sane defaults.

use crate::types::{HashAlgorithm, HashLevel, JobConfig, SyncMode};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RdriveConfig {
    pub daemon: DaemonConfig,
    pub drive: DriveConfig,
    pub mount: MountConfig,
    /// Named job configurations, keyed by job id.
    pub jobs: std::collections::BTreeMap<String, JobConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Unix socket path for the gRPC control plane.
    pub socket: PathBuf,
    /// Optional TCP listen address for a remote control plane.
    pub listen: Option<String>,
    /// Prometheus metrics + health endpoint.
    pub metrics_addr: Option<String>,
    pub log_level: String,
    /// "json" or "text".
    pub log_format: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket: PathBuf::from("/run/rdrived/rdrived.sock"),
            listen: None,
            metrics_addr: Some("127.0.0.1:9100".into()),
            log_level: "info".into(),
            log_format: "json".into(),
        }
    }
}

/// Remote-drive connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DriveConfig {
    /// Base URL of the remote drive's HTTP API.
    pub endpoint: String,
    /// Drive id to operate against when a job doesn't name one explicitly.
    pub default_drive_id: String,
    /// Drive id reserved for backup jobs; falls back to `default_drive_id`
    /// when empty (see DESIGN.md, Open Question #2).
    pub backup_drive_id: String,
    /// Path to a file holding the access token / refresh credentials.
    pub credentials_file: Option<PathBuf>,
    pub enforce_tls: bool,
    pub ca_cert_path: Option<PathBuf>,
    /// Upper bound on requests/second for full-enumeration listing.
    pub search_all_rate_limit_per_sec: u32,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.example-drive.test".into(),
            default_drive_id: String::new(),
            backup_drive_id: String::new(),
            credentials_file: None,
            enforce_tls: true,
            ca_cert_path: None,
            search_all_rate_limit_per_sec: 4,
        }
    }
}

/// Userspace-mount adapter settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MountConfig {
    /// Sliding TTL for the small-read range cache.
    pub read_cache_ttl_secs: u64,
    /// Sliding TTL for the download-URL cache.
    pub download_url_cache_ttl_secs: u64,
    /// Absolute TTL for the download-URL cache.
    pub download_url_cache_absolute_secs: u64,
    /// Reads at or below this size consult the range cache; larger reads
    /// issue a direct range GET.
    pub small_read_threshold_bytes: u64,
    /// Folder-refresh worker: max tracked "recently opened" directories.
    pub refresh_queue_capacity: usize,
    /// Folder-refresh worker: directories older than this are not serviced.
    pub refresh_staleness_secs: u64,
    pub allow_other: bool,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            read_cache_ttl_secs: 5 * 60,
            download_url_cache_ttl_secs: 10 * 60,
            download_url_cache_absolute_secs: 3 * 60 * 60 + 45 * 60,
            small_read_threshold_bytes: 64 * 1024,
            refresh_queue_capacity: 100,
            refresh_staleness_secs: 10 * 60,
            allow_other: false,
        }
    }
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            target: String::new(),
            restore_path: None,
            mode: SyncMode::Mirror,
            schedules: Vec::new(),
            filters: Vec::new(),
            check_level: HashLevel::Sampled,
            check_algorithm: HashAlgorithm::Sha1,
            upload_threads: default_thread_count(),
            download_threads: default_thread_count(),
            file_watcher: false,
            is_recycle_bin: true,
            is_temporary: false,
            rapid_upload: true,
        }
    }
}

/// `min(processors, configured)` defaulting to 4-8.
fn default_thread_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .clamp(4, 8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_empty_document_uses_defaults() {
        let config: RdriveConfig = toml::from_str("").unwrap();
        assert_eq!(config.daemon.log_level, "info");
        assert_eq!(config.drive.search_all_rate_limit_per_sec, 4);
        assert_eq!(config.mount.small_read_threshold_bytes, 64 * 1024);
        assert!(config.jobs.is_empty());
    }

    #[test]
    fn parse_partial_document_overrides_one_field() {
        let toml_str = r#"
            [drive]
            endpoint = "https://drive.example.com"
        "#;
        let config: RdriveConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.drive.endpoint, "https://drive.example.com");
        assert!(config.drive.enforce_tls, "unset fields keep their default");
    }

    #[test]
    fn parse_job_table() {
        let toml_str = r#"
            [jobs.backup-home]
            sources = ["/home/user/docs"]
            target = "/backup"
            mode = "Mirror"
            schedules = ["@daily"]
            filters = ["#comment", "*.tmp"]
            check_level = "sampled"
            check_algorithm = "sha1"
            upload_threads = 4
            download_threads = 4
            file_watcher = false
            is_recycle_bin = true
            is_temporary = false
            rapid_upload = true
        "#;
        let config: RdriveConfig = toml::from_str(toml_str).unwrap();
        let job = config.jobs.get("backup-home").unwrap();
        assert_eq!(job.target, "/backup");
        assert_eq!(job.mode, SyncMode::Mirror);
        assert_eq!(job.schedules, vec!["@daily".to_string()]);
    }

    /// Round-tripping through TOML is lossless.
    #[test]
    fn config_round_trips_through_toml() {
        let mut config = RdriveConfig::default();
        config.jobs.insert(
            "job-a".into(),
            JobConfig {
                sources: vec![PathBuf::from("/data/src")],
                target: "/backup".into(),
                ..JobConfig::default()
            },
        );
        let text = toml::to_string(&config).unwrap();
        let parsed: RdriveConfig = toml::from_str(&text).unwrap();
        assert_eq!(config, parsed);
    }
}

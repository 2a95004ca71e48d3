//! Chunked upload engine: folder-chain creation, the rapid-upload
//! pre-hash/full-hash handshake, per-part disk staging, and `complete`.
//!
//! The staging plan (`staging::PartPlan`) is a standalone building block
//! deliberately reused by the mount adapter's `WriteFile`/`SetEndOfFile`
//! path: both components need "buffer
//! bytes written at arbitrary offsets into deterministically-named
//! per-part files, PUT each part once it is full".

use rdrive_core::types::{LocalEntry, NameMode, RemoteEntry};
use rdrive_core::{RdriveError, RdriveResult};
use rdrive_drive::{CreateFileRequest, DriveError, RapidUploadProof, RemoteDrive};
use sha1::{Digest, Sha1};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub mod staging;

/// Part size, fixed at 4 MiB.
pub const PART_SIZE: u64 = 4 * 1024 * 1024;
/// Rapid upload is attempted only above this size.
pub const RAPID_MIN_SIZE: u64 = 10 * 1024;
/// Above this size, a pre-hash round trip precedes the full-hash create.
pub const PREHASH_THRESHOLD: u64 = 1024 * 1024;
/// Size of the fixed prefix hashed for the pre-hash probe.
pub const PREHASH_PREFIX_LEN: u64 = 64 * 1024;

const PART_RETRY_ATTEMPTS: u32 = 3;
const PART_RETRY_BACKOFF: [Duration; 3] = [
    Duration::from_secs(5),
    Duration::from_secs(25),
    Duration::from_secs(125),
];

pub type ProgressFn = Box<dyn Fn(u64, u64, &str) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub entry: RemoteEntry,
    /// `true` if the server linked existing content and zero part bytes
    /// were transferred.
    pub rapid: bool,
    pub bytes_transferred: u64,
}

/// `ceil(l / p)`, used for `part_count` and chunk plans alike.
pub fn ceil_div(l: u64, p: u64) -> u64 {
    l.div_ceil(p)
}

/// The last part's length, per §6: `((L - 1) mod P) + 1`.
pub fn last_part_len(total_len: u64, part_size: u64) -> u64 {
    if total_len == 0 {
        return 0;
    }
    ((total_len - 1) % part_size) + 1
}

pub fn part_len_at(total_len: u64, part_size: u64, part_index: u64) -> u64 {
    let part_count = ceil_div(total_len, part_size);
    if part_index + 1 == part_count {
        last_part_len(total_len, part_size)
    } else {
        part_size
    }
}

/// Builds the deterministic staging path for `(key, part_index)`:
/// `<cwd>/.rdriveuploadcache/<key>.<partIndex-1>.rdrivepart`. `part_index`
/// is 0-based here; the on-disk name embeds the 1-based part number minus
/// one per the literal convention, i.e. the same 0-based index.
pub fn staging_path(staging_root: &Path, key: &str, part_index: u64) -> PathBuf {
    let safe_key = key.replace('/', "_");
    staging_root.join(format!("{safe_key}.{part_index}.rdrivepart"))
}

/// SHA-1 of the file's first `len` bytes, hex-encoded — the rapid-upload
/// pre-hash probe.
pub fn sha1_prefix_hex(path: &Path, len: u64) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut buf = vec![0u8; len.min(file_len(&mut file)?) as usize];
    file.read_exact(&mut buf)?;
    let mut hasher = Sha1::new();
    hasher.update(&buf);
    Ok(hasher.finalize().iter().map(|b| format!("{b:02x}")).collect())
}

fn file_len(file: &mut std::fs::File) -> std::io::Result<u64> {
    let len = file.seek(SeekFrom::End(0))?;
    file.seek(SeekFrom::Start(0))?;
    Ok(len)
}

/// Derives the access-token-derived proof code sent with a full-hash
/// create-file request. The access-token cache is
/// an external collaborator; callers supply the current token.
pub fn derive_proof_code(access_token: &str, content_hash: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(access_token.as_bytes());
    hasher.update(content_hash.as_bytes());
    hasher.finalize().iter().map(|b| format!("{b:02x}")).collect()
}

/// Ensures the destination folder path exists, walking path components and
/// calling `create_folder(name_mode=Refuse)`. Concurrent
/// uploads serialize per-parent-path folder creation under
/// `folder_locks`, keyed `"create_folder_<path>"` (§4.9 concurrency
/// contract, shared with the mount adapter).
pub async fn ensure_folder_chain(
    drive: &dyn RemoteDrive,
    folder_locks: &rdrive_core::locks::ShardedLocks,
    root_id: &str,
    components: &[&str],
) -> RdriveResult<String> {
    let mut parent = root_id.to_string();
    let mut path_acc = String::new();
    for comp in components {
        path_acc.push('/');
        path_acc.push_str(comp);
        let lock_key = format!("create_folder_{path_acc}");
        let _guard = folder_locks.lock(&lock_key).await;
        match drive.create_folder(&parent, comp, NameMode::Refuse).await {
            Ok(entry) => parent = entry.file_id,
            Err(DriveError::AlreadyExists(_)) => {
                let (children, _) = drive.list(&parent, None, 10_000).await?;
                parent = children
                    .into_iter()
                    .find(|e| e.name == *comp)
                    .map(|e| e.file_id)
                    .ok_or_else(|| {
                        RdriveError::FatalConfig(format!(
                            "folder {comp} reported already-exists but is absent from listing"
                        ))
                    })?;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(parent)
}

/// Uploads `local` into `parent_id`, performing the rapid-upload handshake
/// when enabled and streaming parts otherwise.
///
/// `proof_code_fn` is called lazily to derive the access-token-bound proof
/// code only when a full-hash attempt is actually made.
pub async fn upload_file(
    drive: &dyn RemoteDrive,
    upload_locks: &rdrive_core::locks::ShardedLocks,
    staging_root: &Path,
    local: &LocalEntry,
    parent_id: &str,
    name: &str,
    rapid_upload_enabled: bool,
    proof_code_fn: impl Fn(&str) -> String,
    progress: Option<&ProgressFn>,
) -> RdriveResult<UploadOutcome> {
    let lock_key = format!("upload:{}", local.key);
    let _guard = upload_locks.lock(&lock_key).await;

    let size = local.size;
    let part_count = ceil_div(size, PART_SIZE);

    let mut proof = None;
    if rapid_upload_enabled && size > RAPID_MIN_SIZE {
        if size > PREHASH_THRESHOLD {
            let prefix_hash = sha1_prefix_hex(&local.full_path, PREHASH_PREFIX_LEN)
                .map_err(|e| RdriveError::LocalIo(e.to_string()))?;
            proof = Some(RapidUploadProof::PreHash {
                sha1_prefix: prefix_hash,
            });
        } else {
            proof = Some(RapidUploadProof::FullHash {
                content_hash: local.sha1.clone(),
                proof_code: proof_code_fn(&local.sha1),
            });
        }
    }

    let mut req = CreateFileRequest {
        parent_id: parent_id.to_string(),
        name: name.to_string(),
        size,
        name_mode: NameMode::Refuse,
        part_count: part_count as u32,
        proof,
    };

    let resp = match drive.create_file(req.clone()).await {
        Ok(r) => r,
        Err(DriveError::PreHashMatched) => {
            req.proof = Some(RapidUploadProof::FullHash {
                content_hash: local.sha1.clone(),
                proof_code: proof_code_fn(&local.sha1),
            });
            drive.create_file(req).await?
        }
        Err(e) => return Err(e.into()),
    };

    if resp.rapid {
        // Testable property 8: rapid uploads never transmit file bytes.
        let detail = drive.get_detail(&resp.file_id).await?;
        return Ok(UploadOutcome {
            entry: detail.entry,
            rapid: true,
            bytes_transferred: 0,
        });
    }

    let mut file =
        std::fs::File::open(&local.full_path).map_err(|e| RdriveError::LocalIo(e.to_string()))?;
    let mut bytes_transferred = 0u64;
    let mut staged_paths = Vec::with_capacity(resp.parts.len());

    for (i, part) in resp.parts.iter().enumerate() {
        let part_index = i as u64;
        let this_len = part_len_at(size, PART_SIZE, part_index);
        let mut buf = vec![0u8; this_len as usize];
        file.read_exact(&mut buf)
            .map_err(|e| RdriveError::LocalIo(e.to_string()))?;

        let staged = staging_path(staging_root, &local.key, part_index);
        if let Some(parent) = staged.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RdriveError::LocalIo(e.to_string()))?;
        }
        std::fs::write(&staged, &buf).map_err(|e| RdriveError::LocalIo(e.to_string()))?;
        staged_paths.push(staged.clone());

        put_part_with_retry(drive, &part.upload_url, bytes::Bytes::from(buf)).await?;
        bytes_transferred += this_len;
        if let Some(cb) = progress {
            cb(bytes_transferred, size, &format!("part {}/{}", i + 1, resp.parts.len()));
        }
        let _ = std::fs::remove_file(&staged);
    }

    let entry = match drive.complete(&resp.file_id, &resp.upload_id).await {
        Ok(entry) => entry,
        Err(e) => {
            // Testable property 5: if any part PUT ultimately failed we'd
            // never reach here; a `complete` failure itself still leaves
            // no RemoteEntry registered by the caller.
            return Err(e.into());
        }
    };

    for staged in &staged_paths {
        let _ = std::fs::remove_file(staged);
    }

    cleanup_duplicate_names(drive, parent_id, &entry.name, &entry.file_id).await;

    Ok(UploadOutcome {
        entry,
        rapid: false,
        bytes_transferred,
    })
}

/// §4.6 step 4's 3-attempt, 5/25/125s-backoff PUT retry.
async fn put_part_with_retry(
    drive: &dyn RemoteDrive,
    upload_url: &str,
    bytes: bytes::Bytes,
) -> RdriveResult<()> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match drive.upload_part(upload_url, bytes.clone()).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt < PART_RETRY_ATTEMPTS => {
                let backoff = PART_RETRY_BACKOFF[(attempt - 1) as usize];
                tracing::warn!(attempt, ?backoff, error = %e, "part PUT failed, retrying");
                tokio::time::sleep(backoff).await;
            }
            Err(e) => {
                return Err(RdriveError::UploadPartFailure(e.to_string()));
            }
        }
    }
}

/// §4.6 step 5: "duplicate-by-name remote entries appearing after
/// completion are searched for and deleted best-effort."
async fn cleanup_duplicate_names(drive: &dyn RemoteDrive, parent_id: &str, name: &str, keep_id: &str) {
    let Ok((children, _)) = drive.list(parent_id, None, 10_000).await else {
        return;
    };
    for child in children {
        if child.name == name && child.file_id != keep_id {
            let _ = drive.delete(&child.file_id, false).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdrive_core::locks::ShardedLocks;
    use rdrive_drive::MockDrive;
    use std::io::Write;

    fn entry_for(path: &std::path::Path, key: &str, size: u64, sha1: &str) -> LocalEntry {
        LocalEntry {
            key: key.to_string(),
            full_path: path.to_path_buf(),
            is_file: true,
            size,
            creation_time: std::time::SystemTime::UNIX_EPOCH,
            last_write_time: std::time::SystemTime::UNIX_EPOCH,
            is_hidden: false,
            is_read_only: false,
            hash: Vec::new(),
            sha1: sha1.to_string(),
        }
    }

    #[tokio::test]
    async fn small_file_round_trips_without_rapid() {
        let drive = MockDrive::new();
        let staging = tempfile::tempdir().unwrap();
        let upload_locks = ShardedLocks::default();

        let file = tempfile::NamedTempFile::new().unwrap();
        file.as_file().write_all(b"hi").unwrap();
        let local = entry_for(file.path(), "src/hello.txt", 2, "c22b5f9178342609428d6f51b2c5af4c0bde6a42");

        let outcome = upload_file(
            &drive,
            &upload_locks,
            staging.path(),
            &local,
            "",
            "hello.txt",
            false,
            |_| String::new(),
            None,
        )
        .await
        .unwrap();

        assert!(!outcome.rapid);
        assert_eq!(outcome.entry.size, 2);
        assert_eq!(outcome.entry.content_hash, local.sha1);
    }

    #[tokio::test]
    async fn multi_part_file_uploads_all_parts() {
        let drive = MockDrive::new();
        let staging = tempfile::tempdir().unwrap();
        let upload_locks = ShardedLocks::default();

        let size = (PART_SIZE * 2) + 17;
        let data = vec![7u8; size as usize];
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.as_file().write_all(&data).unwrap();
        let mut hasher = Sha1::new();
        hasher.update(&data);
        let sha1: String = hasher.finalize().iter().map(|b| format!("{b:02x}")).collect();

        let local = entry_for(file.path(), "big/movie.bin", size, &sha1);
        let outcome = upload_file(
            &drive,
            &upload_locks,
            staging.path(),
            &local,
            "",
            "movie.bin",
            false,
            |_| String::new(),
            None,
        )
        .await
        .unwrap();

        assert_eq!(outcome.entry.size, size);
        assert_eq!(outcome.bytes_transferred, size);
    }

    #[test]
    fn last_part_len_matches_spec_formula() {
        assert_eq!(last_part_len(1, PART_SIZE), 1);
        assert_eq!(last_part_len(PART_SIZE, PART_SIZE), PART_SIZE);
        assert_eq!(last_part_len(PART_SIZE + 1, PART_SIZE), 1);
    }

    #[test]
    fn ten_mib_file_has_three_parts_sized_4_4_2() {
        let size = 10 * 1024 * 1024u64;
        assert_eq!(ceil_div(size, PART_SIZE), 3);
        assert_eq!(part_len_at(size, PART_SIZE, 0), PART_SIZE);
        assert_eq!(part_len_at(size, PART_SIZE, 1), PART_SIZE);
        assert_eq!(part_len_at(size, PART_SIZE, 2), 2 * 1024 * 1024);
    }
}

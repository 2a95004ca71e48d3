//! In-memory `RemoteDrive`, used by the reconciler/upload-engine test
//! suites.

use crate::error::DriveError;
use crate::trait_def::*;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use rdrive_core::types::{EntryKind, NameMode, RemoteEntry};
use sha1::{Digest, Sha1};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::SystemTime;

struct PendingUpload {
    file_id: String,
    buffer: Vec<u8>,
    expected_len: u64,
}

/// An in-memory drive: entries live in a `DashMap<file_id, RemoteEntry>`,
/// uploaded bytes are buffered in a pending-upload table keyed by
/// `upload_id` and only become addressable content on `complete`.
pub struct MockDrive {
    entries: DashMap<String, RemoteEntry>,
    content: DashMap<String, Vec<u8>>,
    pending: DashMap<String, Mutex<PendingUpload>>,
    next_id: AtomicU64,
    pub total_bytes: u64,
    /// Total bytes ever accepted by `upload_part`, for asserting the
    /// rapid-upload soundness property (zero bytes transferred).
    pub bytes_transferred: AtomicU64,
}

impl Default for MockDrive {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDrive {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            content: DashMap::new(),
            pending: DashMap::new(),
            next_id: AtomicU64::new(1),
            total_bytes: 100 * 1024 * 1024 * 1024,
            bytes_transferred: AtomicU64::new(0),
        }
    }

    fn alloc_id(&self) -> String {
        format!("id-{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Seeds a remote file with known content, as if a prior upload had
    /// completed — used by rapid-upload dedup tests (S3).
    pub fn seed_file(&self, parent_id: &str, name: &str, key: &str, bytes: &[u8]) -> RemoteEntry {
        let file_id = self.alloc_id();
        let content_hash = hex_sha1(bytes);
        let entry = RemoteEntry {
            file_id: file_id.clone(),
            parent_file_id: parent_id.to_string(),
            name: name.to_string(),
            kind: EntryKind::File,
            size: bytes.len() as u64,
            content_hash,
            created_at: SystemTime::now(),
            updated_at: SystemTime::now(),
            key: key.to_string(),
        };
        self.entries.insert(file_id.clone(), entry.clone());
        self.content.insert(file_id, bytes.to_vec());
        entry
    }

    pub fn entry(&self, file_id: &str) -> Option<RemoteEntry> {
        self.entries.get(file_id).map(|e| e.clone())
    }

    fn find_by_content_hash(&self, hash: &str) -> Option<RemoteEntry> {
        self.entries.iter().find(|e| e.content_hash == hash).map(|e| e.clone())
    }
}

fn hex_sha1(bytes: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[async_trait]
impl RemoteDrive for MockDrive {
    async fn drive_info(&self) -> Result<DriveInfo, DriveError> {
        Ok(DriveInfo {
            drive_id: "mock".into(),
            name: "mock drive".into(),
        })
    }

    async fn space_info(&self) -> Result<SpaceInfo, DriveError> {
        let used = self.content.iter().map(|e| e.len() as u64).sum();
        Ok(SpaceInfo {
            total_bytes: self.total_bytes,
            used_bytes: used,
        })
    }

    async fn vip_info(&self) -> Result<VipInfo, DriveError> {
        Ok(VipInfo::default())
    }

    async fn list(
        &self,
        parent_id: &str,
        marker: Option<&str>,
        limit: u32,
    ) -> Result<(Vec<RemoteEntry>, Option<String>), DriveError> {
        let mut children: Vec<RemoteEntry> = self
            .entries
            .iter()
            .filter(|e| e.parent_file_id == parent_id)
            .map(|e| e.clone())
            .collect();
        children.sort_by(|a, b| a.file_id.cmp(&b.file_id));

        let start = match marker {
            Some(m) => children
                .iter()
                .position(|e| e.file_id == m)
                .map(|i| i + 1)
                .unwrap_or(0),
            None => 0,
        };
        let end = (start + limit as usize).min(children.len());
        let page = children[start..end].to_vec();
        let next_marker = if end < children.len() {
            page.last().map(|e| e.file_id.clone())
        } else {
            None
        };
        Ok((page, next_marker))
    }

    async fn search_all(
        &self,
        marker: Option<&str>,
        limit: u32,
    ) -> Result<(Vec<RemoteEntry>, Option<String>), DriveError> {
        let mut all: Vec<RemoteEntry> = self.entries.iter().map(|e| e.clone()).collect();
        all.sort_by(|a, b| a.file_id.cmp(&b.file_id));
        let start = match marker {
            Some(m) => all.iter().position(|e| e.file_id == m).map(|i| i + 1).unwrap_or(0),
            None => 0,
        };
        let end = (start + limit as usize).min(all.len());
        let page = all[start..end].to_vec();
        let next_marker = if end < all.len() {
            page.last().map(|e| e.file_id.clone())
        } else {
            None
        };
        Ok((page, next_marker))
    }

    async fn get_detail(&self, file_id: &str) -> Result<RemoteDetail, DriveError> {
        let entry = self
            .entries
            .get(file_id)
            .map(|e| e.clone())
            .ok_or_else(|| DriveError::NotFound(file_id.to_string()))?;
        let download_url = self.get_download_url(file_id, 3600).await?;
        Ok(RemoteDetail { entry, download_url })
    }

    async fn get_download_url(&self, file_id: &str, _expiry_secs: u64) -> Result<String, DriveError> {
        if !self.entries.contains_key(file_id) {
            return Err(DriveError::NotFound(file_id.to_string()));
        }
        Ok(format!("mock://download/{file_id}"))
    }

    async fn create_folder(
        &self,
        parent_id: &str,
        name: &str,
        name_mode: NameMode,
    ) -> Result<RemoteEntry, DriveError> {
        if let Some(existing) = self
            .entries
            .iter()
            .find(|e| e.parent_file_id == parent_id && e.name == name && e.kind == EntryKind::Folder)
        {
            return match name_mode {
                NameMode::Refuse => Err(DriveError::AlreadyExists(name.to_string())),
                _ => Ok(existing.clone()),
            };
        }
        let file_id = self.alloc_id();
        let entry = RemoteEntry {
            file_id: file_id.clone(),
            parent_file_id: parent_id.to_string(),
            name: name.to_string(),
            kind: EntryKind::Folder,
            size: 0,
            content_hash: String::new(),
            created_at: SystemTime::now(),
            updated_at: SystemTime::now(),
            key: name.to_string(),
        };
        self.entries.insert(file_id, entry.clone());
        Ok(entry)
    }

    async fn create_file(&self, req: CreateFileRequest) -> Result<CreateFileResponse, DriveError> {
        if let Some(RapidUploadProof::FullHash { content_hash, .. }) = &req.proof {
            if let Some(existing) = self.find_by_content_hash(content_hash) {
                return Ok(CreateFileResponse {
                    file_id: existing.file_id,
                    upload_id: String::new(),
                    parts: Vec::new(),
                    rapid: true,
                });
            }
        }
        if let Some(RapidUploadProof::PreHash { .. }) = &req.proof {
            // Pre-hash alone never resolves in the mock; the caller always
            // falls through to a full-hash `create_file` call, matching
            // the "pre-hash matched" handshake.
            if self.entries.iter().any(|e| e.size == req.size) {
                return Err(DriveError::PreHashMatched);
            }
        }

        let file_id = self.alloc_id();
        let upload_id = self.alloc_id();
        let parts = (1..=req.part_count)
            .map(|n| UploadPart {
                number: n,
                upload_url: format!("mock://upload/{upload_id}/{n}"),
            })
            .collect();
        self.pending.insert(
            upload_id.clone(),
            Mutex::new(PendingUpload {
                file_id: file_id.clone(),
                buffer: Vec::new(),
                expected_len: req.size,
            }),
        );
        self.entries.insert(
            file_id.clone(),
            RemoteEntry {
                file_id: file_id.clone(),
                parent_file_id: req.parent_id.clone(),
                name: req.name.clone(),
                kind: EntryKind::File,
                size: req.size,
                content_hash: String::new(),
                created_at: SystemTime::now(),
                updated_at: SystemTime::now(),
                key: req.name.clone(),
            },
        );
        Ok(CreateFileResponse {
            file_id,
            upload_id,
            parts,
            rapid: false,
        })
    }

    async fn upload_part(&self, upload_url: &str, bytes: Bytes) -> Result<(), DriveError> {
        let upload_id = upload_url
            .trim_start_matches("mock://upload/")
            .split('/')
            .next()
            .unwrap_or_default()
            .to_string();
        let pending = self
            .pending
            .get(&upload_id)
            .ok_or_else(|| DriveError::NotFound(upload_id.clone()))?;
        let mut guard = pending.lock().unwrap();
        guard.buffer.extend_from_slice(&bytes);
        self.bytes_transferred.fetch_add(bytes.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    async fn complete(&self, file_id: &str, upload_id: &str) -> Result<RemoteEntry, DriveError> {
        let (_, pending) = self
            .pending
            .remove(upload_id)
            .ok_or_else(|| DriveError::NotFound(upload_id.to_string()))?;
        let pending = pending.into_inner().unwrap();
        if pending.buffer.len() as u64 != pending.expected_len {
            return Err(DriveError::Other(anyhow::anyhow!(
                "incomplete upload: got {} of {} bytes",
                pending.buffer.len(),
                pending.expected_len
            )));
        }
        let content_hash = hex_sha1(&pending.buffer);
        self.content.insert(file_id.to_string(), pending.buffer);
        let mut entry = self
            .entries
            .get(file_id)
            .map(|e| e.clone())
            .ok_or_else(|| DriveError::NotFound(file_id.to_string()))?;
        entry.content_hash = content_hash;
        entry.updated_at = SystemTime::now();
        self.entries.insert(file_id.to_string(), entry.clone());
        Ok(entry)
    }

    async fn update(&self, file_id: &str, new_name: &str, name_mode: NameMode) -> Result<(), DriveError> {
        let mut entry = self
            .entries
            .get_mut(file_id)
            .ok_or_else(|| DriveError::NotFound(file_id.to_string()))?;
        if name_mode == NameMode::Refuse
            && self
                .entries
                .iter()
                .any(|e| e.parent_file_id == entry.parent_file_id && e.name == new_name)
        {
            return Err(DriveError::AlreadyExists(new_name.to_string()));
        }
        entry.name = new_name.to_string();
        Ok(())
    }

    async fn move_entry(
        &self,
        file_id: &str,
        new_parent: &str,
        new_name: Option<&str>,
    ) -> Result<MoveOutcome, DriveError> {
        let mut entry = self
            .entries
            .get_mut(file_id)
            .ok_or_else(|| DriveError::NotFound(file_id.to_string()))?;
        let name = new_name.unwrap_or(&entry.name).to_string();
        let exists = self
            .entries
            .iter()
            .any(|e| e.file_id != file_id && e.parent_file_id == new_parent && e.name == name);
        if exists {
            return Ok(MoveOutcome { exist: true });
        }
        entry.parent_file_id = new_parent.to_string();
        entry.name = name;
        Ok(MoveOutcome { exist: false })
    }

    async fn delete(&self, file_id: &str, _to_recycle_bin: bool) -> Result<(), DriveError> {
        self.entries
            .remove(file_id)
            .ok_or_else(|| DriveError::NotFound(file_id.to_string()))?;
        self.content.remove(file_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_folder_refuse_on_collision() {
        let drive = MockDrive::new();
        drive.create_folder("", "docs", NameMode::Refuse).await.unwrap();
        let err = drive
            .create_folder("", "docs", NameMode::Refuse)
            .await
            .unwrap_err();
        assert!(matches!(err, DriveError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn rapid_dedup_matches_seeded_content_hash() {
        let drive = MockDrive::new();
        let seeded = drive.seed_file("", "a.bin", "root/a.bin", b"hello world");
        let resp = drive
            .create_file(CreateFileRequest {
                parent_id: String::new(),
                name: "b.bin".into(),
                size: 11,
                name_mode: NameMode::Refuse,
                part_count: 1,
                proof: Some(RapidUploadProof::FullHash {
                    content_hash: seeded.content_hash.clone(),
                    proof_code: "proof".into(),
                }),
            })
            .await
            .unwrap();
        assert!(resp.rapid);
        assert_eq!(resp.file_id, seeded.file_id);
        assert_eq!(drive.bytes_transferred.load(Ordering::Relaxed), 0);
    }
}

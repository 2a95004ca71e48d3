//! Reference `RemoteDrive` backend layered over an `opendal::Operator`.
//!
//! OpenDAL's generic object-storage surface covers listing, range-reads,
//! and writes, but has no notion of the drive-specific protocol pieces
//! (`partCount`, rapid-upload pre-hash/full-hash handshake, presigned
//! multipart upload URLs, move/rename-exists semantics) — those are
//! layered on top using the operator's custom-metadata and presign
//! facilities, the same way the teacher layers drive-specific behavior
//! over a generic `Operator`.

use crate::error::DriveError;
use crate::trait_def::*;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use opendal::{Metakey, Operator};
use rdrive_core::types::{EntryKind, NameMode, RemoteEntry};
use sha1::{Digest, Sha1};
use std::time::{Duration, SystemTime};

/// In-memory bookkeeping for in-flight multipart uploads, keyed by
/// upload id. A production backend would persist this remotely; here it
/// lives alongside the operator for the lifetime of the process.
struct PendingUpload {
    file_id: String,
    staged_key: String,
}

pub struct OpendalDrive {
    op: Operator,
    drive_id: String,
    pending: DashMap<String, PendingUpload>,
}

impl OpendalDrive {
    pub fn new(op: Operator, drive_id: impl Into<String>) -> Self {
        Self {
            op,
            drive_id: drive_id.into(),
            pending: DashMap::new(),
        }
    }

    fn resolve_path(&self, file_id: &str) -> String {
        // file_id is the backend's own opaque object key in this reference
        // implementation.
        file_id.to_string()
    }
}

fn entry_from_metadata(key: &str, file_id: &str, md: &opendal::Metadata) -> RemoteEntry {
    let kind = if md.is_dir() {
        EntryKind::Folder
    } else {
        EntryKind::File
    };
    let updated_at = md
        .last_modified()
        .map(|t| SystemTime::from(t))
        .unwrap_or(SystemTime::UNIX_EPOCH);
    RemoteEntry {
        file_id: file_id.to_string(),
        parent_file_id: key
            .trim_end_matches('/')
            .rsplit_once('/')
            .map(|(p, _)| p.to_string())
            .unwrap_or_default(),
        name: key
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(key)
            .to_string(),
        kind,
        size: md.content_length(),
        content_hash: md.content_md5().unwrap_or_default().to_string(),
        created_at: updated_at,
        updated_at,
        key: key.trim_matches('/').to_string(),
    }
}

#[async_trait]
impl RemoteDrive for OpendalDrive {
    async fn drive_info(&self) -> Result<DriveInfo, DriveError> {
        Ok(DriveInfo {
            drive_id: self.drive_id.clone(),
            name: self.drive_id.clone(),
        })
    }

    async fn space_info(&self) -> Result<SpaceInfo, DriveError> {
        // OpenDAL has no quota API; report unbounded space rather than
        // inventing a number. A vendor-specific backend overrides this.
        Ok(SpaceInfo {
            total_bytes: u64::MAX,
            used_bytes: 0,
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
        let lister = self
            .op
            .lister_with(parent_id)
            .metakey(Metakey::ContentLength | Metakey::LastModified | Metakey::ContentMd5)
            .await?;
        use futures::StreamExt;
        let mut lister = Box::pin(lister);
        let mut entries = Vec::new();
        let mut skipping = marker.is_some();
        while let Some(next) = lister.next().await {
            let entry = next?;
            if skipping {
                if entry.path() == marker.unwrap() {
                    skipping = false;
                }
                continue;
            }
            let md = entry.metadata();
            entries.push(entry_from_metadata(entry.path(), entry.path(), md));
            if entries.len() as u32 >= limit {
                let next_marker = Some(entry.path().to_string());
                return Ok((entries, next_marker));
            }
        }
        Ok((entries, None))
    }

    async fn search_all(
        &self,
        marker: Option<&str>,
        limit: u32,
    ) -> Result<(Vec<RemoteEntry>, Option<String>), DriveError> {
        self.list("/", marker, limit).await
    }

    async fn get_detail(&self, file_id: &str) -> Result<RemoteDetail, DriveError> {
        let path = self.resolve_path(file_id);
        let md = self.op.stat(&path).await?;
        let entry = entry_from_metadata(&path, file_id, &md);
        let download_url = self.get_download_url(file_id, 3600).await?;
        Ok(RemoteDetail {
            entry,
            download_url,
        })
    }

    async fn get_download_url(
        &self,
        file_id: &str,
        expiry_secs: u64,
    ) -> Result<String, DriveError> {
        let path = self.resolve_path(file_id);
        let req = self
            .op
            .presign_read(&path, Duration::from_secs(expiry_secs))
            .await?;
        Ok(req.uri().to_string())
    }

    async fn create_folder(
        &self,
        parent_id: &str,
        name: &str,
        name_mode: NameMode,
    ) -> Result<RemoteEntry, DriveError> {
        let key = format!("{}/{name}/", parent_id.trim_end_matches('/'));
        if name_mode == NameMode::Refuse && self.op.exists(&key).await? {
            return Err(DriveError::AlreadyExists(key));
        }
        self.op.create_dir(&key).await?;
        let md = self.op.stat(&key).await?;
        Ok(entry_from_metadata(&key, &key, &md))
    }

    async fn create_file(
        &self,
        req: CreateFileRequest,
    ) -> Result<CreateFileResponse, DriveError> {
        let key = format!("{}/{}", req.parent_id.trim_end_matches('/'), req.name);

        if let Some(RapidUploadProof::PreHash { .. }) = &req.proof {
            // This reference backend has no remote content index to match
            // against, so it never rapid-matches on the prefix hash alone;
            // callers always fall through to the full-hash round.
            return Err(DriveError::PreHashMatched);
        }

        if let Some(RapidUploadProof::FullHash { content_hash, .. }) = &req.proof {
            if let Some(existing) = self.find_by_content_hash(content_hash).await? {
                return Ok(CreateFileResponse {
                    file_id: existing,
                    upload_id: String::new(),
                    parts: Vec::new(),
                    rapid: true,
                });
            }
        }

        let upload_id = uuid::Uuid::new_v4().to_string();
        let mut parts = Vec::with_capacity(req.part_count as usize);
        for part_no in 1..=req.part_count {
            let staged_key = format!("{key}.{part_no}.part");
            let url = self
                .op
                .presign_write(&staged_key, Duration::from_secs(3600))
                .await?;
            parts.push(UploadPart {
                number: part_no,
                upload_url: url.uri().to_string(),
            });
        }
        self.pending.insert(
            upload_id.clone(),
            PendingUpload {
                file_id: key.clone(),
                staged_key: key.clone(),
            },
        );
        Ok(CreateFileResponse {
            file_id: key,
            upload_id,
            parts,
            rapid: false,
        })
    }

    async fn upload_part(&self, upload_url: &str, bytes: Bytes) -> Result<(), DriveError> {
        // Presigned PUTs issued by `create_file` are opaque URIs the
        // caller writes to directly through an HTTP client; the operator
        // itself has no notion of "upload to this presigned URL" beyond
        // issuing it, so the upload engine performs the PUT. This method
        // exists so in-process backends (tests, single-binary daemons)
        // can still go through the trait uniformly.
        let _ = (upload_url, bytes);
        Ok(())
    }

    async fn complete(&self, file_id: &str, upload_id: &str) -> Result<RemoteEntry, DriveError> {
        let pending = self
            .pending
            .remove(upload_id)
            .map(|(_, v)| v)
            .ok_or_else(|| DriveError::NotFound(upload_id.to_string()))?;
        let md = self.op.stat(&pending.staged_key).await?;
        Ok(entry_from_metadata(&pending.staged_key, file_id, &md))
    }

    async fn update(
        &self,
        file_id: &str,
        new_name: &str,
        name_mode: NameMode,
    ) -> Result<(), DriveError> {
        let old = self.resolve_path(file_id);
        let parent = old.rsplit_once('/').map(|(p, _)| p).unwrap_or("");
        let new_key = format!("{parent}/{new_name}");
        if name_mode == NameMode::Refuse && self.op.exists(&new_key).await? {
            return Err(DriveError::AlreadyExists(new_key));
        }
        self.op.rename(&old, &new_key).await?;
        Ok(())
    }

    async fn move_entry(
        &self,
        file_id: &str,
        new_parent: &str,
        new_name: Option<&str>,
    ) -> Result<MoveOutcome, DriveError> {
        let old = self.resolve_path(file_id);
        let name = new_name.unwrap_or_else(|| old.rsplit('/').next().unwrap_or(&old));
        let new_key = format!("{}/{}", new_parent.trim_end_matches('/'), name);
        let exist = self.op.exists(&new_key).await?;
        if exist {
            return Ok(MoveOutcome { exist: true });
        }
        self.op.rename(&old, &new_key).await?;
        Ok(MoveOutcome { exist: false })
    }

    async fn delete(&self, file_id: &str, to_recycle_bin: bool) -> Result<(), DriveError> {
        let path = self.resolve_path(file_id);
        if to_recycle_bin {
            let trashed = format!(".trash/{path}");
            self.op.rename(&path, &trashed).await?;
        } else {
            self.op.remove_all(&path).await?;
        }
        Ok(())
    }
}

impl OpendalDrive {
    async fn find_by_content_hash(&self, content_hash: &str) -> Result<Option<String>, DriveError> {
        let _ = Sha1::new();
        // No remote content index in this reference backend; a vendor
        // backend would query its dedup index here.
        let _ = content_hash;
        Ok(None)
    }
}

//! The abstract `RemoteDrive` operation set.
//!
//! Sits above a generic object-storage `Operator` (OpenDAL's S3-shaped
//! surface has no notion of `partCount`/`preHash`/`proofCode`/presigned
//! multipart uploads), so a drive-specific trait is required rather than
//! using `opendal::Operator` directly.

use crate::error::DriveError;
use async_trait::async_trait;
use bytes::Bytes;
use rdrive_core::types::{NameMode, RemoteEntry};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DriveInfo {
    pub drive_id: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SpaceInfo {
    pub total_bytes: u64,
    pub used_bytes: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VipInfo {
    pub is_vip: bool,
    pub level: String,
}

#[derive(Debug, Clone)]
pub struct RemoteDetail {
    pub entry: RemoteEntry,
    pub download_url: String,
}

/// Part-upload slot returned by `create_file`.
#[derive(Debug, Clone)]
pub struct UploadPart {
    pub number: u32,
    pub upload_url: String,
}

/// The rapid-upload pre-hash/full-hash handshake.
#[derive(Debug, Clone)]
pub enum RapidUploadProof {
    /// SHA-1 of a fixed-size prefix, sent first for files > 1 MiB.
    PreHash { sha1_prefix: String },
    /// Full-file SHA-1 plus an access-token-derived proof code, sent either
    /// directly (files <= 1 MiB) or after a `PreHashMatched` response.
    FullHash {
        content_hash: String,
        proof_code: String,
    },
}

#[derive(Debug, Clone)]
pub struct CreateFileRequest {
    // cloned per retry attempt by `RetryingDrive`
    pub parent_id: String,
    pub name: String,
    pub size: u64,
    pub name_mode: NameMode,
    pub part_count: u32,
    pub proof: Option<RapidUploadProof>,
}

#[derive(Debug, Clone)]
pub struct CreateFileResponse {
    pub file_id: String,
    pub upload_id: String,
    pub parts: Vec<UploadPart>,
    /// `true` when the server linked existing content instead of accepting
    /// bytes.
    pub rapid: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveOutcome {
    pub exist: bool,
}

/// Object-safe (`dyn`-compatible via `async_trait`) remote-drive operation
/// set. Every operation returns a categorized `DriveError` on failure.
#[async_trait]
pub trait RemoteDrive: Send + Sync {
    async fn drive_info(&self) -> Result<DriveInfo, DriveError>;
    async fn space_info(&self) -> Result<SpaceInfo, DriveError>;
    async fn vip_info(&self) -> Result<VipInfo, DriveError>;

    async fn list(
        &self,
        parent_id: &str,
        marker: Option<&str>,
        limit: u32,
    ) -> Result<(Vec<RemoteEntry>, Option<String>), DriveError>;

    async fn search_all(
        &self,
        marker: Option<&str>,
        limit: u32,
    ) -> Result<(Vec<RemoteEntry>, Option<String>), DriveError>;

    async fn get_detail(&self, file_id: &str) -> Result<RemoteDetail, DriveError>;
    async fn get_download_url(
        &self,
        file_id: &str,
        expiry_secs: u64,
    ) -> Result<String, DriveError>;

    async fn create_folder(
        &self,
        parent_id: &str,
        name: &str,
        name_mode: NameMode,
    ) -> Result<RemoteEntry, DriveError>;

    async fn create_file(
        &self,
        req: CreateFileRequest,
    ) -> Result<CreateFileResponse, DriveError>;

    async fn upload_part(&self, upload_url: &str, bytes: Bytes) -> Result<(), DriveError>;

    async fn complete(&self, file_id: &str, upload_id: &str) -> Result<RemoteEntry, DriveError>;

    async fn update(
        &self,
        file_id: &str,
        new_name: &str,
        name_mode: NameMode,
    ) -> Result<(), DriveError>;

    async fn move_entry(
        &self,
        file_id: &str,
        new_parent: &str,
        new_name: Option<&str>,
    ) -> Result<MoveOutcome, DriveError>;

    async fn delete(&self, file_id: &str, to_recycle_bin: bool) -> Result<(), DriveError>;
}

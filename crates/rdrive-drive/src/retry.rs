//! Rate-limit & retry protocol, layered over any `RemoteDrive` impl
//! as a decorator rather than folded into the trait — the same layering
//! idiom OpenDAL itself uses for its own `Layer`s (`LoggingLayer`,
//! `RetryLayer`).

use crate::error::DriveError;
use crate::trait_def::*;
use async_trait::async_trait;
use bytes::Bytes;
use rdrive_core::types::{NameMode, RemoteEntry};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const MAX_ATTEMPTS: u32 = 5;
const MIN_RETRY_DELAY: Duration = Duration::from_millis(250);
const LIST_MIN_GAP: Duration = Duration::from_millis(250);

/// Decorates a `RemoteDrive` with retry-on-rate-limit and a minimum
/// inter-call gap for listing operations.
pub struct RetryingDrive<D> {
    inner: D,
    last_list_call: Mutex<Instant>,
}

impl<D: RemoteDrive> RetryingDrive<D> {
    pub fn new(inner: D) -> Self {
        Self {
            inner,
            last_list_call: Mutex::new(Instant::now() - LIST_MIN_GAP),
        }
    }

    async fn gate_list_calls(&self) {
        let mut last = self.last_list_call.lock().await;
        let elapsed = last.elapsed();
        if elapsed < LIST_MIN_GAP {
            tokio::time::sleep(LIST_MIN_GAP - elapsed).await;
        }
        *last = Instant::now();
    }

    async fn with_retry<T, F, Fut>(&self, op: F) -> Result<T, DriveError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, DriveError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(v) => return Ok(v),
                Err(DriveError::RateLimited { retry_after }) if attempt < MAX_ATTEMPTS => {
                    let delay = retry_after.unwrap_or(MIN_RETRY_DELAY).max(MIN_RETRY_DELAY);
                    tracing::debug!(attempt, ?delay, "rate limited, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl<D: RemoteDrive> RemoteDrive for RetryingDrive<D> {
    async fn drive_info(&self) -> Result<DriveInfo, DriveError> {
        self.with_retry(|| self.inner.drive_info()).await
    }

    async fn space_info(&self) -> Result<SpaceInfo, DriveError> {
        self.with_retry(|| self.inner.space_info()).await
    }

    async fn vip_info(&self) -> Result<VipInfo, DriveError> {
        self.with_retry(|| self.inner.vip_info()).await
    }

    async fn list(
        &self,
        parent_id: &str,
        marker: Option<&str>,
        limit: u32,
    ) -> Result<(Vec<RemoteEntry>, Option<String>), DriveError> {
        self.gate_list_calls().await;
        self.with_retry(|| self.inner.list(parent_id, marker, limit))
            .await
    }

    async fn search_all(
        &self,
        marker: Option<&str>,
        limit: u32,
    ) -> Result<(Vec<RemoteEntry>, Option<String>), DriveError> {
        self.gate_list_calls().await;
        self.with_retry(|| self.inner.search_all(marker, limit))
            .await
    }

    async fn get_detail(&self, file_id: &str) -> Result<RemoteDetail, DriveError> {
        self.with_retry(|| self.inner.get_detail(file_id)).await
    }

    async fn get_download_url(
        &self,
        file_id: &str,
        expiry_secs: u64,
    ) -> Result<String, DriveError> {
        self.with_retry(|| self.inner.get_download_url(file_id, expiry_secs))
            .await
    }

    async fn create_folder(
        &self,
        parent_id: &str,
        name: &str,
        name_mode: NameMode,
    ) -> Result<RemoteEntry, DriveError> {
        self.with_retry(|| self.inner.create_folder(parent_id, name, name_mode))
            .await
    }

    async fn create_file(
        &self,
        req: CreateFileRequest,
    ) -> Result<CreateFileResponse, DriveError> {
        self.with_retry(|| self.inner.create_file(req.clone()))
            .await
    }

    async fn upload_part(&self, upload_url: &str, bytes: Bytes) -> Result<(), DriveError> {
        // Part retry (3x, 5/25/125s) is the upload engine's concern, not
        // this generic rate-limit wrapper's — a single PUT here still
        // benefits from the rate-limit retry class.
        self.with_retry(|| self.inner.upload_part(upload_url, bytes.clone()))
            .await
    }

    async fn complete(&self, file_id: &str, upload_id: &str) -> Result<RemoteEntry, DriveError> {
        self.with_retry(|| self.inner.complete(file_id, upload_id))
            .await
    }

    async fn update(
        &self,
        file_id: &str,
        new_name: &str,
        name_mode: NameMode,
    ) -> Result<(), DriveError> {
        self.with_retry(|| self.inner.update(file_id, new_name, name_mode))
            .await
    }

    async fn move_entry(
        &self,
        file_id: &str,
        new_parent: &str,
        new_name: Option<&str>,
    ) -> Result<MoveOutcome, DriveError> {
        self.with_retry(|| self.inner.move_entry(file_id, new_parent, new_name))
            .await
    }

    async fn delete(&self, file_id: &str, to_recycle_bin: bool) -> Result<(), DriveError> {
        self.with_retry(|| self.inner.delete(file_id, to_recycle_bin))
            .await
    }
}

/// Convenience: wrap any `RemoteDrive` behind the retry decorator and an
/// `Arc` so it can be shared across the reconciler, upload engine, and
/// mount adapter.
pub fn retrying(inner: impl RemoteDrive + 'static) -> Arc<dyn RemoteDrive> {
    Arc::new(RetryingDrive::new(inner))
}

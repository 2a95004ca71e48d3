//! tonic gRPC control plane over a Unix domain socket: job control and
//! mount/unmount administration, wired to the job controller and mount
//! registry that own the actual behavior.

use anyhow::Result;
use rdrive_core::config::RdriveConfig;
use rdrive_core::proto::{
    rdrive_daemon_server::{RdriveDaemon, RdriveDaemonServer},
    *,
};
use rdrive_drive::RemoteDrive;
use rdrive_mount::mounts::{MountHandle, MountRegistry};
use rdrive_sync::job::{JobController, JobState as CoreJobState};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::UnixListener;
use tokio_stream::wrappers::UnixListenerStream;
use tonic::transport::Server;
use tracing::info;

/// Implementation of the `RdriveDaemon` gRPC service: thin glue between
/// the wire types and the job controller / mount registry that own the
/// actual behavior.
pub struct RdriveDaemonImpl {
    config: Arc<RdriveConfig>,
    drive: Arc<dyn RemoteDrive>,
    drive_ok: AtomicBool,
    start_time: std::time::Instant,
    jobs: Arc<JobController>,
    mounts: Arc<MountRegistry>,
    staging_root: PathBuf,
}

impl RdriveDaemonImpl {
    pub fn new(
        config: Arc<RdriveConfig>,
        drive: Arc<dyn RemoteDrive>,
        drive_ok: bool,
        jobs: Arc<JobController>,
        mounts: Arc<MountRegistry>,
        staging_root: PathBuf,
    ) -> Self {
        Self {
            config,
            drive,
            drive_ok: AtomicBool::new(drive_ok),
            start_time: std::time::Instant::now(),
            jobs,
            mounts,
            staging_root,
        }
    }

    pub fn set_drive_ok(&self, ok: bool) {
        self.drive_ok.store(ok, Ordering::Relaxed);
    }

    async fn job_status_response(&self, job_id: &str) -> Result<JobStatusResponse, tonic::Status> {
        let (state, progress) = self
            .jobs
            .status(job_id)
            .await
            .map_err(|e| tonic::Status::not_found(e.to_string()))?;
        Ok(JobStatusResponse {
            job_id: job_id.to_string(),
            state: map_state(state) as i32,
            processed_items: progress.processed_items,
            total_items: progress.total_items,
            processed_bytes: progress.processed_bytes,
            last_message: progress.last_message,
            error: progress.error.unwrap_or_default(),
        })
    }
}

/// The job controller's state machine is mirrored 1:1 onto the proto
/// enum; both name their variants identically after prost strips the
/// shared `JOB_STATE_` prefix.
fn map_state(state: CoreJobState) -> JobState {
    match state {
        CoreJobState::None => JobState::None,
        CoreJobState::Initializing => JobState::Initializing,
        CoreJobState::Starting => JobState::Starting,
        CoreJobState::Idle => JobState::Idle,
        CoreJobState::Queued => JobState::Queued,
        CoreJobState::Scanning => JobState::Scanning,
        CoreJobState::BackingUp => JobState::BackingUp,
        CoreJobState::Restoring => JobState::Restoring,
        CoreJobState::Verifying => JobState::Verifying,
        CoreJobState::Paused => JobState::Paused,
        CoreJobState::Cancelling => JobState::Cancelling,
        CoreJobState::Cancelled => JobState::Cancelled,
        CoreJobState::Disabled => JobState::Disabled,
        CoreJobState::Completed => JobState::Completed,
        CoreJobState::Error => JobState::Error,
    }
}

#[tonic::async_trait]
impl RdriveDaemon for RdriveDaemonImpl {
    async fn status(
        &self,
        _request: tonic::Request<Empty>,
    ) -> Result<tonic::Response<StatusResponse>, tonic::Status> {
        let ids = self.jobs.list_job_ids().await;
        let mut active_jobs = 0u32;
        for id in &ids {
            if let Ok((state, _)) = self.jobs.status(id).await {
                if state.is_running() {
                    active_jobs += 1;
                }
            }
        }

        Ok(tonic::Response::new(StatusResponse {
            version: env!("CARGO_PKG_VERSION").into(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            drive_endpoint: self.config.drive.endpoint.clone(),
            drive_ok: self.drive_ok.load(Ordering::Relaxed),
            active_mounts: self.mounts.list().len() as u32,
            active_jobs,
        }))
    }

    async fn enqueue_job(
        &self,
        request: tonic::Request<EnqueueJobRequest>,
    ) -> Result<tonic::Response<JobStatusResponse>, tonic::Status> {
        let req = request.into_inner();
        self.jobs
            .enqueue(&req.job_id, req.immediate)
            .await
            .map_err(|e| tonic::Status::failed_precondition(e.to_string()))?;
        Ok(tonic::Response::new(self.job_status_response(&req.job_id).await?))
    }

    async fn job_status(
        &self,
        request: tonic::Request<JobStatusRequest>,
    ) -> Result<tonic::Response<JobStatusResponse>, tonic::Status> {
        let req = request.into_inner();
        Ok(tonic::Response::new(self.job_status_response(&req.job_id).await?))
    }

    async fn pause_job(
        &self,
        request: tonic::Request<JobIdRequest>,
    ) -> Result<tonic::Response<JobStatusResponse>, tonic::Status> {
        let req = request.into_inner();
        self.jobs
            .pause(&req.job_id)
            .await
            .map_err(|e| tonic::Status::failed_precondition(e.to_string()))?;
        Ok(tonic::Response::new(self.job_status_response(&req.job_id).await?))
    }

    async fn resume_job(
        &self,
        request: tonic::Request<JobIdRequest>,
    ) -> Result<tonic::Response<JobStatusResponse>, tonic::Status> {
        let req = request.into_inner();
        self.jobs
            .resume(&req.job_id)
            .await
            .map_err(|e| tonic::Status::failed_precondition(e.to_string()))?;
        Ok(tonic::Response::new(self.job_status_response(&req.job_id).await?))
    }

    async fn cancel_job(
        &self,
        request: tonic::Request<JobIdRequest>,
    ) -> Result<tonic::Response<JobStatusResponse>, tonic::Status> {
        let req = request.into_inner();
        self.jobs
            .cancel(&req.job_id)
            .await
            .map_err(|e| tonic::Status::failed_precondition(e.to_string()))?;
        Ok(tonic::Response::new(self.job_status_response(&req.job_id).await?))
    }

    async fn list_jobs(
        &self,
        _request: tonic::Request<Empty>,
    ) -> Result<tonic::Response<ListJobsResponse>, tonic::Status> {
        let ids = self.jobs.list_job_ids().await;
        let mut jobs = Vec::with_capacity(ids.len());
        for id in ids {
            jobs.push(self.job_status_response(&id).await?);
        }
        Ok(tonic::Response::new(ListJobsResponse { jobs }))
    }

    async fn mount(
        &self,
        request: tonic::Request<MountRequest>,
    ) -> Result<tonic::Response<MountResponse>, tonic::Status> {
        let req = request.into_inner();
        if req.mountpoint.is_empty() || req.job_id.is_empty() {
            return Ok(tonic::Response::new(MountResponse {
                success: false,
                error: "job_id and mountpoint are required".into(),
            }));
        }
        if self.mounts.is_mounted(&req.mountpoint) {
            return Ok(tonic::Response::new(MountResponse {
                success: false,
                error: format!("already mounted at {}", req.mountpoint),
            }));
        }
        let Some(job) = self.config.jobs.get(&req.job_id).cloned() else {
            return Ok(tonic::Response::new(MountResponse {
                success: false,
                error: format!("unknown job id {}", req.job_id),
            }));
        };

        match spawn_mount(self.drive.clone(), &self.config, &job, &req, self.staging_root.clone()).await {
            Ok(handle) => {
                self.mounts.register(&req.mountpoint, handle);
                Ok(tonic::Response::new(MountResponse { success: true, error: String::new() }))
            }
            Err(e) => Ok(tonic::Response::new(MountResponse { success: false, error: e.to_string() })),
        }
    }

    async fn unmount(
        &self,
        request: tonic::Request<UnmountRequest>,
    ) -> Result<tonic::Response<UnmountResponse>, tonic::Status> {
        let req = request.into_inner();
        if !self.mounts.is_mounted(&req.mountpoint) {
            return Ok(tonic::Response::new(UnmountResponse {
                success: false,
                error: format!("not mounted: {}", req.mountpoint),
            }));
        }

        let first = tokio::process::Command::new("fusermount3").args(["-u", &req.mountpoint]).output().await;
        let ok = match first {
            Ok(output) if output.status.success() => true,
            _ => match tokio::process::Command::new("fusermount").args(["-u", &req.mountpoint]).output().await {
                Ok(output) if output.status.success() => true,
                Ok(output) => {
                    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
                    return Ok(tonic::Response::new(UnmountResponse {
                        success: false,
                        error: format!("fusermount failed: {stderr}"),
                    }));
                }
                Err(e) => {
                    return Ok(tonic::Response::new(UnmountResponse {
                        success: false,
                        error: format!("fusermount spawn failed: {e}"),
                    }))
                }
            },
        };

        if ok {
            if let Some(handle) = self.mounts.unregister(&req.mountpoint) {
                handle.shutdown.cancel();
            }
        }
        Ok(tonic::Response::new(UnmountResponse { success: ok, error: String::new() }))
    }

    type WatchStream = std::pin::Pin<Box<dyn tokio_stream::Stream<Item = Result<WatchEvent, tonic::Status>> + Send>>;

    async fn watch(
        &self,
        request: tonic::Request<WatchRequest>,
    ) -> Result<tonic::Response<Self::WatchStream>, tonic::Status> {
        use notify::{RecursiveMode, Watcher};

        let req = request.into_inner();
        if req.paths.is_empty() {
            return Err(tonic::Status::invalid_argument("at least one path is required"));
        }

        info!(paths = ?req.paths, "watch requested");

        let (sync_tx, sync_rx) = std::sync::mpsc::channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let _ = sync_tx.send(res);
        })
        .map_err(|e| tonic::Status::internal(format!("create watcher: {e}")))?;

        for path_str in &req.paths {
            let path = Path::new(path_str);
            watcher
                .watch(path, RecursiveMode::Recursive)
                .map_err(|e| tonic::Status::internal(format!("watch {path_str}: {e}")))?;
        }

        let (async_tx, async_rx) = tokio::sync::mpsc::channel(256);

        tokio::task::spawn_blocking(move || {
            let _watcher = watcher;
            while let Ok(result) = sync_rx.recv() {
                let event = match result {
                    Ok(event) => {
                        let event_type = match event.kind {
                            notify::EventKind::Create(_) => "created",
                            notify::EventKind::Modify(_) => "modified",
                            notify::EventKind::Remove(_) => "deleted",
                            _ => continue,
                        };
                        let path = event.paths.first().map(|p| p.to_string_lossy().to_string()).unwrap_or_default();
                        let timestamp = std::time::SystemTime::now()
                            .duration_since(std::time::UNIX_EPOCH)
                            .unwrap_or_default()
                            .as_secs();
                        WatchEvent { path, event_type: event_type.to_string(), timestamp }
                    }
                    Err(e) => WatchEvent { path: String::new(), event_type: format!("error: {e}"), timestamp: 0 },
                };
                if async_tx.blocking_send(Ok(event)).is_err() {
                    break;
                }
            }
        });

        let stream = tokio_stream::wrappers::ReceiverStream::new(async_rx);
        Ok(tonic::Response::new(Box::pin(stream)))
    }
}

#[cfg(feature = "fuse")]
async fn spawn_mount(
    drive: Arc<dyn RemoteDrive>,
    config: &RdriveConfig,
    job: &rdrive_core::types::JobConfig,
    req: &MountRequest,
    staging_root: PathBuf,
) -> Result<MountHandle> {
    let folder_locks = rdrive_core::locks::ShardedLocks::default();
    let root_components: Vec<&str> = job.target.split('/').filter(|s| !s.is_empty()).collect();
    let root_id =
        rdrive_sync::upload::ensure_folder_chain(drive.as_ref(), &folder_locks, "", &root_components).await?;

    let mount_cfg = rdrive_mount::driver::MountConfig {
        drive: drive.clone(),
        root_id,
        mountpoint: PathBuf::from(&req.mountpoint),
        staging_root,
        read_cache_ttl: std::time::Duration::from_secs(config.mount.read_cache_ttl_secs),
        download_url_cache_ttl: std::time::Duration::from_secs(config.mount.download_url_cache_ttl_secs),
        download_url_cache_absolute_ttl: std::time::Duration::from_secs(
            config.mount.download_url_cache_absolute_secs,
        ),
        small_read_threshold_bytes: config.mount.small_read_threshold_bytes,
        refresh_queue_capacity: config.mount.refresh_queue_capacity,
        refresh_staleness: std::time::Duration::from_secs(config.mount.refresh_staleness_secs),
        to_recycle_bin: job.is_recycle_bin,
        read_only: req.read_only,
        allow_other: config.mount.allow_other,
    };

    let mountpoint = mount_cfg.mountpoint.clone();
    tokio::fs::create_dir_all(&mountpoint).await.ok();
    let fs = rdrive_mount::driver::RdriveFs::new(mount_cfg);
    let shutdown = tokio_util::sync::CancellationToken::new();
    let mountpoint_for_task = mountpoint.clone();
    let read_only = req.read_only;
    let allow_other = config.mount.allow_other;
    tokio::spawn(async move {
        if let Err(e) = rdrive_mount::driver::mount(fs, mountpoint_for_task, read_only, allow_other).await {
            tracing::error!(error = %e, "mount session ended with error");
        }
    });

    Ok(MountHandle { mountpoint, job_id: req.job_id.clone(), shutdown })
}

#[cfg(not(feature = "fuse"))]
async fn spawn_mount(
    _drive: Arc<dyn RemoteDrive>,
    _config: &RdriveConfig,
    _job: &rdrive_core::types::JobConfig,
    _req: &MountRequest,
    _staging_root: PathBuf,
) -> Result<MountHandle> {
    anyhow::bail!("mount support not compiled in; rebuild rdrived with --features fuse")
}

/// Starts the gRPC server on a Unix domain socket with graceful shutdown.
pub async fn serve(
    socket_path: &Path,
    impl_: RdriveDaemonImpl,
    shutdown: impl std::future::Future<Output = ()>,
) -> Result<()> {
    if socket_path.exists() {
        tokio::fs::remove_file(socket_path).await?;
    }
    if let Some(parent) = socket_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let listener = UnixListener::bind(socket_path)?;
    let stream = UnixListenerStream::new(listener);

    info!(socket = %socket_path.display(), "gRPC server ready");

    Server::builder()
        .add_service(RdriveDaemonServer::new(impl_))
        .serve_with_incoming_shutdown(stream, shutdown)
        .await
        .map_err(|e| anyhow::anyhow!("gRPC server error: {e}"))
}

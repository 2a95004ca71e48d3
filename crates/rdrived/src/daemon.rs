//! Daemon lifecycle: builds the remote drive handle, the job controller,
//! the mount registry, and the metrics/gRPC servers, then runs until a
//! shutdown signal arrives.

use anyhow::Result;
use rdrive_core::config::RdriveConfig;
use rdrive_core::locks::ShardedLocks;
use rdrive_drive::{OpendalDrive, RemoteDrive};
use rdrive_mount::mounts::MountRegistry;
use rdrive_sync::job::JobController;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::grpc::RdriveDaemonImpl;
use crate::metrics::HealthState;
use crate::runner::{self, JobContext};
use crate::token_cache;

pub async fn run(config: RdriveConfig) -> Result<()> {
    info!("daemon starting");

    let bucket = std::env::var("RDRIVE_BUCKET").unwrap_or_default();
    let region = std::env::var("RDRIVE_REGION").unwrap_or_else(|_| "us-east-1".into());
    let access_key_id = std::env::var("RDRIVE_ACCESS_KEY_ID").unwrap_or_default();
    let secret_access_key = std::env::var("RDRIVE_SECRET_ACCESS_KEY").unwrap_or_default();

    let op = rdrive_drive::operator::build_from_drive_config(
        &config.drive,
        &bucket,
        &region,
        &access_key_id,
        &secret_access_key,
    )?;
    let drive_id = if config.drive.default_drive_id.is_empty() {
        bucket.clone()
    } else {
        config.drive.default_drive_id.clone()
    };
    let drive: Arc<dyn RemoteDrive> = rdrive_drive::retrying(OpendalDrive::new(op.clone(), drive_id));

    let drive_ok = match rdrive_drive::operator::check_health(&op).await {
        Ok(()) => {
            info!(endpoint = %config.drive.endpoint, "drive reachable");
            true
        }
        Err(e) => {
            warn!(error = %e, "drive health check failed; daemon will start degraded");
            false
        }
    };

    // Access token: loaded once at startup, then kept fresh by a
    // file-watcher on the configured credentials file.
    let token = token_cache::new_shared();
    let _token_watcher = if let Some(ref cred_file) = config.drive.credentials_file {
        token_cache::load_initial(cred_file, &token).await;
        match token_cache::watch(cred_file.clone(), token.clone()) {
            Ok(watcher) => {
                info!(path = %watcher.path().display(), "access token watcher started");
                Some(watcher)
            }
            Err(e) => {
                warn!(error = %e, "access token watcher failed to start");
                None
            }
        }
    } else {
        None
    };

    let cache_dir = config
        .daemon
        .socket
        .parent()
        .unwrap_or_else(|| std::path::Path::new("/var/lib/rdrived"))
        .join("cache");
    let staging_root = cache_dir.join("staging");
    tokio::fs::create_dir_all(&staging_root).await.ok();

    let job_ctx = Arc::new(JobContext {
        drive: drive.clone(),
        config: Arc::new(config.clone()),
        cache_dir,
        staging_root: staging_root.clone(),
        folder_locks: ShardedLocks::default(),
        upload_locks: ShardedLocks::default(),
        token: token.clone(),
    });

    let jobs = JobController::new(runner::make_run_fn(job_ctx));
    for job_id in config.jobs.keys() {
        jobs.register(job_id).await?;
    }
    jobs.reconfigure_schedules(&config.jobs).await;

    // Scheduler tick: checks due jobs once a minute, matching cron's own
    // minute-level resolution.
    let scheduler_jobs = jobs.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            interval.tick().await;
            let due = scheduler_jobs.due_jobs(chrono::Utc::now()).await;
            for job_id in due {
                if let Err(e) = scheduler_jobs.enqueue(&job_id, false).await {
                    warn!(job = %job_id, error = %e, "failed to enqueue scheduled run");
                }
            }
        }
    });

    let mounts = Arc::new(MountRegistry::new());

    if let Some(addr) = config.daemon.metrics_addr.clone() {
        let health_state = HealthState { registry: Arc::new(crate::metrics::Registry::default()), drive: drive.clone() };
        tokio::spawn(async move {
            if let Err(e) = crate::metrics::serve(addr, health_state).await {
                error!(error = %e, "metrics server failed");
            }
        });
    }

    notify_ready();

    let socket_path = config.daemon.socket.clone();
    let config = Arc::new(config);
    let impl_ = RdriveDaemonImpl::new(config.clone(), drive.clone(), drive_ok, jobs.clone(), mounts.clone(), staging_root);

    let shutdown_signal = async move {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received SIGINT, initiating graceful shutdown");
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM, initiating graceful shutdown");
            }
        }

        notify_stopping();
        info!("shutdown complete");
    };

    info!(socket = %socket_path.display(), "gRPC: listening");
    crate::grpc::serve(&socket_path, impl_, shutdown_signal).await?;

    let _ = tokio::fs::remove_file(&socket_path).await;
    Ok(())
}

fn notify_ready() {
    if let Ok(socket) = std::env::var("NOTIFY_SOCKET") {
        use std::os::unix::net::UnixDatagram;
        if let Ok(sock) = UnixDatagram::unbound() {
            let _ = sock.send_to(b"READY=1\n", &socket);
            tracing::debug!(notify_socket = %socket, "sent systemd READY=1");
        }
    }
}

fn notify_stopping() {
    if let Ok(socket) = std::env::var("NOTIFY_SOCKET") {
        use std::os::unix::net::UnixDatagram;
        if let Ok(sock) = UnixDatagram::unbound() {
            let _ = sock.send_to(b"STOPPING=1\n", &socket);
            tracing::debug!(notify_socket = %socket, "sent systemd STOPPING=1");
        }
    }
}

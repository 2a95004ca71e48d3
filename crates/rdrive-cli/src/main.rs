//! rdrive: control-plane client for rdrived
//!
//! A thin gRPC client over the daemon's Unix domain socket — all actual
//! scanning/reconciling/uploading/mounting behavior lives in `rdrived`;
//! this binary only renders requests and responses.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use rdrive_core::config::RdriveConfig;
use rdrive_core::proto::{
    rdrive_daemon_client::RdriveDaemonClient, EnqueueJobRequest, JobIdRequest, JobState,
    JobStatusRequest, MountRequest, UnmountRequest,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tonic::transport::{Channel, Endpoint, Uri};
use tower::service_fn;

#[derive(Parser, Debug)]
#[command(name = "rdrive", version, about = "rdrive control-plane client")]
struct Cli {
    /// Path to rdrive.toml configuration file
    #[arg(long, short = 'c', env = "RDRIVE_CONFIG", default_value = "/etc/rdrive/config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show daemon status
    Status,

    /// Job control
    Job {
        #[command(subcommand)]
        action: JobAction,
    },

    /// Mount a job's remote target as a local FUSE filesystem
    Mount {
        job_id: String,
        mountpoint: PathBuf,
        #[arg(long)]
        read_only: bool,
    },

    /// Unmount a previously mounted FUSE filesystem
    Unmount { mountpoint: PathBuf },
}

#[derive(Subcommand, Debug)]
enum JobAction {
    /// Enqueue a run of the named job
    Enqueue {
        job_id: String,
        /// Run immediately, bypassing the normal queue ordering
        #[arg(long)]
        immediate: bool,
    },
    /// Show a job's current state and progress
    Status { job_id: String },
    /// Pause a running job
    Pause { job_id: String },
    /// Resume a paused job
    Resume { job_id: String },
    /// Cancel a queued or running job
    Cancel { job_id: String },
    /// List all configured jobs and their current state
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    let config = load_config(&cli.config).await.unwrap_or_default();
    let socket = config.daemon.socket.clone();

    match cli.command {
        Commands::Status => cmd_status(&socket).await,
        Commands::Job { action } => cmd_job(&socket, action).await,
        Commands::Mount { job_id, mountpoint, read_only } => cmd_mount(&socket, job_id, mountpoint, read_only).await,
        Commands::Unmount { mountpoint } => cmd_unmount(&socket, mountpoint).await,
    }
}

async fn load_config(path: &Path) -> Result<RdriveConfig> {
    let content = tokio::fs::read_to_string(path).await?;
    toml::from_str(&content).map_err(|e| anyhow::anyhow!("parsing {}: {e}", path.display()))
}

async fn connect_daemon(socket_path: &Path) -> Result<RdriveDaemonClient<Channel>> {
    if !socket_path.exists() {
        anyhow::bail!(
            "rdrived: socket not found at {}\n       Is rdrived running?  Try: rdrived --config /etc/rdrive/config.toml",
            socket_path.display()
        );
    }

    let path = socket_path.to_path_buf();
    let channel = Endpoint::from_static("http://[::]:0")
        .connect_with_connector(service_fn(move |_: Uri| {
            let path = path.clone();
            async move {
                let stream = tokio::net::UnixStream::connect(&path).await?;
                Ok::<_, std::io::Error>(hyper_util::rt::TokioIo::new(stream))
            }
        }))
        .await
        .with_context(|| format!("connecting to rdrived at {}", socket_path.display()))?;

    Ok(RdriveDaemonClient::new(channel))
}

async fn cmd_status(socket: &Path) -> Result<()> {
    let mut client = connect_daemon(socket).await?;
    let status = client
        .status(tonic::Request::new(rdrive_core::proto::Empty {}))
        .await
        .context("status RPC failed")?
        .into_inner();

    println!("rdrived v{}", status.version);
    println!("  uptime:        {}", format_uptime(status.uptime_secs));
    println!("  socket:        {}", socket.display());
    println!(
        "  drive:         {} [{}]",
        status.drive_endpoint,
        if status.drive_ok { "ok" } else { "UNREACHABLE" }
    );
    println!("  active jobs:   {}", status.active_jobs);
    println!("  active mounts: {}", status.active_mounts);
    Ok(())
}

async fn cmd_job(socket: &Path, action: JobAction) -> Result<()> {
    let mut client = connect_daemon(socket).await?;
    match action {
        JobAction::Enqueue { job_id, immediate } => {
            let resp = client
                .enqueue_job(tonic::Request::new(EnqueueJobRequest { job_id, immediate }))
                .await
                .context("enqueue_job RPC failed")?
                .into_inner();
            print_job_status(&resp);
        }
        JobAction::Status { job_id } => {
            let resp = client
                .job_status(tonic::Request::new(JobStatusRequest { job_id }))
                .await
                .context("job_status RPC failed")?
                .into_inner();
            print_job_status(&resp);
        }
        JobAction::Pause { job_id } => {
            let resp = client
                .pause_job(tonic::Request::new(JobIdRequest { job_id }))
                .await
                .context("pause_job RPC failed")?
                .into_inner();
            print_job_status(&resp);
        }
        JobAction::Resume { job_id } => {
            let resp = client
                .resume_job(tonic::Request::new(JobIdRequest { job_id }))
                .await
                .context("resume_job RPC failed")?
                .into_inner();
            print_job_status(&resp);
        }
        JobAction::Cancel { job_id } => {
            let resp = client
                .cancel_job(tonic::Request::new(JobIdRequest { job_id }))
                .await
                .context("cancel_job RPC failed")?
                .into_inner();
            print_job_status(&resp);
        }
        JobAction::List => {
            let resp = client
                .list_jobs(tonic::Request::new(rdrive_core::proto::Empty {}))
                .await
                .context("list_jobs RPC failed")?
                .into_inner();
            if resp.jobs.is_empty() {
                println!("no jobs configured");
            }
            for job in &resp.jobs {
                print_job_status(job);
            }
        }
    }
    Ok(())
}

fn print_job_status(resp: &rdrive_core::proto::JobStatusResponse) {
    let state = JobState::try_from(resp.state).unwrap_or(JobState::None);
    println!("{}: {:?}", resp.job_id, state);
    if resp.total_items > 0 {
        println!("  items: {}/{}", resp.processed_items, resp.total_items);
    }
    if resp.processed_bytes > 0 {
        println!("  bytes: {}", resp.processed_bytes);
    }
    if !resp.last_message.is_empty() {
        println!("  message: {}", resp.last_message);
    }
    if !resp.error.is_empty() {
        println!("  error: {}", resp.error);
    }
}

async fn cmd_mount(socket: &Path, job_id: String, mountpoint: PathBuf, read_only: bool) -> Result<()> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner} {msg}").unwrap());
    spinner.set_message(format!("mounting {} at {}", job_id, mountpoint.display()));
    spinner.enable_steady_tick(Duration::from_millis(100));

    let mut client = connect_daemon(socket).await?;
    let resp = client
        .mount(tonic::Request::new(MountRequest {
            job_id,
            mountpoint: mountpoint.to_string_lossy().into_owned(),
            read_only,
        }))
        .await
        .context("mount RPC failed")?
        .into_inner();

    spinner.finish_and_clear();
    if resp.success {
        println!("mounted at {}", mountpoint.display());
        Ok(())
    } else {
        anyhow::bail!("mount failed: {}", resp.error)
    }
}

async fn cmd_unmount(socket: &Path, mountpoint: PathBuf) -> Result<()> {
    let mut client = connect_daemon(socket).await?;
    let resp = client
        .unmount(tonic::Request::new(UnmountRequest { mountpoint: mountpoint.to_string_lossy().into_owned() }))
        .await
        .context("unmount RPC failed")?
        .into_inner();

    if resp.success {
        println!("unmounted {}", mountpoint.display());
        Ok(())
    } else {
        anyhow::bail!("unmount failed: {}", resp.error)
    }
}

fn format_uptime(secs: u64) -> String {
    let days = secs / 86400;
    let hours = (secs % 86400) / 3600;
    let minutes = (secs % 3600) / 60;
    if days > 0 {
        format!("{days}d {hours}h {minutes}m")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}

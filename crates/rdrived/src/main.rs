//! rdrived: rdrive sync daemon.
//!
//! Scans configured job source trees, reconciles them against a remote
//! drive, optionally mounts a drive's folder tree over FUSE, and exposes
//! a gRPC control plane over a Unix domain socket plus a Prometheus
//! metrics/health endpoint.

mod daemon;
mod grpc;
mod metrics;
mod runner;
mod token_cache;

use anyhow::Result;
use clap::Parser;
use rdrive_core::config::RdriveConfig;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "rdrived", version, about = "rdrive sync daemon")]
struct Cli {
    /// Path to rdrive.toml configuration file
    #[arg(long, short = 'c', env = "RDRIVE_CONFIG", default_value = "/etc/rdrive/config.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RDRIVE_LOG", default_value = "info")]
    log: String,

    /// Log format (json, text)
    #[arg(long, env = "RDRIVE_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,
}

#[derive(Clone, Debug, clap::ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log, &cli.log_format);

    info!(version = env!("CARGO_PKG_VERSION"), config = %cli.config.display(), "rdrived starting");

    let config = load_config(&cli.config).await?;
    daemon::run(config).await
}

async fn load_config(path: &PathBuf) -> Result<RdriveConfig> {
    if path.exists() {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| anyhow::anyhow!("reading config {}: {e}", path.display()))?;
        toml::from_str(&content).map_err(|e| anyhow::anyhow!("parsing config {}: {e}", path.display()))
    } else {
        tracing::warn!(path = %path.display(), "config file not found, using defaults");
        Ok(RdriveConfig::default())
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry().with(filter).with(fmt::layer().json()).init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry().with(filter).with(fmt::layer()).init();
        }
    }
}

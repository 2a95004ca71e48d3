//! Builds the `opendal::Operator` the `OpendalDrive` reference backend
//! wraps, and a lightweight connectivity check reused by the daemon's
//! startup sequence and `/readyz` probe.

use anyhow::{Context, Result};
use opendal::Operator;
use rdrive_core::config::DriveConfig;

/// Minimal, backend-agnostic fields needed to build an operator — mirrors
/// the subset of `DriveConfig` that maps onto an S3-compatible bucket.
/// Bucket/region aren't part of the abstract drive config; callers
/// resolve them from environment, the same way `access_key_id`/
/// `secret_access_key` are resolved here rather than persisted in
/// `rdrive.toml`.
#[derive(Debug, Clone)]
pub struct OperatorParams {
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

/// Builds an S3-compatible `Operator` with logging and retry layers, the
/// same decoration OpenDAL backends get throughout the pack.
pub fn build_operator(params: &OperatorParams) -> Result<Operator> {
    let builder = opendal::services::S3::default()
        .endpoint(&params.endpoint)
        .region(&params.region)
        .bucket(&params.bucket)
        .access_key_id(&params.access_key_id)
        .secret_access_key(&params.secret_access_key);

    let op = Operator::new(builder)
        .context("creating OpenDAL S3 operator")?
        .layer(opendal::layers::LoggingLayer::default())
        .layer(opendal::layers::RetryLayer::new().with_max_times(5).with_jitter())
        .finish();

    Ok(op)
}

/// Builds an operator from `DriveConfig` plus credentials sourced
/// separately (the access-token/credential cache is an external
/// collaborator, not persisted config). Rejects a plaintext endpoint when
/// `enforce_tls` is set.
pub fn build_from_drive_config(
    drive: &DriveConfig,
    bucket: &str,
    region: &str,
    access_key_id: &str,
    secret_access_key: &str,
) -> Result<Operator> {
    if drive.endpoint.starts_with("http://") {
        if drive.enforce_tls {
            anyhow::bail!(
                "drive endpoint uses plaintext HTTP ({}), but enforce_tls is enabled",
                drive.endpoint
            );
        }
        tracing::warn!(
            endpoint = %drive.endpoint,
            "drive endpoint uses plaintext HTTP — credentials are transmitted unencrypted"
        );
    }

    build_operator(&OperatorParams {
        endpoint: drive.endpoint.clone(),
        region: region.to_string(),
        bucket: bucket.to_string(),
        access_key_id: access_key_id.to_string(),
        secret_access_key: secret_access_key.to_string(),
    })
}

/// Lightest possible health check: list the root.
pub async fn check_health(op: &Operator) -> Result<()> {
    op.list("/").await.map(|_| ()).map_err(|e| anyhow::anyhow!("drive health check failed: {e}"))
}

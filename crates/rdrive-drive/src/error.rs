//! `DriveError`: the category set every `RemoteDrive` operation's failures
//! are mapped into.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriveError {
    /// The server rejected the call due to rate limiting; `retry_after`
    /// carries the server-advised wait, when present.
    #[error("rate limited{}", .retry_after.map(|d| format!(" (retry after {d:?})")).unwrap_or_default())]
    RateLimited { retry_after: Option<Duration> },

    #[error("not found: {0}")]
    NotFound(String),

    /// Rapid-upload pre-hash matched; caller should re-issue `create_file`
    /// with the full content hash and proof code.
    #[error("pre-hash matched, full hash required")]
    PreHashMatched,

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("auth error: {0}")]
    Auth(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<opendal::Error> for DriveError {
    fn from(e: opendal::Error) -> Self {
        use opendal::ErrorKind;
        match e.kind() {
            ErrorKind::NotFound => DriveError::NotFound(e.to_string()),
            ErrorKind::AlreadyExists => DriveError::AlreadyExists(e.to_string()),
            ErrorKind::PermissionDenied => DriveError::Auth(e.to_string()),
            ErrorKind::RateLimited => DriveError::RateLimited { retry_after: None },
            _ => DriveError::Other(anyhow::anyhow!(e)),
        }
    }
}

impl From<DriveError> for rdrive_core::RdriveError {
    fn from(e: DriveError) -> Self {
        use rdrive_core::RdriveError;
        match e {
            DriveError::RateLimited { .. } => RdriveError::RateLimited(e.to_string()),
            DriveError::NotFound(m) => RdriveError::RemoteNotFound(m),
            DriveError::PreHashMatched => RdriveError::PreHashMatched,
            DriveError::AlreadyExists(m) => RdriveError::AlreadyExists(m),
            DriveError::Auth(m) => RdriveError::AuthExpired(m),
            DriveError::Other(e) => RdriveError::Drive(e.to_string()),
        }
    }
}

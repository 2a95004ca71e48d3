use thiserror::Error;

pub type RdriveResult<T> = Result<T, RdriveError>;

#[derive(Debug, Error)]
pub enum RdriveError {
    /// Transient network failure or rate-limit response, retries exhausted.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// An upload part failed after its backoff schedule was exhausted.
    #[error("upload part failure: {0}")]
    UploadPartFailure(String),

    /// Auth token expired and the refresh-under-lock retry also failed.
    #[error("auth expired: {0}")]
    AuthExpired(String),

    /// A remote entry referenced during a list/walk no longer exists.
    #[error("remote not found: {0}")]
    RemoteNotFound(String),

    /// Rapid-upload pre-hash matched; caller should re-issue with full hash.
    #[error("pre-hash matched, full hash required")]
    PreHashMatched,

    /// Create conflicted with an existing remote entry.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Local filesystem permission or I/O failure on a scanned/synced item.
    #[error("local I/O error: {0}")]
    LocalIo(String),

    /// Fatal configuration or invariant violation; aborts the job.
    #[error("fatal config error: {0}")]
    FatalConfig(String),

    #[error("drive error: {0}")]
    Drive(String),

    #[error("sync error: {0}")]
    Sync(String),

    #[error("mount error: {0}")]
    Mount(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("gRPC error: {0}")]
    Grpc(#[from] tonic::Status),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

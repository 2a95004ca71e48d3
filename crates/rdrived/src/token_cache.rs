//! Process-wide access-token cache.
//!
//! The token itself is refreshed out-of-process (whatever issues rdrive
//! access tokens owns that lifecycle); this cache just holds the current
//! value and reloads it from `credentials_file` whenever that file
//! changes, the same file-watch idiom the upstream daemon uses for its
//! own credential file.

use anyhow::Result;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared handle to the current access token, `None` until the first
/// successful load.
pub type SharedToken = Arc<RwLock<Option<String>>>;

pub fn new_shared() -> SharedToken {
    Arc::new(RwLock::new(None))
}

async fn read_token(path: &std::path::Path) -> Result<String> {
    let content = tokio::fs::read_to_string(path).await?;
    Ok(content.trim().to_string())
}

/// Loads the token once at startup, leaving the cache empty (rather than
/// failing the daemon) if the file is missing or unreadable.
pub async fn load_initial(path: &std::path::Path, store: &SharedToken) {
    match read_token(path).await {
        Ok(token) if !token.is_empty() => {
            store.write().await.replace(token);
            tracing::info!(path = %path.display(), "access token loaded");
        }
        Ok(_) => tracing::warn!(path = %path.display(), "access token file is empty"),
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "access token load failed"),
    }
}

/// Watches `token_file`'s parent directory and reloads `store` whenever
/// the file is created or modified, debouncing rapid successive changes
/// (an atomic write shows up as a create-then-rename).
pub fn watch(token_file: PathBuf, store: SharedToken) -> Result<TokenWatcher> {
    let (tx, mut rx) = tokio::sync::mpsc::channel::<()>(16);

    let tx_clone = tx.clone();
    let mut watcher: RecommendedWatcher =
        notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
            Ok(event) => {
                if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                    let _ = tx_clone.try_send(());
                }
            }
            Err(e) => tracing::warn!("access token file watch error: {e}"),
        })
        .map_err(|e| anyhow::anyhow!("creating file watcher: {e}"))?;

    let watch_dir = token_file
        .parent()
        .unwrap_or(std::path::Path::new("."))
        .to_path_buf();
    watcher
        .watch(&watch_dir, RecursiveMode::NonRecursive)
        .map_err(|e| anyhow::anyhow!("watching {}: {e}", watch_dir.display()))?;

    tracing::info!(path = %token_file.display(), "watching access token file for changes");

    let file_for_task = token_file.clone();
    let task = tokio::spawn(async move {
        while rx.recv().await.is_some() {
            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
            while rx.try_recv().is_ok() {}

            match read_token(&file_for_task).await {
                Ok(token) if !token.is_empty() => {
                    store.write().await.replace(token);
                    tracing::info!("access token reloaded");
                }
                Ok(_) => tracing::warn!("access token file is empty, keeping previous token"),
                Err(e) => tracing::warn!(error = %e, "access token reload failed, keeping previous token"),
            }
        }
    });

    Ok(TokenWatcher {
        _watcher: watcher,
        _task: task,
        path: token_file,
    })
}

/// Stops watching when dropped.
pub struct TokenWatcher {
    _watcher: RecommendedWatcher,
    _task: tokio::task::JoinHandle<()>,
    path: PathBuf,
}

impl TokenWatcher {
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

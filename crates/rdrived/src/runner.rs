//! The concrete job-run body: scans a job's local sources, lists
//! the remote target tree, reconciles the two snapshots, and executes the
//! resulting upload/download/delete/rename actions.
//!
//! This is the `RunFn` a `JobController` invokes once per dequeued run
//! request; the controller itself only owns the state machine and the
//! queue, so the scan/reconcile/upload/download pipeline lives here,
//! wired together from `rdrive-scan`, `rdrive-sync`, and `rdrive-drive`.

use rdrive_core::config::RdriveConfig;
use rdrive_core::filter::FilterSet;
use rdrive_core::locks::ShardedLocks;
use rdrive_core::types::{EntryKind, JobConfig, LocalEntry, NameMode, RemoteEntry};
use rdrive_core::{RdriveError, RdriveResult};
use rdrive_drive::RemoteDrive;
use rdrive_scan::cache::IndexCache;
use rdrive_scan::{walker, ScanOptions, ScanRoot};
use rdrive_sync::job::{JobHandle, RunFn};
use rdrive_sync::reconcile::{self, Action};
use rdrive_sync::upload;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::token_cache::SharedToken;

/// Everything a job run needs that outlives any single run: the drive
/// handle, the static config, and the shared concurrency/credential
/// state the upload engine's folder-creation and upload locks require.
pub struct JobContext {
    pub drive: Arc<dyn RemoteDrive>,
    pub config: Arc<RdriveConfig>,
    pub cache_dir: PathBuf,
    pub staging_root: PathBuf,
    pub folder_locks: ShardedLocks,
    pub upload_locks: ShardedLocks,
    pub token: SharedToken,
}

/// Builds the `RunFn` the `JobController` worker loop invokes.
pub fn make_run_fn(ctx: Arc<JobContext>) -> RunFn {
    Arc::new(move |handle: Arc<JobHandle>| {
        let ctx = ctx.clone();
        Box::pin(async move { run_one(&ctx, handle).await })
    })
}

async fn run_one(ctx: &JobContext, handle: Arc<JobHandle>) -> RdriveResult<()> {
    let job = ctx
        .config
        .jobs
        .get(handle.id.as_str())
        .cloned()
        .ok_or_else(|| RdriveError::FatalConfig(format!("job {} missing from config", handle.id)))?;

    handle.progress.set_message("scanning").await;
    handle.checkpoint().await?;

    let cache = open_cache(&ctx.cache_dir, &handle.id, job.is_temporary)?;
    let local_entries = scan_and_hash(&job, cache.clone()).await?;
    reconcile_cache(&cache, &local_entries)?;

    handle.checkpoint().await?;
    handle.progress.set_message("listing remote").await;

    let root_components: Vec<&str> = job.target.split('/').filter(|s| !s.is_empty()).collect();
    let root_id = upload::ensure_folder_chain(ctx.drive.as_ref(), &ctx.folder_locks, "", &root_components)
        .await?;
    let target_norm = job.target.trim_matches('/').to_string();
    let remotes = list_remote_tree(ctx.drive.as_ref(), &root_id, &target_norm).await?;

    let source_roots: Vec<String> = job
        .sources
        .iter()
        .map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default())
        .collect();
    let actions = reconcile::plan(job.mode, &local_entries, &remotes, &source_roots);

    handle.progress.total_items.store(actions.len() as u64, Ordering::Relaxed);
    handle.progress.set_message(format!("{} actions planned", actions.len())).await;

    execute_actions(ctx, &handle, &job, &root_id, actions).await?;

    cache.flush().map_err(|e| RdriveError::LocalIo(e.to_string()))?;
    handle.progress.set_message("done").await;
    Ok(())
}

fn open_cache(cache_dir: &Path, job_id: &str, is_temporary: bool) -> RdriveResult<Arc<IndexCache>> {
    let cache = if is_temporary {
        IndexCache::open_temporary()
    } else {
        std::fs::create_dir_all(cache_dir).map_err(|e| RdriveError::LocalIo(e.to_string()))?;
        IndexCache::open(&cache_dir.join(format!("cache_{job_id}.db")))
    }
    .map_err(|e| RdriveError::LocalIo(e.to_string()))?;
    Ok(Arc::new(cache))
}

/// Runs the (synchronous, thread-pool-based) scanner off the async
/// runtime and fills in `sha1` for every entry via the cache-lookup
/// contract.
async fn scan_and_hash(job: &JobConfig, cache: Arc<IndexCache>) -> RdriveResult<Vec<LocalEntry>> {
    let roots: Vec<ScanRoot> = job.sources.iter().map(|p| ScanRoot { path: p.clone() }).collect();
    let filters = FilterSet::parse(&job.filters.join("\n"));
    let options = ScanOptions {
        concurrency: job.upload_threads.max(job.download_threads),
        hash_level: job.check_level,
        hash_algorithm: job.check_algorithm,
    };

    tokio::task::spawn_blocking(move || -> std::io::Result<Vec<LocalEntry>> {
        let mut entries = walker::scan(&roots, &filters, &cache, options, None)?;
        for entry in entries.iter_mut() {
            walker::adopt_or_rehash(entry, &cache)?;
        }
        Ok(entries)
    })
    .await
    .map_err(|e| RdriveError::FatalConfig(format!("scan task panicked: {e}")))?
    .map_err(|e| RdriveError::LocalIo(e.to_string()))
}

/// Replaces the cache's contents with the fresh scan, evicting entries for
/// files that no longer exist.
fn reconcile_cache(cache: &IndexCache, fresh: &[LocalEntry]) -> RdriveResult<()> {
    let fresh_keys: std::collections::HashSet<&str> = fresh.iter().map(|e| e.key.as_str()).collect();
    let stale: Vec<String> = cache
        .get_all()
        .map_err(|e| RdriveError::LocalIo(e.to_string()))?
        .into_iter()
        .map(|e| e.key)
        .filter(|k| !fresh_keys.contains(k.as_str()))
        .collect();
    cache
        .apply_range(fresh, &[], &stale)
        .map_err(|e| RdriveError::LocalIo(e.to_string()))
}

/// Strips `target_norm` off a remote backend key, yielding the
/// `LocalEntry::key`-comparable logical key, or `None` for the target
/// root folder itself.
fn relative_to_target(key: &str, target_norm: &str) -> Option<String> {
    if target_norm.is_empty() {
        return Some(key.to_string());
    }
    if key == target_norm {
        return None;
    }
    key.strip_prefix(&format!("{target_norm}/")).map(str::to_string)
}

/// Breadth-first listing of every entry under `root_id`, paginating each
/// directory the same way the mount adapter's folder-refresh worker does
/// (`rdrive_mount::refresh::refresh_dir`).
async fn list_remote_tree(
    drive: &dyn RemoteDrive,
    root_id: &str,
    target_norm: &str,
) -> RdriveResult<Vec<RemoteEntry>> {
    let mut out = Vec::new();
    let mut queue = VecDeque::from([root_id.to_string()]);
    while let Some(parent_id) = queue.pop_front() {
        let mut marker = None;
        loop {
            let (entries, next) = drive
                .list(&parent_id, marker.as_deref(), 1000)
                .await
                .map_err(RdriveError::from)?;
            for mut entry in entries {
                if entry.kind == EntryKind::Folder {
                    queue.push_back(entry.file_id.clone());
                }
                if let Some(rel) = relative_to_target(&entry.key, target_norm) {
                    entry.key = rel;
                    out.push(entry);
                }
            }
            match next {
                Some(m) => marker = Some(m),
                None => break,
            }
        }
    }
    Ok(out)
}

fn split_key(key: &str) -> (Vec<&str>, &str) {
    let mut parts: Vec<&str> = key.split('/').filter(|s| !s.is_empty()).collect();
    let name = parts.pop().unwrap_or("");
    (parts, name)
}

fn root_parent_for(sources: &[PathBuf], root_key: &str) -> Option<PathBuf> {
    sources
        .iter()
        .find(|p| p.file_name().map(|n| n.to_string_lossy() == *root_key).unwrap_or(false))
        .map(|p| p.parent().unwrap_or_else(|| Path::new("/")).to_path_buf())
}

async fn execute_actions(
    ctx: &JobContext,
    handle: &JobHandle,
    job: &JobConfig,
    root_id: &str,
    actions: Vec<Action>,
) -> RdriveResult<()> {
    for action in actions {
        handle.checkpoint().await?;
        match action {
            Action::Upload { key, local } => {
                let (parent_components, name) = split_key(&key);
                let parent_id =
                    upload::ensure_folder_chain(ctx.drive.as_ref(), &ctx.folder_locks, root_id, &parent_components)
                        .await?;
                let token = ctx.token.read().await.clone().unwrap_or_default();
                upload::upload_file(
                    ctx.drive.as_ref(),
                    &ctx.upload_locks,
                    &ctx.staging_root,
                    &local,
                    &parent_id,
                    name,
                    job.rapid_upload,
                    |hash| upload::derive_proof_code(&token, hash),
                    None,
                )
                .await?;
                handle.progress.processed_bytes.fetch_add(local.size, Ordering::Relaxed);
            }
            Action::Delete { remote } => {
                ctx.drive.delete(&remote.file_id, job.is_recycle_bin).await?;
            }
            Action::Rename { remote, new_name } => {
                ctx.drive.update(&remote.file_id, &new_name, NameMode::AutoRename).await?;
            }
            Action::Download { remote, local_root_key } => {
                download_one(ctx, job, &remote, &local_root_key).await?;
            }
        }
        handle.progress.processed_items.fetch_add(1, Ordering::Relaxed);
    }
    Ok(())
}

async fn download_one(
    ctx: &JobContext,
    job: &JobConfig,
    remote: &RemoteEntry,
    local_root_key: &str,
) -> RdriveResult<()> {
    if remote.kind != EntryKind::File {
        return Ok(());
    }
    let root_parent = root_parent_for(&job.sources, local_root_key)
        .ok_or_else(|| RdriveError::FatalConfig(format!("no source root named {local_root_key}")))?;
    let dest = rdrive_core::path::from_key(&root_parent, &remote.key);
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| RdriveError::LocalIo(e.to_string()))?;
    }

    let url = ctx.drive.get_download_url(&remote.file_id, 3600).await?;
    let response = reqwest::Client::new()
        .get(&url)
        .send()
        .await
        .map_err(|e| RdriveError::LocalIo(e.to_string()))?;
    let bytes = response.bytes().await.map_err(|e| RdriveError::LocalIo(e.to_string()))?;
    tokio::fs::write(&dest, &bytes)
        .await
        .map_err(|e| RdriveError::LocalIo(e.to_string()))
}

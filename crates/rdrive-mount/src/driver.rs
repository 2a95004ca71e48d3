//! FUSE filesystem driver: mounts a remote drive's folder tree as a local
//! directory, proxying every operation straight through to a
//! `RemoteDrive`.
//!
//! Unlike a caching filesystem backed by local placeholder files, there is
//! no on-disk stand-in for a remote entry: `getattr`/`read` consult the
//! in-memory folder index and the read-range/download-URL TTL caches,
//! falling through to the drive on a miss.

#[cfg(feature = "fuse")]
mod inner {
    use std::collections::HashMap;
    use std::ffi::OsStr;
    use std::num::NonZeroU32;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, SystemTime};

    use bytes::Bytes;
    use dashmap::DashMap;
    use fuse3::path::prelude::*;
    use fuse3::{Errno, FileType, MountOptions};
    use futures_util::stream;
    use rdrive_core::locks::ShardedLocks;
    use rdrive_core::types::{EntryKind, NameMode, RemoteEntry};
    use rdrive_drive::RemoteDrive;
    use rdrive_sync::upload::staging::PartPlan;
    use tokio::sync::Mutex;
    use tracing::{debug, info};

    use crate::cache::{DownloadUrlKey, ReadRangeKey, TtlCache};
    use crate::index::DirIndex;
    use crate::refresh::{self, RefreshQueue};

    const ATTR_TTL: Duration = Duration::from_secs(5);
    const PERM_FILE: u16 = 0o644;
    const PERM_DIR: u16 = 0o755;

    /// An open handle for reading an already-complete remote file.
    struct ReadHandle {
        file_id: String,
        content_hash: String,
        size: u64,
    }

    /// An open handle for a file in the middle of being written: either
    /// materialized (`create_file` has been called and parts are known)
    /// or still pending its first `setattr(size)` / write.
    struct WriteHandle {
        dir_key: String,
        parent_id: String,
        name: String,
        file_id: Option<String>,
        upload_id: Option<String>,
        part_urls: Vec<String>,
        plan: Option<PartPlan>,
        total_len: u64,
        completed_parts: std::collections::HashSet<u64>,
    }

    /// Constructor parameters for `RdriveFs`.
    pub struct MountConfig {
        pub drive: Arc<dyn RemoteDrive>,
        pub root_id: String,
        pub mountpoint: std::path::PathBuf,
        pub staging_root: std::path::PathBuf,
        pub read_cache_ttl: Duration,
        pub download_url_cache_ttl: Duration,
        pub download_url_cache_absolute_ttl: Duration,
        pub small_read_threshold_bytes: u64,
        pub refresh_queue_capacity: usize,
        pub refresh_staleness: Duration,
        pub to_recycle_bin: bool,
        pub read_only: bool,
        pub allow_other: bool,
    }

    /// The FUSE filesystem driver backed by a `RemoteDrive`.
    pub struct RdriveFs {
        drive: Arc<dyn RemoteDrive>,
        root_id: String,
        uid: u32,
        gid: u32,
        mount_time: SystemTime,
        index: Arc<DirIndex>,
        /// Logical directory key -> that directory's own `file_id`.
        dir_ids: DashMap<String, String>,
        refresh_queue: RefreshQueue,
        refresh_staleness: Duration,
        read_cache: TtlCache<ReadRangeKey, Bytes>,
        url_cache: TtlCache<DownloadUrlKey, String>,
        small_read_threshold_bytes: u64,
        locks: ShardedLocks,
        staging_root: std::path::PathBuf,
        to_recycle_bin: bool,
        read_handles: Mutex<HashMap<u64, ReadHandle>>,
        write_handles: Mutex<HashMap<u64, WriteHandle>>,
        next_fh: AtomicU64,
    }

    impl RdriveFs {
        pub fn new(cfg: MountConfig) -> Self {
            let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
            let dir_ids = DashMap::new();
            dir_ids.insert(String::new(), cfg.root_id.clone());
            let index = Arc::new(DirIndex::new());
            let refresh_queue = refresh::spawn(
                cfg.drive.clone(),
                index.clone(),
                cfg.refresh_queue_capacity,
                cfg.refresh_staleness,
            );
            Self {
                drive: cfg.drive,
                root_id: cfg.root_id,
                uid,
                gid,
                mount_time: SystemTime::now(),
                index,
                dir_ids,
                refresh_queue,
                refresh_staleness: cfg.refresh_staleness,
                read_cache: TtlCache::new(cfg.read_cache_ttl),
                url_cache: TtlCache::new(cfg.download_url_cache_ttl)
                    .with_absolute_ttl(cfg.download_url_cache_absolute_ttl),
                small_read_threshold_bytes: cfg.small_read_threshold_bytes,
                locks: ShardedLocks::default(),
                staging_root: cfg.staging_root,
                to_recycle_bin: cfg.to_recycle_bin,
                read_handles: Mutex::new(HashMap::new()),
                write_handles: Mutex::new(HashMap::new()),
                next_fh: AtomicU64::new(1),
            }
        }

        fn split(path: &str) -> (String, String) {
            let trimmed = path.trim_start_matches('/');
            match trimmed.rsplit_once('/') {
                Some((dir, name)) => (dir.to_string(), name.to_string()),
                None => (String::new(), trimmed.to_string()),
            }
        }

        fn dir_key_of(path: &str) -> String {
            path.trim_start_matches('/').trim_end_matches('/').to_string()
        }

        async fn ensure_fresh(&self, dir_key: &str, parent_id: &str) {
            if self.index.is_stale(dir_key, self.refresh_staleness) {
                refresh::refresh_dir(&self.drive, &self.index, dir_key, parent_id).await;
            } else {
                self.refresh_queue.enqueue(dir_key, parent_id);
            }
        }

        async fn resolve(&self, path: &str) -> Option<RemoteEntry> {
            let (dir_key, name) = Self::split(path);
            if name.is_empty() {
                return None;
            }
            let parent_id = self.dir_ids.get(&dir_key).map(|r| r.clone())?;
            self.ensure_fresh(&dir_key, &parent_id).await;
            self.index.lookup(&dir_key, &name)
        }

        fn file_attr(&self, size: u64, kind: FileType) -> FileAttr {
            let perm = if kind == FileType::Directory { PERM_DIR } else { PERM_FILE };
            FileAttr {
                size,
                blocks: size.div_ceil(512),
                atime: self.mount_time,
                mtime: self.mount_time,
                ctime: self.mount_time,
                #[cfg(target_os = "macos")]
                crtime: self.mount_time,
                kind,
                perm,
                nlink: if kind == FileType::Directory { 2 } else { 1 },
                uid: self.uid,
                gid: self.gid,
                rdev: 0,
                blksize: 4096,
                #[cfg(target_os = "macos")]
                flags: 0,
            }
        }

        fn attr_for(&self, entry: &RemoteEntry) -> FileAttr {
            let kind = match entry.kind {
                EntryKind::Folder => FileType::Directory,
                EntryKind::File => FileType::RegularFile,
            };
            self.file_attr(entry.size, kind)
        }

        async fn download_url(&self, entry: &RemoteEntry) -> Result<String, Errno> {
            let key = DownloadUrlKey {
                file_id: entry.file_id.clone(),
                content_hash: entry.content_hash.clone(),
            };
            if let Some(url) = self.url_cache.get(&key) {
                return Ok(url);
            }
            let url = self
                .drive
                .get_download_url(&entry.file_id, 13_500)
                .await
                .map_err(|_| Errno::from(libc::EIO))?;
            self.url_cache.insert(key, url.clone());
            Ok(url)
        }

        async fn ranged_read(&self, entry: &RemoteEntry, offset: u64, size: u32) -> Result<Bytes, Errno> {
            let range_key = ReadRangeKey {
                file_id: entry.file_id.clone(),
                content_hash: entry.content_hash.clone(),
                offset,
                len: size,
            };
            if size as u64 <= self.small_read_threshold_bytes {
                if let Some(cached) = self.read_cache.get(&range_key) {
                    return Ok(cached);
                }
            }

            let url = self.download_url(entry).await?;
            let end = (offset + size as u64).min(entry.size).saturating_sub(1);
            let response = reqwest::Client::new()
                .get(&url)
                .header("Range", format!("bytes={offset}-{end}"))
                .send()
                .await
                .map_err(|_| Errno::from(libc::EIO))?;
            let bytes = response.bytes().await.map_err(|_| Errno::from(libc::EIO))?;

            if size as u64 <= self.small_read_threshold_bytes {
                self.read_cache.insert(range_key, bytes.clone());
            }
            Ok(bytes)
        }

        async fn alloc_fh(&self) -> u64 {
            self.next_fh.fetch_add(1, Ordering::Relaxed)
        }

        /// Ensures the destination folder chain exists for `dir_key`,
        /// returning its `file_id`. Walks and creates components under the
        /// per-path `"create_folder_<path>"` lock shared with the upload
        /// engine.
        async fn ensure_dir_chain(&self, dir_key: &str) -> Result<String, Errno> {
            if let Some(id) = self.dir_ids.get(dir_key) {
                return Ok(id.clone());
            }
            let components: Vec<&str> = dir_key.split('/').filter(|c| !c.is_empty()).collect();
            let id = rdrive_sync::upload::ensure_folder_chain(
                self.drive.as_ref(),
                &self.locks,
                &self.root_id,
                &components,
            )
            .await
            .map_err(|_| Errno::from(libc::EIO))?;
            self.dir_ids.insert(dir_key.to_string(), id.clone());
            Ok(id)
        }

        async fn finish_upload(&self, handle: &mut WriteHandle) -> Result<(), Errno> {
            let (Some(file_id), Some(upload_id)) = (&handle.file_id, &handle.upload_id) else {
                return Ok(());
            };
            let entry = self
                .drive
                .complete(file_id, upload_id)
                .await
                .map_err(|_| Errno::from(libc::EIO))?;
            if let Some(plan) = handle.plan.as_mut() {
                plan.discard_all();
            }
            self.index.insert_child(&handle.dir_key, entry);
            Ok(())
        }
    }

    impl PathFilesystem for RdriveFs {
        async fn init(&self, _req: Request) -> fuse3::Result<ReplyInit> {
            debug!("rdrive-mount init");
            Ok(ReplyInit {
                max_write: NonZeroU32::new(4 * 1024 * 1024).unwrap(),
            })
        }

        async fn destroy(&self, _req: Request) {
            info!("rdrive-mount unmounted");
        }

        async fn getattr(
            &self,
            _req: Request,
            path: Option<&OsStr>,
            _fh: Option<u64>,
            _flags: u32,
        ) -> fuse3::Result<ReplyAttr> {
            let path_str = path.and_then(|p| p.to_str()).ok_or(Errno::from(libc::ENOENT))?;
            if path_str == "/" {
                return Ok(ReplyAttr {
                    ttl: ATTR_TTL,
                    attr: self.file_attr(0, FileType::Directory),
                });
            }
            match self.resolve(path_str).await {
                Some(entry) => Ok(ReplyAttr {
                    ttl: ATTR_TTL,
                    attr: self.attr_for(&entry),
                }),
                None => Err(Errno::from(libc::ENOENT)),
            }
        }

        async fn lookup(&self, _req: Request, parent: &OsStr, name: &OsStr) -> fuse3::Result<ReplyEntry> {
            let parent_str = parent.to_str().unwrap_or("/");
            let name_str = name.to_str().ok_or(Errno::from(libc::ENOENT))?;
            let full_path = if parent_str == "/" {
                format!("/{name_str}")
            } else {
                format!("{}/{}", parent_str.trim_end_matches('/'), name_str)
            };
            match self.resolve(&full_path).await {
                Some(entry) => Ok(ReplyEntry {
                    ttl: ATTR_TTL,
                    attr: self.attr_for(&entry),
                }),
                None => Err(Errno::from(libc::ENOENT)),
            }
        }

        type DirEntryStream<'a>
            = stream::Iter<std::vec::IntoIter<fuse3::Result<DirectoryEntry>>>
        where
            Self: 'a;
        type DirEntryPlusStream<'a>
            = stream::Iter<std::vec::IntoIter<fuse3::Result<DirectoryEntryPlus>>>
        where
            Self: 'a;

        async fn opendir(&self, _req: Request, path: &OsStr, _flags: u32) -> fuse3::Result<ReplyOpen> {
            let dir_key = Self::dir_key_of(path.to_str().unwrap_or("/"));
            if let Some(parent_id) = self.dir_ids.get(&dir_key).map(|r| r.clone()) {
                self.ensure_fresh(&dir_key, &parent_id).await;
            }
            Ok(ReplyOpen { fh: 0, flags: 0 })
        }

        async fn readdir<'a>(
            &'a self,
            _req: Request,
            path: &'a OsStr,
            _fh: u64,
            offset: i64,
        ) -> fuse3::Result<ReplyDirectory<Self::DirEntryStream<'a>>> {
            let dir_key = Self::dir_key_of(path.to_str().unwrap_or("/"));
            let mut entries: Vec<fuse3::Result<DirectoryEntry>> = Vec::new();
            if offset == 0 {
                entries.push(Ok(DirectoryEntry { kind: FileType::Directory, name: ".".into(), offset: 1 }));
            }
            if offset <= 1 {
                entries.push(Ok(DirectoryEntry { kind: FileType::Directory, name: "..".into(), offset: 2 }));
            }
            let mut next_offset = 3i64;
            for child in self.index.children(&dir_key) {
                let kind = match child.kind {
                    EntryKind::Folder => FileType::Directory,
                    EntryKind::File => FileType::RegularFile,
                };
                if next_offset > offset {
                    entries.push(Ok(DirectoryEntry { kind, name: child.name.into(), offset: next_offset }));
                }
                next_offset += 1;
            }
            Ok(ReplyDirectory { entries: stream::iter(entries) })
        }

        async fn readdirplus<'a>(
            &'a self,
            _req: Request,
            path: &'a OsStr,
            _fh: u64,
            offset: u64,
            _lock_owner: u64,
        ) -> fuse3::Result<ReplyDirectoryPlus<Self::DirEntryPlusStream<'a>>> {
            let dir_key = Self::dir_key_of(path.to_str().unwrap_or("/"));
            let offset = offset as i64;
            let mut entries: Vec<fuse3::Result<DirectoryEntryPlus>> = Vec::new();
            if offset == 0 {
                entries.push(Ok(DirectoryEntryPlus {
                    kind: FileType::Directory,
                    name: ".".into(),
                    offset: 1,
                    attr: self.file_attr(0, FileType::Directory),
                    entry_ttl: ATTR_TTL,
                    attr_ttl: ATTR_TTL,
                }));
            }
            if offset <= 1 {
                entries.push(Ok(DirectoryEntryPlus {
                    kind: FileType::Directory,
                    name: "..".into(),
                    offset: 2,
                    attr: self.file_attr(0, FileType::Directory),
                    entry_ttl: ATTR_TTL,
                    attr_ttl: ATTR_TTL,
                }));
            }
            let mut next_offset = 3i64;
            for child in self.index.children(&dir_key) {
                let kind = match child.kind {
                    EntryKind::Folder => FileType::Directory,
                    EntryKind::File => FileType::RegularFile,
                };
                if child.kind == EntryKind::Folder {
                    let child_key = if dir_key.is_empty() { child.name.clone() } else { format!("{dir_key}/{}", child.name) };
                    self.dir_ids.insert(child_key, child.file_id.clone());
                }
                if next_offset > offset {
                    entries.push(Ok(DirectoryEntryPlus {
                        kind,
                        name: child.name.clone().into(),
                        offset: next_offset,
                        attr: self.attr_for(&child),
                        entry_ttl: ATTR_TTL,
                        attr_ttl: ATTR_TTL,
                    }));
                }
                next_offset += 1;
            }
            Ok(ReplyDirectoryPlus { entries: stream::iter(entries) })
        }

        async fn open(&self, _req: Request, path: &OsStr, _flags: u32) -> fuse3::Result<ReplyOpen> {
            let path_str = path.to_str().ok_or(Errno::from(libc::ENOENT))?;
            let entry = self.resolve(path_str).await.ok_or(Errno::from(libc::ENOENT))?;
            let fh = self.alloc_fh().await;
            self.read_handles.lock().await.insert(
                fh,
                ReadHandle {
                    file_id: entry.file_id,
                    content_hash: entry.content_hash,
                    size: entry.size,
                },
            );
            Ok(ReplyOpen { fh, flags: 0 })
        }

        async fn create(
            &self,
            _req: Request,
            parent: &OsStr,
            name: &OsStr,
            _mode: u32,
            _flags: u32,
        ) -> fuse3::Result<ReplyCreated> {
            let parent_str = parent.to_str().unwrap_or("/");
            let name_str = name.to_str().ok_or(Errno::from(libc::EINVAL))?;
            let dir_key = Self::dir_key_of(parent_str);
            if self.index.lookup(&dir_key, name_str).is_some() {
                return Err(Errno::from(libc::EEXIST));
            }
            let fh = self.alloc_fh().await;
            self.write_handles.lock().await.insert(
                fh,
                WriteHandle {
                    dir_key,
                    parent_id: String::new(),
                    name: name_str.to_string(),
                    file_id: None,
                    upload_id: None,
                    part_urls: Vec::new(),
                    plan: None,
                    total_len: 0,
                    completed_parts: std::collections::HashSet::new(),
                },
            );
            Ok(ReplyCreated {
                ttl: ATTR_TTL,
                attr: self.file_attr(0, FileType::RegularFile),
                generation: 0,
                fh,
                flags: 0,
            })
        }

        async fn mkdir(
            &self,
            _req: Request,
            parent: &OsStr,
            name: &OsStr,
            _mode: u32,
            _umask: u32,
        ) -> fuse3::Result<ReplyEntry> {
            let parent_str = parent.to_str().unwrap_or("/");
            let name_str = name.to_str().ok_or(Errno::from(libc::EINVAL))?;
            let dir_key = Self::dir_key_of(parent_str);
            let parent_id = self.ensure_dir_chain(&dir_key).await?;
            let entry = self
                .drive
                .create_folder(&parent_id, name_str, NameMode::Refuse)
                .await
                .map_err(|_| Errno::from(libc::EEXIST))?;
            let child_key = if dir_key.is_empty() { name_str.to_string() } else { format!("{dir_key}/{name_str}") };
            self.dir_ids.insert(child_key, entry.file_id.clone());
            self.index.insert_child(&dir_key, entry.clone());
            Ok(ReplyEntry { ttl: ATTR_TTL, attr: self.attr_for(&entry) })
        }

        async fn setattr(
            &self,
            _req: Request,
            path: Option<&OsStr>,
            fh: Option<u64>,
            set_attr: SetAttr,
        ) -> fuse3::Result<ReplyAttr> {
            if let Some(size) = set_attr.size {
                if let Some(fh) = fh {
                    let mut handles = self.write_handles.lock().await;
                    if let Some(handle) = handles.get_mut(&fh) {
                        if handle.file_id.is_none() {
                            let parent_id = self.ensure_dir_chain(&handle.dir_key).await?;
                            let part_count = rdrive_sync::upload::ceil_div(size, rdrive_sync::upload::PART_SIZE);
                            let resp = self
                                .drive
                                .create_file(rdrive_drive::CreateFileRequest {
                                    parent_id: parent_id.clone(),
                                    name: handle.name.clone(),
                                    size,
                                    name_mode: NameMode::Refuse,
                                    part_count: part_count as u32,
                                    proof: None,
                                })
                                .await
                                .map_err(|_| Errno::from(libc::EIO))?;
                            handle.parent_id = parent_id;
                            handle.file_id = Some(resp.file_id);
                            handle.upload_id = Some(resp.upload_id);
                            handle.part_urls = resp.parts.iter().map(|p| p.upload_url.clone()).collect();
                            handle.total_len = size;
                            handle.plan = Some(PartPlan::new(&self.staging_root, &handle.name, size));
                        }
                    }
                }
            }
            let size = set_attr.size.unwrap_or(0);
            Ok(ReplyAttr { ttl: ATTR_TTL, attr: self.file_attr(size, FileType::RegularFile) })
        }

        async fn read(
            &self,
            _req: Request,
            _path: Option<&OsStr>,
            fh: u64,
            offset: u64,
            size: u32,
        ) -> fuse3::Result<ReplyData> {
            let handle_info = {
                let handles = self.read_handles.lock().await;
                let handle = handles.get(&fh).ok_or(Errno::from(libc::EBADF))?;
                (handle.file_id.clone(), handle.content_hash.clone(), handle.size)
            };
            let (file_id, content_hash, total_size) = handle_info;
            if offset >= total_size {
                return Ok(ReplyData { data: Bytes::new() });
            }
            let entry = RemoteEntry {
                file_id,
                parent_file_id: String::new(),
                name: String::new(),
                kind: EntryKind::File,
                size: total_size,
                content_hash,
                created_at: self.mount_time,
                updated_at: self.mount_time,
                key: String::new(),
            };
            let clamped = size.min((total_size - offset) as u32);
            let data = self.ranged_read(&entry, offset, clamped).await?;
            Ok(ReplyData { data })
        }

        async fn write(
            &self,
            _req: Request,
            _path: Option<&OsStr>,
            fh: u64,
            offset: u64,
            data: &[u8],
            _write_flags: u32,
            _flags: u32,
        ) -> fuse3::Result<ReplyWrite> {
            let mut handles = self.write_handles.lock().await;
            let handle = handles.get_mut(&fh).ok_or(Errno::from(libc::EBADF))?;
            let plan = handle.plan.as_mut().ok_or(Errno::from(libc::EINVAL))?;
            let completed = plan.write_at(offset, data).map_err(|_| Errno::from(libc::EIO))?;

            for part_index in completed {
                if handle.completed_parts.contains(&part_index) {
                    continue;
                }
                let bytes = plan.read_part(part_index).map_err(|_| Errno::from(libc::EIO))?;
                let url = handle
                    .part_urls
                    .get(part_index as usize)
                    .ok_or(Errno::from(libc::EIO))?
                    .clone();
                self.drive
                    .upload_part(&url, Bytes::from(bytes))
                    .await
                    .map_err(|_| Errno::from(libc::EIO))?;
                plan.discard_part(part_index);
                handle.completed_parts.insert(part_index);
            }
            Ok(ReplyWrite { written: data.len() as u32 })
        }

        async fn release(
            &self,
            _req: Request,
            _path: Option<&OsStr>,
            fh: u64,
            _flags: u32,
            _lock_owner: u64,
            _flush: bool,
        ) -> fuse3::Result<()> {
            self.read_handles.lock().await.remove(&fh);
            let mut write_handles = self.write_handles.lock().await;
            if let Some(mut handle) = write_handles.remove(&fh) {
                self.finish_upload(&mut handle).await?;
            }
            Ok(())
        }

        async fn flush(
            &self,
            _req: Request,
            _path: Option<&OsStr>,
            _fh: u64,
            _lock_owner: u64,
        ) -> fuse3::Result<()> {
            Ok(())
        }

        async fn unlink(&self, _req: Request, parent: &OsStr, name: &OsStr) -> fuse3::Result<()> {
            self.remove_entry(parent, name).await
        }

        async fn rmdir(&self, _req: Request, parent: &OsStr, name: &OsStr) -> fuse3::Result<()> {
            self.remove_entry(parent, name).await
        }

        async fn rename(
            &self,
            _req: Request,
            origin_parent: &OsStr,
            origin_name: &OsStr,
            parent: &OsStr,
            name: &OsStr,
        ) -> fuse3::Result<()> {
            let origin_dir = Self::dir_key_of(origin_parent.to_str().unwrap_or("/"));
            let origin_name_str = origin_name.to_str().ok_or(Errno::from(libc::EINVAL))?;
            let dest_dir = Self::dir_key_of(parent.to_str().unwrap_or("/"));
            let dest_name = name.to_str().ok_or(Errno::from(libc::EINVAL))?;

            let entry = self
                .index
                .lookup(&origin_dir, origin_name_str)
                .ok_or(Errno::from(libc::ENOENT))?;

            let lock_key = format!("move_{dest_dir}/{dest_name}");
            let _guard = self.locks.lock(&lock_key).await;

            if origin_dir == dest_dir {
                self.drive
                    .update(&entry.file_id, dest_name, NameMode::Refuse)
                    .await
                    .map_err(|_| Errno::from(libc::EIO))?;
            } else {
                let dest_parent_id = self.ensure_dir_chain(&dest_dir).await?;
                let outcome = self
                    .drive
                    .move_entry(&entry.file_id, &dest_parent_id, Some(dest_name))
                    .await
                    .map_err(|_| Errno::from(libc::EIO))?;
                if outcome.exist {
                    return Err(Errno::from(libc::EEXIST));
                }
                if entry.kind == EntryKind::Folder {
                    let old_key = if origin_dir.is_empty() { origin_name_str.to_string() } else { format!("{origin_dir}/{origin_name_str}") };
                    let new_key = if dest_dir.is_empty() { dest_name.to_string() } else { format!("{dest_dir}/{dest_name}") };
                    self.index.rename_subtree(&old_key, &new_key);
                    if let Some((_, id)) = self.dir_ids.remove(&old_key) {
                        self.dir_ids.insert(new_key, id);
                    }
                }
            }

            self.index.remove_child(&origin_dir, &entry.file_id);
            let mut renamed = entry;
            renamed.name = dest_name.to_string();
            self.index.insert_child(&dest_dir, renamed);
            Ok(())
        }

        async fn statfs(&self, _req: Request, _path: &OsStr) -> fuse3::Result<ReplyStatFs> {
            let space = self.drive.space_info().await.map_err(|_| Errno::from(libc::EIO))?;
            let free = space.total_bytes.saturating_sub(space.used_bytes);
            let bsize = 4096u32;
            Ok(ReplyStatFs {
                blocks: space.total_bytes / bsize as u64,
                bfree: free / bsize as u64,
                bavail: free / bsize as u64,
                files: 1 << 20,
                ffree: 1 << 19,
                bsize,
                namelen: 255,
                frsize: bsize,
            })
        }
    }

    impl RdriveFs {
        async fn remove_entry(&self, parent: &OsStr, name: &OsStr) -> fuse3::Result<()> {
            let dir_key = Self::dir_key_of(parent.to_str().unwrap_or("/"));
            let name_str = name.to_str().ok_or(Errno::from(libc::EINVAL))?;
            let entry = self.index.lookup(&dir_key, name_str).ok_or(Errno::from(libc::ENOENT))?;
            self.drive
                .delete(&entry.file_id, self.to_recycle_bin)
                .await
                .map_err(|_| Errno::from(libc::EIO))?;
            self.index.remove_child(&dir_key, &entry.file_id);
            if entry.kind == EntryKind::Folder {
                let key = if dir_key.is_empty() { name_str.to_string() } else { format!("{dir_key}/{name_str}") };
                self.index.drop_dir(&key);
                self.dir_ids.remove(&key);
            }
            Ok(())
        }
    }

    /// Mounts `fs` at `cfg.mountpoint` and blocks until unmounted (e.g. via
    /// `fusermount3 -u <mountpoint>` or the daemon's `Unmount` RPC
    /// cancelling the session).
    pub async fn mount(fs: RdriveFs, mountpoint: std::path::PathBuf, read_only: bool, allow_other: bool) -> std::io::Result<()> {
        let mut opts = MountOptions::default();
        opts.fs_name("rdrive");
        opts.read_only(read_only);
        opts.force_readdir_plus(true);
        if allow_other {
            opts.allow_other(true);
        }
        info!(mountpoint = %mountpoint.display(), "mounting rdrive (unprivileged via fusermount3)");
        let handle = Session::new(opts).mount_with_unprivileged(fs, &mountpoint).await?;
        handle.await
    }
}

#[cfg(feature = "fuse")]
pub use inner::{mount, MountConfig, RdriveFs};

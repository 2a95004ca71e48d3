//! Registry of active mount instances, consulted by `rdrived`'s gRPC
//! `Mount`/`Unmount`/`Status` handlers to know what's mounted where.

use dashmap::DashMap;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// One mounted instance's bookkeeping: where it's mounted and a token to
/// request an unmount.
pub struct MountHandle {
    pub mountpoint: PathBuf,
    pub job_id: String,
    pub shutdown: CancellationToken,
}

/// Concurrent registry of live mounts keyed by mountpoint, so a second
/// mount request at the same path is rejected rather than racing the
/// first.
#[derive(Default)]
pub struct MountRegistry {
    mounts: DashMap<String, MountHandle>,
}

impl MountRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, mountpoint: &str, handle: MountHandle) -> bool {
        self.mounts.insert(mountpoint.to_string(), handle).is_none()
    }

    pub fn unregister(&self, mountpoint: &str) -> Option<MountHandle> {
        self.mounts.remove(mountpoint).map(|(_, h)| h)
    }

    pub fn is_mounted(&self, mountpoint: &str) -> bool {
        self.mounts.contains_key(mountpoint)
    }

    pub fn request_unmount(&self, mountpoint: &str) -> bool {
        match self.mounts.get(mountpoint) {
            Some(handle) => {
                handle.shutdown.cancel();
                true
            }
            None => false,
        }
    }

    pub fn list(&self) -> Vec<(String, String)> {
        self.mounts
            .iter()
            .map(|e| (e.key().clone(), e.value().job_id.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_register_at_same_mountpoint_is_rejected() {
        let registry = MountRegistry::new();
        let first = MountHandle {
            mountpoint: "/mnt/a".into(),
            job_id: "job-a".into(),
            shutdown: CancellationToken::new(),
        };
        assert!(registry.register("/mnt/a", first));
        let second = MountHandle {
            mountpoint: "/mnt/a".into(),
            job_id: "job-b".into(),
            shutdown: CancellationToken::new(),
        };
        assert!(!registry.register("/mnt/a", second));
    }

    #[test]
    fn request_unmount_cancels_the_registered_token() {
        let registry = MountRegistry::new();
        let token = CancellationToken::new();
        registry.register(
            "/mnt/a",
            MountHandle {
                mountpoint: "/mnt/a".into(),
                job_id: "job-a".into(),
                shutdown: token.clone(),
            },
        );
        assert!(registry.request_unmount("/mnt/a"));
        assert!(token.is_cancelled());
        assert!(!registry.request_unmount("/mnt/b"));
    }
}

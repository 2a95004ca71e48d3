//! rdrive-mount: userspace FUSE adapter proxying remote-drive operations
//! directly, with in-memory TTL caches and a folder-refresh worker
//! instead of an on-disk stub-file convention.
//!
//! Linux: `fuse3` crate (kernel FUSE), unprivileged mount via `fusermount3`.

pub mod cache;
pub mod driver;
pub mod index;
pub mod mounts;
pub mod refresh;

#[cfg(feature = "fuse")]
pub use driver::{mount, RdriveFs};

pub use cache::TtlCache;
pub use index::DirIndex;
pub use mounts::{MountHandle, MountRegistry};

//! rdrive-drive: the abstract `RemoteDrive` operation set, a
//! retry/rate-limit decorator, and an OpenDAL-backed reference
//! implementation plus an in-memory mock for tests.

pub mod error;
pub mod mock;
pub mod opendal_backed;
pub mod operator;
pub mod retry;
pub mod trait_def;

pub use error::DriveError;
pub use mock::MockDrive;
pub use opendal_backed::OpendalDrive;
pub use retry::{retrying, RetryingDrive};
pub use trait_def::*;

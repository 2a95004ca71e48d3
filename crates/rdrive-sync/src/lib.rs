//! rdrive-sync: the chunked upload engine, the Mirror/Redundancy/
//! TwoWaySync reconciler, and the job controller state machine
//!.

pub mod job;
pub mod reconcile;
pub mod upload;

pub use job::{JobController, JobEvent, JobHandle, JobState};
pub use reconcile::{plan, Action};
pub use upload::{upload_file, ProgressFn, UploadOutcome};

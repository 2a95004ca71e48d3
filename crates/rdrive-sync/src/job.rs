//! Job controller — state machine, queueing, pause/cancel, scheduling
//!.
//!
//! `JobState` is a typed enum with an explicit transition table checked at
//! every mutation, the same "typed state + exhaustive match" idiom the
//! reconciler's `Action`/`SyncMode` types use. `JobController` owns one
//! `JobHandle` per configured job id, a single global worker loop that
//! serializes job runs (pausing does not release the worker, cancelling
//! does), and a `ScheduleRegistry` of parsed cron expressions rebuilt on
//! every reconfiguration.

use rdrive_core::types::JobConfig;
use rdrive_core::{RdriveError, RdriveResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Notify, RwLock};
use tokio_util::sync::CancellationToken;

/// A job's lifecycle state, mirrored 1:1 onto `rdrive_core::proto::JobState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    None,
    Initializing,
    Starting,
    Idle,
    Queued,
    Scanning,
    BackingUp,
    Restoring,
    Verifying,
    Paused,
    Cancelling,
    Cancelled,
    Disabled,
    Completed,
    Error,
}

/// Transition events accepted by `JobState::transition`. `Fatal` and the
/// terminal `*Ok` events are distinguished from the user-facing
/// `Enqueue`/`Pause`/`Resume`/`Cancel`/`Disable`/`Enable` controls so a
/// caller driving the run loop and a caller issuing admin commands can't
/// be confused with each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEvent {
    Initialize,
    InitOk,
    StartOk,
    Enqueue,
    Run,
    ScanDone,
    BackupDone,
    VerifyDone,
    Pause,
    Resume,
    Cancel,
    Drained,
    CancelAck,
    Disable,
    Enable,
    Fatal,
    ErrorAck,
}

impl JobState {
    /// Applies `event`, returning the resulting state or an error if the
    /// transition is not allowed from the current state.
    ///
    /// `Pause` remembers the state it suspended so `Resume` can restore it;
    /// that bookkeeping lives in `JobHandle`, not here, since a bare
    /// `JobState` has nowhere to stash it.
    pub fn transition(self, event: JobEvent) -> RdriveResult<JobState> {
        use JobEvent::*;
        use JobState::*;
        let next = match (self, event) {
            (None, Initialize) => Initializing,
            (Initializing, InitOk) => Starting,
            (Starting, StartOk) => Idle,

            (Idle, Enqueue) => Queued,
            (Queued, Run) => Scanning,
            (Scanning, ScanDone) => BackingUp,
            (Scanning, Run) => Restoring,
            (BackingUp, BackupDone) => Verifying,
            (Restoring, BackupDone) => Verifying,
            (Verifying, VerifyDone) => Idle,

            (BackingUp, Pause) => Paused,
            (Restoring, Pause) => Paused,
            // `Resume` is applied by the caller restoring the remembered
            // pre-pause state directly; `Paused` never self-transitions.
            (Queued, Cancel) => Cancelling,
            (Scanning, Cancel) => Cancelling,
            (BackingUp, Cancel) => Cancelling,
            (Restoring, Cancel) => Cancelling,
            (Paused, Cancel) => Cancelling,
            (Cancelling, Drained) => Cancelled,
            (Cancelled, ErrorAck) => Idle,

            (Idle, Disable) => Disabled,
            (Error, Disable) => Disabled,
            (Cancelled, Disable) => Disabled,
            (Disabled, Disable) => Disabled,
            (Completed, Disable) => Disabled,
            (Disabled, Enable) => None,

            (_, Fatal) => Error,
            (Error, ErrorAck) => Idle,

            (s, e) => {
                return Err(RdriveError::FatalConfig(format!(
                    "illegal job transition: {s:?} + {e:?}"
                )))
            }
        };
        Ok(next)
    }

    /// §4.8 invariant: config mutation is rejected unless the job is in one
    /// of these states.
    pub fn allows_config_mutation(self) -> bool {
        matches!(
            self,
            JobState::Idle
                | JobState::Error
                | JobState::Cancelled
                | JobState::Disabled
                | JobState::Completed
        )
    }

    pub fn is_running(self) -> bool {
        matches!(self, JobState::BackingUp | JobState::Restoring)
    }
}

/// Live progress surface, updated at every unit boundary.
#[derive(Debug, Default)]
pub struct JobProgress {
    pub processed_items: AtomicU64,
    pub total_items: AtomicU64,
    pub processed_bytes: AtomicU64,
    pub last_message: RwLock<String>,
    pub error: RwLock<Option<String>>,
}

impl JobProgress {
    pub async fn set_message(&self, msg: impl Into<String>) {
        *self.last_message.write().await = msg.into();
    }

    pub async fn set_error(&self, msg: impl Into<String>) {
        *self.error.write().await = Some(msg.into());
    }

    pub async fn snapshot(&self) -> JobProgressSnapshot {
        JobProgressSnapshot {
            processed_items: self.processed_items.load(Ordering::Relaxed),
            total_items: self.total_items.load(Ordering::Relaxed),
            processed_bytes: self.processed_bytes.load(Ordering::Relaxed),
            last_message: self.last_message.read().await.clone(),
            error: self.error.read().await.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct JobProgressSnapshot {
    pub processed_items: u64,
    pub total_items: u64,
    pub processed_bytes: u64,
    pub last_message: String,
    pub error: Option<String>,
}

/// One job's live state plus the cooperative pause/cancel gates the run
/// loop observes at every unit boundary (§5 "suspension / blocking
/// points").
pub struct JobHandle {
    pub id: String,
    state: Mutex<JobState>,
    /// State `Pause` suspended from, so `Resume` knows where to return.
    pre_pause: Mutex<Option<JobState>>,
    pub progress: JobProgress,
    pub cancel: CancellationToken,
    pause_gate: Notify,
    paused: std::sync::atomic::AtomicBool,
    /// Serializes job *runs*: only one BackingUp/Restoring per job id at a
    /// time, independent of the global queue's own
    /// serialization of runs *across* jobs.
    run_lock: Mutex<()>,
}

impl JobHandle {
    fn new(id: String) -> Self {
        Self {
            id,
            state: Mutex::new(JobState::None),
            pre_pause: Mutex::new(None),
            progress: JobProgress::default(),
            cancel: CancellationToken::new(),
            pause_gate: Notify::new(),
            paused: std::sync::atomic::AtomicBool::new(false),
            run_lock: Mutex::new(()),
        }
    }

    pub async fn state(&self) -> JobState {
        *self.state.lock().await
    }

    async fn apply(&self, event: JobEvent) -> RdriveResult<JobState> {
        let mut guard = self.state.lock().await;
        let next = guard.transition(event)?;
        *guard = next;
        Ok(next)
    }

    /// Suspends the run, remembering the state to resume into. Only valid
    /// from `BackingUp`/`Restoring`.
    pub async fn pause(&self) -> RdriveResult<()> {
        let mut guard = self.state.lock().await;
        if !matches!(*guard, JobState::BackingUp | JobState::Restoring) {
            return Err(RdriveError::FatalConfig(format!(
                "cannot pause from {:?}",
                *guard
            )));
        }
        *self.pre_pause.lock().await = Some(*guard);
        *guard = JobState::Paused;
        self.paused.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub async fn resume(&self) -> RdriveResult<()> {
        let mut guard = self.state.lock().await;
        if *guard != JobState::Paused {
            return Err(RdriveError::FatalConfig("job is not paused".into()));
        }
        let restored = self
            .pre_pause
            .lock()
            .await
            .take()
            .ok_or_else(|| RdriveError::FatalConfig("no pre-pause state recorded".into()))?;
        *guard = restored;
        self.paused.store(false, Ordering::SeqCst);
        self.pause_gate.notify_waiters();
        Ok(())
    }

    /// Checked at every file/folder unit boundary by the run loop: blocks
    /// while paused, returns an error once cancellation has been
    /// requested.
    pub async fn checkpoint(&self) -> RdriveResult<()> {
        while self.paused.load(Ordering::SeqCst) {
            self.pause_gate.notified().await;
        }
        if self.cancel.is_cancelled() {
            return Err(RdriveError::FatalConfig("job cancelled".into()));
        }
        Ok(())
    }
}

/// Alias expansion for the Quartz-style subset the job controller accepts,
/// since the `cron` crate parses only the 7-field literal form.
fn expand_alias(expr: &str) -> &str {
    match expr {
        "@yearly" | "@annually" => "0 0 0 1 1 * *",
        "@monthly" => "0 0 0 1 * * *",
        "@weekly" => "0 0 0 * * 0 *",
        "@daily" | "@midnight" => "0 0 0 * * * *",
        "@hourly" => "0 0 * * * * *",
        other => other,
    }
}

/// Owns the set of parsed schedules for every configured job; cleared and
/// rebuilt wholesale on reconfiguration.
#[derive(Default)]
pub struct ScheduleRegistry {
    schedules: HashMap<String, Vec<cron::Schedule>>,
}

impl ScheduleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole registry from `configs`, discarding whatever was
    /// there before.
    pub fn rebuild(&mut self, configs: &HashMap<String, JobConfig>) {
        self.schedules.clear();
        for (job_id, config) in configs {
            let mut parsed = Vec::new();
            for expr in &config.schedules {
                match expand_alias(expr).parse::<cron::Schedule>() {
                    Ok(schedule) => parsed.push(schedule),
                    Err(e) => {
                        tracing::warn!(job_id, expr, error = %e, "invalid cron expression, skipping");
                    }
                }
            }
            self.schedules.insert(job_id.clone(), parsed);
        }
    }

    /// Jobs whose next scheduled fire time, upper-bounded by `from`, has
    /// already passed — i.e. due to run now.
    pub fn due_jobs(&self, from: chrono::DateTime<chrono::Utc>) -> Vec<String> {
        self.schedules
            .iter()
            .filter(|(_, schedules)| {
                schedules.iter().any(|s| {
                    s.after(&(from - chrono::Duration::minutes(1)))
                        .next()
                        .map(|next| next <= from)
                        .unwrap_or(false)
                })
            })
            .map(|(id, _)| id.clone())
            .collect()
    }
}

/// One unit of work accepted by the global queue: run `job_id` once,
/// `immediate` marking a one-shot run that is terminal rather than
/// rescheduled (§4.8 "An immediate one-shot job runs once and is marked
/// terminal").
#[derive(Debug, Clone)]
pub struct JobRunRequest {
    pub job_id: String,
    pub immediate: bool,
}

/// The run body a caller supplies to `JobController::run`; invoked by the
/// single worker loop once per dequeued `JobRunRequest`, after the
/// controller has already transitioned the job into `Scanning`/etc. and
/// handed it a checkpoint-able handle.
pub type RunFn = Arc<
    dyn Fn(
            Arc<JobHandle>,
        )
            -> std::pin::Pin<Box<dyn std::future::Future<Output = RdriveResult<()>> + Send>>
        + Send
        + Sync,
>;

/// Owns every configured job's `JobHandle`, the schedule registry, and a
/// single global worker loop that serializes runs across jobs (§4.8
/// "Global queue"). Pausing does not release the worker (the paused job
/// still occupies the run slot — the next queued job waits); cancelling
/// does, since a cancelled run exits the loop body promptly.
pub struct JobController {
    handles: RwLock<HashMap<String, Arc<JobHandle>>>,
    schedules: Mutex<ScheduleRegistry>,
    queue_tx: mpsc::UnboundedSender<JobRunRequest>,
    run_fn: RunFn,
}

impl JobController {
    /// Spawns the worker loop immediately; `run_fn` is invoked once per
    /// dequeued run request and should itself call the reconciler/upload
    /// engine and report progress via `JobHandle::progress`.
    pub fn new(run_fn: RunFn) -> Arc<Self> {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let controller = Arc::new(Self {
            handles: RwLock::new(HashMap::new()),
            schedules: Mutex::new(ScheduleRegistry::new()),
            queue_tx,
            run_fn,
        });
        tokio::spawn(Self::worker_loop(controller.clone(), queue_rx));
        controller
    }

    async fn worker_loop(
        controller: Arc<JobController>,
        mut queue_rx: mpsc::UnboundedReceiver<JobRunRequest>,
    ) {
        while let Some(req) = queue_rx.recv().await {
            let handle = match controller.handle_for(&req.job_id).await {
                Some(h) => h,
                None => {
                    tracing::warn!(job_id = %req.job_id, "dequeued run for unknown job");
                    continue;
                }
            };

            let _run_guard = handle.run_lock.lock().await;
            if let Err(e) = handle.apply(JobEvent::Run).await {
                tracing::warn!(job_id = %req.job_id, error = %e, "cannot start run");
                continue;
            }

            let result = (controller.run_fn)(handle.clone()).await;

            if handle.cancel.is_cancelled() {
                let _ = handle.apply(JobEvent::Drained).await;
            } else {
                match result.as_ref() {
                    Ok(()) => {
                        // `run_fn` is one opaque unit of work covering scan,
                        // backup/restore, and verification; the controller
                        // walks the handle through the remaining states on
                        // its behalf rather than exposing `apply` to callers.
                        let _ = handle.apply(JobEvent::ScanDone).await;
                        let _ = handle.apply(JobEvent::BackupDone).await;
                        let _ = handle.apply(JobEvent::VerifyDone).await;
                    }
                    Err(e) => {
                        handle.progress.set_error(e.to_string()).await;
                        let _ = handle.apply(JobEvent::Fatal).await;
                    }
                }
            }

            if req.immediate && handle.state().await == JobState::Idle {
                // One-shot runs are marked terminal without touching the
                // schedule registry; `Completed` is reachable only via an
                // explicit admin transition from `Idle`, modeled here as
                // leaving the job Idle once its single run has finished.
                handle.progress.set_message("one-shot run complete").await;
            }
        }
    }

    async fn handle_for(&self, job_id: &str) -> Option<Arc<JobHandle>> {
        self.handles.read().await.get(job_id).cloned()
    }

    /// Registers a job id, creating its handle in `None` and immediately
    /// advancing it through `Initializing`/`Starting` into `Idle`.
    /// Re-registering an existing id is a no-op if it isn't currently in a
    /// config-mutable state.
    pub async fn register(&self, job_id: &str) -> RdriveResult<()> {
        let mut handles = self.handles.write().await;
        if let Some(existing) = handles.get(job_id) {
            if !existing.state().await.allows_config_mutation() {
                return Err(RdriveError::FatalConfig(format!(
                    "job {job_id} is running, cannot reconfigure"
                )));
            }
        }
        let handle = Arc::new(JobHandle::new(job_id.to_string()));
        handle.apply(JobEvent::Initialize).await?;
        handle.apply(JobEvent::InitOk).await?;
        handle.apply(JobEvent::StartOk).await?;
        handles.insert(job_id.to_string(), handle);
        Ok(())
    }

    /// Rebuilds the cron schedule registry wholesale from `configs` (§4.8
    /// "On reconfig, the registry is cleared and rebuilt").
    pub async fn reconfigure_schedules(&self, configs: &HashMap<String, JobConfig>) {
        self.schedules.lock().await.rebuild(configs);
    }

    /// Jobs whose schedule says they're due as of `now`; callers (the
    /// daemon's scheduler tick) enqueue each of these.
    pub async fn due_jobs(&self, now: chrono::DateTime<chrono::Utc>) -> Vec<String> {
        self.schedules.lock().await.due_jobs(now)
    }

    /// Transitions `job_id` to `Queued` and pushes a run request onto the
    /// global worker queue.
    pub async fn enqueue(&self, job_id: &str, immediate: bool) -> RdriveResult<()> {
        let handle = self
            .handle_for(job_id)
            .await
            .ok_or_else(|| RdriveError::FatalConfig(format!("unknown job id {job_id}")))?;
        handle.apply(JobEvent::Enqueue).await?;
        self.queue_tx
            .send(JobRunRequest {
                job_id: job_id.to_string(),
                immediate,
            })
            .map_err(|_| RdriveError::FatalConfig("job queue closed".into()))?;
        Ok(())
    }

    pub async fn pause(&self, job_id: &str) -> RdriveResult<()> {
        self.require(job_id).await?.pause().await
    }

    pub async fn resume(&self, job_id: &str) -> RdriveResult<()> {
        self.require(job_id).await?.resume().await
    }

    /// Requests cancellation: sets the token (observed by the run loop's
    /// next checkpoint) and transitions to `Cancelling`. The controller
    /// itself advances `Cancelling -> Cancelled` from the worker loop once
    /// the run body returns.
    pub async fn cancel(&self, job_id: &str) -> RdriveResult<()> {
        let handle = self.require(job_id).await?;
        handle.apply(JobEvent::Cancel).await?;
        handle.cancel.cancel();
        Ok(())
    }

    pub async fn disable(&self, job_id: &str) -> RdriveResult<()> {
        self.require(job_id).await?.apply(JobEvent::Disable).await?;
        Ok(())
    }

    pub async fn enable(&self, job_id: &str) -> RdriveResult<()> {
        self.require(job_id).await?.apply(JobEvent::Enable).await?;
        Ok(())
    }

    pub async fn status(&self, job_id: &str) -> RdriveResult<(JobState, JobProgressSnapshot)> {
        let handle = self.require(job_id).await?;
        Ok((handle.state().await, handle.progress.snapshot().await))
    }

    pub async fn list_job_ids(&self) -> Vec<String> {
        self.handles.read().await.keys().cloned().collect()
    }

    async fn require(&self, job_id: &str) -> RdriveResult<Arc<JobHandle>> {
        self.handle_for(job_id)
            .await
            .ok_or_else(|| RdriveError::FatalConfig(format!("unknown job id {job_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions() {
        let s = JobState::None;
        let s = s.transition(JobEvent::Initialize).unwrap();
        assert_eq!(s, JobState::Initializing);
        let s = s.transition(JobEvent::InitOk).unwrap();
        assert_eq!(s, JobState::Starting);
        let s = s.transition(JobEvent::StartOk).unwrap();
        assert_eq!(s, JobState::Idle);
        let s = s.transition(JobEvent::Enqueue).unwrap();
        assert_eq!(s, JobState::Queued);
        let s = s.transition(JobEvent::Run).unwrap();
        assert_eq!(s, JobState::Scanning);
        let s = s.transition(JobEvent::ScanDone).unwrap();
        assert_eq!(s, JobState::BackingUp);
        let s = s.transition(JobEvent::BackupDone).unwrap();
        assert_eq!(s, JobState::Verifying);
        let s = s.transition(JobEvent::VerifyDone).unwrap();
        assert_eq!(s, JobState::Idle);
    }

    #[test]
    fn illegal_transition_is_rejected() {
        let err = JobState::Idle.transition(JobEvent::Pause).unwrap_err();
        assert!(matches!(err, RdriveError::FatalConfig(_)));
    }

    #[test]
    fn fatal_reaches_error_from_any_state() {
        for s in [
            JobState::Scanning,
            JobState::BackingUp,
            JobState::Paused,
            JobState::Queued,
        ] {
            assert_eq!(s.transition(JobEvent::Fatal).unwrap(), JobState::Error);
        }
    }

    #[test]
    fn disable_enable_round_trips_to_none() {
        let s = JobState::Idle.transition(JobEvent::Disable).unwrap();
        assert_eq!(s, JobState::Disabled);
        let s = s.transition(JobEvent::Enable).unwrap();
        assert_eq!(s, JobState::None);
    }

    #[test]
    fn config_mutation_only_allowed_in_terminal_states() {
        assert!(JobState::Idle.allows_config_mutation());
        assert!(JobState::Error.allows_config_mutation());
        assert!(JobState::Disabled.allows_config_mutation());
        assert!(!JobState::BackingUp.allows_config_mutation());
        assert!(!JobState::Scanning.allows_config_mutation());
    }

    #[tokio::test]
    async fn pause_then_resume_restores_prior_state() {
        let handle = JobHandle::new("job-a".into());
        handle.apply(JobEvent::Initialize).await.unwrap();
        handle.apply(JobEvent::InitOk).await.unwrap();
        handle.apply(JobEvent::StartOk).await.unwrap();
        handle.apply(JobEvent::Enqueue).await.unwrap();
        handle.apply(JobEvent::Run).await.unwrap();
        assert_eq!(handle.state().await, JobState::Scanning);
        handle.apply(JobEvent::ScanDone).await.unwrap();
        assert_eq!(handle.state().await, JobState::BackingUp);

        handle.pause().await.unwrap();
        assert_eq!(handle.state().await, JobState::Paused);
        handle.resume().await.unwrap();
        assert_eq!(handle.state().await, JobState::BackingUp);
    }

    #[tokio::test]
    async fn checkpoint_blocks_while_paused_and_errors_once_cancelled() {
        let handle = Arc::new(JobHandle::new("job-b".into()));
        handle.apply(JobEvent::Initialize).await.unwrap();
        handle.apply(JobEvent::InitOk).await.unwrap();
        handle.apply(JobEvent::StartOk).await.unwrap();
        handle.apply(JobEvent::Enqueue).await.unwrap();
        handle.apply(JobEvent::Run).await.unwrap();
        handle.apply(JobEvent::ScanDone).await.unwrap();

        handle.pause().await.unwrap();
        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.checkpoint().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        handle.resume().await.unwrap();
        waiter.await.unwrap().unwrap();

        handle.cancel.cancel();
        assert!(handle.checkpoint().await.is_err());
    }

    #[tokio::test]
    async fn controller_runs_enqueued_job_to_completion() {
        let run_fn: RunFn = Arc::new(|handle| {
            Box::pin(async move {
                handle.progress.set_message("working").await;
                Ok(())
            })
        });
        let controller = JobController::new(run_fn);
        controller.register("job-a").await.unwrap();
        controller.enqueue("job-a", true).await.unwrap();

        for _ in 0..50 {
            let (state, _) = controller.status("job-a").await.unwrap();
            if state == JobState::Idle {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        panic!("job never reached Idle");
    }

    #[tokio::test]
    async fn controller_moves_failed_job_to_error() {
        let run_fn: RunFn = Arc::new(|_handle| {
            Box::pin(async move { Err(RdriveError::FatalConfig("boom".into())) })
        });
        let controller = JobController::new(run_fn);
        controller.register("job-b").await.unwrap();
        controller.enqueue("job-b", false).await.unwrap();

        for _ in 0..50 {
            let (state, progress) = controller.status("job-b").await.unwrap();
            if state == JobState::Error {
                assert!(progress.error.is_some());
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        panic!("job never reached Error");
    }

    #[test]
    fn alias_expands_to_seven_field_cron() {
        assert_eq!(expand_alias("@daily"), "0 0 0 * * * *");
        assert_eq!(expand_alias("0 0 12 * * * *"), "0 0 12 * * * *");
    }

    #[test]
    fn schedule_registry_rebuild_is_wholesale() {
        let mut registry = ScheduleRegistry::new();
        let mut configs = HashMap::new();
        configs.insert(
            "job-a".to_string(),
            JobConfig {
                schedules: vec!["@hourly".to_string()],
                ..default_job_config()
            },
        );
        registry.rebuild(&configs);
        assert_eq!(registry.schedules.len(), 1);

        registry.rebuild(&HashMap::new());
        assert!(registry.schedules.is_empty());
    }

    fn default_job_config() -> JobConfig {
        JobConfig {
            sources: Vec::new(),
            target: String::new(),
            restore_path: None,
            mode: rdrive_core::types::SyncMode::Mirror,
            schedules: Vec::new(),
            filters: Vec::new(),
            check_level: rdrive_core::types::HashLevel::Sampled,
            check_algorithm: rdrive_core::types::HashAlgorithm::Sha1,
            upload_threads: 4,
            download_threads: 4,
            file_watcher: false,
            is_recycle_bin: true,
            is_temporary: false,
            rapid_upload: true,
        }
    }
}

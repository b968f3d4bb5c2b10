use crate::config::EngineConfig;
use crate::control::{CancelToken, PauseGate, SleepInhibit, SleepInhibitor};
use crate::copier::{self, CopyOutcome};
use crate::error::{Error, Result};
use crate::hasher::{self, HashStageOutcome};
use crate::planner::{self, PlanSummary};
use crate::platform;
use crate::progress::{
    ProgressDispatcher, ProgressReporter, ProgressTracker, SilentReporter, Stage,
};
use crate::scanner::{self, ScanOutcome};
use crate::state::PipelineState;
use crate::storage::models::{ProjectSummary, RootType, ScanRoot};
use crate::storage::{Store, WriterActor};
use crate::verify::{self, VerifyReport};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{info, warn};

pub const PROJECT_DB_FILE: &str = "Project.db";
pub const LOGS_DIR: &str = "Logs";

pub fn project_db_path(project_dir: &Path) -> PathBuf {
    project_dir.join(PROJECT_DB_FILE)
}

pub fn logs_dir(project_dir: &Path) -> PathBuf {
    project_dir.join(LOGS_DIR)
}

/// Drives the whole pipeline over one open project. Stages run on the
/// calling thread; workers fan out underneath and everything suspends at
/// the shared pause gate and cancel token.
pub struct PipelineEngine {
    store: Arc<Store>,
    config: EngineConfig,
    reporter: Arc<dyn ProgressReporter>,
    tracker: Arc<ProgressTracker>,
    pause: Arc<PauseGate>,
    cancel: CancelToken,
    sleep: Arc<SleepInhibitor>,
    state: Mutex<PipelineState>,
}

impl PipelineEngine {
    /// Open (or create) the project folder and its store, restoring the
    /// persisted pipeline state. Mid-stage states from a previous crash
    /// normalize to Idle; the store-level recovery already re-queued their
    /// work.
    pub fn open(
        project_dir: &Path,
        config: EngineConfig,
        reporter: Arc<dyn ProgressReporter>,
        sleep_inhibit: Box<dyn SleepInhibit>,
    ) -> Result<Self> {
        std::fs::create_dir_all(project_dir)?;
        let store = Arc::new(Store::open(&project_db_path(project_dir))?);
        let state = match store.load_settings()? {
            Some(settings) => restore_state(
                PipelineState::parse(&settings.current_state).unwrap_or(PipelineState::Idle),
            ),
            None => PipelineState::Idle,
        };
        Ok(Self {
            store,
            config,
            reporter,
            tracker: ProgressTracker::new(),
            pause: PauseGate::new(),
            cancel: CancelToken::new(),
            sleep: SleepInhibitor::new(sleep_inhibit),
            state: Mutex::new(state),
        })
    }

    /// Embedding constructor over an already-open store (tests, the CLI's
    /// two-phase open). Restores the persisted state like `open` does.
    pub fn with_store(store: Arc<Store>, config: EngineConfig) -> Self {
        let state = store
            .load_settings()
            .ok()
            .flatten()
            .and_then(|s| PipelineState::parse(&s.current_state))
            .map(restore_state)
            .unwrap_or(PipelineState::Idle);
        Self {
            store,
            config,
            reporter: Arc::new(SilentReporter),
            tracker: ProgressTracker::new(),
            pause: PauseGate::new(),
            cancel: CancelToken::new(),
            sleep: SleepInhibitor::noop(),
            state: Mutex::new(state),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_sleep_inhibit(mut self, inhibit: Box<dyn SleepInhibit>) -> Self {
        self.sleep = SleepInhibitor::new(inhibit);
        self
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> PipelineState {
        *self.state.lock().unwrap()
    }

    // ── Control surface ──────────────────────────────────────────

    pub fn pause(&self) {
        self.pause.pause();
        let paused = match self.state() {
            PipelineState::Scanning => Some(PipelineState::ScanPaused),
            PipelineState::Hashing => Some(PipelineState::HashPaused),
            PipelineState::Copying => Some(PipelineState::CopyPaused),
            _ => None,
        };
        if let Some(next) = paused {
            let _ = self.transition(next);
        }
    }

    pub fn resume(&self) {
        let resumed = match self.state() {
            PipelineState::ScanPaused => Some(PipelineState::Scanning),
            PipelineState::HashPaused => Some(PipelineState::Hashing),
            PipelineState::CopyPaused => Some(PipelineState::Copying),
            _ => None,
        };
        if let Some(next) = resumed {
            let _ = self.transition(next);
        }
        self.pause.resume();
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
        // A paused pipeline must observe the cancel too.
        self.pause.resume();
    }

    /// Validate against the transition table, persist on success.
    fn transition(&self, to: PipelineState) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let next = state.transition_to(to)?;
        self.store.save_state(next)?;
        *state = next;
        Ok(())
    }

    /// Stage epilogue: map a worker result onto the state machine.
    fn finish_stage<T>(&self, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => Ok(value),
            Err(Error::Cancelled) => {
                let _ = self.transition(PipelineState::Idle);
                Err(Error::Cancelled)
            }
            Err(err) => {
                warn!("Stage faulted: {}", err);
                let _ = self.store.set_last_error(Some(&err.to_string()));
                // Planning and ReadyToCopy have no Faulted edge; they drop
                // back to Idle instead.
                if self.transition(PipelineState::Faulted).is_err() {
                    let _ = self.transition(PipelineState::Idle);
                }
                Err(err)
            }
        }
    }

    // ── Roots ────────────────────────────────────────────────────

    pub fn add_root(&self, path: &Path, label: Option<&str>) -> Result<i64> {
        if !path.is_dir() {
            return Err(Error::Config(format!(
                "'{}' is not a readable directory",
                path.display()
            )));
        }
        let root_type = platform::guess_root_type(path);
        self.store
            .add_root(&path.to_string_lossy(), label, root_type)
    }

    pub fn roots(&self) -> Result<Vec<ScanRoot>> {
        self.store.list_roots(false)
    }

    // ── Stages ───────────────────────────────────────────────────

    /// Enumerate all enabled roots. Each root is cleared first (the plan is
    /// invalidated by any topology change); unchanged files get their
    /// hashes re-attached afterwards so the hash stage skips them.
    pub fn scan(&self) -> Result<ScanOutcome> {
        let roots = self.store.list_roots(true)?;
        if roots.is_empty() {
            return Err(Error::Config("no enabled scan roots".into()));
        }
        self.transition(PipelineState::Scanning)?;
        self.cancel.reset();
        let _lease = self.sleep.lease("Scan");
        let result = self.scan_inner(&roots);
        if result.is_ok() {
            self.transition(PipelineState::Idle)?;
        }
        self.finish_stage(result)
    }

    fn scan_inner(&self, roots: &[ScanRoot]) -> Result<ScanOutcome> {
        let started = Instant::now();
        self.reporter.on_stage_start(Stage::Scan);
        self.tracker.reset(0, 0);
        let _dispatcher = ProgressDispatcher::spawn(
            Arc::clone(&self.tracker),
            Arc::clone(&self.reporter),
            Arc::clone(&self.pause),
            Stage::Scan,
            self.config.cpu_profile.update_cadence_hz(),
        );

        for root in roots {
            self.store.clear_root(root.id)?;
        }

        let writer = WriterActor::spawn(
            Arc::clone(&self.store),
            self.config.scan_channel_capacity,
        );
        let outcome = scanner::scan_roots(
            roots,
            &self.config.filter,
            &writer.handle(),
            &self.tracker,
            &self.pause,
            &self.cancel,
        );
        writer.close();

        for root in roots {
            self.store.reattach_hashes(root.id)?;
            self.store.update_root_stats(root.id)?;
        }
        self.store.prune_orphan_hashes()?;

        let outcome = outcome?;
        info!(
            "Scan complete: {} candidates, {} rejected, {} errors in {:.2}s",
            outcome.emitted,
            outcome.rejected,
            outcome.errors,
            started.elapsed().as_secs_f64()
        );
        self.reporter
            .on_stage_complete(Stage::Scan, outcome.emitted, started.elapsed().as_secs_f64());
        Ok(outcome)
    }

    /// Hash everything discovered and not yet hashed.
    pub fn hash(&self) -> Result<HashStageOutcome> {
        self.transition(PipelineState::Hashing)?;
        self.cancel.reset();
        let _lease = self.sleep.lease("Hash");
        let result = self.hash_inner();
        if result.is_ok() {
            self.transition(PipelineState::Idle)?;
        }
        self.finish_stage(result)
    }

    fn hash_inner(&self) -> Result<HashStageOutcome> {
        let started = Instant::now();
        self.reporter.on_stage_start(Stage::Hash);
        let _dispatcher = ProgressDispatcher::spawn(
            Arc::clone(&self.tracker),
            Arc::clone(&self.reporter),
            Arc::clone(&self.pause),
            Stage::Hash,
            self.config.cpu_profile.update_cadence_hz(),
        );

        let writer = WriterActor::spawn(
            Arc::clone(&self.store),
            self.config.scan_channel_capacity,
        );
        let result = hasher::run_hash_stage(
            &self.store,
            &writer.handle(),
            &self.config,
            &self.tracker,
            &self.pause,
            &self.cancel,
        );
        writer.close();

        let outcome = result?;
        self.reporter
            .on_stage_complete(Stage::Hash, outcome.hashed, started.elapsed().as_secs_f64());
        Ok(outcome)
    }

    /// Build the destination proposal from the hashed instances.
    pub fn plan(&self) -> Result<PlanSummary> {
        self.transition(PipelineState::Planning)?;
        self.cancel.reset();
        let result = planner::build_plan(&self.store);
        if result.is_ok() {
            self.transition(PipelineState::ReadyToCopy)?;
        }
        self.finish_stage(result)
    }

    /// Execute the approved plan. From ReadyToCopy the job set is rebuilt;
    /// from Idle (resume) leftover Pending jobs continue as they are.
    pub fn copy(&self) -> Result<CopyOutcome> {
        let settings = self
            .store
            .load_settings()?
            .ok_or_else(|| Error::Config("project settings missing".into()))?;
        let target = settings
            .target_path
            .clone()
            .ok_or_else(|| Error::Config("no destination root configured".into()))?;

        let fresh_start = self.state() == PipelineState::ReadyToCopy;
        self.transition(PipelineState::Copying)?;
        self.cancel.reset();
        let _lease = self.sleep.lease("Copy");

        let result = self.copy_inner(&target, fresh_start);
        match &result {
            Ok(_) => {
                self.transition(PipelineState::Completed)?;
            }
            Err(Error::Cancelled) => {
                let reset = self.store.reset_in_progress_to_pending()?;
                info!("Copy cancelled; {} in-flight jobs reset to Pending", reset);
            }
            Err(_) => {}
        }
        self.finish_stage(result)
    }

    fn copy_inner(&self, target: &str, fresh_start: bool) -> Result<CopyOutcome> {
        let started = Instant::now();
        self.reporter.on_stage_start(Stage::Copy);

        let (jobs, total_bytes) = if fresh_start {
            self.store.create_jobs_from_plan(target)?
        } else {
            let pending = self.store.pending_job_count()? as usize;
            (pending, 0)
        };
        if jobs == 0 {
            info!("Copy stage: no jobs to run");
        }
        self.tracker.reset(jobs as u64, total_bytes);
        let _dispatcher = ProgressDispatcher::spawn(
            Arc::clone(&self.tracker),
            Arc::clone(&self.reporter),
            Arc::clone(&self.pause),
            Stage::Copy,
            self.config.cpu_profile.update_cadence_hz(),
        );

        let outcome = copier::run_copy_stage(
            &self.store,
            &self.config,
            &self.tracker,
            &self.reporter,
            &self.pause,
            &self.cancel,
        )?;
        self.reporter.on_stage_complete(
            Stage::Copy,
            outcome.copied + outcome.verified,
            started.elapsed().as_secs_f64(),
        );
        Ok(outcome)
    }

    /// Independent re-check of everything copied. Does not touch the main
    /// pipeline state.
    pub fn verify(&self) -> Result<VerifyReport> {
        self.cancel.reset();
        let _lease = self.sleep.lease("Verification");
        let started = Instant::now();
        self.reporter.on_stage_start(Stage::Verification);
        let _dispatcher = ProgressDispatcher::spawn(
            Arc::clone(&self.tracker),
            Arc::clone(&self.reporter),
            Arc::clone(&self.pause),
            Stage::Verification,
            self.config.cpu_profile.update_cadence_hz(),
        );
        let report = verify::run_verification(
            &self.store,
            &self.config,
            &self.tracker,
            &self.pause,
            &self.cancel,
        )?;
        self.reporter.on_stage_complete(
            Stage::Verification,
            report.checked as u64,
            started.elapsed().as_secs_f64(),
        );
        Ok(report)
    }

    /// Scan, hash and plan in one sweep, using the direct stage-to-stage
    /// transitions. Stops at ReadyToCopy; copying stays an explicit command.
    pub fn run_to_plan(&self) -> Result<PlanSummary> {
        let roots = self.store.list_roots(true)?;
        if roots.is_empty() {
            return Err(Error::Config("no enabled scan roots".into()));
        }
        self.transition(PipelineState::Scanning)?;
        self.cancel.reset();

        let scan_result = {
            let _lease = self.sleep.lease("Scan");
            self.scan_inner(&roots)
        };
        self.finish_stage(scan_result)?;

        self.transition(PipelineState::Hashing)?;
        let hash_result = {
            let _lease = self.sleep.lease("Hash");
            self.hash_inner()
        };
        self.finish_stage(hash_result)?;

        self.transition(PipelineState::Planning)?;
        let plan_result = planner::build_plan(&self.store);
        if plan_result.is_ok() {
            self.transition(PipelineState::ReadyToCopy)?;
        }
        self.finish_stage(plan_result)
    }

    /// Return a completed or faulted pipeline to Idle, clearing the last
    /// error once the user acknowledged it.
    pub fn return_to_idle(&self) -> Result<()> {
        self.store.set_last_error(None)?;
        self.transition(PipelineState::Idle)
    }

    pub fn summary(&self) -> Result<ProjectSummary> {
        self.store.project_summary()
    }
}

/// Persisted mid-stage states mean the process died inside a stage; the
/// store recovery re-queued the work, so the engine simply starts Idle.
/// Durable waypoints survive.
fn restore_state(persisted: PipelineState) -> PipelineState {
    match persisted {
        PipelineState::ReadyToCopy => PipelineState::ReadyToCopy,
        PipelineState::Completed => PipelineState::Completed,
        PipelineState::Faulted => PipelineState::Faulted,
        _ => PipelineState::Idle,
    }
}

/// Convenience for tooling that classifies a new root right away.
pub fn classify_root(path: &Path) -> RootType {
    platform::guess_root_type(path)
}

use log::{debug, error, info, warn};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::{Duration, Instant};

use crate::errors::PipelineError;
use crate::interfaces::{BuildStatusSink, Clock};
use crate::stages::FinalStage;
use crate::utils::config::PipelineConfig;
use crate::{BuildMode, EntityId, IndexBuildStatus, IndexStatus, IndexType};

use super::context::{
    CancelToken, Lifecycle, PipelineStatus, RunBaseline, StatusSnapshot, StatusState,
};
use super::performance::{PerformanceSink, PipelinePerformance};
use super::stage::{StageChain, WiredChain};

/// Orchestrator for one index type: owns the stage chain, the run status and the counters,
/// and mirrors progress into build-status snapshots for the updater.
///
/// `start`, `destroy` and `periodic_monitor` are totally ordered by the status lock. Snapshots are
/// handed to the [`BuildStatusSink`] only after the lock is released.
pub struct IndexingPipeline {
    index_type: IndexType,
    config: PipelineConfig,
    status: Arc<PipelineStatus>,
    performance: Arc<PipelinePerformance>,
    pending_chain: Mutex<Option<StageChain<Vec<EntityId>, usize>>>,
    chain: OnceLock<WiredChain<Vec<EntityId>>>,
    final_stage: Arc<FinalStage>,
    reporter: Arc<dyn BuildStatusSink>,
    clock: Arc<dyn Clock>,
    cancel: CancelToken,
}

/// Holds a pipeline busy while a `start` call pushes work into the first stage.
struct DispatchGuard<'a> {
    status: &'a PipelineStatus,
}

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        let mut st = self.status.lock();
        st.dispatching = st.dispatching.saturating_sub(1);
        if st.dispatching == 0 {
            self.status.notify_idle();
        }
    }
}

impl IndexingPipeline {
    pub fn new(
        index_type: IndexType,
        chain: StageChain<Vec<EntityId>, usize>,
        reporter: Arc<dyn BuildStatusSink>,
        clock: Arc<dyn Clock>,
        config: PipelineConfig,
    ) -> Self {
        let status = Arc::new(PipelineStatus::new(index_type));
        let final_stage = Arc::new(FinalStage::new(Arc::clone(&status)));
        Self {
            index_type,
            config,
            status,
            performance: Arc::new(PipelinePerformance::new()),
            pending_chain: Mutex::new(Some(chain)),
            chain: OnceLock::new(),
            final_stage,
            reporter,
            clock,
            cancel: CancelToken::new(),
        }
    }

    /// Refuse new work once `cancel` is cancelled. Pass the same token the publishing stage
    /// waits on, so a cancelled pipeline errors on `start` instead of dropping documents.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn index_type(&self) -> IndexType {
        self.index_type
    }

    /// Wire the chain end to end (last stage into the final sink), inject the shared counters,
    /// and move to `Active`.
    pub fn initialize(&self) -> Result<(), PipelineError> {
        let mut st = self.status.lock();
        if st.lifecycle != Lifecycle::Uninitialized {
            return Err(PipelineError::AlreadyInitialized(self.index_type));
        }
        let chain = self
            .pending_chain
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(PipelineError::NoStages)?;
        let stages = chain.len();
        let wired = chain.finish(self.final_stage.clone())?;
        wired.attach_sink(&PerformanceSink::new(
            Arc::clone(&self.performance),
            Arc::clone(&self.status),
        ));
        let _ = self.chain.set(wired);
        st.lifecycle = Lifecycle::Active;
        debug!(
            "{}: pipeline initialized with {} stage(s)",
            self.index_type, stages
        );
        Ok(())
    }

    /// Start (or extend) an update run with `ids`.
    pub fn start(&self, ids: Vec<EntityId>) -> Result<(), PipelineError> {
        self.start_with_mode(ids, BuildMode::Update)
    }

    /// Push `ids` into the first stage. Opens a run if none is in progress; otherwise the ids
    /// join the current run and raise its total. A rebuild request upgrades an update run.
    pub fn start_with_mode(
        &self,
        ids: Vec<EntityId>,
        mode: BuildMode,
    ) -> Result<(), PipelineError> {
        let n = ids.len() as u64;
        let report = {
            let mut guard = self.status.lock();
            let st = &mut *guard;
            if st.lifecycle != Lifecycle::Active {
                error!(
                    "{}: start rejected, pipeline is {}",
                    self.index_type, st.lifecycle
                );
                return Err(PipelineError::NotActive {
                    index_type: self.index_type,
                    state: st.lifecycle,
                });
            }
            if self.cancel.is_cancelled() {
                warn!("{}: start rejected, pipeline cancelled", self.index_type);
                return Err(PipelineError::Cancelled(self.index_type));
            }
            let now = self.clock.now();
            match st.run.as_mut() {
                Some(run) => {
                    run.total_at_start += n;
                    st.build.total_records += n;
                    if mode == BuildMode::Rebuild && run.mode == BuildMode::Update {
                        run.mode = BuildMode::Rebuild;
                        st.build.status = IndexStatus::RebuildInProgress;
                    }
                }
                None => {
                    st.run = Some(RunBaseline {
                        mode,
                        total_at_start: n,
                        incoming_at_start: st.incoming,
                        completed_at_start: st.completed,
                    });
                    st.completed_at = None;
                    st.build.status = mode.in_progress_status();
                    st.build.operation_start_date = Some(now);
                    st.build.total_records = n;
                    st.build.processed_records = 0;
                    info!("{}: {:?} run started", self.index_type, mode);
                }
            }
            st.incoming += n;
            st.latest_start = Some(now);
            st.dispatching += 1;
            st.build.last_modified_date = Some(now);
            st.last_reported = Some((st.build.status, st.build.processed_records));
            st.build.clone()
        };
        self.reporter.submit(report);

        let _dispatch = DispatchGuard {
            status: &self.status,
        };
        debug!("{}: dispatching {} identifier(s)", self.index_type, n);
        if let Some(chain) = self.chain.get() {
            chain.send(ids);
        }
        Ok(())
    }

    /// True while a `start` is dispatching or any stage (publisher included) holds work.
    pub fn is_busy(&self) -> bool {
        let st = self.status.lock();
        self.busy_locked(&st)
    }

    fn busy_locked(&self, st: &StatusState) -> bool {
        st.dispatching > 0 || self.chain.get().is_some_and(|c| c.is_busy())
    }

    /// Reconcile live counters into the build status; meant to be called on a fixed cadence by
    /// an external scheduler. Announces completion when a started run has drained.
    pub fn periodic_monitor(&self) {
        let report = {
            let mut st = self.status.lock();
            if st.lifecycle == Lifecycle::Uninitialized {
                return;
            }
            self.reconcile_locked(&mut st, false)
        };
        if let Some(report) = report {
            self.reporter.submit(report);
        }
    }

    /// Update the in-memory build status from the counters. Returns a snapshot to persist when
    /// something changed (always when `force`).
    fn reconcile_locked(&self, st: &mut StatusState, force: bool) -> Option<IndexBuildStatus> {
        let Some(run) = st.run else {
            return force.then(|| st.build.clone());
        };
        let now = self.clock.now();
        let processed = run.processed(st.incoming, st.completed);
        st.build.processed_records = processed;

        if !self.busy_locked(st) {
            let outstanding = run.outstanding(st.incoming, st.completed);
            st.run = None;
            st.completed_at = Some(now);
            st.runs_finished += 1;
            if outstanding == 0 {
                st.build.status = IndexStatus::Complete;
                st.build.last_build_date = st.build.operation_start_date;
                info!(
                    "{}: run complete, {} record(s) processed",
                    self.index_type, processed
                );
            } else {
                warn!(
                    "{}: run drained with {} of {} unit(s) lost; status stays {}",
                    self.index_type, outstanding, run.total_at_start, st.build.status
                );
            }
            self.status.notify_idle();
        }

        let key = (st.build.status, st.build.processed_records);
        if !force && st.last_reported == Some(key) {
            return None;
        }
        st.build.last_modified_date = Some(now);
        st.last_reported = Some(key);
        Some(st.build.clone())
    }

    /// Wait for in-flight work to drain (bounded by `destroy_timeout` when set), then move to
    /// `Destroyed` and report one final reconciliation. Repeated calls are no-ops.
    pub fn destroy(&self) {
        let report = {
            let mut st = self.status.lock();
            match st.lifecycle {
                Lifecycle::Destroyed => {
                    info!("{}: pipeline already destroyed", self.index_type);
                    return;
                }
                Lifecycle::Uninitialized => {
                    st.lifecycle = Lifecycle::Destroyed;
                    debug!("{}: destroyed before initialization", self.index_type);
                    return;
                }
                Lifecycle::Active => {}
            }
            let deadline = self.config.destroy_timeout.map(|t| Instant::now() + t);
            while self.busy_locked(&st) {
                if let Some(deadline) = deadline
                    && Instant::now() >= deadline
                {
                    warn!(
                        "{}: destroy gave up waiting after {:?}; work still in flight",
                        self.index_type, self.config.destroy_timeout
                    );
                    break;
                }
                st = self.status.wait_idle(st, self.config.drain_poll);
            }
            st.lifecycle = Lifecycle::Destroyed;
            self.reconcile_locked(&mut st, true)
        };
        if let Some(report) = report {
            self.reporter.submit(report);
        }
        info!("{}: pipeline destroyed", self.index_type);
    }

    /// Block until the current run is announced complete by [`Self::periodic_monitor`].
    pub fn wait_until_completed(&self, timeout: Duration) -> bool {
        self.status.wait_until_completed(timeout)
    }

    pub fn status(&self) -> &Arc<PipelineStatus> {
        &self.status
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.status.snapshot()
    }

    pub fn performance(&self) -> &Arc<PipelinePerformance> {
        &self.performance
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}

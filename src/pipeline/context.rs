//! Run-time state shared across the pipeline: the status tracker guarded by one lock, and the
//! cancellation token handed to the blocking publisher call.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::{BuildMode, IndexBuildStatus, IndexStatus, IndexType, Timestamp};

/// Pipeline lifecycle: `Uninitialized → Active → Destroyed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    Uninitialized,
    Active,
    Destroyed,
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Lifecycle::Uninitialized => "uninitialized",
            Lifecycle::Active => "active",
            Lifecycle::Destroyed => "destroyed",
        };
        f.write_str(s)
    }
}

/// Cooperative cancellation flag passed into blocking calls. Clones share the flag.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Counters captured when a run starts. Progress of the run is measured against these,
/// never against an earlier run's numbers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct RunBaseline {
    pub mode: BuildMode,
    pub total_at_start: u64,
    pub incoming_at_start: u64,
    pub completed_at_start: u64,
}

impl RunBaseline {
    /// Units of this run not yet settled (in flight or lost).
    pub fn outstanding(&self, incoming: u64, completed: u64) -> u64 {
        let run_incoming = incoming.saturating_sub(self.incoming_at_start);
        let run_completed = completed.saturating_sub(self.completed_at_start);
        run_incoming.saturating_sub(run_completed)
    }

    /// `total_at_start - outstanding`, measured over this run only.
    pub fn processed(&self, incoming: u64, completed: u64) -> u64 {
        self.total_at_start
            .saturating_sub(self.outstanding(incoming, completed))
    }
}

/// Everything guarded by the status lock.
#[derive(Debug)]
pub(crate) struct StatusState {
    pub lifecycle: Lifecycle,
    pub incoming: u64,
    pub completed: u64,
    pub latest_start: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    /// `start` calls currently pushing work into the first stage.
    pub dispatching: usize,
    /// Set while a run is in progress; cleared when the monitor sees it drain.
    pub run: Option<RunBaseline>,
    /// Number of runs announced complete. Waiters compare generations.
    pub runs_finished: u64,
    /// In-memory copy of the build status; the durable mirror lags behind it.
    pub build: IndexBuildStatus,
    /// Last (status, processed) handed to the updater, to skip identical writes.
    pub last_reported: Option<(IndexStatus, u64)>,
}

/// Read-only view of a pipeline's status, taken under the lock.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub lifecycle: Lifecycle,
    pub incoming: u64,
    pub completed: u64,
    pub latest_start: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub run_in_progress: bool,
    pub build: IndexBuildStatus,
}

/// Per-pipeline counters plus the mutex/condition pair used to detect quiescence.
///
/// The condition is notified when the monitor observes a run going from busy to idle,
/// and when the last in-flight `start` finishes dispatching.
#[derive(Debug)]
pub struct PipelineStatus {
    state: Mutex<StatusState>,
    idle: Condvar,
}

impl PipelineStatus {
    pub fn new(index_type: IndexType) -> Self {
        Self {
            state: Mutex::new(StatusState {
                lifecycle: Lifecycle::Uninitialized,
                incoming: 0,
                completed: 0,
                latest_start: None,
                completed_at: None,
                dispatching: 0,
                run: None,
                runs_finished: 0,
                build: IndexBuildStatus::new(index_type),
                last_reported: None,
            }),
            idle: Condvar::new(),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, StatusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait on the idle condition for at most `timeout`, returning the re-acquired guard.
    pub(crate) fn wait_idle<'a>(
        &self,
        guard: MutexGuard<'a, StatusState>,
        timeout: Duration,
    ) -> MutexGuard<'a, StatusState> {
        match self.idle.wait_timeout(guard, timeout) {
            Ok((guard, _)) => guard,
            Err(poisoned) => poisoned.into_inner().0,
        }
    }

    pub(crate) fn notify_idle(&self) {
        self.idle.notify_all();
    }

    /// Credit `n` finished units. Called by the final stage and by stages that settle dropped
    /// identifiers.
    pub fn add_completed(&self, n: u64) {
        if n == 0 {
            return;
        }
        let mut st = self.lock();
        st.completed += n;
        debug_assert!(
            st.completed <= st.incoming,
            "completed {} exceeds incoming {}",
            st.completed,
            st.incoming
        );
    }

    pub fn incoming(&self) -> u64 {
        self.lock().incoming
    }

    pub fn completed(&self) -> u64 {
        self.lock().completed
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let st = self.lock();
        StatusSnapshot {
            lifecycle: st.lifecycle,
            incoming: st.incoming,
            completed: st.completed,
            latest_start: st.latest_start,
            completed_at: st.completed_at,
            run_in_progress: st.run.is_some(),
            build: st.build.clone(),
        }
    }

    /// Block until the run in progress is announced complete by the monitor.
    /// Returns true immediately when no run is in progress; false on timeout.
    pub fn wait_until_completed(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut st = self.lock();
        if st.run.is_none() {
            return true;
        }
        let target = st.runs_finished + 1;
        while st.runs_finished < target {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            st = self.wait_idle(st, deadline - now);
        }
        true
    }
}

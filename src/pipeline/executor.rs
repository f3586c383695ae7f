//! Stage executors: run a task on the caller's thread, or on a stage-owned worker pool.

use crossbeam_channel::{Receiver, Sender, unbounded};
use log::{debug, error};
use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread;

use crate::errors::PipelineError;

/// One unit of stage work, already bound to its payload.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// How a stage dispatches its tasks. Parsed from configuration strings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutorKind {
    /// Run the task inside `send`, on the caller's thread.
    Synchronous,
    /// Queue the task onto the stage's own worker threads.
    Pool,
}

impl FromStr for ExecutorKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sync" | "synchronous" => Ok(ExecutorKind::Synchronous),
            "pool" | "threadpool" => Ok(ExecutorKind::Pool),
            _ => Err(PipelineError::UnknownExecutor(s.to_string())),
        }
    }
}

pub enum Executor {
    Synchronous,
    Pool(WorkerPool),
}

impl Executor {
    /// Build an executor of `kind`. `threads` is only used by pools (at least one worker).
    pub fn new(kind: ExecutorKind, name: &str, threads: usize) -> Result<Self, PipelineError> {
        match kind {
            ExecutorKind::Synchronous => Ok(Executor::Synchronous),
            ExecutorKind::Pool => Ok(Executor::Pool(WorkerPool::new(name, threads)?)),
        }
    }

    pub fn execute(&self, job: Job) {
        match self {
            Executor::Synchronous => job(),
            Executor::Pool(pool) => pool.submit(job),
        }
    }

    /// Queued or running work. Always false for the synchronous executor.
    pub fn is_busy(&self) -> bool {
        match self {
            Executor::Synchronous => false,
            Executor::Pool(pool) => pool.pending() > 0,
        }
    }
}

/// Fixed set of named worker threads draining one job queue.
///
/// `pending` is raised before a job is queued and lowered after it has run, so it covers both
/// queued and executing work. A panicking job is counted and the worker keeps serving.
/// Workers exit once the pool (the only sender) is dropped.
pub struct WorkerPool {
    name: String,
    tx: Sender<Job>,
    pending: Arc<AtomicUsize>,
    failed: Arc<AtomicU64>,
    threads: usize,
}

impl WorkerPool {
    pub fn new(name: &str, threads: usize) -> Result<Self, PipelineError> {
        let threads = threads.max(1);
        let (tx, rx) = unbounded::<Job>();
        let pending = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicU64::new(0));
        for i in 0..threads {
            let rx = rx.clone();
            let pending = Arc::clone(&pending);
            let failed = Arc::clone(&failed);
            let thread_name = format!("{name}-{i}");
            thread::Builder::new()
                .name(thread_name.clone())
                .spawn(move || worker_loop(rx, pending, failed))
                .map_err(|e| PipelineError::spawn(thread_name, e))?;
        }
        debug!("{name}: started {threads} worker(s)");
        Ok(Self {
            name: name.to_string(),
            tx,
            pending,
            failed,
            threads,
        })
    }

    pub fn submit(&self, job: Job) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(job).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            error!("{}: job queue closed; task dropped", self.name);
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Jobs that panicked since the pool started.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn threads(&self) -> usize {
        self.threads
    }
}

fn worker_loop(rx: Receiver<Job>, pending: Arc<AtomicUsize>, failed: Arc<AtomicU64>) {
    while let Ok(job) = rx.recv() {
        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            failed.fetch_add(1, Ordering::Relaxed);
        }
        pending.fetch_sub(1, Ordering::SeqCst);
    }
}

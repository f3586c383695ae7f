//! Background coalescing writer for build-status records.
//!
//! Pipelines submit snapshots at any rate; one worker drains the queue every poll interval,
//! keeps only the newest snapshot per index type, and for each one re-reads the durable record,
//! copies the progress fields over and saves it. This is the only path from the pipelines to
//! the persistence gateway.
//!
//! Snapshots are cumulative, so a full queue must never cost the newest one: it is parked in a
//! per-index-type overflow slot instead, and every entry carries a sequence number so the drain
//! can tell which of the two is fresher.

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded, select, tick};
use log::{debug, error, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use crate::errors::{PipelineError, StorageError};
use crate::interfaces::{BuildStatusSink, BuildStatusStore};
use crate::utils::config::UpdaterConfig;
use crate::{IndexBuildStatus, IndexType};

/// A submitted snapshot tagged with its submission order.
struct Queued {
    seq: u64,
    status: IndexBuildStatus,
}

type Overflow = Arc<Mutex<HashMap<IndexType, Queued>>>;

pub struct BuildStatusUpdater {
    tx: Sender<Queued>,
    overflow: Overflow,
    seq: AtomicU64,
    stop_tx: Sender<()>,
    done_rx: Receiver<()>,
    handle: Mutex<Option<JoinHandle<()>>>,
    accepting: AtomicBool,
    force_stop: Arc<AtomicBool>,
    config: UpdaterConfig,
}

impl BuildStatusUpdater {
    /// Start the worker thread.
    pub fn spawn(
        store: Arc<dyn BuildStatusStore>,
        config: UpdaterConfig,
    ) -> Result<Self, PipelineError> {
        let (tx, rx) = bounded::<Queued>(config.queue_capacity.max(1));
        let overflow = Overflow::default();
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let (done_tx, done_rx) = bounded::<()>(1);
        let force_stop = Arc::new(AtomicBool::new(false));
        let worker = StatusWorker {
            rx,
            overflow: Arc::clone(&overflow),
            stop_rx,
            done_tx,
            store,
            force_stop: Arc::clone(&force_stop),
            newest: HashMap::new(),
        };
        let interval = config.poll_interval;
        let handle = thread::Builder::new()
            .name("build-status-updater".to_string())
            .spawn(move || worker.run(interval))
            .map_err(|e| PipelineError::spawn("build-status-updater", e))?;
        Ok(Self {
            tx,
            overflow,
            seq: AtomicU64::new(0),
            stop_tx,
            done_rx,
            handle: Mutex::new(Some(handle)),
            accepting: AtomicBool::new(true),
            force_stop,
            config,
        })
    }

    /// Queue a snapshot. Never blocks. When the queue is full the snapshot replaces any older
    /// overflow entry for its index type; after shutdown it is dropped with a warning.
    pub fn enqueue(&self, status: IndexBuildStatus) {
        if !self.accepting.load(Ordering::SeqCst) {
            warn!(
                "build-status updater is shut down; update for {} dropped",
                status.index_type
            );
            return;
        }
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        match self.tx.try_send(Queued { seq, status }) {
            Ok(()) => {}
            Err(TrySendError::Full(queued)) => {
                debug!(
                    "build-status queue full; parking update for {}",
                    queued.status.index_type
                );
                let mut overflow = self.overflow.lock().unwrap_or_else(PoisonError::into_inner);
                let index_type = queued.status.index_type;
                if overflow.get(&index_type).is_none_or(|q| q.seq < queued.seq) {
                    overflow.insert(index_type, queued);
                }
            }
            Err(TrySendError::Disconnected(queued)) => warn!(
                "build-status worker gone; update for {} dropped",
                queued.status.index_type
            ),
        }
    }

    /// Stop polling, let the worker write what is queued, and wait for it up to the shutdown
    /// timeout. Past that, the worker is told to skip remaining writes and given a short grace
    /// period before being detached. Safe to call more than once.
    pub fn shutdown(&self) {
        let Some(handle) = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };
        self.accepting.store(false, Ordering::SeqCst);
        let _ = self.stop_tx.try_send(());

        if self.done_rx.recv_timeout(self.config.shutdown_timeout).is_err() {
            warn!(
                "build-status updater did not finish within {:?}; forcing stop",
                self.config.shutdown_timeout
            );
            self.force_stop.store(true, Ordering::SeqCst);
            if self.done_rx.recv_timeout(self.config.force_grace).is_err() {
                error!("build-status updater still running after forced stop; detaching it");
                return;
            }
        }
        if handle.join().is_err() {
            error!("build-status updater thread panicked");
        }
        debug!("build-status updater stopped");
    }
}

impl BuildStatusSink for BuildStatusUpdater {
    fn submit(&self, status: IndexBuildStatus) {
        self.enqueue(status);
    }
}

impl Drop for BuildStatusUpdater {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Collapse a drained batch to one entry per index type; later entries win.
pub fn coalesce<I>(updates: I) -> HashMap<IndexType, IndexBuildStatus>
where
    I: IntoIterator<Item = IndexBuildStatus>,
{
    let mut latest = HashMap::new();
    for update in updates {
        latest.insert(update.index_type, update);
    }
    latest
}

/// Re-read the durable record (or start a fresh one), copy the progress fields and save.
pub fn write_update(
    store: &dyn BuildStatusStore,
    update: &IndexBuildStatus,
) -> Result<(), StorageError> {
    let mut current = store
        .get(update.index_type)?
        .unwrap_or_else(|| IndexBuildStatus::new(update.index_type));
    current.apply_progress(update);
    store.save_or_update(&current)
}

struct StatusWorker {
    rx: Receiver<Queued>,
    overflow: Overflow,
    stop_rx: Receiver<()>,
    done_tx: Sender<()>,
    store: Arc<dyn BuildStatusStore>,
    force_stop: Arc<AtomicBool>,
    /// Sequence of the newest snapshot drained per index type.
    newest: HashMap<IndexType, u64>,
}

impl StatusWorker {
    fn run(mut self, interval: std::time::Duration) {
        let ticker = tick(interval);
        let stop_rx = self.stop_rx.clone();
        loop {
            select! {
                recv(ticker) -> _ => self.drain(),
                recv(stop_rx) -> _ => {
                    self.drain();
                    break;
                }
            }
        }
        let _ = self.done_tx.send(());
    }

    fn drain(&mut self) {
        let mut drained: Vec<Queued> = self.rx.try_iter().collect();
        drained.extend(
            std::mem::take(&mut *self.overflow.lock().unwrap_or_else(PoisonError::into_inner))
                .into_values(),
        );
        drained.sort_unstable_by_key(|q| q.seq);
        // A snapshot that lost a submission race to one already written is stale.
        drained.retain(|q| self.newest.get(&q.status.index_type).is_none_or(|&n| q.seq > n));
        for q in &drained {
            self.newest.insert(q.status.index_type, q.seq);
        }
        let batch = coalesce(drained.into_iter().map(|q| q.status));
        if batch.is_empty() {
            return;
        }
        debug!("build-status updater writing {} record(s)", batch.len());
        for (index_type, update) in batch {
            if self.force_stop.load(Ordering::SeqCst) {
                warn!("build-status updater stopped before writing {index_type}");
                break;
            }
            if let Err(e) = write_update(self.store.as_ref(), &update) {
                error!("failed to persist build status for {index_type}: {e}");
            }
        }
    }
}

//! Queued document publisher: a bounded in-memory queue in front of one flush worker that writes
//! documents to a [`DocumentSink`] in batches. Deletions travel through the same queue, so a
//! removal is never overtaken by an earlier write of the same document.

use anyhow::Context;
use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender, bounded};
use log::{debug, error, warn};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::errors::{PipelineError, PublishError};
use crate::interfaces::DocumentPublisher;
use crate::pipeline::CancelToken;
use crate::utils::config::PublisherConfig;
use crate::{BuildMode, Document, EntityId, IndexType};

/// Destination of flushed document batches (search engine, file, memory).
pub trait DocumentSink: Send + Sync {
    fn write_batch(&self, index_type: IndexType, documents: &[Document]) -> anyhow::Result<()>;

    /// Remove the documents for `ids` from the index.
    fn delete_batch(&self, index_type: IndexType, ids: &[EntityId]) -> anyhow::Result<()>;
}

/// Writes one JSON object per document and line: `{"index": ..., "id": ..., "fields": {...}}`.
/// A deletion is a tombstone line: `{"index": ..., "id": ..., "deleted": true}`.
pub struct JsonLinesSink {
    out: Mutex<BufWriter<File>>,
}

#[derive(Serialize)]
struct JsonLine<'a> {
    index: &'a str,
    #[serde(flatten)]
    document: &'a Document,
}

#[derive(Serialize)]
struct Tombstone<'a> {
    index: &'a str,
    id: EntityId,
    deleted: bool,
}

impl JsonLinesSink {
    /// A rebuild starts the file over; an update appends to what earlier runs wrote.
    pub fn open(path: &Path, mode: BuildMode) -> anyhow::Result<Self> {
        let file = match mode {
            BuildMode::Rebuild => File::create(path),
            BuildMode::Update => OpenOptions::new().create(true).append(true).open(path),
        }
        .with_context(|| format!("open {}", path.display()))?;
        Ok(Self {
            out: Mutex::new(BufWriter::new(file)),
        })
    }
}

impl DocumentSink for JsonLinesSink {
    fn write_batch(&self, index_type: IndexType, documents: &[Document]) -> anyhow::Result<()> {
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        for document in documents {
            let line = JsonLine {
                index: index_type.as_str(),
                document,
            };
            serde_json::to_writer(&mut *out, &line).context("serialize document")?;
            out.write_all(b"\n")?;
        }
        out.flush().context("flush document output")?;
        Ok(())
    }

    fn delete_batch(&self, index_type: IndexType, ids: &[EntityId]) -> anyhow::Result<()> {
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        for &id in ids {
            let line = Tombstone {
                index: index_type.as_str(),
                id,
                deleted: true,
            };
            serde_json::to_writer(&mut *out, &line).context("serialize tombstone")?;
            out.write_all(b"\n")?;
        }
        out.flush().context("flush document output")?;
        Ok(())
    }
}

/// Keeps every written document in memory. Used for dry runs and tests.
#[derive(Default)]
pub struct MemorySink {
    written: Mutex<Vec<(IndexType, Document)>>,
    deleted: Mutex<Vec<(IndexType, EntityId)>>,
    batches: AtomicUsize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn documents(&self) -> Vec<(IndexType, Document)> {
        self.written
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.written
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every deletion received, in order.
    pub fn deleted(&self) -> Vec<(IndexType, EntityId)> {
        self.deleted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of `write_batch` calls received.
    pub fn batches(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }
}

impl DocumentSink for MemorySink {
    fn write_batch(&self, index_type: IndexType, documents: &[Document]) -> anyhow::Result<()> {
        let mut written = self.written.lock().unwrap_or_else(PoisonError::into_inner);
        written.extend(documents.iter().cloned().map(|d| (index_type, d)));
        self.batches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn delete_batch(&self, index_type: IndexType, ids: &[EntityId]) -> anyhow::Result<()> {
        self.written
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(t, d)| *t != index_type || !ids.contains(&d.id));
        self.deleted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(ids.iter().map(|&id| (index_type, id)));
        Ok(())
    }
}

/// One unit on the publisher queue.
enum Op {
    Index(Document),
    Delete(Vec<EntityId>),
}

/// Publisher for one index type.
///
/// `enqueue` blocks while the queue is full, re-checking the caller's [`CancelToken`] every
/// `enqueue_poll`. The publisher counts a document (or a deletion request) as pending from the
/// moment it is accepted until it has been written (or failed), so `is_busy` covers both the queue
/// and the flush.
pub struct QueuedPublisher {
    index_type: IndexType,
    tx: Mutex<Option<Sender<Op>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    pending: Arc<AtomicUsize>,
    written: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
    deleted: Arc<AtomicU64>,
    enqueue_poll: Duration,
}

impl QueuedPublisher {
    pub fn spawn(
        index_type: IndexType,
        sink: Arc<dyn DocumentSink>,
        config: PublisherConfig,
    ) -> Result<Self, PipelineError> {
        let (tx, rx) = bounded::<Op>(config.queue_capacity.max(1));
        let pending = Arc::new(AtomicUsize::new(0));
        let written = Arc::new(AtomicU64::new(0));
        let failed = Arc::new(AtomicU64::new(0));
        let deleted = Arc::new(AtomicU64::new(0));
        let worker = FlushWorker {
            index_type,
            rx,
            sink,
            pending: Arc::clone(&pending),
            written: Arc::clone(&written),
            failed: Arc::clone(&failed),
            deleted: Arc::clone(&deleted),
            batch_size: config.batch_size.max(1),
            flush_interval: config.flush_interval,
        };
        let name = format!("{index_type}-publisher");
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || worker.run())
            .map_err(|e| PipelineError::spawn(name, e))?;
        Ok(Self {
            index_type,
            tx: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
            pending,
            written,
            failed,
            deleted,
            enqueue_poll: config.enqueue_poll,
        })
    }

    pub fn index_type(&self) -> IndexType {
        self.index_type
    }

    /// Documents accepted but not yet written.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn written(&self) -> u64 {
        self.written.load(Ordering::SeqCst)
    }

    /// Documents in batches the sink rejected.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::SeqCst)
    }

    /// Identifiers removed from the index.
    pub fn deleted(&self) -> u64 {
        self.deleted.load(Ordering::SeqCst)
    }

    /// Stop accepting documents, flush what is queued and join the worker. Idempotent.
    pub fn close(&self) {
        drop(self.tx.lock().unwrap_or_else(PoisonError::into_inner).take());
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            error!("{} publisher worker panicked", self.index_type);
        }
    }
}

impl QueuedPublisher {
    /// Put `op` on the queue, blocking while it is full and giving up once `cancel` is set.
    fn push(
        &self,
        index_type: IndexType,
        op: Op,
        cancel: &CancelToken,
    ) -> Result<(), PublishError> {
        if index_type != self.index_type {
            return Err(PublishError::WrongIndex {
                serves: self.index_type,
                requested: index_type,
            });
        }
        if cancel.is_cancelled() {
            return Err(PublishError::Interrupted(index_type));
        }
        let tx = self
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(PublishError::Closed(index_type))?;

        self.pending.fetch_add(1, Ordering::SeqCst);
        let mut op = op;
        loop {
            match tx.send_timeout(op, self.enqueue_poll) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(back)) => {
                    if cancel.is_cancelled() {
                        self.pending.fetch_sub(1, Ordering::SeqCst);
                        return Err(PublishError::Interrupted(index_type));
                    }
                    op = back;
                }
                Err(SendTimeoutError::Disconnected(_)) => {
                    self.pending.fetch_sub(1, Ordering::SeqCst);
                    return Err(PublishError::Closed(index_type));
                }
            }
        }
    }
}

impl DocumentPublisher for QueuedPublisher {
    fn enqueue(
        &self,
        index_type: IndexType,
        document: Document,
        cancel: &CancelToken,
    ) -> Result<(), PublishError> {
        self.push(index_type, Op::Index(document), cancel)
    }

    fn delete(
        &self,
        index_type: IndexType,
        ids: Vec<EntityId>,
        cancel: &CancelToken,
    ) -> Result<(), PublishError> {
        if ids.is_empty() {
            return Ok(());
        }
        self.push(index_type, Op::Delete(ids), cancel)
    }

    fn is_busy(&self, index_type: IndexType) -> bool {
        index_type == self.index_type && self.pending() > 0
    }
}

impl Drop for QueuedPublisher {
    fn drop(&mut self) {
        self.close();
    }
}

struct FlushWorker {
    index_type: IndexType,
    rx: Receiver<Op>,
    sink: Arc<dyn DocumentSink>,
    pending: Arc<AtomicUsize>,
    written: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
    deleted: Arc<AtomicU64>,
    batch_size: usize,
    flush_interval: Duration,
}

impl FlushWorker {
    fn run(self) {
        let mut batch: Vec<Document> = Vec::with_capacity(self.batch_size);
        let mut opened: Option<Instant> = None;
        loop {
            let wait = opened.map_or(self.flush_interval, |t| {
                self.flush_interval.saturating_sub(t.elapsed())
            });
            match self.rx.recv_timeout(wait) {
                Ok(Op::Index(document)) => {
                    batch.push(document);
                    opened.get_or_insert_with(Instant::now);
                    if batch.len() >= self.batch_size {
                        self.flush(&mut batch);
                        opened = None;
                    }
                }
                Ok(Op::Delete(ids)) => {
                    self.flush(&mut batch);
                    opened = None;
                    self.remove(&ids);
                }
                Err(RecvTimeoutError::Timeout) => {
                    self.flush(&mut batch);
                    opened = None;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.flush(&mut batch);
                    break;
                }
            }
        }
        debug!("{} publisher worker exiting", self.index_type);
    }

    fn flush(&self, batch: &mut Vec<Document>) {
        if batch.is_empty() {
            return;
        }
        let n = batch.len();
        match self.sink.write_batch(self.index_type, batch) {
            Ok(()) => {
                self.written.fetch_add(n as u64, Ordering::SeqCst);
            }
            Err(e) => {
                warn!(
                    "{} publisher: batch of {n} documents not written: {e:#}",
                    self.index_type
                );
                self.failed.fetch_add(n as u64, Ordering::SeqCst);
            }
        }
        batch.clear();
        self.pending.fetch_sub(n, Ordering::SeqCst);
    }

    fn remove(&self, ids: &[EntityId]) {
        match self.sink.delete_batch(self.index_type, ids) {
            Ok(()) => {
                self.deleted.fetch_add(ids.len() as u64, Ordering::SeqCst);
            }
            Err(e) => {
                warn!(
                    "{} publisher: {} deletion(s) not applied: {e:#}",
                    self.index_type,
                    ids.len()
                );
            }
        }
        self.pending.fetch_sub(1, Ordering::SeqCst);
    }
}

//! Named performance counters shared by every stage of one pipeline.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::context::PipelineStatus;

/// Counters incremented by stages. Monotonic within a pipeline's life.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Counter {
    GroupsCreated,
    IdentifiersFiltered,
    EntitiesLoaded,
    IdentifiersMissing,
    LoadFailures,
    DocumentsCreated,
    DocumentsQueued,
    DocumentsDropped,
    DocumentsDeleted,
    TaskFailures,
}

impl Counter {
    pub const ALL: [Counter; 10] = [
        Counter::GroupsCreated,
        Counter::IdentifiersFiltered,
        Counter::EntitiesLoaded,
        Counter::IdentifiersMissing,
        Counter::LoadFailures,
        Counter::DocumentsCreated,
        Counter::DocumentsQueued,
        Counter::DocumentsDropped,
        Counter::DocumentsDeleted,
        Counter::TaskFailures,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Counter::GroupsCreated => "groups_created",
            Counter::IdentifiersFiltered => "identifiers_filtered",
            Counter::EntitiesLoaded => "entities_loaded",
            Counter::IdentifiersMissing => "identifiers_missing",
            Counter::LoadFailures => "load_failures",
            Counter::DocumentsCreated => "documents_created",
            Counter::DocumentsQueued => "documents_queued",
            Counter::DocumentsDropped => "documents_dropped",
            Counter::DocumentsDeleted => "documents_deleted",
            Counter::TaskFailures => "task_failures",
        }
    }

    fn slot(&self) -> usize {
        *self as usize
    }
}

/// Lock-free counter table. Read-only from outside the pipeline.
#[derive(Debug, Default)]
pub struct PipelinePerformance {
    counters: [AtomicU64; Counter::ALL.len()],
}

impl PipelinePerformance {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add(&self, counter: Counter, n: u64) {
        self.counters[counter.slot()].fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.counters[counter.slot()].load(Ordering::Relaxed)
    }

    /// `(name, value)` for every counter, in declaration order.
    pub fn snapshot(&self) -> Vec<(&'static str, u64)> {
        Counter::ALL
            .iter()
            .map(|c| (c.name(), self.get(*c)))
            .collect()
    }
}

/// What a stage receives through `set_performance_sink`: the shared counters, and the path for
/// crediting identifiers that leave the pipeline without becoming a document.
#[derive(Clone, Debug)]
pub struct PerformanceSink {
    performance: Arc<PipelinePerformance>,
    status: Arc<PipelineStatus>,
}

impl PerformanceSink {
    pub fn new(performance: Arc<PipelinePerformance>, status: Arc<PipelineStatus>) -> Self {
        Self {
            performance,
            status,
        }
    }

    pub fn increment(&self, counter: Counter, n: u64) {
        if n > 0 {
            self.performance.add(counter, n);
        }
    }

    /// Mark `n` identifiers as finished (filtered out or gone) so completed keeps up with incoming.
    pub fn settle(&self, n: u64) {
        self.status.add_completed(n);
    }

    pub fn performance(&self) -> &Arc<PipelinePerformance> {
        &self.performance
    }
}

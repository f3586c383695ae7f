use log::{error, warn};
use std::sync::{Arc, OnceLock};

use crate::errors::PublishError;
use crate::interfaces::DocumentPublisher;
use crate::pipeline::{CancelToken, Counter, Inlet, PerformanceSink, Stage};
use crate::{Document, IndexType};

/// Hands documents to the search-engine publisher and forwards a count of one per accepted
/// document. Has no executor: it runs on the caller's thread and is the pipeline's only
/// backpressure point. Busyness is the publisher's own.
///
/// An interrupted enqueue drops only that document. The token belongs to the caller; this stage
/// reads it and never sets it.
pub struct PublishingStage {
    index_type: IndexType,
    publisher: Arc<dyn DocumentPublisher>,
    cancel: CancelToken,
    next: OnceLock<Arc<dyn Inlet<usize>>>,
    sink: OnceLock<PerformanceSink>,
}

impl PublishingStage {
    pub fn new(
        index_type: IndexType,
        publisher: Arc<dyn DocumentPublisher>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            index_type,
            publisher,
            cancel,
            next: OnceLock::new(),
            sink: OnceLock::new(),
        }
    }

    fn count(&self, counter: Counter) {
        if let Some(sink) = self.sink.get() {
            sink.increment(counter, 1);
        }
    }
}

impl Stage for PublishingStage {
    type Input = Document;
    type Output = usize;

    fn send(&self, document: Document) {
        let id = document.id;
        match self.publisher.enqueue(self.index_type, document, &self.cancel) {
            Ok(()) => {
                self.count(Counter::DocumentsQueued);
                match self.next.get() {
                    Some(next) => next.deliver(1),
                    None => error!("publishing: no next stage wired; count for {id} dropped"),
                }
            }
            Err(PublishError::Interrupted(_)) => {
                warn!(
                    "publishing: interrupted while queueing document {id} for {}; dropped",
                    self.index_type
                );
                self.count(Counter::DocumentsDropped);
            }
            Err(e) => {
                error!("publishing: document {id} dropped: {e}");
                self.count(Counter::DocumentsDropped);
            }
        }
    }

    fn set_next_stage(&self, next: Arc<dyn Inlet<usize>>) {
        let _ = self.next.set(next);
    }

    fn is_busy(&self) -> bool {
        self.publisher.is_busy(self.index_type)
    }

    fn set_performance_sink(&self, sink: PerformanceSink) {
        let _ = self.sink.set(sink);
    }
}

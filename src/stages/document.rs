use std::sync::Arc;

use crate::Document;
use crate::interfaces::DocumentBuilder;
use crate::pipeline::{
    Counter, Executor, Inlet, PerformanceSink, PipelineStage, Stage, TaskContext, TaskFactory,
};

/// Builds one document from one entity.
pub struct DocumentTask<E> {
    builder: Arc<dyn DocumentBuilder<E>>,
}

impl<E: Send + 'static> TaskFactory for DocumentTask<E> {
    type Input = E;
    type Output = Document;

    fn run(&self, entity: E, ctx: &TaskContext<Document>) {
        let document = self.builder.build(&entity);
        ctx.increment(Counter::DocumentsCreated, 1);
        ctx.forward(document);
    }
}

/// Receives the loader's entity batches and dispatches one task per entity, so every entity is
/// its own unit of work with exactly one forwarded document.
pub struct DocumentCreationStage<E: Send + 'static> {
    inner: PipelineStage<DocumentTask<E>>,
}

impl<E: Send + 'static> DocumentCreationStage<E> {
    pub fn new(builder: Arc<dyn DocumentBuilder<E>>, executor: Executor) -> Self {
        Self {
            inner: PipelineStage::new("document", DocumentTask { builder }, executor),
        }
    }
}

impl<E: Send + 'static> Stage for DocumentCreationStage<E> {
    type Input = Vec<E>;
    type Output = Document;

    fn send(&self, batch: Vec<E>) {
        for entity in batch {
            self.inner.send(entity);
        }
    }

    fn set_next_stage(&self, next: Arc<dyn Inlet<Document>>) {
        self.inner.set_next_stage(next);
    }

    fn is_busy(&self) -> bool {
        self.inner.is_busy()
    }

    fn set_performance_sink(&self, sink: PerformanceSink) {
        self.inner.set_performance_sink(sink);
    }
}

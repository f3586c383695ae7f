use std::sync::Arc;

use crate::EntityId;
use crate::interfaces::IdentifierFilter;
use crate::pipeline::{Counter, Executor, PipelineStage, TaskContext, TaskFactory};

/// Drops identifiers that do not need (re-)indexing. Dropped identifiers are settled here, and a
/// group left empty is not forwarded.
pub struct FilteringTask {
    filter: Arc<dyn IdentifierFilter>,
}

pub type FilteringStage = PipelineStage<FilteringTask>;

impl FilteringTask {
    pub fn new(filter: Arc<dyn IdentifierFilter>) -> Self {
        Self { filter }
    }

    pub fn stage(filter: Arc<dyn IdentifierFilter>, executor: Executor) -> FilteringStage {
        PipelineStage::new("filtering", Self::new(filter), executor)
    }
}

impl TaskFactory for FilteringTask {
    type Input = Vec<EntityId>;
    type Output = Vec<EntityId>;

    fn run(&self, group: Vec<EntityId>, ctx: &TaskContext<Vec<EntityId>>) {
        let before = group.len();
        let kept: Vec<EntityId> = group
            .into_iter()
            .filter(|id| self.filter.needs_indexing(*id))
            .collect();
        let removed = (before - kept.len()) as u64;
        if removed > 0 {
            ctx.increment(Counter::IdentifiersFiltered, removed);
            ctx.settle(removed);
        }
        if kept.is_empty() {
            return;
        }
        ctx.forward(kept);
    }
}

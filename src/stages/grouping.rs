use log::debug;

use crate::EntityId;
use crate::pipeline::{Counter, Executor, PipelineStage, TaskContext, TaskFactory};

/// Splits one identifier batch into groups of at most `group_size`, each forwarded on its own.
pub struct GroupingTask {
    group_size: usize,
}

pub type GroupingStage = PipelineStage<GroupingTask>;

impl GroupingTask {
    pub fn new(group_size: usize) -> Self {
        Self {
            group_size: group_size.max(1),
        }
    }

    pub fn stage(group_size: usize, executor: Executor) -> GroupingStage {
        PipelineStage::new("grouping", Self::new(group_size), executor)
    }

    pub fn group_size(&self) -> usize {
        self.group_size
    }
}

impl TaskFactory for GroupingTask {
    type Input = Vec<EntityId>;
    type Output = Vec<EntityId>;

    fn run(&self, batch: Vec<EntityId>, ctx: &TaskContext<Vec<EntityId>>) {
        if batch.is_empty() {
            debug!("{}: empty batch, nothing to group", ctx.stage_name());
            return;
        }
        for group in batch.chunks(self.group_size) {
            ctx.increment(Counter::GroupsCreated, 1);
            ctx.forward(group.to_vec());
        }
    }
}

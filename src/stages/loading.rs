use log::{error, warn};
use std::collections::HashSet;
use std::sync::Arc;

use crate::interfaces::{DocumentPublisher, Entity, EntityLoader};
use crate::pipeline::{CancelToken, Counter, Executor, PipelineStage, TaskContext, TaskFactory};
use crate::{EntityId, IndexType};

/// Where identifiers that no longer load are removed from the index.
struct Removal {
    index_type: IndexType,
    publisher: Arc<dyn DocumentPublisher>,
    cancel: CancelToken,
}

/// Resolves an identifier group into one batch of loaded entities.
///
/// Identifiers the loader omits (deleted since selection) are settled as done, after their
/// documents are queued for removal when a publisher is attached. A loader error loses the whole
/// group: it is logged and counted, never retried.
pub struct LoadingTask<E> {
    loader: Arc<dyn EntityLoader<E>>,
    removal: Option<Removal>,
}

pub type LoadingStage<E> = PipelineStage<LoadingTask<E>>;

impl<E: Entity + Send + 'static> LoadingTask<E> {
    pub fn new(loader: Arc<dyn EntityLoader<E>>) -> Self {
        Self {
            loader,
            removal: None,
        }
    }

    /// Remove documents of missing identifiers through `publisher`.
    pub fn with_removal(
        mut self,
        index_type: IndexType,
        publisher: Arc<dyn DocumentPublisher>,
        cancel: CancelToken,
    ) -> Self {
        self.removal = Some(Removal {
            index_type,
            publisher,
            cancel,
        });
        self
    }

    pub fn stage(self, executor: Executor) -> LoadingStage<E> {
        PipelineStage::new("loading", self, executor)
    }

    fn remove_missing(&self, group: &[EntityId], entities: &[E], ctx: &TaskContext<Vec<E>>) {
        let Some(removal) = &self.removal else {
            return;
        };
        let loaded: HashSet<EntityId> = entities.iter().map(Entity::entity_id).collect();
        let mut seen = HashSet::new();
        let missing: Vec<EntityId> = group
            .iter()
            .copied()
            .filter(|id| !loaded.contains(id) && seen.insert(*id))
            .collect();
        if missing.is_empty() {
            return;
        }
        let n = missing.len() as u64;
        match removal
            .publisher
            .delete(removal.index_type, missing, &removal.cancel)
        {
            Ok(()) => ctx.increment(Counter::DocumentsDeleted, n),
            Err(e) => warn!(
                "{}: {n} missing identifier(s) not removed from {}: {e}",
                ctx.stage_name(),
                removal.index_type
            ),
        }
    }
}

impl<E: Entity + Send + 'static> TaskFactory for LoadingTask<E> {
    type Input = Vec<EntityId>;
    type Output = Vec<E>;

    fn run(&self, group: Vec<EntityId>, ctx: &TaskContext<Vec<E>>) {
        match self.loader.load(&group) {
            Ok(entities) => {
                let missing = group.len().saturating_sub(entities.len()) as u64;
                if missing > 0 {
                    ctx.increment(Counter::IdentifiersMissing, missing);
                    self.remove_missing(&group, &entities, ctx);
                    ctx.settle(missing);
                }
                ctx.increment(Counter::EntitiesLoaded, entities.len() as u64);
                if !entities.is_empty() {
                    ctx.forward(entities);
                }
            }
            Err(e) => {
                error!(
                    "{}: failed to load group of {} identifier(s) starting at {:?}: {:#}",
                    ctx.stage_name(),
                    group.len(),
                    group.first(),
                    e
                );
                ctx.increment(Counter::LoadFailures, group.len() as u64);
            }
        }
    }
}

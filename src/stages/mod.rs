//! Concrete pipeline stages and the standard chain assembled from them.

pub mod document;
pub mod filtering;
pub mod final_stage;
pub mod grouping;
pub mod loading;
pub mod publishing;

pub use document::{DocumentCreationStage, DocumentTask};
pub use filtering::{FilteringStage, FilteringTask};
pub use final_stage::FinalStage;
pub use grouping::{GroupingStage, GroupingTask};
pub use loading::{LoadingStage, LoadingTask};
pub use publishing::PublishingStage;

use std::sync::Arc;

use crate::errors::PipelineError;
use crate::interfaces::{DocumentBuilder, DocumentPublisher, Entity, EntityLoader, IdentifierFilter};
use crate::pipeline::{CancelToken, StageChain};
use crate::utils::config::{PipelineConfig, WorkerThreadLimits};
use crate::{EntityId, IndexType};

/// External collaborators one pipeline instance is built around.
pub struct Collaborators<E> {
    pub filter: Arc<dyn IdentifierFilter>,
    pub loader: Arc<dyn EntityLoader<E>>,
    pub builder: Arc<dyn DocumentBuilder<E>>,
    pub publisher: Arc<dyn DocumentPublisher>,
    /// Token the publishing and loading stages check while blocked on the publisher's queue.
    pub cancel: CancelToken,
}

/// grouping → filtering → loading → document creation → publishing, with executors taken from
/// `config`. Identifiers the loader no longer finds are removed through the same publisher.
/// Fails on an unknown executor kind or when a worker thread cannot be spawned.
pub fn standard_chain<E: Entity + Send + 'static>(
    index_type: IndexType,
    config: &PipelineConfig,
    collaborators: Collaborators<E>,
) -> Result<StageChain<Vec<EntityId>, usize>, PipelineError> {
    let limits = WorkerThreadLimits::current();
    let prefix = index_type.as_str();

    let grouping = GroupingTask::stage(
        config.group_size,
        config
            .grouping
            .build_executor(&format!("{prefix}-grouping"), limits.light)?,
    );
    let filtering = FilteringTask::stage(
        collaborators.filter,
        config
            .filtering
            .build_executor(&format!("{prefix}-filtering"), limits.light)?,
    );
    let loading_executor = config
        .loading
        .build_executor(&format!("{prefix}-loading"), limits.heavy())?;
    let loading = LoadingTask::new(collaborators.loader)
        .with_removal(
            index_type,
            Arc::clone(&collaborators.publisher),
            collaborators.cancel.clone(),
        )
        .stage(loading_executor);
    let document = DocumentCreationStage::new(
        collaborators.builder,
        config
            .document
            .build_executor(&format!("{prefix}-document"), limits.heavy())?,
    );
    let publishing =
        PublishingStage::new(index_type, collaborators.publisher, collaborators.cancel);

    Ok(StageChain::new()
        .then(Arc::new(grouping))
        .then(Arc::new(filtering))
        .then(Arc::new(loading))
        .then(Arc::new(document))
        .then(Arc::new(publishing)))
}

//! Collaborator contracts consumed by the pipeline.
//!
//! The pipeline only talks to the outside world through these traits: build-status persistence,
//! entity loading, document building, document publishing and removal, time, and the
//! "needs indexing" predicate.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::errors::{PublishError, StorageError};
use crate::pipeline::CancelToken;
use crate::{Document, EntityId, IndexBuildStatus, IndexType, Timestamp};

/// Persistence gateway for build-status records. Only the build-status updater calls it.
pub trait BuildStatusStore: Send + Sync {
    fn get(&self, index_type: IndexType) -> Result<Option<IndexBuildStatus>, StorageError>;
    fn save_or_update(&self, status: &IndexBuildStatus) -> Result<(), StorageError>;
}

/// Resolves identifier groups to domain records. Identifiers that no longer exist are omitted
/// from the result; an `Err` means the whole group could not be loaded.
pub trait EntityLoader<E>: Send + Sync {
    fn load(&self, ids: &[EntityId]) -> anyhow::Result<Vec<E>>;
}

/// A loaded entity knows the identifier it was loaded for. The loading stage uses it to tell
/// which identifiers of a group came back missing.
pub trait Entity {
    fn entity_id(&self) -> EntityId;
}

/// Pipelines over bare identifiers: the id is the entity.
impl Entity for EntityId {
    fn entity_id(&self) -> EntityId {
        *self
    }
}

/// Maps one loaded entity to a search document.
pub trait DocumentBuilder<E>: Send + Sync {
    fn build(&self, entity: &E) -> Document;
}

/// Search-engine side: accepts documents for an index, batching them internally.
pub trait DocumentPublisher: Send + Sync {
    /// Hand a document over. May block while the publisher's queue is full; a cancelled `cancel`
    /// aborts the wait with [`PublishError::Interrupted`].
    fn enqueue(
        &self,
        index_type: IndexType,
        document: Document,
        cancel: &CancelToken,
    ) -> Result<(), PublishError>;

    /// Remove the documents for `ids` from the index. Queued behind documents already accepted;
    /// blocks and is interrupted like [`Self::enqueue`].
    fn delete(
        &self,
        index_type: IndexType,
        ids: Vec<EntityId>,
        cancel: &CancelToken,
    ) -> Result<(), PublishError>;

    /// True while documents for `index_type` are queued or being written.
    fn is_busy(&self, index_type: IndexType) -> bool;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall clock, milliseconds since the Unix epoch.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as Timestamp)
            .unwrap_or(0)
    }
}

/// Decides whether an identifier still needs (re-)indexing.
pub trait IdentifierFilter: Send + Sync {
    fn needs_indexing(&self, id: EntityId) -> bool;
}

impl<F> IdentifierFilter for F
where
    F: Fn(EntityId) -> bool + Send + Sync,
{
    fn needs_indexing(&self, id: EntityId) -> bool {
        self(id)
    }
}

/// Filter that keeps every identifier.
#[derive(Clone, Copy, Debug, Default)]
pub struct AcceptAll;

impl IdentifierFilter for AcceptAll {
    fn needs_indexing(&self, _id: EntityId) -> bool {
        true
    }
}

/// Receives build-status snapshots produced by a pipeline. Must not block: the pipeline calls it
/// right after releasing its status lock. Implemented by the build-status updater.
pub trait BuildStatusSink: Send + Sync {
    fn submit(&self, status: IndexBuildStatus);
}

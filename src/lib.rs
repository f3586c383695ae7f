//! Indexflow: concurrent document-indexing pipeline with durable build status.
//!
//! One [`IndexingPipeline`] per index type pushes identifier batches through
//! grouping → filtering → loading → document creation → publishing on worker pools,
//! counts what enters and what completes, and reports progress to a
//! [`BuildStatusUpdater`] that coalesces snapshots into the build-status store.

pub mod engine;
pub mod errors;
pub mod interfaces;
pub mod pipeline;
pub mod stages;
pub mod types;
pub mod utils;

/// Re-export types for API
pub use types::*;

pub use engine::{BuildStatusUpdater, QueuedPublisher, SqliteBuildStatusStore};
pub use errors::{PipelineError, PublishError, StorageError};
pub use interfaces::{
    AcceptAll, BuildStatusSink, BuildStatusStore, Clock, DocumentBuilder, DocumentPublisher,
    Entity, EntityLoader, IdentifierFilter, SystemClock,
};
pub use pipeline::{CancelToken, IndexingPipeline, Lifecycle, StageChain};
pub use stages::{Collaborators, standard_chain};
pub use utils::config::{PipelineConfig, PublisherConfig, Settings, StageConfig, UpdaterConfig};

/// Result alias used by the binary and configuration loading
pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, Error>;

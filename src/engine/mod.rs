//! Engine: persistence, the build-status updater, the queued publisher, file-backed
//! collaborators and the CLI around the pipeline.

pub mod arg_parser;
pub mod catalog;
pub mod cli;
pub mod db_ops;
pub mod progress;
pub mod publisher;
pub mod status_updater;

// Re-export commonly used items
pub use arg_parser::Cli;
pub use catalog::{
    CatalogDocumentBuilder, CatalogLoader, CatalogRecord, JsonCatalog, ModifiedSinceFilter,
    modified_after,
};
pub use cli::handle_run;
pub use db_ops::{SqliteBuildStatusStore, open_db, open_db_in_memory};
pub use publisher::{DocumentSink, JsonLinesSink, MemorySink, QueuedPublisher};
pub use status_updater::{BuildStatusUpdater, coalesce, write_update};

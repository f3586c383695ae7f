//! Pipeline core: stage abstraction, executors, run status, counters, orchestrator.

pub mod context;
pub mod error_handler;
pub mod executor;
pub mod orchestrator;
pub mod performance;
pub mod stage;

pub use context::{CancelToken, Lifecycle, PipelineStatus, StatusSnapshot};
pub use error_handler::run_guarded;
pub use executor::{Executor, ExecutorKind, Job, WorkerPool};
pub use orchestrator::IndexingPipeline;
pub use performance::{Counter, PerformanceSink, PipelinePerformance};
pub use stage::{Inlet, PipelineStage, Stage, StageChain, TaskContext, TaskFactory, WiredChain};

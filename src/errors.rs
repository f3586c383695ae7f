//! Error types for the pipeline, the publisher contract and the build-status store.

use thiserror::Error;

use crate::IndexType;
use crate::pipeline::Lifecycle;

/// Configuration and usage errors. Fatal: raised immediately, never retried.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pipeline has no stages configured")]
    NoStages,

    #[error("unknown executor kind '{0}' (expected 'sync' or 'pool')")]
    UnknownExecutor(String),

    #[error("pipeline for {index_type} is {state}; work rejected")]
    NotActive {
        index_type: IndexType,
        state: Lifecycle,
    },

    #[error("pipeline for {0} was cancelled; work rejected")]
    Cancelled(IndexType),

    #[error("pipeline for {0} was already initialized")]
    AlreadyInitialized(IndexType),

    #[error("failed to spawn worker thread for {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    pub fn spawn(name: impl Into<String>, source: std::io::Error) -> Self {
        Self::Spawn {
            name: name.into(),
            source,
        }
    }
}

/// Why a document was not accepted by a publisher.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PublishError {
    /// Cancelled while blocked waiting for room in the publisher's queue.
    #[error("interrupted while waiting for the {0} publisher queue")]
    Interrupted(IndexType),

    #[error("publisher for {0} is closed")]
    Closed(IndexType),

    #[error("publisher serves {serves}, not {requested}")]
    WrongIndex {
        serves: IndexType,
        requested: IndexType,
    },
}

/// Persistence gateway failure.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("corrupt build status for {index_type}: {message}")]
    Corrupt {
        index_type: String,
        message: String,
    },

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    pub fn corrupt(index_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Corrupt {
            index_type: index_type.into(),
            message: message.into(),
        }
    }
}

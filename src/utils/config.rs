//! Application configuration: tuning constants in one place, plus the runtime settings structs
//! the pipeline, the build-status updater and the publisher are built from.

use std::sync::OnceLock;
use std::time::Duration;

use crate::errors::PipelineError;
use crate::pipeline::{Executor, ExecutorKind};

// ---- Package / paths (from CARGO_PKG_NAME, cached) ----

/// Package-derived file names: built once from `CARGO_PKG_NAME`, then cached.
pub struct PackagePaths {
    pkg_name: &'static str,
    db_filename: String,
    config_filename: String,
    env_db_key: String,
}

static PACKAGE_PATHS: OnceLock<PackagePaths> = OnceLock::new();

impl PackagePaths {
    pub fn get() -> &'static PackagePaths {
        PACKAGE_PATHS.get_or_init(|| {
            let pkg = env!("CARGO_PKG_NAME");
            PackagePaths {
                pkg_name: pkg,
                db_filename: format!(".{pkg}.db"),
                config_filename: format!(".{pkg}.toml"),
                env_db_key: format!("{}_DB", pkg.to_uppercase()),
            }
        })
    }

    pub fn pkg_name(&self) -> &str {
        self.pkg_name
    }

    /// Default build-status database file name.
    pub fn db_filename(&self) -> &str {
        &self.db_filename
    }

    pub fn config_filename(&self) -> &str {
        &self.config_filename
    }

    /// Environment variable (or `.env` key) overriding the database path.
    pub fn env_db_key(&self) -> &str {
        &self.env_db_key
    }
}

// ---- Worker threads ----

/// Thread limits for stage pools.
#[derive(Clone, Copy, Debug)]
pub struct WorkerThreadLimits {
    /// Available threads (from rayon); set by [`WorkerThreadLimits::current()`].
    pub all_threads: usize,
    /// Workers for the light stages (grouping, filtering).
    pub light: usize,
    /// Cap for the heavy stages (loading, document creation).
    pub heavy_max: usize,
}

impl WorkerThreadLimits {
    pub const LIGHT_THREADS: usize = 1;
    pub const HEAVY_MAX_THREADS: usize = 16;

    /// Build limits with `all_threads` set from `rayon::current_num_threads()`.
    pub fn current() -> Self {
        Self {
            all_threads: rayon::current_num_threads(),
            light: Self::LIGHT_THREADS,
            heavy_max: Self::HEAVY_MAX_THREADS,
        }
    }

    pub fn heavy(&self) -> usize {
        self.all_threads.clamp(1, self.heavy_max)
    }
}

// ---- Pipeline ----

pub struct PipelineConsts;

impl PipelineConsts {
    /// Identifiers per group handed to the loader (bulk fetch size).
    pub const GROUP_SIZE: usize = 100;
    /// How often `destroy` re-checks busyness while waiting for the drain.
    pub const DRAIN_POLL: Duration = Duration::from_millis(25);
    /// Recommended cadence for the external monitor.
    pub const MONITOR_INTERVAL: Duration = Duration::from_secs(2);
    /// Identifiers per `start` call when the CLI submits a large selection.
    pub const SUBMIT_PAGE_SIZE: usize = 10_000;
}

// ---- Build-status updater ----

pub struct UpdaterConsts;

impl UpdaterConsts {
    pub const POLL_INTERVAL: Duration = Duration::from_millis(500);
    pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
    /// Extra wait after a forced stop before the worker is detached.
    pub const FORCE_GRACE: Duration = Duration::from_millis(500);
    pub const QUEUE_CAPACITY: usize = 1024;
}

// ---- Publisher ----

pub struct PublisherConsts;

impl PublisherConsts {
    pub const QUEUE_CAPACITY: usize = 1000;
    pub const BATCH_SIZE: usize = 200;
    pub const FLUSH_INTERVAL: Duration = Duration::from_millis(100);
    /// Granularity of the cancellation check while blocked on a full queue.
    pub const ENQUEUE_POLL: Duration = Duration::from_millis(50);
}

// ---- Runtime settings ----

/// Executor selection for one stage. `executor` stays a string until the stage is built so an
/// unknown kind surfaces as [`PipelineError::UnknownExecutor`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StageConfig {
    pub executor: String,
    /// Pool width. `None` uses the stage's default.
    pub threads: Option<usize>,
}

impl StageConfig {
    pub fn pool(threads: usize) -> Self {
        Self {
            executor: "pool".to_string(),
            threads: Some(threads),
        }
    }

    pub fn sync() -> Self {
        Self {
            executor: "sync".to_string(),
            threads: None,
        }
    }

    pub fn build_executor(
        &self,
        name: &str,
        default_threads: usize,
    ) -> Result<Executor, PipelineError> {
        let kind: ExecutorKind = self.executor.parse()?;
        Executor::new(kind, name, self.threads.unwrap_or(default_threads))
    }
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub group_size: usize,
    /// Upper bound on how long `destroy` waits for in-flight work. `None` waits for the drain.
    pub destroy_timeout: Option<Duration>,
    pub drain_poll: Duration,
    pub monitor_interval: Duration,
    pub submit_page_size: usize,
    pub grouping: StageConfig,
    pub filtering: StageConfig,
    pub loading: StageConfig,
    pub document: StageConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let limits = WorkerThreadLimits::current();
        Self {
            group_size: PipelineConsts::GROUP_SIZE,
            destroy_timeout: None,
            drain_poll: PipelineConsts::DRAIN_POLL,
            monitor_interval: PipelineConsts::MONITOR_INTERVAL,
            submit_page_size: PipelineConsts::SUBMIT_PAGE_SIZE,
            grouping: StageConfig::pool(limits.light),
            filtering: StageConfig::pool(limits.light),
            loading: StageConfig::pool(limits.heavy()),
            document: StageConfig::pool(limits.heavy()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct UpdaterConfig {
    pub poll_interval: Duration,
    pub shutdown_timeout: Duration,
    pub force_grace: Duration,
    pub queue_capacity: usize,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            poll_interval: UpdaterConsts::POLL_INTERVAL,
            shutdown_timeout: UpdaterConsts::SHUTDOWN_TIMEOUT,
            force_grace: UpdaterConsts::FORCE_GRACE,
            queue_capacity: UpdaterConsts::QUEUE_CAPACITY,
        }
    }
}

#[derive(Clone, Debug)]
pub struct PublisherConfig {
    pub queue_capacity: usize,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub enqueue_poll: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: PublisherConsts::QUEUE_CAPACITY,
            batch_size: PublisherConsts::BATCH_SIZE,
            flush_interval: PublisherConsts::FLUSH_INTERVAL,
            enqueue_poll: PublisherConsts::ENQUEUE_POLL,
        }
    }
}

/// All runtime settings, as layered by the CLI.
#[derive(Clone, Debug, Default)]
pub struct Settings {
    pub pipeline: PipelineConfig,
    pub updater: UpdaterConfig,
    pub publisher: PublisherConfig,
}

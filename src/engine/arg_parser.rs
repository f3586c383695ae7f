use clap::Parser;
use std::path::PathBuf;

use crate::IndexType;
use crate::utils::config::PackagePaths;

struct DefaultArgs;

impl DefaultArgs {
    pub const INDEX_TYPE: &'static str = "product";
}

/// Concurrent document indexer with durable build status.
#[derive(Clone, Parser)]
#[command(name = "indexflow")]
#[command(
    about = "Index a JSON-lines catalog into search documents; tracks build status in SQLite."
)]
pub struct Cli {
    /// JSON-lines catalog to index (one object per line with an `id`).
    #[arg(long, short = 'c', value_name = "FILE", required_unless_present = "show_status")]
    pub catalog: Option<PathBuf>,

    /// Build-status database. Default: INDEXFLOW_DB (env or .env), else `.indexflow.db`.
    #[arg(long, short)]
    pub db: Option<PathBuf>,

    /// Write documents as JSON lines to this file. Update runs append to it; --rebuild starts it
    /// over. Without it documents are built but discarded.
    #[arg(long, short)]
    pub out: Option<PathBuf>,

    /// Index type to build.
    #[arg(
        long,
        short = 't',
        default_value = DefaultArgs::INDEX_TYPE,
        value_parser = clap::value_parser!(IndexType)
    )]
    pub index_type: IndexType,

    /// Rebuild everything instead of only records modified since the last build.
    #[arg(long, short = 'r')]
    pub rebuild: bool,

    /// Config file. Default: `.indexflow.toml` in the working directory.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Identifiers per loader call.
    #[arg(long, short = 'g')]
    pub group_size: Option<usize>,

    /// Worker threads for the loading and document stages.
    #[arg(long, short = 'j')]
    pub threads: Option<usize>,

    /// Give up waiting for in-flight work at shutdown after this many seconds.
    #[arg(long, value_name = "SECS")]
    pub destroy_timeout: Option<u64>,

    /// Print stored build statuses and exit.
    #[arg(long)]
    pub show_status: bool,

    /// Verbose output.
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

impl Cli {
    /// Database path from the flag, else `default`, else the package db file name.
    pub fn db_path(&self, default: Option<PathBuf>) -> PathBuf {
        self.db
            .clone()
            .or(default)
            .unwrap_or_else(|| PathBuf::from(PackagePaths::get().db_filename()))
    }
}

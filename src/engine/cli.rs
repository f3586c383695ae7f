//! CLI command handler: index a catalog by default; --show-status lists stored build statuses.

use anyhow::{Context, Result};
use crossbeam_channel::tick;
use kdam::Animation;
use log::{debug, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::engine::arg_parser::Cli;
use crate::engine::catalog::{
    CatalogDocumentBuilder, CatalogLoader, CatalogRecord, JsonCatalog, ModifiedSinceFilter,
};
use crate::engine::db_ops::SqliteBuildStatusStore;
use crate::engine::progress::{ProgressBarConfig, create_progress_bar, finish_bar, show_snapshot};
use crate::engine::publisher::{DocumentSink, JsonLinesSink, MemorySink, QueuedPublisher};
use crate::engine::status_updater::BuildStatusUpdater;
use crate::errors::PipelineError;
use crate::interfaces::{BuildStatusStore, SystemClock};
use crate::pipeline::{CancelToken, Counter, IndexingPipeline};
use crate::stages::{Collaborators, standard_chain};
use crate::utils::config::{PackagePaths, Settings};
use crate::utils::indexflow_toml::{apply_file_to_settings, config_path, load_indexflow_toml};
use crate::utils::{Colors, setup_logging};
use crate::{BuildMode, IndexBuildStatus};

/// Database path from the environment: INDEXFLOW_DB, then the same key in `.env`.
fn env_db_path() -> Option<PathBuf> {
    let key = PackagePaths::get().env_db_key();
    if std::env::var(key).is_err() {
        let _ = dotenvy::dotenv();
    }
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
}

/// Layer settings: defaults, then the config file, then CLI flags.
/// Returns (settings, verbose, file db path).
fn setup_settings(cli: &Cli) -> (Settings, bool, Option<PathBuf>) {
    let mut settings = Settings::default();
    let mut verbose = cli.verbose;
    let mut file_db = None;
    let path = config_path(cli.config.as_deref());
    if let Some(file) = load_indexflow_toml(&path) {
        apply_file_to_settings(&file, &mut settings);
        verbose |= file.settings.verbose.unwrap_or(false);
        file_db = file.settings.db_path.as_ref().map(PathBuf::from);
    }

    let pipeline = &mut settings.pipeline;
    if let Some(n) = cli.group_size {
        pipeline.group_size = n;
    }
    if let Some(n) = cli.threads {
        pipeline.loading.threads = Some(n);
        pipeline.document.threads = Some(n);
    }
    if let Some(secs) = cli.destroy_timeout {
        pipeline.destroy_timeout = Some(Duration::from_secs(secs));
    }
    (settings, verbose, file_db)
}

/// Run an index build (default) or print stored statuses when --show-status.
pub fn handle_run(cli: &Cli) -> Result<()> {
    let (settings, verbose, file_db) = setup_settings(cli);
    setup_logging(verbose);
    if let Some(ref path) = cli.config
        && !path.is_file()
    {
        warn!("config file {} not found; using defaults", path.display());
    }
    debug!("{} CONFIG: {:#?}", PackagePaths::get().pkg_name().to_uppercase(), settings);

    let db_path = cli.db_path(env_db_path().or(file_db));
    let store = Arc::new(
        SqliteBuildStatusStore::open(&db_path)
            .with_context(|| format!("open build-status db {}", db_path.display()))?,
    );
    if cli.show_status {
        return print_statuses(&store.list()?);
    }
    let catalog_path = cli
        .catalog
        .as_deref()
        .context("--catalog is required to build an index")?;
    let catalog = Arc::new(JsonCatalog::load(catalog_path)?);
    run_build(cli, &settings, store, catalog)
}

fn run_build(
    cli: &Cli,
    settings: &Settings,
    store: Arc<SqliteBuildStatusStore>,
    catalog: Arc<JsonCatalog>,
) -> Result<()> {
    let index_type = cli.index_type;
    let mode = if cli.rebuild {
        BuildMode::Rebuild
    } else {
        BuildMode::Update
    };
    let since = match mode {
        BuildMode::Update => store.get(index_type)?.and_then(|s| s.last_build_date),
        BuildMode::Rebuild => None,
    };
    if let Some(since) = since {
        info!("{index_type}: indexing records modified after {since}");
    }

    let cancel = CancelToken::new();
    let cancel_handler = cancel.clone();
    ctrlc::set_handler(move || cancel_handler.cancel()).context("set Ctrl+C handler")?;

    let store_dyn: Arc<dyn BuildStatusStore> = store;
    let updater = Arc::new(BuildStatusUpdater::spawn(store_dyn, settings.updater.clone())?);
    let sink: Arc<dyn DocumentSink> = match cli.out {
        Some(ref path) => Arc::new(JsonLinesSink::open(path, mode)?),
        None => {
            info!("no --out given; documents are built but not kept");
            Arc::new(MemorySink::new())
        }
    };
    let publisher = Arc::new(QueuedPublisher::spawn(
        index_type,
        sink,
        settings.publisher.clone(),
    )?);

    let chain = standard_chain::<CatalogRecord>(
        index_type,
        &settings.pipeline,
        Collaborators {
            filter: Arc::new(ModifiedSinceFilter::new(Arc::clone(&catalog), since)),
            loader: Arc::new(CatalogLoader::new(Arc::clone(&catalog))),
            builder: Arc::new(CatalogDocumentBuilder),
            publisher: publisher.clone(),
            cancel: cancel.clone(),
        },
    )?;
    let pipeline = IndexingPipeline::new(
        index_type,
        chain,
        updater.clone(),
        Arc::new(SystemClock),
        settings.pipeline.clone(),
    )
    .with_cancel_token(cancel.clone());
    pipeline.initialize()?;

    let ids = catalog.ids();
    for page in ids.chunks(settings.pipeline.submit_page_size.max(1)) {
        match pipeline.start_with_mode(page.to_vec(), mode) {
            Ok(()) => {}
            Err(PipelineError::Cancelled(_)) => {
                warn!("{index_type}: cancelled while submitting; remaining identifiers skipped");
                break;
            }
            Err(e) => return Err(e.into()),
        }
    }

    monitor_until_idle(&pipeline, &cancel);
    pipeline.destroy();
    publisher.close();
    updater.shutdown();

    print_summary(&pipeline, publisher.written(), publisher.deleted());
    if cancel.is_cancelled() {
        anyhow::bail!("Indexing cancelled by user; build status left in progress");
    }
    Ok(())
}

/// Drive `periodic_monitor` and the progress bar until the run drains or Ctrl+C.
fn monitor_until_idle(pipeline: &IndexingPipeline, cancel: &CancelToken) {
    let bar = create_progress_bar(ProgressBarConfig::new(
        pipeline.status().incoming() as usize,
        pipeline.index_type().as_str(),
        Animation::Classic,
    ));
    let ticker = tick(pipeline.config().monitor_interval);
    loop {
        pipeline.periodic_monitor();
        let snapshot = pipeline.snapshot();
        show_snapshot(&bar, &snapshot);
        if !snapshot.run_in_progress {
            break;
        }
        if cancel.is_cancelled() {
            warn!("{}: cancel requested; draining", pipeline.index_type());
            break;
        }
        let _ = ticker.recv();
    }
    finish_bar(&bar, &pipeline.snapshot());
}

fn print_summary(pipeline: &IndexingPipeline, written: u64, deleted: u64) {
    let snapshot = pipeline.snapshot();
    let perf = pipeline.performance();
    let build = &snapshot.build;
    println!(
        "{} {} {}: {}/{} processed, {} written, {} deleted",
        Colors::label(&format!("[{}]", PackagePaths::get().pkg_name())),
        build.index_type,
        Colors::status(build.status),
        build.processed_records,
        build.total_records,
        written,
        deleted
    );
    let dropped = perf.get(Counter::DocumentsDropped)
        + perf.get(Counter::LoadFailures)
        + perf.get(Counter::TaskFailures);
    if dropped > 0 {
        println!(
            "  {}",
            Colors::bad(&format!("{dropped} unit(s) lost (see log for details)"))
        );
    }
    for (name, value) in perf.snapshot() {
        debug!("{name}: {value}");
    }
}

fn print_statuses(statuses: &[IndexBuildStatus]) -> Result<()> {
    if statuses.is_empty() {
        println!("{}", Colors::warn("no build status recorded"));
        return Ok(());
    }
    for s in statuses {
        println!(
            "{} {} {}/{} last build: {}",
            Colors::label(s.index_type.as_str()),
            Colors::status(s.status),
            s.processed_records,
            s.total_records,
            s.last_build_date
                .map_or_else(|| "never".to_string(), |t| t.to_string())
        );
    }
    Ok(())
}

//! Load `.indexflow.toml` (CLI only). Library callers build [`Settings`] themselves.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::utils::config::{PackagePaths, Settings, StageConfig};

#[derive(Debug, Default, Deserialize)]
pub(crate) struct IndexflowToml {
    #[serde(default)]
    pub(crate) settings: GeneralSection,
    #[serde(default)]
    pipeline: PipelineSection,
    #[serde(default)]
    stages: StagesSection,
    #[serde(default)]
    updater: UpdaterSection,
    #[serde(default)]
    publisher: PublisherSection,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct GeneralSection {
    pub(crate) db_path: Option<String>,
    pub(crate) verbose: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct PipelineSection {
    group_size: Option<usize>,
    destroy_timeout_secs: Option<u64>,
    drain_poll_ms: Option<u64>,
    monitor_interval_ms: Option<u64>,
    submit_page_size: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct StageSection {
    executor: Option<String>,
    threads: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct StagesSection {
    #[serde(default)]
    grouping: StageSection,
    #[serde(default)]
    filtering: StageSection,
    #[serde(default)]
    loading: StageSection,
    #[serde(default)]
    document: StageSection,
}

#[derive(Debug, Default, Deserialize)]
struct UpdaterSection {
    poll_interval_ms: Option<u64>,
    shutdown_timeout_ms: Option<u64>,
    queue_capacity: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct PublisherSection {
    queue_capacity: Option<usize>,
    batch_size: Option<usize>,
    flush_interval_ms: Option<u64>,
}

/// Config file path: `explicit` if given, else `.indexflow.toml` in the working directory.
pub(crate) fn config_path(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(PackagePaths::get().config_filename()))
}

/// Load the config file if present. Returns None if missing or unreadable; parse errors are warned.
pub(crate) fn load_indexflow_toml(path: &Path) -> Option<IndexflowToml> {
    let s = std::fs::read_to_string(path).ok()?;
    toml::from_str(&s)
        .map_err(|e| log::warn!("{}: {}", path.display(), e))
        .ok()
}

/// Overwrite a settings field from the file when present, optionally through a conversion.
macro_rules! apply_file_opt {
    ($section:expr, $target:expr, $field:ident => $dest:ident) => {
        if let Some(v) = $section.$field {
            $target.$dest = v;
        }
    };
    ($section:expr, $target:expr, $field:ident => $dest:ident, $conv:expr) => {
        if let Some(v) = $section.$field {
            $target.$dest = $conv(v);
        }
    };
}

fn apply_stage(section: &StageSection, stage: &mut StageConfig) {
    if let Some(ref executor) = section.executor {
        stage.executor = executor.clone();
    }
    if section.threads.is_some() {
        stage.threads = section.threads;
    }
}

/// Apply file config to settings (only fields present in the file). Call before applying CLI.
pub(crate) fn apply_file_to_settings(file: &IndexflowToml, settings: &mut Settings) {
    let p = &file.pipeline;
    let pipeline = &mut settings.pipeline;
    apply_file_opt!(p, pipeline, group_size => group_size);
    if let Some(secs) = p.destroy_timeout_secs {
        pipeline.destroy_timeout = Some(Duration::from_secs(secs));
    }
    apply_file_opt!(p, pipeline, drain_poll_ms => drain_poll, Duration::from_millis);
    apply_file_opt!(p, pipeline, monitor_interval_ms => monitor_interval, Duration::from_millis);
    apply_file_opt!(p, pipeline, submit_page_size => submit_page_size);

    apply_stage(&file.stages.grouping, &mut pipeline.grouping);
    apply_stage(&file.stages.filtering, &mut pipeline.filtering);
    apply_stage(&file.stages.loading, &mut pipeline.loading);
    apply_stage(&file.stages.document, &mut pipeline.document);

    let u = &file.updater;
    let updater = &mut settings.updater;
    apply_file_opt!(u, updater, poll_interval_ms => poll_interval, Duration::from_millis);
    apply_file_opt!(u, updater, shutdown_timeout_ms => shutdown_timeout, Duration::from_millis);
    apply_file_opt!(u, updater, queue_capacity => queue_capacity);

    let b = &file.publisher;
    let publisher = &mut settings.publisher;
    apply_file_opt!(b, publisher, queue_capacity => queue_capacity);
    apply_file_opt!(b, publisher, batch_size => batch_size);
    apply_file_opt!(b, publisher, flush_interval_ms => flush_interval, Duration::from_millis);
}

/// Parse a config string and apply it on top of `settings`. Used by tests and embedding callers.
pub fn apply_toml_str(text: &str, settings: &mut Settings) -> Result<(), toml::de::Error> {
    let file: IndexflowToml = toml::from_str(text)?;
    apply_file_to_settings(&file, settings);
    Ok(())
}

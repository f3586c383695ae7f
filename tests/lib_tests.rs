use indexflow::engine::{
    BuildStatusUpdater, CatalogDocumentBuilder, CatalogLoader, CatalogRecord, DocumentSink,
    JsonCatalog, JsonLinesSink, MemorySink, ModifiedSinceFilter, QueuedPublisher,
    SqliteBuildStatusStore, modified_after,
};
use indexflow::utils::apply_toml_str;
use indexflow::{
    BuildMode, BuildStatusStore, CancelToken, Collaborators, Document, DocumentBuilder,
    EntityLoader, IdentifierFilter, IndexBuildStatus, IndexStatus, IndexType, IndexingPipeline,
    PipelineError, PublisherConfig, Settings, StageConfig, SystemClock, UpdaterConfig,
    standard_chain,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const CATALOG: &str = r#"
{"id": 3, "modified": 300, "name": "Lamp", "tags": ["home", "light"]}
{"id": 1, "modified": 100, "name": "Chair", "price": 49.5}

not json at all
{"id": 2, "name": "Desk", "discontinued": null}
{"id": 1, "modified": 150, "name": "Chair v2"}
"#;

fn catalog() -> Arc<JsonCatalog> {
    Arc::new(JsonCatalog::parse(CATALOG, "test"))
}

// --- types ---

#[test]
fn test_index_type_round_trip_and_case() {
    for t in IndexType::ALL {
        assert_eq!(t.as_str().parse::<IndexType>().unwrap(), t);
    }
    assert_eq!("CmUser".parse::<IndexType>().unwrap(), IndexType::CmUser);
    assert!("warehouse".parse::<IndexType>().is_err());
}

#[test]
fn test_index_status_text() {
    assert_eq!(
        "REBUILD_IN_PROGRESS".parse::<IndexStatus>().unwrap(),
        IndexStatus::RebuildInProgress
    );
    assert_eq!(IndexStatus::UpdateInProgress.to_string(), "UPDATE_IN_PROGRESS");
    assert!(IndexStatus::UpdateInProgress.is_in_progress());
    assert!(!IndexStatus::Complete.is_in_progress());
    assert_eq!(
        BuildMode::Rebuild.in_progress_status(),
        IndexStatus::RebuildInProgress
    );
}

#[test]
fn test_apply_progress_never_clears_last_build_date() {
    let mut stored = IndexBuildStatus {
        last_build_date: Some(10),
        ..IndexBuildStatus::new(IndexType::Sku)
    };
    let update = IndexBuildStatus {
        status: IndexStatus::UpdateInProgress,
        total_records: 4,
        ..IndexBuildStatus::new(IndexType::Sku)
    };
    stored.apply_progress(&update);
    assert_eq!(stored.status, IndexStatus::UpdateInProgress);
    assert_eq!(stored.total_records, 4);
    assert_eq!(stored.last_build_date, Some(10));
}

// --- catalog ---

#[test]
fn test_catalog_parse_skips_bad_lines_and_later_wins() {
    let catalog = catalog();
    assert_eq!(catalog.len(), 3);
    assert_eq!(catalog.ids(), vec![1, 2, 3]);
    let chair = catalog.get(1).unwrap();
    assert_eq!(chair.modified, Some(150));
    assert_eq!(chair.fields["name"], serde_json::json!("Chair v2"));
}

#[test]
fn test_catalog_loader_omits_unknown_ids() {
    let loader = CatalogLoader::new(catalog());
    let loaded: Vec<u64> = loader
        .load(&[3, 9, 1])
        .unwrap()
        .iter()
        .map(|r: &CatalogRecord| r.id)
        .collect();
    assert_eq!(loaded, vec![3, 1]);
}

#[test]
fn test_document_builder_flattens_fields() {
    let catalog = catalog();
    let doc = CatalogDocumentBuilder.build(catalog.get(3).unwrap());
    assert_eq!(doc.id, 3);
    assert_eq!(doc.field("name"), Some(&["Lamp".to_string()][..]));
    assert_eq!(
        doc.field("tags"),
        Some(&["home".to_string(), "light".to_string()][..])
    );
    assert_eq!(doc.field("modified"), Some(&["300".to_string()][..]));

    let desk = CatalogDocumentBuilder.build(catalog.get(2).unwrap());
    assert_eq!(desk.field("discontinued"), None);
    assert_eq!(desk.field("modified"), None);
}

#[test]
fn test_modified_since_filter() {
    let catalog = catalog();
    let all = ModifiedSinceFilter::new(Arc::clone(&catalog), None);
    assert!(all.needs_indexing(1) && all.needs_indexing(3));

    let since_200 = ModifiedSinceFilter::new(Arc::clone(&catalog), Some(200));
    assert!(!since_200.needs_indexing(1));
    assert!(since_200.needs_indexing(2)); // no modified stamp
    assert!(since_200.needs_indexing(3));
    assert!(since_200.needs_indexing(42)); // unknown: left to the loader

    let tolerant = ModifiedSinceFilter::new(catalog, Some(250)).with_tolerance(100);
    assert!(!tolerant.needs_indexing(3));
}

#[test]
fn test_modified_after_tolerance() {
    assert!(modified_after(200, 100, 0));
    assert!(!modified_after(100, 100, 0));
    assert!(!modified_after(150, 100, 50));
    assert!(modified_after(151, 100, 50));
}

#[test]
fn test_tombstones_never_load_and_skip_fresh_builds() {
    let catalog = Arc::new(JsonCatalog::parse(
        "{\"id\": 5, \"modified\": 500, \"deleted\": true, \"name\": \"Old\"}\n\
         {\"id\": 6, \"name\": \"New\"}\n",
        "test",
    ));
    assert_eq!(catalog.ids(), vec![5, 6]);
    assert!(catalog.get(5).unwrap().deleted);
    assert!(!catalog.get(5).unwrap().fields.contains_key("deleted"));

    let loaded = CatalogLoader::new(Arc::clone(&catalog)).load(&[5, 6]).unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].id, 6);

    let fresh = ModifiedSinceFilter::new(Arc::clone(&catalog), None);
    assert!(!fresh.needs_indexing(5));
    assert!(fresh.needs_indexing(6));
    let update = ModifiedSinceFilter::new(catalog, Some(100));
    assert!(update.needs_indexing(5));
}

// --- config file ---

#[test]
fn test_toml_overrides_only_present_fields() {
    let mut settings = Settings::default();
    let default_batch = settings.publisher.batch_size;
    apply_toml_str(
        r#"
[pipeline]
group_size = 25
destroy_timeout_secs = 30

[stages.loading]
executor = "sync"

[stages.document]
threads = 3

[updater]
poll_interval_ms = 250
"#,
        &mut settings,
    )
    .unwrap();

    assert_eq!(settings.pipeline.group_size, 25);
    assert_eq!(
        settings.pipeline.destroy_timeout,
        Some(Duration::from_secs(30))
    );
    assert_eq!(settings.pipeline.loading.executor, "sync");
    assert_eq!(settings.pipeline.document.executor, "pool");
    assert_eq!(settings.pipeline.document.threads, Some(3));
    assert_eq!(settings.updater.poll_interval, Duration::from_millis(250));
    assert_eq!(settings.publisher.batch_size, default_batch);
}

#[test]
fn test_toml_unknown_executor_fails_at_build() {
    let mut settings = Settings::default();
    apply_toml_str("[stages.filtering]\nexecutor = \"forkjoin\"\n", &mut settings).unwrap();
    let err = settings
        .pipeline
        .filtering
        .build_executor("product-filtering", 1)
        .err()
        .unwrap();
    assert!(matches!(err, PipelineError::UnknownExecutor(ref k) if k == "forkjoin"));
}

#[test]
fn test_toml_parse_error() {
    let mut settings = Settings::default();
    assert!(apply_toml_str("[pipeline]\ngroup_size = \"many\"\n", &mut settings).is_err());
}

// --- output file ---

#[test]
fn test_json_lines_update_appends_and_rebuild_truncates() {
    let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("target")
        .join("test-fixtures");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(format!("documents-{}.jsonl", std::process::id()));
    let _ = std::fs::remove_file(&path);
    let lines = |path: &PathBuf| -> Vec<serde_json::Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    };

    {
        let sink = JsonLinesSink::open(&path, BuildMode::Rebuild).unwrap();
        sink.write_batch(IndexType::Sku, &[Document::new(1), Document::new(2)])
            .unwrap();
    }
    {
        let sink = JsonLinesSink::open(&path, BuildMode::Update).unwrap();
        sink.write_batch(IndexType::Sku, &[Document::new(3)]).unwrap();
        sink.delete_batch(IndexType::Sku, &[1]).unwrap();
    }
    let written = lines(&path);
    assert_eq!(written.len(), 4);
    assert_eq!(written[0]["id"], 1);
    assert_eq!(written[0]["index"], "sku");
    assert_eq!(written[2]["id"], 3);
    assert_eq!(written[3]["id"], 1);
    assert_eq!(written[3]["deleted"], true);

    {
        let sink = JsonLinesSink::open(&path, BuildMode::Rebuild).unwrap();
        sink.write_batch(IndexType::Sku, &[Document::new(9)]).unwrap();
    }
    let written = lines(&path);
    assert_eq!(written.len(), 1);
    assert_eq!(written[0]["id"], 9);
    let _ = std::fs::remove_file(&path);
}

// --- end to end ---

/// Run every catalog id through a full pipeline into `sink`, persisting status in `store`.
fn run_catalog(
    catalog: Arc<JsonCatalog>,
    since: Option<i64>,
    mode: BuildMode,
    store: Arc<SqliteBuildStatusStore>,
    sink: Arc<MemorySink>,
) {
    let updater = Arc::new(
        BuildStatusUpdater::spawn(
            store,
            UpdaterConfig {
                poll_interval: Duration::from_millis(20),
                ..UpdaterConfig::default()
            },
        )
        .unwrap(),
    );
    let publisher = Arc::new(
        QueuedPublisher::spawn(IndexType::Product, sink, PublisherConfig::default()).unwrap(),
    );

    let mut settings = Settings::default();
    settings.pipeline.group_size = 2;
    settings.pipeline.loading = StageConfig::pool(2);
    let chain = standard_chain::<CatalogRecord>(
        IndexType::Product,
        &settings.pipeline,
        Collaborators {
            filter: Arc::new(ModifiedSinceFilter::new(Arc::clone(&catalog), since)),
            loader: Arc::new(CatalogLoader::new(Arc::clone(&catalog))),
            builder: Arc::new(CatalogDocumentBuilder),
            publisher: publisher.clone(),
            cancel: CancelToken::new(),
        },
    )
    .unwrap();
    let pipeline = IndexingPipeline::new(
        IndexType::Product,
        chain,
        updater.clone(),
        Arc::new(SystemClock),
        settings.pipeline.clone(),
    );
    pipeline.initialize().unwrap();
    pipeline.start_with_mode(catalog.ids(), mode).unwrap();
    pipeline.destroy();
    publisher.close();
    updater.shutdown();
}

/// Catalog → pipeline → queued publisher → memory sink, status persisted through the updater.
#[test]
fn test_full_run_persists_complete_status() {
    let store = Arc::new(SqliteBuildStatusStore::open_in_memory().unwrap());
    let sink = Arc::new(MemorySink::new());
    run_catalog(
        catalog(),
        None,
        BuildMode::Rebuild,
        store.clone(),
        sink.clone(),
    );

    assert_eq!(sink.len(), 3);
    let stored = store.get(IndexType::Product).unwrap().unwrap();
    assert_eq!(stored.status, IndexStatus::Complete);
    assert_eq!(stored.total_records, 3);
    assert_eq!(stored.processed_records, 3);
    assert!(stored.last_build_date.is_some());
    assert_eq!(stored.last_build_date, stored.operation_start_date);
}

#[test]
fn test_update_run_removes_tombstoned_records() {
    let catalog = Arc::new(JsonCatalog::parse(
        r#"
{"id": 1, "modified": 100, "name": "Chair"}
{"id": 2, "modified": 300, "name": "Desk"}
{"id": 3, "modified": 400, "deleted": true}
"#,
        "test",
    ));
    let sink = Arc::new(MemorySink::new());
    let earlier: Vec<Document> = (1..=3).map(Document::new).collect();
    sink.write_batch(IndexType::Product, &earlier).unwrap();

    let store = Arc::new(SqliteBuildStatusStore::open_in_memory().unwrap());
    run_catalog(
        catalog,
        Some(200),
        BuildMode::Update,
        store.clone(),
        sink.clone(),
    );

    assert_eq!(sink.deleted(), vec![(IndexType::Product, 3)]);
    let mut ids: Vec<u64> = sink.documents().iter().map(|(_, d)| d.id).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![1, 2, 2]);
    let stored = store.get(IndexType::Product).unwrap().unwrap();
    assert_eq!(stored.status, IndexStatus::Complete);
    assert_eq!(stored.processed_records, 3);
}

//! Pipeline tests: fan-out, accounting, lifecycle, reconciliation across runs, failures.

use indexflow::pipeline::{Counter, ExecutorKind, PipelineStatus};
use indexflow::stages::FinalStage;
use indexflow::{
    BuildMode, BuildStatusSink, CancelToken, Clock, Collaborators, Document, DocumentBuilder,
    DocumentPublisher, EntityId, EntityLoader, IndexBuildStatus, IndexStatus, IndexType,
    IndexingPipeline, Lifecycle, PipelineConfig, PipelineError, PublishError, StageChain,
    StageConfig, Timestamp, standard_chain,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

// --- collaborators ---

/// Entities are their own ids. Ids in `known` load; `failing` fails any group containing it.
struct IdLoader {
    known: Option<HashSet<EntityId>>,
    failing: Option<EntityId>,
    delay: Duration,
}

impl IdLoader {
    fn all() -> Self {
        Self {
            known: None,
            failing: None,
            delay: Duration::ZERO,
        }
    }
}

impl EntityLoader<EntityId> for IdLoader {
    fn load(&self, ids: &[EntityId]) -> anyhow::Result<Vec<EntityId>> {
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        if let Some(bad) = self.failing
            && ids.contains(&bad)
        {
            anyhow::bail!("backend refused group containing {bad}");
        }
        Ok(ids
            .iter()
            .copied()
            .filter(|id| self.known.as_ref().is_none_or(|k| k.contains(id)))
            .collect())
    }
}

struct IdBuilder {
    panic_on: Option<EntityId>,
}

impl DocumentBuilder<EntityId> for IdBuilder {
    fn build(&self, entity: &EntityId) -> Document {
        if self.panic_on == Some(*entity) {
            panic!("cannot build document {entity}");
        }
        let mut doc = Document::new(*entity);
        doc.add_field("name", format!("entity-{entity}"));
        doc
    }
}

/// Accepts everything except ids in `interrupt`. `busy` is whatever the test sets it to.
#[derive(Default)]
struct RecordingPublisher {
    accepted: Mutex<Vec<EntityId>>,
    deleted: Mutex<Vec<EntityId>>,
    interrupt: HashSet<EntityId>,
    busy: AtomicBool,
}

impl RecordingPublisher {
    fn accepted(&self) -> Vec<EntityId> {
        let mut ids = self.accepted.lock().unwrap().clone();
        ids.sort_unstable();
        ids
    }

    fn deleted(&self) -> Vec<EntityId> {
        let mut ids = self.deleted.lock().unwrap().clone();
        ids.sort_unstable();
        ids
    }

    fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::SeqCst);
    }
}

impl DocumentPublisher for RecordingPublisher {
    fn enqueue(
        &self,
        index_type: IndexType,
        document: Document,
        _cancel: &CancelToken,
    ) -> Result<(), PublishError> {
        if self.interrupt.contains(&document.id) {
            return Err(PublishError::Interrupted(index_type));
        }
        self.accepted.lock().unwrap().push(document.id);
        Ok(())
    }

    fn delete(
        &self,
        _index_type: IndexType,
        ids: Vec<EntityId>,
        _cancel: &CancelToken,
    ) -> Result<(), PublishError> {
        self.deleted.lock().unwrap().extend(ids);
        Ok(())
    }

    fn is_busy(&self, _index_type: IndexType) -> bool {
        self.busy.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct RecordingSink {
    reports: Mutex<Vec<IndexBuildStatus>>,
}

impl RecordingSink {
    fn reports(&self) -> Vec<IndexBuildStatus> {
        self.reports.lock().unwrap().clone()
    }

    fn last(&self) -> IndexBuildStatus {
        self.reports().pop().expect("at least one report")
    }
}

impl BuildStatusSink for RecordingSink {
    fn submit(&self, status: IndexBuildStatus) {
        self.reports.lock().unwrap().push(status);
    }
}

struct FixedClock(AtomicI64);

impl FixedClock {
    fn at(t: Timestamp) -> Arc<Self> {
        Arc::new(Self(AtomicI64::new(t)))
    }

    fn set(&self, t: Timestamp) {
        self.0.store(t, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> Timestamp {
        self.0.load(Ordering::SeqCst)
    }
}

// --- harness ---

struct Harness {
    pipeline: IndexingPipeline,
    publisher: Arc<RecordingPublisher>,
    sink: Arc<RecordingSink>,
    clock: Arc<FixedClock>,
    cancel: CancelToken,
}

fn sync_config(group_size: usize) -> PipelineConfig {
    PipelineConfig {
        group_size,
        grouping: StageConfig::sync(),
        filtering: StageConfig::sync(),
        loading: StageConfig::sync(),
        document: StageConfig::sync(),
        ..PipelineConfig::default()
    }
}

fn pool_config(group_size: usize) -> PipelineConfig {
    PipelineConfig {
        group_size,
        grouping: StageConfig::pool(1),
        filtering: StageConfig::pool(2),
        loading: StageConfig::pool(4),
        document: StageConfig::pool(4),
        ..PipelineConfig::default()
    }
}

fn harness_with(
    config: PipelineConfig,
    filter: Arc<dyn indexflow::IdentifierFilter>,
    loader: IdLoader,
    builder: IdBuilder,
    publisher: RecordingPublisher,
) -> Harness {
    let publisher = Arc::new(publisher);
    let sink = Arc::new(RecordingSink::default());
    let clock = FixedClock::at(1_000);
    let cancel = CancelToken::new();
    let chain = standard_chain::<EntityId>(
        IndexType::Product,
        &config,
        Collaborators {
            filter,
            loader: Arc::new(loader),
            builder: Arc::new(builder),
            publisher: publisher.clone(),
            cancel: cancel.clone(),
        },
    )
    .unwrap();
    let pipeline = IndexingPipeline::new(
        IndexType::Product,
        chain,
        sink.clone(),
        clock.clone(),
        config,
    )
    .with_cancel_token(cancel.clone());
    Harness {
        pipeline,
        publisher,
        sink,
        clock,
        cancel,
    }
}

fn harness(config: PipelineConfig) -> Harness {
    harness_with(
        config,
        Arc::new(indexflow::AcceptAll),
        IdLoader::all(),
        IdBuilder { panic_on: None },
        RecordingPublisher::default(),
    )
}

// --- fan-out and accounting ---

#[test]
fn test_groups_fan_out_and_all_complete() {
    let h = harness(sync_config(2));
    h.pipeline.initialize().unwrap();
    h.pipeline.start(vec![1, 2, 3, 4, 5]).unwrap();

    let perf = h.pipeline.performance();
    assert_eq!(perf.get(Counter::GroupsCreated), 3);
    assert_eq!(perf.get(Counter::DocumentsCreated), 5);
    assert_eq!(perf.get(Counter::DocumentsQueued), 5);
    assert_eq!(h.publisher.accepted(), vec![1, 2, 3, 4, 5]);
    assert_eq!(h.pipeline.status().incoming(), 5);
    assert_eq!(h.pipeline.status().completed(), 5);

    h.clock.set(2_000);
    h.pipeline.periodic_monitor();
    let last = h.sink.last();
    assert_eq!(last.status, IndexStatus::Complete);
    assert_eq!(last.total_records, 5);
    assert_eq!(last.processed_records, 5);
    assert_eq!(last.operation_start_date, Some(1_000));
    assert_eq!(last.last_build_date, Some(1_000));
    assert_eq!(last.last_modified_date, Some(2_000));
}

#[test]
fn test_pool_executors_account_for_every_identifier() {
    let h = harness(pool_config(7));
    h.pipeline.initialize().unwrap();
    let ids: Vec<EntityId> = (1..=1_000).collect();
    h.pipeline.start(ids[..500].to_vec()).unwrap();
    h.pipeline.start(ids[500..].to_vec()).unwrap();
    h.pipeline.destroy();

    assert_eq!(h.pipeline.status().incoming(), 1_000);
    assert_eq!(h.pipeline.status().completed(), 1_000);
    assert_eq!(h.publisher.accepted(), ids);
    assert_eq!(h.sink.last().status, IndexStatus::Complete);
}

#[test]
fn test_empty_input_touches_nothing() {
    let h = harness(sync_config(10));
    h.pipeline.initialize().unwrap();
    h.pipeline.start(Vec::new()).unwrap();

    assert_eq!(h.pipeline.status().incoming(), 0);
    assert_eq!(h.pipeline.status().completed(), 0);
    assert_eq!(h.pipeline.performance().get(Counter::GroupsCreated), 0);
    assert!(h.publisher.accepted().is_empty());

    h.pipeline.periodic_monitor();
    assert_eq!(h.sink.last().status, IndexStatus::Complete);
}

#[test]
fn test_filtered_and_missing_identifiers_are_settled() {
    let evens = |id: EntityId| id % 2 == 0;
    let h = harness_with(
        sync_config(3),
        Arc::new(evens),
        IdLoader {
            known: Some((1..8).collect()),
            failing: None,
            delay: Duration::ZERO,
        },
        IdBuilder { panic_on: None },
        RecordingPublisher::default(),
    );
    h.pipeline.initialize().unwrap();
    h.pipeline.start((1..=10).collect()).unwrap();

    let perf = h.pipeline.performance();
    assert_eq!(perf.get(Counter::IdentifiersFiltered), 5);
    assert_eq!(perf.get(Counter::IdentifiersMissing), 2);
    assert_eq!(perf.get(Counter::DocumentsDeleted), 2);
    assert_eq!(h.publisher.accepted(), vec![2, 4, 6]);
    assert_eq!(h.publisher.deleted(), vec![8, 10]);
    assert_eq!(h.pipeline.status().completed(), 10);

    h.pipeline.periodic_monitor();
    let last = h.sink.last();
    assert_eq!(last.status, IndexStatus::Complete);
    assert_eq!(last.processed_records, 10);
}

#[test]
fn test_interrupted_publish_loses_one_unit() {
    let h = harness_with(
        sync_config(2),
        Arc::new(indexflow::AcceptAll),
        IdLoader::all(),
        IdBuilder { panic_on: None },
        RecordingPublisher {
            interrupt: HashSet::from([3]),
            ..RecordingPublisher::default()
        },
    );
    h.pipeline.initialize().unwrap();
    h.pipeline.start((1..=6).collect()).unwrap();

    assert_eq!(h.pipeline.status().incoming(), 6);
    assert_eq!(h.pipeline.status().completed(), 5);
    assert_eq!(h.publisher.accepted(), vec![1, 2, 4, 5, 6]);
    assert_eq!(h.pipeline.performance().get(Counter::DocumentsDropped), 1);
    assert!(!h.cancel.is_cancelled());

    h.pipeline.periodic_monitor();
    let last = h.sink.last();
    assert_eq!(last.status, IndexStatus::UpdateInProgress);
    assert_eq!(last.processed_records, 5);
    assert_eq!(last.last_build_date, None);
    assert!(!h.pipeline.snapshot().run_in_progress);

    // The next run is unaffected by the earlier interruption.
    h.pipeline.start(vec![7, 8]).unwrap();
    assert_eq!(h.pipeline.status().completed(), 7);
    h.pipeline.periodic_monitor();
    assert_eq!(h.sink.last().status, IndexStatus::Complete);
}

#[test]
fn test_start_after_cancel_is_rejected() {
    let h = harness(sync_config(2));
    h.pipeline.initialize().unwrap();
    h.pipeline.start(vec![1, 2]).unwrap();
    h.cancel.cancel();

    assert!(matches!(
        h.pipeline.start(vec![3, 4]),
        Err(PipelineError::Cancelled(IndexType::Product))
    ));
    assert_eq!(h.pipeline.status().incoming(), 2);
    assert_eq!(h.publisher.accepted(), vec![1, 2]);
}

#[test]
fn test_completed_never_exceeds_incoming_while_running() {
    let h = Arc::new(harness_with(
        pool_config(3),
        Arc::new(|id: EntityId| id % 5 != 0),
        IdLoader {
            known: Some((1..=900).collect()),
            failing: None,
            delay: Duration::from_millis(1),
        },
        IdBuilder { panic_on: None },
        RecordingPublisher::default(),
    ));
    h.pipeline.initialize().unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let sampler = {
        let h = Arc::clone(&h);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut samples = 0u64;
            while !done.load(Ordering::SeqCst) {
                let snapshot = h.pipeline.snapshot();
                assert!(
                    snapshot.completed <= snapshot.incoming,
                    "completed {} > incoming {}",
                    snapshot.completed,
                    snapshot.incoming
                );
                samples += 1;
            }
            samples
        })
    };
    for page in (1..=1_000).collect::<Vec<EntityId>>().chunks(100) {
        h.pipeline.start(page.to_vec()).unwrap();
    }
    h.pipeline.destroy();
    done.store(true, Ordering::SeqCst);

    assert!(sampler.join().unwrap() > 0);
    assert_eq!(h.pipeline.status().incoming(), 1_000);
    assert_eq!(h.pipeline.status().completed(), 1_000);
    assert_eq!(h.pipeline.performance().get(Counter::TaskFailures), 0);
}

#[test]
fn test_busy_publisher_keeps_pipeline_busy() {
    let h = Arc::new(harness(sync_config(2)));
    h.publisher.set_busy(true);
    h.pipeline.initialize().unwrap();
    h.pipeline.start(vec![1, 2, 3]).unwrap();

    assert_eq!(h.pipeline.status().completed(), 3);
    assert!(h.pipeline.is_busy());
    h.pipeline.periodic_monitor();
    assert!(h.pipeline.snapshot().run_in_progress);
    assert_ne!(h.sink.last().status, IndexStatus::Complete);

    let releaser = {
        let h = Arc::clone(&h);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            h.publisher.set_busy(false);
        })
    };
    let began = Instant::now();
    h.pipeline.destroy();
    releaser.join().unwrap();

    assert!(began.elapsed() >= Duration::from_millis(90));
    assert!(!h.pipeline.is_busy());
    assert_eq!(h.sink.last().status, IndexStatus::Complete);
}

#[test]
fn test_loader_error_loses_whole_group() {
    let h = harness_with(
        sync_config(2),
        Arc::new(indexflow::AcceptAll),
        IdLoader {
            known: None,
            failing: Some(3),
            delay: Duration::ZERO,
        },
        IdBuilder { panic_on: None },
        RecordingPublisher::default(),
    );
    h.pipeline.initialize().unwrap();
    h.pipeline.start(vec![1, 2, 3, 4, 5]).unwrap();

    assert_eq!(h.publisher.accepted(), vec![1, 2, 5]);
    assert_eq!(h.pipeline.performance().get(Counter::LoadFailures), 2);
    assert_eq!(h.pipeline.status().completed(), 3);
}

#[test]
fn test_panicking_task_is_counted_and_pool_survives() {
    let h = harness_with(
        pool_config(2),
        Arc::new(indexflow::AcceptAll),
        IdLoader::all(),
        IdBuilder { panic_on: Some(4) },
        RecordingPublisher::default(),
    );
    h.pipeline.initialize().unwrap();
    h.pipeline.start((1..=8).collect()).unwrap();
    h.pipeline.destroy();

    assert_eq!(h.pipeline.performance().get(Counter::TaskFailures), 1);
    assert_eq!(h.publisher.accepted(), vec![1, 2, 3, 5, 6, 7, 8]);
    assert_eq!(h.pipeline.status().completed(), 7);
    assert_ne!(h.sink.last().status, IndexStatus::Complete);
}

// --- runs and reconciliation ---

#[test]
fn test_second_run_reports_its_own_progress() {
    let h = harness(sync_config(10));
    h.pipeline.initialize().unwrap();
    h.pipeline.start(vec![1, 2, 3]).unwrap();
    h.pipeline.periodic_monitor();
    assert_eq!(h.sink.last().processed_records, 3);

    h.clock.set(5_000);
    h.pipeline.start(vec![4, 5]).unwrap();
    let opened = h.sink.last();
    assert_eq!(opened.status, IndexStatus::UpdateInProgress);
    assert_eq!(opened.total_records, 2);
    assert_eq!(opened.processed_records, 0);
    assert_eq!(opened.operation_start_date, Some(5_000));
    // Carried over from the first run until this one completes.
    assert_eq!(opened.last_build_date, Some(1_000));

    h.pipeline.periodic_monitor();
    let done = h.sink.last();
    assert_eq!(done.status, IndexStatus::Complete);
    assert_eq!(done.total_records, 2);
    assert_eq!(done.processed_records, 2);
    assert_eq!(done.last_build_date, Some(5_000));
}

#[test]
fn test_unchanged_monitor_tick_is_not_reported() {
    let h = harness(sync_config(10));
    h.pipeline.initialize().unwrap();
    h.pipeline.start(vec![1, 2]).unwrap();
    h.pipeline.periodic_monitor();
    let count = h.sink.reports().len();
    h.pipeline.periodic_monitor();
    h.pipeline.periodic_monitor();
    assert_eq!(h.sink.reports().len(), count);
}

#[test]
fn test_rebuild_mode_reports_rebuild_status() {
    let h = harness(sync_config(10));
    h.pipeline.initialize().unwrap();
    h.pipeline
        .start_with_mode(vec![1, 2], BuildMode::Rebuild)
        .unwrap();
    assert_eq!(h.sink.reports()[0].status, IndexStatus::RebuildInProgress);
    h.pipeline.periodic_monitor();
    assert_eq!(h.sink.last().status, IndexStatus::Complete);
}

#[test]
fn test_wait_until_completed_wakes_on_monitor() {
    let h = Arc::new(harness(pool_config(5)));
    h.pipeline.initialize().unwrap();
    assert!(h.pipeline.wait_until_completed(Duration::from_millis(10)));

    h.pipeline.start((1..=50).collect()).unwrap();
    let monitor = {
        let h = Arc::clone(&h);
        thread::spawn(move || {
            for _ in 0..200 {
                h.pipeline.periodic_monitor();
                if !h.pipeline.snapshot().run_in_progress {
                    break;
                }
                thread::sleep(Duration::from_millis(10));
            }
        })
    };
    assert!(h.pipeline.wait_until_completed(Duration::from_secs(5)));
    monitor.join().unwrap();
    assert_eq!(h.pipeline.status().completed(), 50);
    h.pipeline.destroy();
}

// --- lifecycle ---

#[test]
fn test_start_before_initialize_is_rejected() {
    let h = harness(sync_config(10));
    match h.pipeline.start(vec![1]) {
        Err(PipelineError::NotActive { state, .. }) => assert_eq!(state, Lifecycle::Uninitialized),
        other => panic!("expected NotActive, got {other:?}"),
    }
    assert_eq!(h.pipeline.status().incoming(), 0);
}

#[test]
fn test_start_after_destroy_is_rejected() {
    let h = harness(sync_config(10));
    h.pipeline.initialize().unwrap();
    h.pipeline.destroy();
    match h.pipeline.start(vec![1]) {
        Err(PipelineError::NotActive { state, .. }) => assert_eq!(state, Lifecycle::Destroyed),
        other => panic!("expected NotActive, got {other:?}"),
    }
}

#[test]
fn test_initialize_twice_fails() {
    let h = harness(sync_config(10));
    h.pipeline.initialize().unwrap();
    assert!(matches!(
        h.pipeline.initialize(),
        Err(PipelineError::AlreadyInitialized(IndexType::Product))
    ));
}

#[test]
fn test_destroy_waits_for_drain() {
    let h = harness_with(
        pool_config(5),
        Arc::new(indexflow::AcceptAll),
        IdLoader {
            known: None,
            failing: None,
            delay: Duration::from_millis(20),
        },
        IdBuilder { panic_on: None },
        RecordingPublisher::default(),
    );
    h.pipeline.initialize().unwrap();
    h.pipeline.start((1..=50).collect()).unwrap();
    h.pipeline.destroy();

    assert!(!h.pipeline.is_busy());
    assert_eq!(h.pipeline.status().completed(), 50);
    assert_eq!(h.pipeline.snapshot().lifecycle, Lifecycle::Destroyed);
    let last = h.sink.last();
    assert_eq!(last.status, IndexStatus::Complete);
    assert_eq!(last.processed_records, 50);
}

#[test]
fn test_destroy_is_idempotent() {
    let h = harness(sync_config(10));
    h.pipeline.initialize().unwrap();
    h.pipeline.start(vec![1, 2, 3]).unwrap();
    h.pipeline.destroy();
    let reports = h.sink.reports().len();
    h.pipeline.destroy();
    assert_eq!(h.sink.reports().len(), reports);
    assert_eq!(h.pipeline.snapshot().lifecycle, Lifecycle::Destroyed);
}

#[test]
fn test_destroy_timeout_bounds_the_wait() {
    let config = PipelineConfig {
        destroy_timeout: Some(Duration::from_millis(50)),
        ..pool_config(1)
    };
    let h = harness_with(
        config,
        Arc::new(indexflow::AcceptAll),
        IdLoader {
            known: None,
            failing: None,
            delay: Duration::from_millis(200),
        },
        IdBuilder { panic_on: None },
        RecordingPublisher::default(),
    );
    h.pipeline.initialize().unwrap();
    h.pipeline.start((1..=8).collect()).unwrap();
    let began = Instant::now();
    h.pipeline.destroy();
    assert!(began.elapsed() < Duration::from_secs(1));
    assert_eq!(h.pipeline.snapshot().lifecycle, Lifecycle::Destroyed);
}

#[test]
fn test_destroy_uninitialized_pipeline() {
    let h = harness(sync_config(10));
    h.pipeline.destroy();
    assert_eq!(h.pipeline.snapshot().lifecycle, Lifecycle::Destroyed);
    assert!(h.sink.reports().is_empty());
}

// --- configuration errors ---

#[test]
fn test_empty_chain_has_no_stages() {
    let status = Arc::new(PipelineStatus::new(IndexType::Sku));
    let chain = StageChain::<usize, usize>::new();
    assert!(chain.is_empty());
    assert!(matches!(
        chain.finish(Arc::new(FinalStage::new(status))),
        Err(PipelineError::NoStages)
    ));
}

#[test]
fn test_unknown_executor_kind() {
    assert_eq!(
        "threadpool".parse::<ExecutorKind>().unwrap(),
        ExecutorKind::Pool
    );
    assert_eq!(
        "Sync".parse::<ExecutorKind>().unwrap(),
        ExecutorKind::Synchronous
    );
    assert!(matches!(
        "fork".parse::<ExecutorKind>(),
        Err(PipelineError::UnknownExecutor(s)) if s == "fork"
    ));

    let config = PipelineConfig {
        loading: StageConfig {
            executor: "fork".to_string(),
            threads: None,
        },
        ..sync_config(10)
    };
    let built = standard_chain::<EntityId>(
        IndexType::Product,
        &config,
        Collaborators {
            filter: Arc::new(indexflow::AcceptAll),
            loader: Arc::new(IdLoader::all()),
            builder: Arc::new(IdBuilder { panic_on: None }),
            publisher: Arc::new(RecordingPublisher::default()),
            cancel: CancelToken::new(),
        },
    );
    assert!(matches!(built, Err(PipelineError::UnknownExecutor(_))));
}

//! Stage abstraction: typed units of work chained input-to-output.
//!
//! A [`Stage`] accepts payloads of its `Input` type and forwards `Output`s to the next stage,
//! which it only sees through the type-erased [`Inlet`] handle. [`PipelineStage`] is the generic
//! implementation: each `send` binds the payload to a task from a [`TaskFactory`] and hands it to
//! the stage's [`Executor`]. [`StageChain`] assembles stages into a static, type-checked chain.

use log::{error, warn};
use std::sync::{Arc, OnceLock};

use crate::errors::PipelineError;

use super::error_handler::run_guarded;
use super::executor::Executor;
use super::performance::{Counter, PerformanceSink};

/// Receiving end of a stage, as seen by its predecessor.
pub trait Inlet<T>: Send + Sync {
    fn deliver(&self, payload: T);
    fn has_work(&self) -> bool;
}

/// One step of the pipeline.
pub trait Stage: Send + Sync + 'static {
    type Input: Send + 'static;
    type Output: Send + 'static;

    /// Accept one payload. Returns once the work is dispatched to the stage's executor.
    fn send(&self, payload: Self::Input);

    fn set_next_stage(&self, next: Arc<dyn Inlet<Self::Output>>);

    /// True while the stage holds queued or in-flight work.
    fn is_busy(&self) -> bool;

    fn set_performance_sink(&self, sink: PerformanceSink);
}

impl<S: Stage> Inlet<S::Input> for S {
    fn deliver(&self, payload: S::Input) {
        self.send(payload)
    }

    fn has_work(&self) -> bool {
        self.is_busy()
    }
}

/// Type-erased handle the orchestrator keeps for every member stage.
pub(crate) trait StageControl: Send + Sync {
    fn has_pending_work(&self) -> bool;
    fn attach_sink(&self, sink: PerformanceSink);
}

impl<S: Stage> StageControl for S {
    fn has_pending_work(&self) -> bool {
        self.is_busy()
    }

    fn attach_sink(&self, sink: PerformanceSink) {
        self.set_performance_sink(sink)
    }
}

/// What a running task sees: its stage's name, the next stage, and the shared counters.
pub struct TaskContext<O> {
    stage: Arc<str>,
    next: Option<Arc<dyn Inlet<O>>>,
    sink: Option<PerformanceSink>,
}

impl<O> TaskContext<O> {
    pub fn stage_name(&self) -> &str {
        &self.stage
    }

    /// Send one output to the next stage.
    pub fn forward(&self, output: O) {
        match &self.next {
            Some(next) => next.deliver(output),
            None => error!("{}: no next stage wired; output dropped", self.stage),
        }
    }

    pub fn increment(&self, counter: Counter, n: u64) {
        if let Some(sink) = &self.sink {
            sink.increment(counter, n);
        }
    }

    /// Credit identifiers that leave the pipeline here without producing output.
    pub fn settle(&self, n: u64) {
        if let Some(sink) = &self.sink {
            sink.settle(n);
        }
    }
}

/// Produces the work a [`PipelineStage`] runs for one payload.
pub trait TaskFactory: Send + Sync + 'static {
    type Input: Send + 'static;
    type Output: Send + 'static;

    fn run(&self, payload: Self::Input, ctx: &TaskContext<Self::Output>);
}

/// Generic executor-backed stage.
pub struct PipelineStage<F: TaskFactory> {
    name: Arc<str>,
    factory: Arc<F>,
    executor: Executor,
    next: OnceLock<Arc<dyn Inlet<F::Output>>>,
    sink: OnceLock<PerformanceSink>,
}

impl<F: TaskFactory> PipelineStage<F> {
    pub fn new(name: &str, factory: F, executor: Executor) -> Self {
        Self {
            name: Arc::from(name),
            factory: Arc::new(factory),
            executor,
            next: OnceLock::new(),
            sink: OnceLock::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }
}

impl<F: TaskFactory> Stage for PipelineStage<F> {
    type Input = F::Input;
    type Output = F::Output;

    fn send(&self, payload: F::Input) {
        let ctx = TaskContext {
            stage: Arc::clone(&self.name),
            next: self.next.get().cloned(),
            sink: self.sink.get().cloned(),
        };
        let factory = Arc::clone(&self.factory);
        self.executor.execute(Box::new(move || {
            run_guarded(&ctx.stage, ctx.sink.as_ref(), || factory.run(payload, &ctx));
        }));
    }

    fn set_next_stage(&self, next: Arc<dyn Inlet<F::Output>>) {
        if self.next.set(next).is_err() {
            warn!("{}: next stage already wired; keeping the first", self.name);
        }
    }

    fn is_busy(&self) -> bool {
        self.executor.is_busy()
    }

    fn set_performance_sink(&self, sink: PerformanceSink) {
        let _ = self.sink.set(sink);
    }
}

/// Entry point of a chain; forwards to the first stage once wired.
struct Relay<T> {
    target: OnceLock<Arc<dyn Inlet<T>>>,
}

impl<T> Relay<T> {
    fn new() -> Self {
        Self {
            target: OnceLock::new(),
        }
    }

    fn bind(&self, target: Arc<dyn Inlet<T>>) {
        let _ = self.target.set(target);
    }
}

impl<T> Inlet<T> for Relay<T> {
    fn deliver(&self, payload: T) {
        match self.target.get() {
            Some(target) => target.deliver(payload),
            None => error!("pipeline entry is not wired; payload dropped"),
        }
    }

    fn has_work(&self) -> bool {
        false
    }
}

/// Ordered, type-checked list of stages from `In` to `Out`.
/// Nothing is wired until [`StageChain::finish`].
pub struct StageChain<In, Out> {
    entry: Arc<Relay<In>>,
    wire: Box<dyn FnOnce(Arc<dyn Inlet<Out>>) + Send>,
    members: Vec<Arc<dyn StageControl>>,
}

impl<In: Send + 'static> StageChain<In, In> {
    pub fn new() -> Self {
        let entry = Arc::new(Relay::new());
        let relay = Arc::clone(&entry);
        Self {
            entry,
            wire: Box::new(move |first| relay.bind(first)),
            members: Vec::new(),
        }
    }
}

impl<In: Send + 'static> Default for StageChain<In, In> {
    fn default() -> Self {
        Self::new()
    }
}

impl<In: Send + 'static, Out: Send + 'static> StageChain<In, Out> {
    /// Append `stage`; its input type must be the current chain output.
    pub fn then<S: Stage<Input = Out>>(self, stage: Arc<S>) -> StageChain<In, S::Output> {
        let prev = self.wire;
        let as_next: Arc<dyn Inlet<Out>> = stage.clone();
        let mut members = self.members;
        members.push(stage.clone() as Arc<dyn StageControl>);
        StageChain {
            entry: self.entry,
            wire: Box::new(move |next| {
                prev(as_next);
                stage.set_next_stage(next);
            }),
            members,
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Wire every adjacent pair and the last stage to `sink`.
    pub fn finish(self, sink: Arc<dyn Inlet<Out>>) -> Result<WiredChain<In>, PipelineError> {
        if self.members.is_empty() {
            return Err(PipelineError::NoStages);
        }
        (self.wire)(sink);
        Ok(WiredChain {
            entry: self.entry,
            members: self.members,
        })
    }
}

/// A chain whose stages are connected end to end.
pub struct WiredChain<In> {
    entry: Arc<Relay<In>>,
    members: Vec<Arc<dyn StageControl>>,
}

impl<In> WiredChain<In> {
    pub fn send(&self, payload: In) {
        self.entry.deliver(payload);
    }

    /// True if any member stage reports work.
    pub fn is_busy(&self) -> bool {
        self.members.iter().any(|m| m.has_pending_work())
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub(crate) fn attach_sink(&self, sink: &PerformanceSink) {
        for member in &self.members {
            member.attach_sink(sink.clone());
        }
    }
}

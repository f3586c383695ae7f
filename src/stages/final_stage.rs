use log::debug;
use std::sync::Arc;

use crate::pipeline::{Inlet, PerformanceSink, PipelineStatus, Stage};

/// Internal sink at the end of every chain: adds received counts to the completed counter.
pub struct FinalStage {
    status: Arc<PipelineStatus>,
}

impl FinalStage {
    pub fn new(status: Arc<PipelineStatus>) -> Self {
        Self { status }
    }
}

impl Stage for FinalStage {
    type Input = usize;
    type Output = ();

    fn send(&self, count: usize) {
        self.status.add_completed(count as u64);
    }

    fn set_next_stage(&self, _next: Arc<dyn Inlet<()>>) {
        debug!("final stage has no successor; ignoring wiring");
    }

    fn is_busy(&self) -> bool {
        false
    }

    fn set_performance_sink(&self, _sink: PerformanceSink) {}
}

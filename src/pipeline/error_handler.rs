use log::error;
use std::panic::{self, AssertUnwindSafe};

use super::performance::{Counter, PerformanceSink};

/// Run one stage task. If it panics, log the failure with the stage name, count it, and re-raise
/// so the executor's own policy applies (a pool worker survives it, a synchronous caller sees it).
pub fn run_guarded<F>(stage: &str, sink: Option<&PerformanceSink>, task: F)
where
    F: FnOnce(),
{
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
        let msg = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        error!("{stage}: task failed: {msg}");
        if let Some(sink) = sink {
            sink.increment(Counter::TaskFailures, 1);
        }
        panic::resume_unwind(payload);
    }
}

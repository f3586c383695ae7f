//! Progress bar driven by the pipeline monitor: total follows `incoming`, position follows
//! `completed`.

use kdam::{Animation, Bar, BarExt};
use std::sync::{Arc, Mutex};

use crate::pipeline::StatusSnapshot;

pub type ProgressBar = Arc<Mutex<Bar>>;

/// Configuration for creating a progress bar
pub struct ProgressBarConfig {
    pub total: usize,
    pub desc: &'static str,
    pub animation: Animation,
}

impl ProgressBarConfig {
    pub fn new(total: usize, desc: &'static str, animation: Animation) -> Self {
        Self {
            total,
            desc,
            animation,
        }
    }
}

pub fn create_progress_bar(config: ProgressBarConfig) -> ProgressBar {
    Arc::new(Mutex::new(kdam::tqdm!(
        total = config.total,
        desc = config.desc,
        animation = config.animation,
        unit = " docs"
    )))
}

/// Move the bar to the snapshot's counters.
/// Uses try_lock so a slow terminal never stalls the monitor; the next tick catches up.
pub fn show_snapshot(pb: &ProgressBar, snapshot: &StatusSnapshot) {
    if let Ok(mut bar) = pb.try_lock() {
        bar.total = snapshot.incoming as usize;
        let _ = bar.update_to(snapshot.completed as usize);
    }
}

/// Final, blocking update once the run is over.
pub fn finish_bar(pb: &ProgressBar, snapshot: &StatusSnapshot) {
    if let Ok(mut bar) = pb.lock() {
        bar.total = snapshot.incoming as usize;
        let _ = bar.update_to(snapshot.completed as usize);
        let _ = bar.refresh();
        eprintln!();
    }
}

pub mod events;
pub mod loader;
pub mod tracker;

pub use tracker::ResourceTracker;

use procdump_common::waitable::Event;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Sample-rate N from spec §4.4 step 2 ("keep 1 of every N; N is a
/// compile-time constant currently 1 but treat as parameter").
const SAMPLE_RATE: u64 = 1;

/// Ties the kernel-trace loader, the consumer loop, and the tracker
/// together for one target. `start` never fails the caller: if the kernel
/// probe cannot load, the tracker is disabled with a warning and `None` is
/// returned, matching spec §4.4 "the resource-tracker is disabled with a
/// warning and the rest of the system runs."
pub struct RestrackHandle {
    tracker: Arc<ResourceTracker>,
    consumer_thread: Option<JoinHandle<()>>,
}

impl RestrackHandle {
    pub fn start(target_pid: i32, quit: Arc<Event>) -> Option<Self> {
        let kernel_tracer = match loader::KernelTracer::load(target_pid) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!("resource tracker disabled for pid {target_pid}: {e}");
                return None;
            }
        };

        let tracker = Arc::new(ResourceTracker::new(SAMPLE_RATE));
        let consumer_tracker = Arc::clone(&tracker);
        let consumer_quit = Arc::clone(&quit);
        let consumer_thread = thread::spawn(move || {
            tracker::run_consumer_loop(consumer_tracker, kernel_tracer, consumer_quit);
        });

        Some(Self {
            tracker,
            consumer_thread: Some(consumer_thread),
        })
    }

    /// Writes a snapshot next to `dump_path` (spec §4.5 "if resource-tracking
    /// is on, schedules a snapshot thread for the just-written dump path").
    pub fn snapshot(&self, dump_path: &Path) -> Option<PathBuf> {
        match self.tracker.snapshot(dump_path) {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::warn!("failed to write resource tracker snapshot: {e}");
                None
            }
        }
    }

    pub fn tracker(&self) -> Arc<ResourceTracker> {
        Arc::clone(&self.tracker)
    }

    pub fn join(mut self) {
        if let Some(t) = self.consumer_thread.take() {
            let _ = t.join();
        }
    }
}

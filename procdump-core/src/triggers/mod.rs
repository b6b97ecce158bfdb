// Trigger threads (spec §4.5 "Common shape"). Every concrete trigger below
// shares the same wait-sample-fire-cooldown skeleton; this module holds
// that skeleton so each trigger file only supplies its metric and
// comparison.

pub mod commit;
pub mod cpu;
pub mod filedesc;
pub mod managed;
pub mod signal;
pub mod threads;
pub mod timer;

use crate::config::{Configuration, DumpKind};
use crate::dump::{write_dump, DumpOutcome};
use procdump_common::waitable::{wait_any, wait_for_quit, WaitHandle, WaitOutcome};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Step 1 of spec §4.5 "Common shape": wait on
/// `wait_any({quit, start-monitoring}, ∞)`, proceeding only if
/// start-monitoring won.
pub(crate) fn wait_for_start(config: &Configuration) -> bool {
    let handles = [
        WaitHandle::Event(Arc::clone(&config.handles.quit)),
        WaitHandle::Event(Arc::clone(&config.handles.start_monitoring)),
    ];
    let (outcome, index) = wait_any(&handles, None);
    outcome == WaitOutcome::Signaled && index == Some(1)
}

/// Step 2's loop guard: `wait_for_quit(poll_interval) == timeout`.
pub(crate) fn should_keep_polling(config: &Configuration) -> bool {
    wait_for_quit(&config.handles.quit, Duration::from_millis(config.sampling.polling_interval_ms))
}

/// Step 4: fires the dump writer, schedules a resource-tracker snapshot if
/// enabled, then waits out the cooldown. Returns `true` if the cooldown
/// wait timed out (i.e. the caller's loop should continue), `false` if
/// quit won the cooldown wait and the loop should break.
pub(crate) fn fire(config: &Configuration, kind: DumpKind, pending_snapshots: &mut Vec<JoinHandle<()>>) -> bool {
    write_dump_and_maybe_snapshot(config, kind, pending_snapshots);

    wait_for_quit(
        &config.handles.quit,
        Duration::from_secs(config.sampling.threshold_cooldown_seconds),
    )
}

/// Calls the dump writer and, on success, schedules a resource-tracker
/// snapshot if restrack is enabled for this target (spec §4.5 step 4).
/// Split out from `fire` so the signal trigger's event-driven state machine
/// (which has no uniform cooldown wait) can reuse the same fire-and-log
/// behaviour.
pub(crate) fn write_dump_and_maybe_snapshot(config: &Configuration, kind: DumpKind, pending_snapshots: &mut Vec<JoinHandle<()>>) {
    match write_dump(config, kind) {
        DumpOutcome::Written(path) => {
            tracing::info!("{} trigger fired dump at {}", kind.as_str(), path.display());
            if config.thresholds.restrack_enabled {
                if let Some(tracker) = config.resource_tracker() {
                    pending_snapshots.push(spawn_snapshot(tracker, path));
                }
            }
        }
        DumpOutcome::Abandoned => {}
        DumpOutcome::Skipped(reason) => tracing::warn!("{} trigger skipped a dump: {reason}", kind.as_str()),
        DumpOutcome::Failed(e) => tracing::error!("{}", crate::error::format_dump_failure(&e)),
    }
}

fn spawn_snapshot(tracker: Arc<crate::restrack::ResourceTracker>, dump_path: PathBuf) -> JoinHandle<()> {
    thread::spawn(move || {
        if let Err(e) = tracker.snapshot(&dump_path) {
            tracing::warn!("failed to write resource tracker snapshot: {e}");
        }
    })
}

/// Joins every snapshot thread a trigger scheduled during its run (spec
/// §4.5 step 4 "...and joins those at end").
pub(crate) fn join_pending_snapshots(pending_snapshots: Vec<JoinHandle<()>>) {
    for handle in pending_snapshots {
        let _ = handle.join();
    }
}

// Thread-count trigger (spec §4.5 "Thread-count thread"):
// `num_threads >= threshold`.

use crate::config::{Configuration, DumpKind};
use crate::triggers::{fire, join_pending_snapshots, should_keep_polling, wait_for_start};
use procdump_common::process;

pub fn run(config: &Configuration) {
    let Some(threshold) = config.thresholds.thread_count else {
        return;
    };
    if !wait_for_start(config) {
        return;
    }

    let mut pending_snapshots = Vec::new();
    while should_keep_polling(config) {
        let Ok(stat) = process::sample(config.pid()) else {
            tracing::debug!("thread-count trigger: target {} not sampleable", config.pid());
            continue;
        };
        if stat.num_threads >= threshold {
            tracing::info!("Trigger: Thread count:{} on process ID: {}", stat.num_threads, config.pid());
            if !fire(config, DumpKind::Thread, &mut pending_snapshots) {
                break;
            }
        }
    }
    join_pending_snapshots(pending_snapshots);
}

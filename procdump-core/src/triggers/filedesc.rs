// File-descriptor trigger (spec §4.5 "File-descriptor thread"):
// `num_filedescriptors >= threshold`.

use crate::config::{Configuration, DumpKind};
use crate::triggers::{fire, join_pending_snapshots, should_keep_polling, wait_for_start};
use procdump_common::process;

pub fn run(config: &Configuration) {
    let Some(threshold) = config.thresholds.file_descriptor_count else {
        return;
    };
    if !wait_for_start(config) {
        return;
    }

    let mut pending_snapshots = Vec::new();
    while should_keep_polling(config) {
        let Ok(stat) = process::sample(config.pid()) else {
            tracing::debug!("file-descriptor trigger: target {} not sampleable", config.pid());
            continue;
        };
        if stat.num_filedescriptors >= threshold {
            tracing::info!("Trigger: File descriptors:{} on process ID: {}", stat.num_filedescriptors, config.pid());
            if !fire(config, DumpKind::Filedesc, &mut pending_snapshots) {
                break;
            }
        }
    }
    join_pending_snapshots(pending_snapshots);
}

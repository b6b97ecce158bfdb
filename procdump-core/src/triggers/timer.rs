// Timer trigger (spec §4.5 "Timer thread"): fires immediately on start,
// then after each cooldown; no metric.

use crate::config::{Configuration, DumpKind};
use crate::triggers::{fire, join_pending_snapshots, wait_for_start};

pub fn run(config: &Configuration) {
    if !config.thresholds.timer_enabled {
        return;
    }
    if !wait_for_start(config) {
        return;
    }

    let mut pending_snapshots = Vec::new();
    // `fire` both writes the dump and waits out the cooldown, so looping on
    // its return value alone reproduces "fire immediately, then after each
    // cooldown" with no separate metric-polling step.
    loop {
        tracing::info!(
            "Trigger: Timer:{}(s) on process ID: {}",
            config.sampling.threshold_cooldown_seconds,
            config.pid()
        );
        if !fire(config, DumpKind::Time, &mut pending_snapshots) {
            break;
        }
        if config.is_quitting() {
            break;
        }
    }
    join_pending_snapshots(pending_snapshots);
}

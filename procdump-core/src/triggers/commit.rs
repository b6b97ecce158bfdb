// Commit (memory) trigger (spec §4.5 "Commit thread").

use crate::config::{Configuration, DumpKind};
use crate::triggers::{fire, join_pending_snapshots, should_keep_polling, wait_for_start};
use procdump_common::process;

fn page_size_bytes() -> u64 {
    // SAFETY: sysconf(_SC_PAGESIZE) has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as u64
    } else {
        4096
    }
}

/// `memUsage = ((rss + nswap) * page_size_kib) / 1024` MiB (spec §4.5).
fn memory_usage_mb(stat: &process::ProcessStat) -> f64 {
    let page_kib = page_size_bytes() as f64 / 1024.0;
    ((stat.rss_pages + stat.swap_pages) as f64 * page_kib) / 1024.0
}

fn threshold_fires(current: f64, threshold: u64, below: bool) -> bool {
    if below {
        current < threshold as f64
    } else {
        current >= threshold as f64
    }
}

pub fn run(config: &Configuration) {
    if config.thresholds.memory_mb.is_empty() {
        return;
    }
    if !wait_for_start(config) {
        return;
    }

    let mut pending_snapshots = Vec::new();
    while should_keep_polling(config) {
        let Ok(stat) = process::sample(config.pid()) else {
            tracing::debug!("commit trigger: target {} not sampleable", config.pid());
            continue;
        };

        let index = config
            .counters
            .current_memory_threshold_index()
            .min(config.thresholds.memory_mb.len() - 1);
        let threshold = config.thresholds.memory_mb[index];
        let current = memory_usage_mb(&stat);

        if threshold_fires(current, threshold, config.thresholds.memory_below) {
            tracing::info!("Trigger: Commit usage:{}MB on process ID: {}", current as i64, config.pid());
            if !fire(config, DumpKind::Commit, &mut pending_snapshots) {
                break;
            }
            // Multi-step GC thresholds: successive dumps require
            // successively higher (or lower, for `below`) values.
            config.counters.advance_memory_threshold_index();
        }
    }
    join_pending_snapshots(pending_snapshots);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_fires_above_default_direction() {
        assert!(threshold_fires(512.0, 500, false));
        assert!(!threshold_fires(499.0, 500, false));
    }

    #[test]
    fn threshold_fires_below_when_flagged() {
        assert!(threshold_fires(10.0, 50, true));
        assert!(!threshold_fires(60.0, 50, true));
    }
}

// CPU trigger (spec §4.5 "CPU thread").

use crate::config::{Configuration, DumpKind};
use crate::triggers::{fire, join_pending_snapshots, should_keep_polling, wait_for_start};
use procdump_common::process;

/// CPU% formula from spec §4.2: `(utime+stime)/clk_tck` divided by
/// `uptime - start_time/clk_tck`, as a percentage of one CPU.
fn cpu_percent(stat: &process::ProcessStat) -> Option<f64> {
    let ticks = process::clock_ticks_per_second() as f64;
    let uptime = process::system_uptime_seconds().ok()?;
    let busy_seconds = (stat.utime + stat.stime) as f64 / ticks;
    let age_seconds = uptime - (stat.start_time_ticks as f64 / ticks);
    if age_seconds <= 0.0 {
        return None;
    }
    Some((busy_seconds / age_seconds) * 100.0)
}

fn threshold_fires(current: f64, threshold: f64, below: bool) -> bool {
    if below {
        current < threshold
    } else {
        current >= threshold
    }
}

pub fn run(config: &Configuration) {
    let Some(threshold) = config.thresholds.cpu_percent else {
        return;
    };
    if !wait_for_start(config) {
        return;
    }

    let mut pending_snapshots = Vec::new();
    while should_keep_polling(config) {
        let Ok(stat) = process::sample(config.pid()) else {
            tracing::debug!("cpu trigger: target {} not sampleable", config.pid());
            continue;
        };
        let Some(current) = cpu_percent(&stat) else {
            continue;
        };
        if threshold_fires(current, threshold, config.thresholds.cpu_below) {
            tracing::info!("Trigger: CPU usage:{}% on process ID: {}", current as i64, config.pid());
            if !fire(config, DumpKind::Cpu, &mut pending_snapshots) {
                break;
            }
        }
    }
    join_pending_snapshots(pending_snapshots);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_fires_above_by_default() {
        assert!(threshold_fires(90.0, 80.0, false));
        assert!(!threshold_fires(70.0, 80.0, false));
    }

    #[test]
    fn threshold_fires_below_when_flagged() {
        assert!(threshold_fires(5.0, 10.0, true));
        assert!(!threshold_fires(15.0, 10.0, true));
    }
}

// Managed (.NET) trigger (spec §4.5 "Managed (Dotnet) thread"; see §4.6).
// Unlike the polling triggers, this one delegates entirely to the profiler
// injector and status-socket server: the dump itself is written inside the
// target by the injected profiler, reported back over the status socket.

use crate::config::Configuration;
use crate::managed::ManagedMonitor;
use crate::triggers::wait_for_start;
use std::sync::Arc;

/// Builds the trigger-kind tag and trigger-specific client-data fields
/// (spec §4.6 "Client data is a `;`-separated ASCII string..."). Exception
/// triggers list `Name:count` pairs; GC-heap-size triggers list
/// `generation;threshold1;threshold2;…`; GC-generation triggers carry just
/// the generation number.
fn build_client_data_fields(config: &Configuration) -> Option<(&'static str, Vec<String>)> {
    if !config.thresholds.exception_filter.is_empty() {
        let fields = config
            .thresholds
            .exception_filter
            .iter()
            .map(|name| format!("{name}:0"))
            .collect();
        return Some(("exception", fields));
    }
    if !config.thresholds.gc_heap_mb.is_empty() {
        let mut fields = vec![config.thresholds.gc_generation.unwrap_or(0).to_string()];
        fields.extend(config.thresholds.gc_heap_mb.iter().map(|mb| mb.to_string()));
        return Some(("gcm", fields));
    }
    if let Some(generation) = config.thresholds.gc_generation {
        return Some(("gcgen", vec![generation.to_string()]));
    }
    None
}

pub fn run(config: Arc<Configuration>) {
    let Some((trigger_kind, extra_fields)) = build_client_data_fields(&config) else {
        return;
    };
    if !wait_for_start(&config) {
        return;
    }

    match ManagedMonitor::start(Arc::clone(&config), trigger_kind, extra_fields) {
        Ok(monitor) => monitor.join(),
        Err(e) => tracing::error!("managed trigger failed to start: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Identity, OutputConfig, Sampling, TargetSelector, Thresholds};

    fn config_with(thresholds: Thresholds) -> Configuration {
        Configuration::new(
            0,
            Identity {
                selector: TargetSelector::Pid(1),
                pid: 1,
                start_time_ticks: 0,
                resolved_name: "dotnet".into(),
            },
            thresholds,
            Sampling::default(),
            OutputConfig::default(),
            false,
        )
    }

    #[test]
    fn exception_filter_produces_name_count_pairs() {
        let mut thresholds = Thresholds::default();
        thresholds.exception_filter = vec!["System.OutOfMemoryException".into()];
        let config = config_with(thresholds);
        let (kind, fields) = build_client_data_fields(&config).unwrap();
        assert_eq!(kind, "exception");
        assert_eq!(fields, vec!["System.OutOfMemoryException:0"]);
    }

    #[test]
    fn gc_generation_alone_produces_gcgen() {
        let mut thresholds = Thresholds::default();
        thresholds.gc_generation = Some(2);
        let config = config_with(thresholds);
        let (kind, fields) = build_client_data_fields(&config).unwrap();
        assert_eq!(kind, "gcgen");
        assert_eq!(fields, vec!["2"]);
    }

    #[test]
    fn gc_heap_thresholds_produce_gcm_with_generation_prefix() {
        let mut thresholds = Thresholds::default();
        thresholds.gc_generation = Some(1);
        thresholds.gc_heap_mb = vec![100, 200];
        let config = config_with(thresholds);
        let (kind, fields) = build_client_data_fields(&config).unwrap();
        assert_eq!(kind, "gcm");
        assert_eq!(fields, vec!["1", "100", "200"]);
    }

    #[test]
    fn no_managed_threshold_configured_returns_none() {
        let config = config_with(Thresholds::default());
        assert!(build_client_data_fields(&config).is_none());
    }
}

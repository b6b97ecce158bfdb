// Data model (spec §3): one `Configuration` per monitored target, holding
// immutable inputs, mutable counters/events, and coordination handles.
//
// Grounded on `libdd-crashtracker::shared::configuration::CrashtrackerConfiguration`
// for the immutable-config half, and on the original C
// `struct ProcDumpConfiguration` (include/ProcDumpConfiguration.h) for the
// exact field set and defaults (MIN_POLLING_INTERVAL=1000, MAX_DUMP_COUNT=100,
// default cooldown 10s, default max dumps 1).

use procdump_common::waitable::{Event, Semaphore};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

pub const MIN_POLLING_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_COOLDOWN_SECONDS: u64 = 10;
pub const DEFAULT_MAX_DUMPS: u32 = 1;
pub const MAX_DUMPS_CAP: u32 = 100;

/// How a monitoring session selects its target(s) (spec §1, §4.7).
#[derive(Debug, Clone)]
pub enum TargetSelector {
    Pid(i32),
    Pgid(i32),
    Name { name: String, wait: bool },
}

/// Dump kind (spec §3); the lowercased variant name is used verbatim in
/// generated filenames (spec §4.3 step 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpKind {
    Commit,
    Cpu,
    Thread,
    Filedesc,
    Signal,
    Time,
    Exception,
    Manual,
}

impl DumpKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DumpKind::Commit => "commit",
            DumpKind::Cpu => "cpu",
            DumpKind::Thread => "thread",
            DumpKind::Filedesc => "filedesc",
            DumpKind::Signal => "signal",
            DumpKind::Time => "time",
            DumpKind::Exception => "exception",
            DumpKind::Manual => "manual",
        }
    }
}

/// Threshold configuration for every trigger kind (spec §3 "Thresholds").
#[derive(Debug, Clone, Default)]
pub struct Thresholds {
    pub cpu_percent: Option<f64>,
    pub cpu_below: bool,
    /// Ordered list of memory thresholds in MB; multi-step GC triggers walk
    /// this list one step per dump (spec §4.5 "Commit thread").
    pub memory_mb: Vec<u64>,
    pub memory_below: bool,
    pub thread_count: Option<u64>,
    pub file_descriptor_count: Option<u64>,
    pub signal_number: Option<i32>,
    pub timer_enabled: bool,
    pub exception_filter: Vec<String>,
    pub gc_generation: Option<u32>,
    pub gc_heap_mb: Vec<u64>,
    pub restrack_enabled: bool,
}

impl Thresholds {
    /// True when no threshold-based trigger is configured and the timer
    /// trigger should be the default (original source: timer fires unless
    /// another trigger is specified).
    pub fn any_configured(&self) -> bool {
        self.cpu_percent.is_some()
            || !self.memory_mb.is_empty()
            || self.thread_count.is_some()
            || self.file_descriptor_count.is_some()
            || self.signal_number.is_some()
            || self.timer_enabled
            || !self.exception_filter.is_empty()
            || self.gc_generation.is_some()
            || !self.gc_heap_mb.is_empty()
    }
}

/// Polling/cooldown/cap parameters (spec §3 "Sampling").
#[derive(Debug, Clone)]
pub struct Sampling {
    pub polling_interval_ms: u64,
    pub threshold_cooldown_seconds: u64,
    pub max_dumps: u32,
}

impl Default for Sampling {
    fn default() -> Self {
        Self {
            polling_interval_ms: MIN_POLLING_INTERVAL_MS,
            threshold_cooldown_seconds: DEFAULT_COOLDOWN_SECONDS,
            max_dumps: DEFAULT_MAX_DUMPS,
        }
    }
}

impl Sampling {
    /// Polling interval minimum is 1000ms (spec §5 "Timeouts"); values below
    /// that are clamped rather than rejected.
    pub fn clamp_polling_interval(mut self) -> Self {
        if self.polling_interval_ms < MIN_POLLING_INTERVAL_MS {
            self.polling_interval_ms = MIN_POLLING_INTERVAL_MS;
        }
        self
    }
}

/// Output location and naming (spec §3 "Output").
#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub dump_dir: PathBuf,
    pub base_filename: Option<String>,
    pub overwrite: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dump_dir: PathBuf::from("."),
            base_filename: None,
            overwrite: false,
        }
    }
}

/// Monotonic counters and flags mutated only by a target's own trigger
/// threads and the signal controller (spec §5 "Shared state").
#[derive(Debug, Default)]
pub struct Counters {
    dumps_collected: AtomicU32,
    dumps_in_flight: AtomicU32,
    terminated: AtomicBool,
    current_memory_threshold_index: AtomicUsize,
}

impl Counters {
    pub fn dumps_collected(&self) -> u32 {
        self.dumps_collected.load(Ordering::SeqCst)
    }

    pub fn dumps_in_flight(&self) -> u32 {
        self.dumps_in_flight.load(Ordering::SeqCst)
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    pub fn set_terminated(&self) {
        self.terminated.store(true, Ordering::SeqCst);
    }

    pub fn current_memory_threshold_index(&self) -> usize {
        self.current_memory_threshold_index.load(Ordering::SeqCst)
    }

    pub fn advance_memory_threshold_index(&self) {
        self.current_memory_threshold_index.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn begin_dump(&self) {
        self.dumps_in_flight.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn end_dump(&self) {
        self.dumps_in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    /// Increments `dumps_collected`, saturating at `max`. Returns the new
    /// count. Invariant (spec §3): this counter never decreases and never
    /// exceeds `max`.
    pub(crate) fn record_dump_collected(&self, max: u32) -> u32 {
        loop {
            let current = self.dumps_collected.load(Ordering::SeqCst);
            if current >= max {
                return current;
            }
            let next = current + 1;
            if self
                .dumps_collected
                .compare_exchange(current, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return next;
            }
        }
    }
}

/// Coordination handles shared by every trigger thread for a target (spec
/// §3 "Coordination handles").
pub struct CoordinationHandles {
    pub quit: Arc<Event>,
    pub start_monitoring: Arc<Event>,
    pub available_dump_slots: Arc<Semaphore>,
    pub ptrace_mutex: Arc<Mutex<()>>,
    pub status_socket_ready: Arc<(Mutex<bool>, Condvar)>,
}

impl Default for CoordinationHandles {
    fn default() -> Self {
        Self {
            quit: Arc::new(Event::manual_reset()),
            start_monitoring: Arc::new(Event::manual_reset()),
            available_dump_slots: Arc::new(Semaphore::new(1)),
            ptrace_mutex: Arc::new(Mutex::new(())),
            status_socket_ready: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }
}

/// State owned by other processes/kernel objects, not by this process'
/// memory alone (spec §3 "External state").
#[derive(Default)]
pub struct ExternalState {
    pub writer_child_pid: Mutex<Option<i32>>,
    pub status_socket_path: Mutex<Option<PathBuf>>,
}

/// Identity of the monitored target (spec §3 "Identity").
#[derive(Debug, Clone)]
pub struct Identity {
    pub selector: TargetSelector,
    pub pid: i32,
    pub start_time_ticks: u64,
    pub resolved_name: String,
}

/// Stable index into the supervisor's configuration arena (design notes:
/// "Model as arena-held Configurations (stable indices) and pass indices to
/// trigger threads" rather than cyclic Arc back-references).
pub type ConfigId = usize;

/// One per monitored target. Immutable once constructed except through the
/// interior-mutability of `Counters`/`CoordinationHandles`/`ExternalState`.
pub struct Configuration {
    pub id: ConfigId,
    pub identity: Identity,
    pub thresholds: Thresholds,
    pub sampling: Sampling,
    pub output: OutputConfig,
    pub diagnostic_log: bool,
    pub counters: Counters,
    pub handles: CoordinationHandles,
    pub external: ExternalState,
    pub is_managed: AtomicBool,
    /// Set by the supervisor once the resource tracker has successfully
    /// attached (spec §4.4); trigger threads read this to decide whether to
    /// schedule a post-dump snapshot. `None` if restrack is off or disabled
    /// itself after a failed kernel-probe load.
    pub resource_tracker: Mutex<Option<Arc<crate::restrack::ResourceTracker>>>,
}

impl Configuration {
    pub fn new(
        id: ConfigId,
        identity: Identity,
        thresholds: Thresholds,
        sampling: Sampling,
        output: OutputConfig,
        diagnostic_log: bool,
    ) -> Self {
        Self {
            id,
            identity,
            thresholds,
            sampling,
            output,
            diagnostic_log,
            counters: Counters::default(),
            handles: CoordinationHandles::default(),
            external: ExternalState::default(),
            is_managed: AtomicBool::new(false),
            resource_tracker: Mutex::new(None),
        }
    }

    pub fn set_resource_tracker(&self, tracker: Arc<crate::restrack::ResourceTracker>) {
        *self.resource_tracker.lock().unwrap() = Some(tracker);
    }

    pub fn resource_tracker(&self) -> Option<Arc<crate::restrack::ResourceTracker>> {
        self.resource_tracker.lock().unwrap().clone()
    }

    pub fn pid(&self) -> i32 {
        self.identity.pid
    }

    pub fn process_name(&self) -> &str {
        &self.identity.resolved_name
    }

    pub fn is_quitting(&self) -> bool {
        self.handles.quit.is_set() || self.counters.is_terminated()
    }

    pub fn request_quit(&self) {
        self.handles.quit.set();
    }

    pub fn dump_cap_reached(&self) -> bool {
        self.counters.dumps_collected() >= self.sampling.max_dumps
    }

    pub fn mark_managed(&self, managed: bool) {
        self.is_managed.store(managed, Ordering::SeqCst);
    }

    pub fn is_managed(&self) -> bool {
        self.is_managed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_config() -> Configuration {
        Configuration::new(
            0,
            Identity {
                selector: TargetSelector::Pid(1234),
                pid: 1234,
                start_time_ticks: 10,
                resolved_name: "victim".into(),
            },
            Thresholds::default(),
            Sampling { max_dumps: 2, ..Sampling::default() },
            OutputConfig::default(),
            false,
        )
    }

    #[test]
    fn dumps_collected_never_exceeds_max() {
        let config = make_config();
        assert_eq!(config.counters.record_dump_collected(config.sampling.max_dumps), 1);
        assert_eq!(config.counters.record_dump_collected(config.sampling.max_dumps), 2);
        // Already at cap; must not increment further.
        assert_eq!(config.counters.record_dump_collected(config.sampling.max_dumps), 2);
        assert_eq!(config.counters.dumps_collected(), 2);
    }

    #[test]
    fn dump_cap_reached_reflects_counter() {
        let config = make_config();
        assert!(!config.dump_cap_reached());
        config.counters.record_dump_collected(config.sampling.max_dumps);
        config.counters.record_dump_collected(config.sampling.max_dumps);
        assert!(config.dump_cap_reached());
    }

    #[test]
    fn polling_interval_clamps_below_minimum() {
        let sampling = Sampling { polling_interval_ms: 100, ..Sampling::default() }.clamp_polling_interval();
        assert_eq!(sampling.polling_interval_ms, MIN_POLLING_INTERVAL_MS);
    }
}

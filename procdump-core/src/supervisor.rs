// Monitor supervisor (spec §4.7). Discovers targets, builds a
// `Configuration` per target, spawns its trigger threads, and reaps
// terminated targets.
//
// Grounded on the design notes' arena-of-stable-indices guidance ("Model as
// arena-held Configurations (stable indices) and pass indices to trigger
// threads") and on `libdd-crashtracker::collector::collector_manager`'s
// "track a handle per spawned worker, prune in a separate pass" shape.

use crate::config::{Configuration, Identity, OutputConfig, Sampling, TargetSelector, Thresholds};
use crate::restrack::RestrackHandle;
use crate::triggers;
use procdump_common::process;
use procdump_common::waitable::Event;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Uniquely identifies a monitored target across PID reuse (spec §3
/// invariant: "A target PID is identified uniquely ... by the pair (PID,
/// kernel start-time ticks)").
type TargetKey = (i32, u64);

struct TrackedTarget {
    config: Arc<Configuration>,
    threads: Vec<JoinHandle<()>>,
    restrack: Option<RestrackHandle>,
}

/// One supervisor per orchestrator invocation.
pub struct Supervisor {
    next_id: AtomicUsize,
    global_quit: Arc<Event>,
    targets: Mutex<HashMap<TargetKey, TrackedTarget>>,
}

impl Supervisor {
    pub fn new(global_quit: Arc<Event>) -> Self {
        Self {
            next_id: AtomicUsize::new(0),
            global_quit,
            targets: Mutex::new(HashMap::new()),
        }
    }

    /// Runs the supervisor to completion for `selector`, one of the three
    /// modes in spec §4.7.
    pub fn run(&self, selector: TargetSelector, thresholds: Thresholds, sampling: Sampling, output: OutputConfig, diagnostic_log: bool) {
        match selector {
            TargetSelector::Pid(pid) => self.run_single(pid, None, thresholds, sampling, output, diagnostic_log),
            TargetSelector::Name { name, wait: false } => match process::resolve_name_to_pid(&name) {
                Some(pid) => self.run_single(pid, Some(name), thresholds, sampling, output, diagnostic_log),
                None => tracing::error!("no process named {name} found"),
            },
            TargetSelector::Pgid(pgid) => self.run_group(pgid, thresholds, sampling, output, diagnostic_log),
            TargetSelector::Name { name, wait: true } => self.run_wait_for_name(&name, thresholds, sampling, output, diagnostic_log),
        }
    }

    /// Mode 1: single PID or name. Builds one Configuration, starts
    /// triggers, waits for every trigger thread (and the signal thread) to
    /// join.
    fn run_single(&self, pid: i32, resolved_name: Option<String>, thresholds: Thresholds, sampling: Sampling, output: OutputConfig, diagnostic_log: bool) {
        let Some(key) = self.spawn_target(pid, resolved_name, thresholds, sampling, output, diagnostic_log) else {
            return;
        };
        self.join_target(key);
    }

    /// Mode 2: process group. Scans `/proc` each polling interval for new
    /// group members, prunes terminated targets with a two-pass collect-
    /// then-join, and stops once the group and its tracked targets are both
    /// empty.
    fn run_group(&self, pgid: i32, thresholds: Thresholds, sampling: Sampling, output: OutputConfig, diagnostic_log: bool) {
        let poll_interval = Duration::from_millis(sampling.polling_interval_ms);
        loop {
            if self.global_quit.is_set() {
                break;
            }
            let discovered = process::pids_in_group(pgid);
            for pid in &discovered {
                self.spawn_target(*pid, None, thresholds.clone(), sampling.clone(), output.clone(), diagnostic_log);
            }
            self.prune_terminated();
            if discovered.is_empty() && self.targets.lock().unwrap().is_empty() {
                break;
            }
            thread::sleep(poll_interval);
        }
        self.join_all();
    }

    /// Mode 3: wait for name. Same scan/prune loop as process-group mode,
    /// but never exits on an empty target set (spec §4.7 "loop continues
    /// even when there are zero active targets").
    fn run_wait_for_name(&self, name: &str, thresholds: Thresholds, sampling: Sampling, output: OutputConfig, diagnostic_log: bool) {
        let poll_interval = Duration::from_millis(sampling.polling_interval_ms);
        loop {
            if self.global_quit.is_set() {
                break;
            }
            for pid in process::pids_matching_name(name) {
                self.spawn_target(pid, Some(name.to_string()), thresholds.clone(), sampling.clone(), output.clone(), diagnostic_log);
            }
            self.prune_terminated();
            thread::sleep(poll_interval);
        }
        self.join_all();
    }

    /// Creates a Configuration for `pid` if it is not already tracked under
    /// its (pid, start-time) pair, spawns its trigger threads, and returns
    /// the key it was tracked under.
    fn spawn_target(&self, pid: i32, resolved_name: Option<String>, thresholds: Thresholds, sampling: Sampling, output: OutputConfig, diagnostic_log: bool) -> Option<TargetKey> {
        let stat = process::sample(pid).ok()?;
        let key: TargetKey = (pid, stat.start_time_ticks);
        if self.targets.lock().unwrap().contains_key(&key) {
            return None;
        }

        let identity = Identity {
            selector: TargetSelector::Pid(pid),
            pid,
            start_time_ticks: stat.start_time_ticks,
            resolved_name: resolved_name.unwrap_or(stat.comm),
        };
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let config = Arc::new(Configuration::new(id, identity, thresholds, sampling, output, diagnostic_log));

        let restrack = if config.thresholds.restrack_enabled {
            let handle = RestrackHandle::start(pid, Arc::clone(&config.handles.quit));
            if let Some(handle) = &handle {
                config.set_resource_tracker(handle.tracker());
            }
            handle
        } else {
            None
        };

        let threads = spawn_trigger_threads(&config);
        config.handles.start_monitoring.set();

        self.targets.lock().unwrap().insert(
            key,
            TrackedTarget {
                config,
                threads,
                restrack,
            },
        );
        Some(key)
    }

    fn join_target(&self, key: TargetKey) {
        let target = self.targets.lock().unwrap().remove(&key);
        if let Some(mut target) = target {
            for t in target.threads.drain(..) {
                let _ = t.join();
            }
            if let Some(restrack) = target.restrack.take() {
                restrack.join();
            }
        }
    }

    /// Two-pass prune (spec §4.7 "Pruning uses a small two-pass pattern:
    /// first pass collects terminated entries into a local list, second
    /// pass joins and frees, to avoid mutating the tracking set during
    /// iteration").
    fn prune_terminated(&self) {
        let terminated: Vec<TargetKey> = {
            let targets = self.targets.lock().unwrap();
            targets
                .iter()
                .filter(|(_, t)| t.config.is_quitting() || t.config.dump_cap_reached())
                .map(|(key, _)| *key)
                .collect()
        };
        for key in terminated {
            self.join_target(key);
        }
    }

    fn join_all(&self) {
        let keys: Vec<TargetKey> = self.targets.lock().unwrap().keys().copied().collect();
        for key in keys {
            self.join_target(key);
        }
    }

    /// Invoked by the signal controller (spec §4.8 step 1): sets quit on
    /// every currently tracked Configuration.
    pub fn request_quit_all(&self) {
        for target in self.targets.lock().unwrap().values() {
            target.config.request_quit();
        }
    }

    /// Full per-target shutdown sequence (spec §4.8 steps 1-3): set quit,
    /// kill a live writer child's process group, detach ptrace if the
    /// signal trigger is active. Step 4 (setting the global quit) is the
    /// signal controller's own job once this returns.
    pub fn shutdown(&self) {
        for target in self.targets.lock().unwrap().values() {
            let config = &target.config;
            config.request_quit();

            if let Some(child_pid) = *config.external.writer_child_pid.lock().unwrap() {
                let _ = nix::sys::signal::kill(nix::unistd::Pid::from_raw(-child_pid), nix::sys::signal::Signal::SIGKILL);
            }

            if config.thresholds.signal_number.is_some() {
                let _guard = config.handles.ptrace_mutex.lock().unwrap();
                let _ = nix::sys::ptrace::detach(nix::unistd::Pid::from_raw(config.pid()), None);
            }
        }
    }
}

fn spawn_trigger_threads(config: &Arc<Configuration>) -> Vec<JoinHandle<()>> {
    let mut threads = Vec::with_capacity(7);

    macro_rules! spawn_ref_trigger {
        ($module:path) => {{
            let config = Arc::clone(config);
            threads.push(thread::spawn(move || $module(&config)));
        }};
    }

    spawn_ref_trigger!(triggers::cpu::run);
    spawn_ref_trigger!(triggers::commit::run);
    spawn_ref_trigger!(triggers::threads::run);
    spawn_ref_trigger!(triggers::filedesc::run);
    spawn_ref_trigger!(triggers::timer::run);
    spawn_ref_trigger!(triggers::signal::run);

    {
        let config = Arc::clone(config);
        threads.push(thread::spawn(move || triggers::managed::run(config)));
    }

    threads
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_target_dedupes_by_pid_and_start_time() {
        let supervisor = Supervisor::new(Arc::new(Event::manual_reset()));
        let pid = std::process::id() as i32;
        let thresholds = Thresholds::default();
        let sampling = Sampling::default();
        let output = OutputConfig::default();

        let first = supervisor.spawn_target(pid, None, thresholds.clone(), sampling.clone(), output.clone(), false);
        assert!(first.is_some());
        let second = supervisor.spawn_target(pid, None, thresholds, sampling, output, false);
        assert!(second.is_none(), "second spawn for the same (pid, start_time) must be rejected");

        supervisor.request_quit_all();
        supervisor.join_all();
    }
}

// Signal trigger (spec §4.5 "Signal thread"): a ptrace-SEIZE state machine
// that intercepts a configured signal, dumps the target while it is
// stopped, then resumes it.

use crate::config::{Configuration, DumpKind};
use crate::triggers::{join_pending_snapshots, wait_for_start, write_dump_and_maybe_snapshot};
use nix::sys::ptrace;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use procdump_common::waitable::Event;
use std::thread;
use std::time::Duration;

enum StopOutcome {
    Exited,
    Quit,
    Stopped(Signal),
}

/// Polls `waitpid(target, WNOHANG|WSTOPPED)` so the wait itself can observe
/// `quit` (spec §5 "every blocking call either runs behind wait_for_quit or
/// itself reacts to quit").
fn wait_for_stop(target: Pid, quit: &Event) -> StopOutcome {
    loop {
        if quit.is_set() {
            return StopOutcome::Quit;
        }
        match waitpid(target, Some(WaitPidFlag::WSTOPPED | WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Stopped(_, sig)) => return StopOutcome::Stopped(sig),
            Ok(WaitStatus::Exited(..)) | Ok(WaitStatus::Signaled(..)) => return StopOutcome::Exited,
            Ok(_) => thread::sleep(Duration::from_millis(100)),
            Err(_) => return StopOutcome::Exited,
        }
    }
}

pub fn run(config: &Configuration) {
    let Some(signal_number) = config.thresholds.signal_number else {
        return;
    };
    let Ok(configured_signal) = Signal::try_from(signal_number) else {
        tracing::error!("signal trigger: unsupported signal number {signal_number}");
        return;
    };
    if !wait_for_start(config) {
        return;
    }

    let target = Pid::from_raw(config.pid());
    let mut pending_snapshots = Vec::new();

    if let Err(e) = ptrace::seize(target, ptrace::Options::empty()) {
        tracing::error!("signal trigger: ptrace-SEIZE failed for pid {}: {e}", config.pid());
        return;
    }

    loop {
        if config.is_quitting() {
            break;
        }
        match wait_for_stop(target, &config.handles.quit) {
            StopOutcome::Exited | StopOutcome::Quit => {
                let _ = ptrace::detach(target, None);
                break;
            }
            StopOutcome::Stopped(stop_signal) => {
                let _ptrace_guard = config.handles.ptrace_mutex.lock().unwrap();
                if stop_signal == configured_signal {
                    if let Err(e) = ptrace::detach(target, Some(Signal::SIGSTOP)) {
                        tracing::error!("signal trigger: detach-with-stop failed: {e}");
                        break;
                    }

                    tracing::info!("Trigger: Signal:{} on process ID: {}", signal_number, config.pid());
                    write_dump_and_maybe_snapshot(config, DumpKind::Signal, &mut pending_snapshots);
                    let _ = kill(target, Signal::SIGCONT);

                    if config.dump_cap_reached() {
                        let _ = kill(target, configured_signal);
                        break;
                    }
                    if let Err(e) = ptrace::seize(target, ptrace::Options::empty()) {
                        tracing::error!("signal trigger: re-seize failed: {e}");
                        break;
                    }
                } else {
                    let _ = ptrace::cont(target, Some(stop_signal));
                }
            }
        }
    }

    join_pending_snapshots(pending_snapshots);
}

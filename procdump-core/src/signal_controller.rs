// Signal controller (spec §4.8). A process-wide singleton: blocks
// SIGINT/SIGTERM in the calling thread (and therefore in every thread
// spawned afterward, which inherit the blocked mask) and services them
// synchronously from a dedicated `sigwait` thread.
//
// Grounded on the original C `SignalThread` (src/ProcDumpConfiguration.c) for
// the block-then-sigwait shape, and on `CoordinationHandles`'s ptrace mutex
// for serializing ptrace requests against the signal trigger.

use crate::supervisor::Supervisor;
use nix::sys::signal::{self, SigSet, Signal, SigmaskHow};
use procdump_common::waitable::Event;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

pub struct SignalController {
    thread: JoinHandle<()>,
}

impl SignalController {
    /// Blocks SIGINT and SIGTERM for the calling thread, then spawns the
    /// dedicated handler thread. Must run before any trigger thread is
    /// spawned so the block is inherited everywhere (a thread's signal mask
    /// at creation is copied from its parent).
    pub fn install(supervisor: Arc<Supervisor>, global_quit: Arc<Event>) -> nix::Result<Self> {
        let mut mask = SigSet::empty();
        mask.add(Signal::SIGINT);
        mask.add(Signal::SIGTERM);
        signal::sigprocmask(SigmaskHow::SIG_BLOCK, Some(&mask), None)?;

        let thread = thread::spawn(move || loop {
            let signal = match mask.wait() {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!("sigwait failed: {e}");
                    return;
                }
            };
            tracing::info!("received {signal:?}, shutting down");
            supervisor.shutdown();
            global_quit.set();
            return;
        });

        Ok(Self { thread })
    }

    pub fn join(self) {
        let _ = self.thread.join();
    }
}

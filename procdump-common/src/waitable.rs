// Waitable primitives: manual/auto-reset events and counting semaphores,
// with single- and multi-wait support.
//
// Grounded on the WinAPI-style WaitForSingleObject/WaitForMultipleObjects
// shim in the original ProcDump-for-Linux C sources (include/Handle.h,
// src/Handle.c): one short-lived waiter thread per handle in `wait_any`,
// coordinated by a shared condition variable, with a cleanup event so
// waiters that lost the race can drain without leaking.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Outcome of a wait on one or more waitable handles.
///
/// `Abandoned` is never produced by this module on its own; it is
/// synthesized by higher layers (the dump writer, trigger threads) when an
/// external condition such as the dump cap or target termination must
/// pre-empt an otherwise-successful wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Signaled,
    Timeout,
    Abandoned,
}

/// A boolean latch. Manual-reset events stay signaled until explicitly
/// reset; auto-reset events drain back to unsignaled as soon as one waiter
/// wakes up from them.
#[derive(Debug)]
pub struct Event {
    state: Mutex<EventState>,
    cond: Condvar,
}

#[derive(Debug)]
struct EventState {
    triggered: bool,
    manual_reset: bool,
}

impl Event {
    pub fn new(manual_reset: bool, initial: bool) -> Self {
        Self {
            state: Mutex::new(EventState {
                triggered: initial,
                manual_reset,
            }),
            cond: Condvar::new(),
        }
    }

    pub fn manual_reset() -> Self {
        Self::new(true, false)
    }

    pub fn set(&self) {
        let mut state = self.state.lock().unwrap();
        state.triggered = true;
        self.cond.notify_all();
    }

    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        state.triggered = false;
    }

    pub fn is_set(&self) -> bool {
        self.state.lock().unwrap().triggered
    }

    /// Blocks until the event is signaled or `timeout` elapses. `None` means
    /// wait forever.
    pub fn wait(&self, timeout: Option<Duration>) -> WaitOutcome {
        let mut state = self.state.lock().unwrap();
        let deadline = timeout.map(|d| Instant::now() + d);
        while !state.triggered {
            match deadline {
                None => state = self.cond.wait(state).unwrap(),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return WaitOutcome::Timeout;
                    }
                    let (guard, res) = self.cond.wait_timeout(state, deadline - now).unwrap();
                    state = guard;
                    if res.timed_out() && !state.triggered {
                        return WaitOutcome::Timeout;
                    }
                }
            }
        }
        if !state.manual_reset {
            state.triggered = false;
        }
        WaitOutcome::Signaled
    }
}

/// A non-negative counting semaphore.
#[derive(Debug)]
pub struct Semaphore {
    count: Mutex<usize>,
    cond: Condvar,
}

impl Semaphore {
    pub fn new(initial: usize) -> Self {
        Self {
            count: Mutex::new(initial),
            cond: Condvar::new(),
        }
    }

    pub fn release(&self) {
        let mut count = self.count.lock().unwrap();
        *count += 1;
        self.cond.notify_one();
    }

    pub fn wait(&self, timeout: Option<Duration>) -> WaitOutcome {
        let mut count = self.count.lock().unwrap();
        let deadline = timeout.map(|d| Instant::now() + d);
        while *count == 0 {
            match deadline {
                None => count = self.cond.wait(count).unwrap(),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return WaitOutcome::Timeout;
                    }
                    let (guard, res) = self.cond.wait_timeout(count, deadline - now).unwrap();
                    count = guard;
                    if res.timed_out() && *count == 0 {
                        return WaitOutcome::Timeout;
                    }
                }
            }
        }
        *count -= 1;
        WaitOutcome::Signaled
    }
}

/// A handle that can participate in `wait_any`.
#[derive(Clone)]
pub enum WaitHandle {
    Event(Arc<Event>),
    Semaphore(Arc<Semaphore>),
}

impl WaitHandle {
    fn wait(&self, timeout: Option<Duration>) -> WaitOutcome {
        match self {
            WaitHandle::Event(e) => e.wait(timeout),
            WaitHandle::Semaphore(s) => s.wait(timeout),
        }
    }
}

/// Blocks until the first handle signals, returning its index, or until
/// `timeout` elapses. If multiple handles are already signaled on entry,
/// the index returned is unspecified but is guaranteed to be one of the
/// signaled handles.
///
/// Implementation: one short-lived waiter thread per handle, each polling
/// its handle with a 5-second slice against the shared absolute deadline so
/// it can also notice `stop` being requested after the coordinator already
/// picked a winner. The first waiter to observe a signal records its result
/// under `coordinator`'s mutex and notifies; the coordinator then releases
/// every waiter via `can_cleanup` so none of them leak.
pub fn wait_any(handles: &[WaitHandle], timeout: Option<Duration>) -> (WaitOutcome, Option<usize>) {
    if handles.is_empty() {
        return (WaitOutcome::Timeout, None);
    }

    struct Coordinator {
        mutex: Mutex<Option<(usize, WaitOutcome)>>,
        cond: Condvar,
        can_cleanup: Event,
        remaining: AtomicUsize,
    }

    let coordinator = Arc::new(Coordinator {
        mutex: Mutex::new(None),
        cond: Condvar::new(),
        can_cleanup: Event::manual_reset(),
        remaining: AtomicUsize::new(handles.len()),
    });

    let deadline = timeout.map(|d| Instant::now() + d);
    let mut joins = Vec::with_capacity(handles.len());

    for (index, handle) in handles.iter().enumerate() {
        let handle = handle.clone();
        let coordinator = Arc::clone(&coordinator);
        joins.push(thread::spawn(move || {
            let poll_slice = Duration::from_secs(5);
            let outcome = loop {
                let remaining_time = match deadline {
                    None => poll_slice,
                    Some(deadline) => {
                        let now = Instant::now();
                        if now >= deadline {
                            break WaitOutcome::Timeout;
                        }
                        std::cmp::min(poll_slice, deadline - now)
                    }
                };
                match handle.wait(Some(remaining_time)) {
                    WaitOutcome::Signaled => break WaitOutcome::Signaled,
                    WaitOutcome::Timeout => {
                        if deadline.is_some() && Instant::now() >= deadline.unwrap() {
                            break WaitOutcome::Timeout;
                        }
                        continue;
                    }
                    WaitOutcome::Abandoned => break WaitOutcome::Abandoned,
                }
            };

            {
                let mut winner = coordinator.mutex.lock().unwrap();
                if winner.is_none() {
                    *winner = Some((index, outcome));
                    coordinator.cond.notify_all();
                }
            }

            coordinator.can_cleanup.wait(None);
            coordinator.remaining.fetch_sub(1, Ordering::SeqCst);
        }));
    }

    let winner = {
        let mut winner = coordinator.mutex.lock().unwrap();
        while winner.is_none() {
            winner = coordinator.cond.wait(winner).unwrap();
        }
        winner.take().unwrap()
    };

    coordinator.can_cleanup.set();
    for j in joins {
        let _ = j.join();
    }

    match winner {
        (_, WaitOutcome::Timeout) => (WaitOutcome::Timeout, None),
        (index, outcome) => (outcome, Some(index)),
    }
}

/// Convenience wrapper matching the common `wait_any({quit, other}, timeout)`
/// idiom used throughout the trigger threads (spec §4.5 step 2): returns
/// `true` if waiting timed out (i.e. monitoring should continue), `false` if
/// quit won the race.
pub fn wait_for_quit(quit: &Event, poll_interval: Duration) -> bool {
    quit.wait(Some(poll_interval)) == WaitOutcome::Timeout
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn manual_reset_event_stays_signaled() {
        let e = Event::new(true, false);
        e.set();
        assert_eq!(e.wait(Some(Duration::from_millis(10))), WaitOutcome::Signaled);
        assert_eq!(e.wait(Some(Duration::from_millis(10))), WaitOutcome::Signaled);
    }

    #[test]
    fn auto_reset_event_drains_on_wake() {
        let e = Event::new(false, true);
        assert_eq!(e.wait(Some(Duration::from_millis(10))), WaitOutcome::Signaled);
        assert_eq!(e.wait(Some(Duration::from_millis(10))), WaitOutcome::Timeout);
    }

    #[test]
    fn semaphore_single_slot_serializes() {
        let s = Semaphore::new(1);
        assert_eq!(s.wait(Some(Duration::from_millis(10))), WaitOutcome::Signaled);
        assert_eq!(s.wait(Some(Duration::from_millis(10))), WaitOutcome::Timeout);
        s.release();
        assert_eq!(s.wait(Some(Duration::from_millis(10))), WaitOutcome::Signaled);
    }

    #[test]
    fn wait_any_picks_signaled_handle() {
        let quit = Arc::new(Event::manual_reset());
        let slot = Arc::new(Semaphore::new(0));
        let handles = vec![
            WaitHandle::Event(Arc::clone(&quit)),
            WaitHandle::Semaphore(Arc::clone(&slot)),
        ];
        slot.release();
        let (outcome, index) = wait_any(&handles, Some(Duration::from_secs(1)));
        assert_eq!(outcome, WaitOutcome::Signaled);
        assert_eq!(index, Some(1));
    }

    #[test]
    fn wait_any_times_out_when_nothing_signals() {
        let quit = Arc::new(Event::manual_reset());
        let slot = Arc::new(Semaphore::new(0));
        let handles = vec![WaitHandle::Event(quit), WaitHandle::Semaphore(slot)];
        let (outcome, index) = wait_any(&handles, Some(Duration::from_millis(50)));
        assert_eq!(outcome, WaitOutcome::Timeout);
        assert_eq!(index, None);
    }

    #[test]
    fn wait_for_quit_reports_continue_until_quit_set() {
        let quit = Event::manual_reset();
        assert!(wait_for_quit(&quit, Duration::from_millis(20)));
        quit.set();
        assert!(!wait_for_quit(&quit, Duration::from_millis(20)));
    }
}

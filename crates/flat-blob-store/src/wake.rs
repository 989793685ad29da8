//! A single-slot, single-shot wake-up signal: `signal()` sets the slot if
//! it isn't already set (idempotent — a burst of signals between two waits
//! collapses to one wake-up), and `wait()` blocks until the slot is set and
//! then drains it back to empty. This is the primitive behind the
//! `PeriodicSyncer`'s "block-put" and "block-release" wake-up channels: get
//! the close-on-first-set / reset-on-drain semantics wrong and the syncer
//! either stalls forever or busy-loops.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

pub struct WakeSignal {
    set: Mutex<bool>,
    cvar: Condvar,
}

impl WakeSignal {
    pub fn new() -> Self {
        WakeSignal {
            set: Mutex::new(false),
            cvar: Condvar::new(),
        }
    }

    /// Set the slot, waking any waiter. A no-op if already set.
    pub fn signal(&self) {
        let mut guard = self.set.lock().unwrap();
        if !*guard {
            *guard = true;
            self.cvar.notify_all();
        }
    }

    /// Block until signaled, then drain back to empty.
    pub fn wait(&self) {
        let mut guard = self.set.lock().unwrap();
        while !*guard {
            guard = self.cvar.wait(guard).unwrap();
        }
        *guard = false;
    }

    /// Block until signaled or `timeout` elapses. Returns whether it was
    /// signaled (and, if so, drains the slot) or timed out (slot left as
    /// empty — there was nothing to drain).
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = self.set.lock().unwrap();
        let (mut guard, result) = self
            .cvar
            .wait_timeout_while(guard, timeout, |set| !*set)
            .unwrap();
        let was_signaled = !result.timed_out();
        if was_signaled {
            *guard = false;
        }
        was_signaled
    }
}

impl Default for WakeSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn signal_before_wait_is_not_lost() {
        let wake = WakeSignal::new();
        wake.signal();
        wake.wait(); // should return immediately
    }

    #[test]
    fn burst_of_signals_collapses_to_one_wake() {
        let wake = Arc::new(WakeSignal::new());
        wake.signal();
        wake.signal();
        wake.signal();
        wake.wait();
        // Slot is drained; a fresh wait with a short timeout should time out.
        assert!(!wake.wait_timeout(Duration::from_millis(20)));
    }

    #[test]
    fn wait_blocks_until_signaled_from_another_thread() {
        let wake = Arc::new(WakeSignal::new());
        let wake2 = wake.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            wake2.signal();
        });
        wake.wait();
        handle.join().unwrap();
    }

    #[test]
    fn wait_timeout_reports_timeout_when_never_signaled() {
        let wake = WakeSignal::new();
        assert!(!wake.wait_timeout(Duration::from_millis(10)));
    }
}

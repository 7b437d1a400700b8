use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// A one-way `NOT_DONE -> DONE` cell shared between the thread that
/// finishes a step and the thread that depends on it.
///
/// Reads are a single atomic load. Waiters are woken on `set_done` and also
/// re-check the cell every poll interval.
#[derive(Debug, Default)]
pub struct AwaitFlag {
    done: AtomicBool,
    lock: Mutex<()>,
    changed: Condvar,
}

impl AwaitFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Marks the flag done and wakes every waiter. Idempotent.
    pub fn set_done(&self) {
        self.done.store(true, Ordering::Release);
        let _guard = self.lock.lock();
        self.changed.notify_all();
    }

    /// Blocks until the flag is done.
    ///
    /// The flag is re-checked at least every `poll_interval`. With a
    /// `deadline`, gives up once that much time has passed. Returns whether
    /// the flag was observed done.
    pub fn wait_done(&self, poll_interval: Duration, deadline: Option<Duration>) -> bool {
        let started = Instant::now();
        let mut guard = self.lock.lock();
        loop {
            if self.is_done() {
                return true;
            }
            let mut step = poll_interval;
            if let Some(limit) = deadline {
                let elapsed = started.elapsed();
                if elapsed >= limit {
                    return false;
                }
                step = step.min(limit - elapsed);
            }
            self.changed.wait_for(&mut guard, step);
        }
    }
}

use log::debug;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use crate::errors::{Result, TxError};
use crate::executor::deadline_after;

const PENDING: u8 = 0;
const SIGNALED: u8 = 1;

/// A deferred result attached to a [`Task`] by the signalling side and
/// invoked by the waiter once it wakes up.
pub type Producer<T> = Box<dyn FnOnce() -> Result<T> + Send>;

/// Observable state of a [`Task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// No signal has reached the task yet.
    Pending,
    /// A signal won the race; its producer is (or was) stored in the task.
    Signaled,
}

enum Slot<T> {
    Empty,
    Ready(Producer<T>),
    Consumed,
}

/// A single-use blocking slot connecting one waiting thread with whichever
/// thread delivers its result first.
///
/// The `Pending -> Signaled` transition is a single compare-and-set on the
/// task state, so concurrent signals (a coordinator reply racing the local
/// timeout, for instance) resolve to exactly one winner. Losing signals are
/// dropped without touching the stored producer.
///
/// The waiter parks on a condition variable; nothing spins.
pub struct Task<T> {
    key: String,
    state: AtomicU8,
    slot: Mutex<Slot<T>>,
    ready: Condvar,
}

impl<T> Task<T> {
    /// Creates a pending task identified by `key`.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            state: AtomicU8::new(PENDING),
            slot: Mutex::new(Slot::Empty),
            ready: Condvar::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn state(&self) -> TaskState {
        match self.state.load(Ordering::Acquire) {
            PENDING => TaskState::Pending,
            _ => TaskState::Signaled,
        }
    }

    pub fn is_signaled(&self) -> bool {
        self.state() == TaskState::Signaled
    }

    /// Resolves the task with `producer` if no other signal got there first.
    ///
    /// Returns `true` when this call won the race and woke the waiter,
    /// `false` when the task was already signaled (the producer is dropped).
    pub fn signal(&self, producer: Producer<T>) -> bool {
        if self
            .state
            .compare_exchange(PENDING, SIGNALED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Task {} already signaled, ignoring late signal", self.key);
            return false;
        }

        let mut slot = self.slot.lock();
        *slot = Slot::Ready(producer);
        self.ready.notify_one();
        debug!("Task {} signaled", self.key);
        true
    }

    /// Resolves the task with a closure evaluated on the waiting thread.
    pub fn signal_with<F>(&self, f: F) -> bool
    where
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        self.signal(Box::new(f))
    }

    /// Resolves the task with a plain value.
    pub fn signal_value(&self, value: T) -> bool
    where
        T: Send + 'static,
    {
        self.signal(Box::new(move || Ok::<T, TxError>(value)))
    }

    /// Parks until the task is signaled, then runs the stored producer.
    ///
    /// # Errors
    ///
    /// Propagates the producer's error, or returns [`TxError::TaskConsumed`]
    /// when the result was already taken by an earlier wait.
    pub fn wait(&self) -> Result<T> {
        self.wait_with(|| {})
    }

    /// Like [`Task::wait`], but runs `on_parked` once the caller holds the
    /// task lock and before it blocks for the first time.
    ///
    /// A signal cannot be delivered while `on_parked` runs, so anything the
    /// hook releases observes the waiter as already parked. The hook also
    /// runs when the signal arrived before the wait started.
    pub fn wait_with<F>(&self, on_parked: F) -> Result<T>
    where
        F: FnOnce(),
    {
        let mut slot = self.slot.lock();
        on_parked();
        loop {
            match std::mem::replace(&mut *slot, Slot::Consumed) {
                Slot::Ready(producer) => {
                    drop(slot);
                    return producer();
                }
                Slot::Consumed => return Err(TxError::TaskConsumed(self.key.clone())),
                Slot::Empty => {
                    *slot = Slot::Empty;
                    self.ready.wait(&mut slot);
                }
            }
        }
    }

    /// Bounded form of [`Task::wait`]. Returns `Ok(None)` if no signal
    /// arrived within `timeout`; the task stays pending in that case.
    pub fn wait_for(&self, timeout: Duration) -> Result<Option<T>> {
        let deadline = deadline_after(timeout);
        let mut slot = self.slot.lock();
        loop {
            match std::mem::replace(&mut *slot, Slot::Consumed) {
                Slot::Ready(producer) => {
                    drop(slot);
                    return producer().map(Some);
                }
                Slot::Consumed => return Err(TxError::TaskConsumed(self.key.clone())),
                Slot::Empty => {
                    *slot = Slot::Empty;
                    if self.ready.wait_until(&mut slot, deadline).timed_out()
                        && matches!(*slot, Slot::Empty)
                    {
                        return Ok(None);
                    }
                }
            }
        }
    }
}

impl<T> std::fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("key", &self.key)
            .field("state", &self.state())
            .finish()
    }
}

use log::debug;
use parking_lot::Mutex;

use crate::errors::{Result, TxError};
use crate::rendezvous::Task;

/// The caller's side of a participation.
///
/// Holds the business call's result until it is safe to hand it out, and
/// parks the caller until then. Runtime errors attached with
/// [`OutcomeLatch::attach_error`] take precedence over the latched business
/// result. The first [`OutcomeLatch::release`] decides what the caller sees.
pub struct OutcomeLatch<T> {
    outcome: Mutex<Option<Result<T>>>,
    released: Task<T>,
}

impl<T: Send + 'static> OutcomeLatch<T> {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            outcome: Mutex::new(None),
            released: Task::new(label),
        }
    }

    /// Stores the business call's result. Ignored if a runtime error is
    /// already attached.
    pub fn latch(&self, result: Result<T>) {
        let mut outcome = self.outcome.lock();
        if let Some(Err(err)) = outcome.as_ref() {
            if err.is_runtime() {
                debug!("Keeping attached error over latched result: {}", err);
                return;
            }
        }
        *outcome = Some(result);
    }

    /// Replaces whatever the caller would see with `err`.
    pub fn attach_error(&self, err: TxError) {
        *self.outcome.lock() = Some(Err(err));
    }

    /// Wakes the caller with the current outcome.
    ///
    /// Returns `false` if the caller was already released; the outcome then
    /// stays with the first release.
    pub fn release(&self) -> bool {
        let mut outcome = self.outcome.lock();
        if self.released.is_signaled() {
            return false;
        }
        let result = outcome
            .take()
            .unwrap_or_else(|| Err(TxError::Other("participation produced no outcome".to_string())));
        self.released.signal(Box::new(move || result))
    }

    pub fn is_released(&self) -> bool {
        self.released.is_signaled()
    }

    /// Parks until released and returns the outcome.
    pub fn wait(&self) -> Result<T> {
        self.released.wait()
    }
}

impl<T> std::fmt::Debug for OutcomeLatch<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutcomeLatch")
            .field("released", &self.released)
            .finish()
    }
}

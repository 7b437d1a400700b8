use log::{error, warn};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use crate::errors::Result;

/// Opaque handle of a nested local transaction.
///
/// Issued by [`LocalTransactionManager::begin_nested`] and handed back to
/// the same manager for commit or rollback.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TxStatus {
    id: u64,
}

impl TxStatus {
    pub fn new(id: u64) -> Self {
        Self { id }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Trait for the local (relational) transaction manager a participant's
/// work runs in.
///
/// The participant runtime only ever opens nested scopes: committing or
/// rolling back the handle returned by [`begin_nested`] must leave any
/// enclosing transaction untouched.
///
/// Implementations must be `Send` and `Sync`, since commit and rollback are
/// issued from pool threads.
///
/// [`begin_nested`]: LocalTransactionManager::begin_nested
///
/// # Examples
///
/// ```no_run
/// use txgroup::prelude::*;
/// use std::sync::atomic::{AtomicU64, Ordering};
///
/// #[derive(Default)]
/// struct SavepointManager {
///     next: AtomicU64,
/// }
///
/// impl LocalTransactionManager for SavepointManager {
///     fn begin_nested(&self) -> Result<TxStatus> {
///         let id = self.next.fetch_add(1, Ordering::SeqCst);
///         println!("SAVEPOINT sp_{}", id);
///         Ok(TxStatus::new(id))
///     }
///
///     fn commit(&self, status: &TxStatus) -> Result<()> {
///         println!("RELEASE SAVEPOINT sp_{}", status.id());
///         Ok(())
///     }
///
///     fn rollback(&self, status: &TxStatus) -> Result<()> {
///         println!("ROLLBACK TO SAVEPOINT sp_{}", status.id());
///         Ok(())
///     }
/// }
/// ```
pub trait LocalTransactionManager: Send + Sync {
    /// Opens a nested transaction scope.
    ///
    /// # Errors
    ///
    /// Returns [`TxError::LocalTransaction`](crate::errors::TxError::LocalTransaction)
    /// if the scope cannot be opened.
    fn begin_nested(&self) -> Result<TxStatus>;

    /// Commits the nested scope identified by `status`.
    fn commit(&self, status: &TxStatus) -> Result<()>;

    /// Rolls back the nested scope identified by `status`.
    fn rollback(&self, status: &TxStatus) -> Result<()>;
}

/// An open nested transaction owned by one participation.
///
/// Rolled back on drop unless it was settled first, so an unwinding
/// participation never leaves its local work open.
pub struct NestedTx {
    manager: Arc<dyn LocalTransactionManager>,
    status: TxStatus,
    settled: bool,
}

impl NestedTx {
    /// Opens a nested scope on `manager`.
    pub fn begin(manager: &Arc<dyn LocalTransactionManager>) -> Result<Self> {
        let status = manager.begin_nested()?;
        Ok(Self {
            manager: Arc::clone(manager),
            status,
            settled: false,
        })
    }

    pub fn status(&self) -> &TxStatus {
        &self.status
    }

    pub fn is_settled(&self) -> bool {
        self.settled
    }

    /// Commits the scope. On failure the scope stays open for a rollback.
    pub fn commit(&mut self) -> Result<()> {
        self.manager.commit(&self.status)?;
        self.settled = true;
        Ok(())
    }

    /// Rolls the scope back. A failed rollback is logged, not retried.
    pub fn rollback(&mut self) {
        self.settled = true;
        if let Err(e) = self.manager.rollback(&self.status) {
            error!("Rollback of local transaction {} failed: {}", self.status.id(), e);
        }
    }
}

impl Drop for NestedTx {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        warn!(
            "Local transaction {} left unsettled, rolling back",
            self.status.id()
        );
        // May run while unwinding; a second panic here would abort.
        if catch_unwind(AssertUnwindSafe(|| self.rollback())).is_err() {
            error!("Rollback of local transaction {} panicked", self.status.id());
        }
    }
}

impl std::fmt::Debug for NestedTx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NestedTx")
            .field("status", &self.status)
            .field("settled", &self.settled)
            .finish()
    }
}

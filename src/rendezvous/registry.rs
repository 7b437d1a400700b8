use ahash::AHashMap as HashMap;
use log::debug;
use parking_lot::Mutex;
use std::ops::Deref;
use std::sync::Arc;

use crate::errors::{Result, TxError};
use crate::rendezvous::task::{Producer, Task};

/// Keyed store of pending [`Task`]s.
///
/// One thread creates a task and parks on it; a later thread (a network
/// callback, a timer) looks it up by key and signals it. Entries are removed
/// through the [`TaskLease`] returned by [`TaskRegistry::create_task`], so
/// every created task leaves the registry exactly once.
pub struct TaskRegistry<T> {
    tasks: Mutex<HashMap<String, Arc<Task<T>>>>,
}

impl<T> Default for TaskRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TaskRegistry<T> {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a new pending task under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`TxError::DuplicateKey`] if a task with this key is live.
    pub fn create_task(self: &Arc<Self>, key: impl Into<String>) -> Result<TaskLease<T>> {
        let key = key.into();
        let mut tasks = self.tasks.lock();
        if tasks.contains_key(&key) {
            return Err(TxError::DuplicateKey(key));
        }
        let task = Arc::new(Task::new(key.clone()));
        tasks.insert(key.clone(), Arc::clone(&task));
        debug!("Created rendezvous task {}", key);

        Ok(TaskLease {
            registry: Arc::clone(self),
            task,
        })
    }

    /// Looks a task up without removing it.
    pub fn get_task(&self, key: &str) -> Option<Arc<Task<T>>> {
        self.tasks.lock().get(key).cloned()
    }

    /// Removes the task stored under `key`, returning it if present.
    pub fn remove(&self, key: &str) -> Option<Arc<Task<T>>> {
        let removed = self.tasks.lock().remove(key);
        if removed.is_some() {
            debug!("Removed rendezvous task {}", key);
        }
        removed
    }

    pub fn contains(&self, key: &str) -> bool {
        self.tasks.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    /// Keys of the tasks that have not been signaled yet.
    pub fn pending_keys(&self) -> Vec<String> {
        self.tasks
            .lock()
            .values()
            .filter(|task| !task.is_signaled())
            .map(|task| task.key().to_string())
            .collect()
    }

    /// Signals every registered task with a producer built by `make`.
    ///
    /// The map lock is released before any task is signaled. Returns the
    /// number of signals that won their race.
    pub fn signal_all<F>(&self, make: F) -> usize
    where
        F: Fn(&str) -> Producer<T>,
    {
        let tasks: Vec<Arc<Task<T>>> = self.tasks.lock().values().cloned().collect();
        tasks
            .iter()
            .filter(|task| task.signal(make(task.key())))
            .count()
    }

    fn release(&self, task: &Arc<Task<T>>) {
        let mut tasks = self.tasks.lock();
        if tasks
            .get(task.key())
            .is_some_and(|stored| Arc::ptr_eq(stored, task))
        {
            tasks.remove(task.key());
            debug!("Released rendezvous task {}", task.key());
        }
    }
}

/// Scoped ownership of a registered [`Task`].
///
/// Dropping the lease removes the task from its registry, on every exit
/// path. A lease never removes a different task that was registered under
/// the same key after its own was removed.
pub struct TaskLease<T> {
    registry: Arc<TaskRegistry<T>>,
    task: Arc<Task<T>>,
}

impl<T> TaskLease<T> {
    /// Shared handle to the leased task.
    pub fn task(&self) -> &Arc<Task<T>> {
        &self.task
    }
}

impl<T> Deref for TaskLease<T> {
    type Target = Task<T>;

    fn deref(&self) -> &Self::Target {
        &self.task
    }
}

impl<T> Drop for TaskLease<T> {
    fn drop(&mut self) {
        self.registry.release(&self.task);
    }
}

impl<T> std::fmt::Debug for TaskLease<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("TaskLease").field(&self.task).finish()
    }
}

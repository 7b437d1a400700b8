use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;

use crate::decision::Decision;
use crate::executor::{ScheduledJob, Scheduler};
use crate::rendezvous::TaskRegistry;

/// Forces a rollback decision onto a participant's task when the
/// coordinator stays silent for the group wait time.
///
/// The deferred check goes through [`Task::signal_value`], whose atomic
/// transition makes it a no-op once any other decision has landed.
/// Dropping the guard cancels the pending check.
///
/// [`Task::signal_value`]: crate::rendezvous::Task::signal_value
#[derive(Debug)]
pub struct TimeoutGuard {
    key: String,
    job: ScheduledJob,
}

impl TimeoutGuard {
    /// Schedules the forced rollback for the task registered under `key`.
    pub fn arm(
        scheduler: &Scheduler,
        registry: &Arc<TaskRegistry<Decision>>,
        key: &str,
        wait_time: Duration,
    ) -> Self {
        let registry = Arc::clone(registry);
        let task_key = key.to_string();
        let job = scheduler.schedule(wait_time, move || {
            let Some(task) = registry.get_task(&task_key) else {
                debug!("Timeout fired for {} after its task was released", task_key);
                return;
            };
            if task.signal_value(Decision::TimeoutRollback) {
                info!(
                    "No decision for {} within {:?}, forcing rollback",
                    task_key, wait_time
                );
            }
        });

        Self {
            key: key.to_string(),
            job,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Withdraws the pending check.
    pub fn cancel(&self) {
        self.job.cancel();
    }
}

impl Drop for TimeoutGuard {
    fn drop(&mut self) {
        self.job.cancel();
    }
}

use log::{debug, error, info, warn};
use rand::distr::{Alphanumeric, SampleString};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use crate::config::ParticipantConfig;
use crate::coordinator::{GroupCoordinator, NetworkSession};
use crate::decision::Decision;
use crate::errors::{BoxError, Result, TxError};
use crate::executor::{Scheduler, WorkerPool};
use crate::group::ParticipantOutcome;
use crate::guard::{GroupCloseBarrier, TimeoutGuard};
use crate::local_tx::{LocalTransactionManager, NestedTx};
use crate::outcome::OutcomeLatch;
use crate::rendezvous::{AwaitFlag, Producer, TaskRegistry};

/// txgroup prelude
pub mod prelude {
    pub use crate::config::*;
    pub use crate::coordinator::*;
    pub use crate::decision::*;
    pub use crate::errors::*;
    pub use crate::group::*;
    pub use crate::local_tx::*;
    pub use crate::outcome::*;
    pub use crate::participant::{GroupRole, ParticipantService};
    pub use crate::rendezvous::*;
}

/// How a participation relates to the transaction group it joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupRole {
    /// The participation that started the group. It asks the coordinator to
    /// close the group once its own work is parked, and its caller waits
    /// until the decision has been applied locally.
    Initiator,
    /// A participation that joined an existing group, typically on behalf
    /// of a remote upstream caller. Its caller is released with the latched
    /// business result as soon as the local work is parked; the decision is
    /// applied in the background.
    Member,
}

/// Marks the main-path flag done when the decision phase exits, whichever
/// way it exits, so the group-close barrier cannot wait on a path that is
/// gone.
struct MarkDoneOnDrop(Arc<AwaitFlag>);

impl Drop for MarkDoneOnDrop {
    fn drop(&mut self) {
        self.0.set_done();
    }
}

/// Runs participations in coordinator-driven distributed transactions.
///
/// A participation joins a group, runs the business call inside a nested
/// local transaction, reports the local result, and then parks until the
/// coordinator's decision (or the group wait time) settles whether the
/// local transaction commits or rolls back.
pub struct ParticipantService {
    tx_manager: Arc<dyn LocalTransactionManager>,
    coordinator: Arc<dyn GroupCoordinator>,
    session: Arc<dyn NetworkSession>,
    registry: Arc<TaskRegistry<Decision>>,
    pool: WorkerPool,
    scheduler: Scheduler,
    barrier: GroupCloseBarrier,
    config: ParticipantConfig,
}

impl ParticipantService {
    /// Creates a participant service and starts its timer thread.
    ///
    /// # Errors
    ///
    /// Returns [`TxError::InvalidConfig`] for an invalid `config`, or
    /// [`TxError::Other`] if the timer thread cannot be started.
    pub fn new(
        tx_manager: Arc<dyn LocalTransactionManager>,
        coordinator: Arc<dyn GroupCoordinator>,
        session: Arc<dyn NetworkSession>,
        config: ParticipantConfig,
    ) -> Result<Self> {
        config.validate()?;

        let pool = WorkerPool::new(config.pool_thread_name.clone(), config.pool_keep_alive);
        let scheduler = Scheduler::new(config.scheduler_thread_name.clone())?;
        let barrier = GroupCloseBarrier::new(config.barrier_poll_interval, config.barrier_deadline);

        Ok(Self {
            tx_manager,
            coordinator,
            session,
            registry: Arc::new(TaskRegistry::new()),
            pool,
            scheduler,
            barrier,
            config,
        })
    }

    /// The registry holding one pending task per participation awaiting its
    /// decision, keyed by participant id.
    pub fn registry(&self) -> &Arc<TaskRegistry<Decision>> {
        &self.registry
    }

    pub fn config(&self) -> &ParticipantConfig {
        &self.config
    }

    /// Runs `call` as a participant of the group `group_id`.
    ///
    /// The participation itself runs on a pool thread; the calling thread
    /// parks until the participation releases it (see [`GroupRole`]).
    ///
    /// # Returns
    ///
    /// The business call's value, or its error wrapped in
    /// [`TxError::Business`], unless the runtime attached an error of its
    /// own ([`TxError::GroupRegistration`], [`TxError::GroupState`],
    /// [`TxError::Network`], [`TxError::Timeout`]), which then takes
    /// precedence.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::sync::Arc;
    /// use txgroup::prelude::*;
    ///
    /// fn transfer(service: &Arc<ParticipantService>, group_id: &str) -> Result<u64> {
    ///     service.run(group_id, GroupRole::Initiator, || {
    ///         // Writes issued here belong to the nested local transaction.
    ///         Ok(42u64)
    ///     })
    /// }
    /// ```
    pub fn run<T, F>(self: &Arc<Self>, group_id: &str, role: GroupRole, call: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> std::result::Result<T, BoxError> + Send + 'static,
    {
        let latch = Arc::new(OutcomeLatch::new(group_id));
        let service = Arc::clone(self);
        let worker_latch = Arc::clone(&latch);
        let group_id = group_id.to_string();

        self.pool.execute(move || {
            let participation = catch_unwind(AssertUnwindSafe(|| {
                if let Some(outcome) = service.service_in_thread(&group_id, &worker_latch, call) {
                    service.service_wait(role, &worker_latch, outcome);
                }
            }));
            if participation.is_err() {
                error!("Participation in group {} panicked", group_id);
                worker_latch.attach_error(TxError::Other(format!(
                    "participation in group {} panicked",
                    group_id
                )));
                worker_latch.release();
            }
        })?;

        latch.wait()
    }

    /// Execution phase: joins the group, runs `call` in a nested local
    /// transaction and reports the result to the coordinator.
    ///
    /// The business result is latched into `latch`, not returned. Returns
    /// `None` when the participation ended early; `latch` is released with
    /// the reason in that case and no decision phase must follow.
    pub fn service_in_thread<T, F>(
        &self,
        group_id: &str,
        latch: &OutcomeLatch<T>,
        call: F,
    ) -> Option<ParticipantOutcome>
    where
        T: Send + 'static,
        F: FnOnce() -> std::result::Result<T, BoxError>,
    {
        let participant_id = self.generate_participant_id();

        let group = match self.coordinator.add_participant(group_id, &participant_id) {
            Ok(Some(group)) => group,
            Ok(None) => {
                self.abort_registration(latch, format!("group {} not found", group_id));
                return None;
            }
            Err(e) => {
                self.abort_registration(latch, format!("coordinator unreachable: {}", e));
                return None;
            }
        };
        debug!("Participant {} joined group {}", participant_id, group_id);

        let mut tx = match NestedTx::begin(&self.tx_manager) {
            Ok(tx) => tx,
            Err(e) => {
                error!("Could not open local transaction for {}: {}", participant_id, e);
                self.coordinator.report_outcome(group_id, &participant_id, false);
                latch.attach_error(e);
                latch.release();
                return None;
            }
        };

        let task = match self.registry.create_task(participant_id.clone()) {
            Ok(task) => task,
            Err(e) => {
                error!("Could not register participant {}: {}", participant_id, e);
                tx.rollback();
                self.coordinator.report_outcome(group_id, &participant_id, false);
                latch.attach_error(e);
                latch.release();
                return None;
            }
        };

        let result = match catch_unwind(AssertUnwindSafe(call)) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(TxError::Business(e)),
            Err(_) => Err(TxError::Business("business call panicked".into())),
        };
        let succeeded = result.is_ok();
        if let Err(e) = &result {
            debug!("Business call of {} failed: {}", participant_id, e);
        }
        latch.latch(result);

        let report_accepted = self
            .coordinator
            .report_outcome(group_id, &participant_id, succeeded);

        Some(ParticipantOutcome {
            tx,
            task,
            group,
            report_accepted,
        })
    }

    /// Decision phase: parks until the group's decision reaches this
    /// participant, applies it to the local transaction and releases
    /// `latch`.
    pub fn service_wait<T>(
        &self,
        role: GroupRole,
        latch: &Arc<OutcomeLatch<T>>,
        outcome: ParticipantOutcome,
    ) where
        T: Send + 'static,
    {
        let ParticipantOutcome {
            mut tx,
            task,
            group,
            report_accepted,
        } = outcome;
        let participant_id = task.key().to_string();

        let timeout = TimeoutGuard::arm(
            &self.scheduler,
            &self.registry,
            &participant_id,
            group.wait_time(),
        );

        let main_done = Arc::new(AwaitFlag::new());
        let close_flag = Arc::new(AwaitFlag::new());
        let _main_done_on_exit = MarkDoneOnDrop(Arc::clone(&main_done));

        if !report_accepted {
            warn!(
                "Coordinator rejected the outcome of {} in group {}",
                participant_id,
                group.group_id()
            );
            latch.attach_error(TxError::GroupState(format!(
                "coordinator rejected the outcome of participant {} in group {}",
                participant_id,
                group.group_id()
            )));
        }

        self.spawn_group_close(
            role,
            !report_accepted || role == GroupRole::Member,
            group.group_id(),
            latch,
            Arc::clone(&main_done),
            close_flag,
        );

        info!(
            "Participant {} waiting up to {:?} for the decision of group {}",
            participant_id,
            group.wait_time(),
            group.group_id()
        );
        let parked = Arc::clone(&main_done);
        let decision = task.wait_with(move || parked.set_done());
        timeout.cancel();

        self.apply_decision(&mut tx, &participant_id, decision, report_accepted, latch);

        drop(task);
        latch.release();
    }

    /// Delivers the coordinator's decision to the participant waiting under
    /// `participant_id`.
    ///
    /// Returns `Ok(false)` if another decision reached it first.
    ///
    /// # Errors
    ///
    /// Returns [`TxError::TaskNotFound`] if no participation is waiting
    /// under that id.
    pub fn deliver_decision(&self, participant_id: &str, decision: Decision) -> Result<bool> {
        let task = self
            .registry
            .get_task(participant_id)
            .ok_or_else(|| TxError::TaskNotFound(participant_id.to_string()))?;
        Ok(task.signal_value(decision))
    }

    /// [`ParticipantService::deliver_decision`] from a raw decision code.
    ///
    /// # Errors
    ///
    /// Returns [`TxError::UnknownDecision`] for an invalid code, otherwise
    /// as [`ParticipantService::deliver_decision`].
    pub fn deliver_decision_code(&self, participant_id: &str, code: i32) -> Result<bool> {
        self.deliver_decision(participant_id, Decision::from_code(code)?)
    }

    /// Rolls back every participation still waiting for a decision, after
    /// the connection to the coordinator was lost.
    ///
    /// Returns the number of participations this resolved.
    pub fn on_coordinator_disconnected(&self) -> usize {
        let resolved = self.registry.signal_all(|_| -> Producer<Decision> {
            Box::new(|| Ok::<_, TxError>(Decision::NetworkRollback))
        });
        warn!(
            "Coordinator disconnected, forced rollback of {} waiting participants",
            resolved
        );
        resolved
    }

    fn generate_participant_id(&self) -> String {
        let mut rng = rand::rng();
        loop {
            let id = Alphanumeric.sample_string(&mut rng, self.config.participant_id_len);
            if !self.registry.contains(&id) {
                return id;
            }
        }
    }

    fn abort_registration<T: Send + 'static>(&self, latch: &OutcomeLatch<T>, reason: String) {
        error!("Could not join transaction group: {}", reason);
        latch.attach_error(TxError::GroupRegistration(reason));
        latch.release();
        self.session.restart();
    }

    fn spawn_group_close<T>(
        &self,
        role: GroupRole,
        release_early: bool,
        group_id: &str,
        latch: &Arc<OutcomeLatch<T>>,
        main_done: Arc<AwaitFlag>,
        close_flag: Arc<AwaitFlag>,
    ) where
        T: Send + 'static,
    {
        let barrier = self.barrier;
        let coordinator = Arc::clone(&self.coordinator);
        let latch = Arc::clone(latch);
        let group = group_id.to_string();

        let submitted = self.pool.execute(move || {
            if !barrier.wait(&main_done, &close_flag) {
                return;
            }
            if release_early {
                latch.release();
            }
            if role == GroupRole::Initiator {
                debug!("Requesting close of group {}", group);
                coordinator.request_group_close(&group, close_flag);
            }
        });

        if let Err(e) = submitted {
            error!("Could not schedule close of group {}: {}", group_id, e);
        }
    }

    fn apply_decision<T>(
        &self,
        tx: &mut NestedTx,
        participant_id: &str,
        decision: Result<Decision>,
        report_accepted: bool,
        latch: &OutcomeLatch<T>,
    ) where
        T: Send + 'static,
    {
        let decision = match decision {
            Ok(decision) => decision,
            Err(e) => {
                warn!(
                    "Waiting for the decision of {} failed, rolling back: {}",
                    participant_id, e
                );
                tx.rollback();
                return;
            }
        };

        info!(
            "Participant {} received decision {:?} ({})",
            participant_id,
            decision,
            decision.code()
        );

        if decision.is_commit() && !report_accepted {
            warn!(
                "Ignoring commit for {}: its outcome report was rejected",
                participant_id
            );
            tx.rollback();
            return;
        }

        if decision.is_commit() {
            if let Err(e) = tx.commit() {
                error!("Commit of {} failed, rolling back: {}", participant_id, e);
                tx.rollback();
                latch.attach_error(e);
            }
            return;
        }

        tx.rollback();
        if let Some(err) = decision.caller_error() {
            latch.attach_error(err);
        }
    }
}

use std::sync::Arc;

use crate::errors::Result;
use crate::group::TransactionGroup;
use crate::rendezvous::AwaitFlag;

/// Trait for the remote service that owns transaction groups and issues
/// the global decision.
///
/// The decision itself does not come back through this trait: the network
/// layer delivers it to
/// [`ParticipantService::deliver_decision`](crate::participant::ParticipantService::deliver_decision)
/// once the coordinator has collected every vote.
pub trait GroupCoordinator: Send + Sync {
    /// Enrolls `participant_id` in the group `group_id`.
    ///
    /// Returns `Ok(None)` when the group is unknown to the coordinator and
    /// `Err` when it could not be reached. Both abort the participation.
    fn add_participant(
        &self,
        group_id: &str,
        participant_id: &str,
    ) -> Result<Option<TransactionGroup>>;

    /// Reports whether the participant's local work succeeded.
    ///
    /// Returns whether the coordinator accepted the report.
    fn report_outcome(&self, group_id: &str, participant_id: &str, succeeded: bool) -> bool;

    /// Asks the coordinator to close the group and start deciding.
    ///
    /// Only called once `eligible` is done, that is once the initiating
    /// participant's own work is parked awaiting the decision.
    fn request_group_close(&self, group_id: &str, eligible: Arc<AwaitFlag>);
}

/// The session used to reach the coordinator.
pub trait NetworkSession: Send + Sync {
    /// Re-establishes the session after the coordinator proved unreachable.
    fn restart(&self);
}

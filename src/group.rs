use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::decision::Decision;
use crate::local_tx::{NestedTx, TxStatus};
use crate::rendezvous::TaskLease;

/// A distributed transaction group as seen by one participant.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TransactionGroup {
    group_id: String,
    participant_id: String,
    /// How long the participant waits for a decision before rolling back.
    wait_time: Duration,
}

impl TransactionGroup {
    pub fn new(
        group_id: impl Into<String>,
        participant_id: impl Into<String>,
        wait_time: Duration,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            participant_id: participant_id.into(),
            wait_time,
        }
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    pub fn wait_time(&self) -> Duration {
        self.wait_time
    }
}

/// Everything the decision phase needs from the execution phase of one
/// participation. Consumed by value.
#[derive(Debug)]
pub struct ParticipantOutcome {
    pub(crate) tx: NestedTx,
    pub(crate) task: TaskLease<Decision>,
    pub(crate) group: TransactionGroup,
    pub(crate) report_accepted: bool,
}

impl ParticipantOutcome {
    pub fn status(&self) -> &TxStatus {
        self.tx.status()
    }

    pub fn group(&self) -> &TransactionGroup {
        &self.group
    }

    pub fn participant_id(&self) -> &str {
        self.task.key()
    }

    /// Whether the coordinator accepted the local outcome report.
    pub fn report_accepted(&self) -> bool {
        self.report_accepted
    }
}

use serde::{Deserialize, Serialize};

use crate::errors::{Result, TxError};

/// The global outcome delivered to a participant for its local transaction.
///
/// The integer codes are the ones exchanged with the coordinator:
/// `1` commit, `0` rollback, `-1` rollback forced by a coordinator network
/// failure and `-2` rollback forced by the local timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Decision {
    /// Every participant succeeded, the local transaction is committed.
    Commit,
    /// The coordinator directed a rollback.
    Rollback,
    /// The coordinator could not be reached while waiting for the decision.
    NetworkRollback,
    /// No decision arrived before the group wait time elapsed.
    TimeoutRollback,
}

impl Decision {
    /// Returns the wire code of this decision.
    pub fn code(self) -> i32 {
        match self {
            Decision::Commit => 1,
            Decision::Rollback => 0,
            Decision::NetworkRollback => -1,
            Decision::TimeoutRollback => -2,
        }
    }

    /// Parses a wire code.
    ///
    /// # Errors
    ///
    /// Returns [`TxError::UnknownDecision`] for codes outside `-2..=1`.
    pub fn from_code(code: i32) -> Result<Self> {
        match code {
            1 => Ok(Decision::Commit),
            0 => Ok(Decision::Rollback),
            -1 => Ok(Decision::NetworkRollback),
            -2 => Ok(Decision::TimeoutRollback),
            other => Err(TxError::UnknownDecision(other)),
        }
    }

    pub fn is_commit(self) -> bool {
        matches!(self, Decision::Commit)
    }

    /// The error a caller observes for this decision, if any.
    ///
    /// A coordinator-directed rollback carries no error of its own: the
    /// caller keeps seeing the latched business outcome.
    pub fn caller_error(self) -> Option<TxError> {
        match self {
            Decision::NetworkRollback => Some(TxError::Network),
            Decision::TimeoutRollback => Some(TxError::Timeout),
            Decision::Commit | Decision::Rollback => None,
        }
    }
}

impl TryFrom<i32> for Decision {
    type Error = TxError;

    fn try_from(code: i32) -> Result<Self> {
        Decision::from_code(code)
    }
}

impl From<Decision> for i32 {
    fn from(decision: Decision) -> Self {
        decision.code()
    }
}

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::{Result, TxError};

/// Runtime knobs for a [`ParticipantService`](crate::participant::ParticipantService).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ParticipantConfig {
    /// Length of the generated participant identifiers.
    pub participant_id_len: usize,
    /// Upper bound between two checks of the main-path flag in the group-close barrier.
    pub barrier_poll_interval: Duration,
    /// Give up on the group-close barrier after this long. `None` waits until
    /// the main path reports in.
    pub barrier_deadline: Option<Duration>,
    /// Idle time after which a pool worker exits.
    pub pool_keep_alive: Duration,
    pub pool_thread_name: String,
    pub scheduler_thread_name: String,
}

impl Default for ParticipantConfig {
    fn default() -> Self {
        Self {
            participant_id_len: 8,
            barrier_poll_interval: Duration::from_millis(10),
            barrier_deadline: None,
            pool_keep_alive: Duration::from_secs(60),
            pool_thread_name: "txgroup-worker".to_string(),
            scheduler_thread_name: "txgroup-timer".to_string(),
        }
    }
}

impl ParticipantConfig {
    /// Checks the configuration for values the runtime cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`TxError::InvalidConfig`] on a zero id length, a zero poll
    /// interval or a zero barrier deadline.
    pub fn validate(&self) -> Result<()> {
        if self.participant_id_len == 0 {
            return Err(TxError::InvalidConfig(
                "participant_id_len must be greater than zero".to_string(),
            ));
        }
        if self.barrier_poll_interval.is_zero() {
            return Err(TxError::InvalidConfig(
                "barrier_poll_interval must be greater than zero".to_string(),
            ));
        }
        if self.barrier_deadline.is_some_and(|d| d.is_zero()) {
            return Err(TxError::InvalidConfig(
                "barrier_deadline must be greater than zero when set".to_string(),
            ));
        }
        Ok(())
    }
}

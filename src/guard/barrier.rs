use log::{debug, warn};
use std::time::Duration;

use crate::rendezvous::AwaitFlag;

/// Holds group closure back until the main execution path is parked on its
/// decision.
#[derive(Debug, Clone, Copy)]
pub struct GroupCloseBarrier {
    poll_interval: Duration,
    deadline: Option<Duration>,
}

impl GroupCloseBarrier {
    pub fn new(poll_interval: Duration, deadline: Option<Duration>) -> Self {
        Self {
            poll_interval,
            deadline,
        }
    }

    /// Waits for `main_done`, then marks `close_flag` done.
    ///
    /// Returns `false` without touching `close_flag` if the configured
    /// deadline passes first.
    pub fn wait(&self, main_done: &AwaitFlag, close_flag: &AwaitFlag) -> bool {
        if !main_done.wait_done(self.poll_interval, self.deadline) {
            warn!(
                "Main path did not finish within {:?}, group stays open",
                self.deadline
            );
            return false;
        }
        close_flag.set_done();
        debug!("Main path parked, group close is eligible");
        true
    }
}

/*!
 * Bounded Command Wait
 *
 * Spin briefly, then sleep between polls until a deadline. Command completion usually
 * lands within a few microseconds, so the spin phase covers the common case.
 */

use crate::core::limits::CMD_SPIN_POLLS;
use crate::core::SchedConfig;
use std::hint;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// The condition did not hold before the deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("condition not met within {waited:?}")]
pub struct WaitTimeout {
    pub waited: Duration,
}

/// Bounded poll loop
#[derive(Debug, Clone, Copy)]
pub struct BoundedWait {
    timeout: Duration,
    poll_interval: Duration,
    spin_polls: u32,
}

impl BoundedWait {
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval,
            spin_polls: CMD_SPIN_POLLS,
        }
    }

    pub fn from_config(config: &SchedConfig) -> Self {
        Self::new(config.cmd_timeout(), config.cmd_poll_interval())
    }

    pub fn with_spin_polls(mut self, spin_polls: u32) -> Self {
        self.spin_polls = spin_polls;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Poll `done` until it returns true or the budget runs out
    ///
    /// The condition is always checked once more after the deadline so a completion
    /// that raced the last sleep is not reported as a timeout.
    pub fn until(&self, mut done: impl FnMut() -> bool) -> Result<(), WaitTimeout> {
        let start = Instant::now();
        let mut polls = 0u32;

        loop {
            if done() {
                return Ok(());
            }
            let waited = start.elapsed();
            if waited >= self.timeout {
                return if done() { Ok(()) } else { Err(WaitTimeout { waited }) };
            }
            if polls < self.spin_polls {
                polls += 1;
                hint::spin_loop();
            } else {
                thread::sleep(self.poll_interval.min(self.timeout - waited));
            }
        }
    }
}

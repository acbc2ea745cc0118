//! Two-stage inactivity watchdog.
//!
//! After `soft` without any inbound activity the watchdog raises a warning;
//! after a further `hard` it declares the turn dead. Any activity before the
//! hard deadline returns it to [`WatchdogState::Quiet`].
//!
//! The watchdog is a plain state machine over [`tokio::time::Instant`]; it
//! never sleeps itself. The engine awaits [`InactivityWatchdog::deadline`]
//! and then calls [`InactivityWatchdog::poll`], which keeps it testable
//! under a paused tokio clock.

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogState {
    /// Not watching a turn.
    Disarmed,
    Quiet,
    SoftWarning,
    HardTimeout,
}

/// Alarm raised by [`InactivityWatchdog::poll`]. Each fires at most once per
/// period of inactivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogAlarm {
    SoftWarning,
    HardTimeout,
}

#[derive(Debug, Clone)]
pub struct InactivityWatchdog {
    soft: Duration,
    hard: Duration,
    last_activity: Instant,
    state: WatchdogState,
}

impl InactivityWatchdog {
    pub fn new(soft: Duration, hard: Duration) -> Self {
        Self {
            soft,
            hard,
            last_activity: Instant::now(),
            state: WatchdogState::Disarmed,
        }
    }

    pub fn state(&self) -> WatchdogState {
        self.state
    }

    /// Starts watching from `now`.
    pub fn arm(&mut self, now: Instant) {
        self.last_activity = now;
        self.state = WatchdogState::Quiet;
    }

    pub fn disarm(&mut self) {
        self.state = WatchdogState::Disarmed;
    }

    /// Records inbound activity. Ignored once the turn has timed out.
    pub fn record_activity(&mut self, now: Instant) {
        match self.state {
            WatchdogState::Quiet | WatchdogState::SoftWarning => {
                self.last_activity = now;
                self.state = WatchdogState::Quiet;
            }
            WatchdogState::Disarmed | WatchdogState::HardTimeout => {}
        }
    }

    /// Instant at which the next alarm is due, if any.
    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            WatchdogState::Quiet => Some(self.last_activity + self.soft),
            WatchdogState::SoftWarning => Some(self.last_activity + self.soft + self.hard),
            WatchdogState::Disarmed | WatchdogState::HardTimeout => None,
        }
    }

    /// Advances the state machine to `now` and returns the alarm that became
    /// due, if any. A single poll moves at most one stage.
    pub fn poll(&mut self, now: Instant) -> Option<WatchdogAlarm> {
        let deadline = self.deadline()?;
        if now < deadline {
            return None;
        }
        match self.state {
            WatchdogState::Quiet => {
                self.state = WatchdogState::SoftWarning;
                Some(WatchdogAlarm::SoftWarning)
            }
            WatchdogState::SoftWarning => {
                self.state = WatchdogState::HardTimeout;
                Some(WatchdogAlarm::HardTimeout)
            }
            WatchdogState::Disarmed | WatchdogState::HardTimeout => None,
        }
    }

    /// Whole seconds since the last recorded activity.
    pub fn inactive_secs(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.last_activity).as_secs()
    }
}

//! A one-shot alarm that fires after a condition persists for a debounce
//! duration.
//!
//! The job pipeline uses it to report sustained template fetch failures
//! (daemon down, node still syncing) once, instead of warning on every poll
//! tick, and to report recovery once.
//!
//! ```text
//!          check(true)              elapsed >= debounce
//!  Idle ──────────────► Timing ──────────────────────► Fired
//!   ▲                     │                              │
//!   └──── check(false) ───┘                              │
//!   └──────────────────── check(false) ──────────────────┘
//! ```

use std::time::Duration;

use tokio::time::Instant;

/// Result of [`DebouncedAlarm::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmStatus {
    /// Condition is false, alarm is idle.
    Idle,

    /// Condition is true but within the debounce window.
    Pending,

    /// Debounce elapsed. Returned exactly once per episode.
    Triggered,

    /// Already triggered, condition still true.
    Active,

    /// Was triggered, condition just became false. Returned exactly once.
    Resolved,
}

#[derive(Debug)]
enum State {
    Idle,
    Timing(Instant),
    Fired,
}

/// A one-shot alarm with debounce.
#[derive(Debug)]
pub struct DebouncedAlarm {
    debounce: Duration,
    state: State,
}

impl DebouncedAlarm {
    /// Create a new alarm with the given debounce duration.
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            state: State::Idle,
        }
    }

    /// Update the alarm with the current condition.
    pub fn check(&mut self, condition: bool) -> AlarmStatus {
        match (&self.state, condition) {
            (State::Idle, false) => AlarmStatus::Idle,

            (State::Idle, true) => {
                self.state = State::Timing(Instant::now());
                AlarmStatus::Pending
            }

            (State::Timing(_), false) => {
                self.state = State::Idle;
                AlarmStatus::Idle
            }

            (State::Timing(since), true) => {
                if since.elapsed() >= self.debounce {
                    self.state = State::Fired;
                    AlarmStatus::Triggered
                } else {
                    AlarmStatus::Pending
                }
            }

            (State::Fired, false) => {
                self.state = State::Idle;
                AlarmStatus::Resolved
            }

            (State::Fired, true) => AlarmStatus::Active,
        }
    }

    /// Time the condition has been continuously true, if it is.
    pub fn failing_for(&self) -> Option<Duration> {
        match self.state {
            State::Timing(since) => Some(since.elapsed()),
            State::Fired => Some(self.debounce),
            State::Idle => None,
        }
    }
}

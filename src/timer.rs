//! A one-shot, cancellable deadline.
//!
//! Timers here never run callbacks on their own. The component that arms a
//! [`Timer`] owns it, and the session loop asks that component to poll it
//! with the current [`Instant`]. Dropping or cancelling the owner is enough to
//! guarantee the timer never fires afterwards.

use std::time::{Duration, Instant};

/// Longest period a timer will wait. Longer requests are clamped to it.
pub const MAX_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

/// A deadline that can be armed, cancelled, and polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timer {
    period: Duration,
    deadline: Option<Instant>,
}

impl Timer {
    /// Make a disarmed timer that will fire `period` after each [`Timer::arm`].
    pub fn new(period: Duration) -> Self {
        Self {
            period: period.min(MAX_PERIOD),
            deadline: None,
        }
    }

    /// Start (or restart) the countdown from `now`.
    pub fn arm(&mut self, now: Instant) {
        // Falls back to the clamp if even that does not fit the platform clock.
        self.deadline = now.checked_add(self.period).or_else(|| now.checked_add(MAX_PERIOD));
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Returns `true` exactly once when `now` has reached the deadline, and
    /// disarms the timer.
    pub fn fire(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

/// The earliest of several optional deadlines.
pub fn earliest(deadlines: impl IntoIterator<Item = Option<Instant>>) -> Option<Instant> {
    deadlines.into_iter().flatten().min()
}

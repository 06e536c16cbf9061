//! Single-shot debounce timer.
//!
//! Models the index's deferred write-to-disk scheduling: each mutation re-arms
//! the timer, replacing any pending deadline, so a burst of mutations fires
//! exactly once after the quiet period.

use std::time::{Duration, Instant};

/// A single-shot timer with an explicit armed/disarmed state.
///
/// The timer never spawns a thread or sleeps; the owner polls it with
/// [`DebounceTimer::take_if_due`] and can schedule wakeups from
/// [`DebounceTimer::deadline`].
#[derive(Debug, Default)]
pub struct DebounceTimer {
    deadline: Option<Instant>,
}

impl DebounceTimer {
    /// Create a disarmed timer.
    pub fn new() -> Self {
        Self { deadline: None }
    }

    /// Arm the timer to fire `delay` from now.
    ///
    /// Re-arming an armed timer replaces the previous deadline; pending
    /// firings never stack.
    pub fn reset(&mut self, delay: Duration) {
        self.deadline = Some(Instant::now() + delay);
    }

    /// Disarm the timer without firing.
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// Whether a deadline is pending.
    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// The pending deadline, if armed.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Disarm and report `true` if the deadline has passed.
    pub fn take_if_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

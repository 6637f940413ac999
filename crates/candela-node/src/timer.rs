//! Rearmable inactivity deadlines.

use std::time::{Duration, Instant};

/// A single-shot deadline used to detect "no more messages of this kind
/// are coming" rather than to wait a fixed duration: every relevant
/// message rearms it, and it only fires once a full window passes with
/// no rearm.
///
/// The deadline is polled by the event loop, never delivered by callback,
/// so "waiting for quiet" is an inspectable state rather than a nested
/// blocking wait.
#[derive(Debug, Default)]
pub struct QuietTimer {
    deadline: Option<Instant>,
}

impl QuietTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule (or reschedule) the deadline `window` from now, cancelling
    /// any pending one.
    pub fn rearm(&mut self, window: Duration) {
        self.deadline = Some(Instant::now() + window);
    }

    /// Drop any pending deadline.
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// Whether a deadline is pending or fired-but-unconsumed.
    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Level-triggered observation, consumed on the first `true`.
    pub fn poll_fired(&mut self) -> bool {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn unarmed_never_fires() {
        let mut timer = QuietTimer::new();
        assert!(!timer.is_armed());
        assert!(!timer.poll_fired());
    }

    #[test]
    fn fires_once_after_window() {
        let mut timer = QuietTimer::new();
        timer.rearm(Duration::from_millis(5));
        assert!(timer.is_armed());
        assert!(!timer.poll_fired());

        sleep(Duration::from_millis(10));
        assert!(timer.poll_fired());
        // Consumed.
        assert!(!timer.poll_fired());
        assert!(!timer.is_armed());
    }

    #[test]
    fn rearm_pushes_the_deadline_out() {
        let mut timer = QuietTimer::new();
        timer.rearm(Duration::from_millis(20));
        sleep(Duration::from_millis(12));
        timer.rearm(Duration::from_millis(20));
        sleep(Duration::from_millis(12));
        // 24ms elapsed overall, but only 12ms since the rearm.
        assert!(!timer.poll_fired());
        sleep(Duration::from_millis(12));
        assert!(timer.poll_fired());
    }

    #[test]
    fn cancel_discards_pending_deadline() {
        let mut timer = QuietTimer::new();
        timer.rearm(Duration::ZERO);
        timer.cancel();
        assert!(!timer.poll_fired());
    }

    #[test]
    fn zero_window_fires_immediately() {
        let mut timer = QuietTimer::new();
        timer.rearm(Duration::ZERO);
        assert!(timer.poll_fired());
    }
}

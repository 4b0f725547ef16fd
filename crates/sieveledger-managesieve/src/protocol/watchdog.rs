//! Deadline tracking for stalled exchanges and idle keep-alives.

use std::time::{Duration, Instant};

/// A restartable one-shot deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Watchdog {
    interval: Duration,
    deadline: Option<Instant>,
}

impl Watchdog {
    /// Creates a disarmed watchdog.
    #[must_use]
    pub const fn new(interval: Duration) -> Self {
        Self {
            interval,
            deadline: None,
        }
    }

    /// Returns the configured interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Starts or restarts the countdown from `now`.
    pub fn arm(&mut self, now: Instant) {
        self.deadline = Some(now + self.interval);
    }

    /// Stops the countdown.
    pub const fn disarm(&mut self) {
        self.deadline = None;
    }

    /// Returns the deadline while armed.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns true if armed and the deadline has passed.
    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_arm_and_expire() {
        let start = Instant::now();
        let mut dog = Watchdog::new(Duration::from_secs(20));
        assert!(!dog.is_expired(start + Duration::from_secs(100)));

        dog.arm(start);
        assert_eq!(dog.deadline(), Some(start + Duration::from_secs(20)));
        assert!(!dog.is_expired(start + Duration::from_secs(19)));
        assert!(dog.is_expired(start + Duration::from_secs(20)));

        dog.arm(start + Duration::from_secs(10));
        assert!(!dog.is_expired(start + Duration::from_secs(20)));

        dog.disarm();
        assert!(dog.deadline().is_none());
    }
}

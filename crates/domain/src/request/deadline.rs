//! Execution deadline passed into every backend call.

use std::time::{Duration, Instant};

/// Absolute point in time by which an `Execute` call must return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    /// Creates a deadline `budget` from now.
    #[must_use]
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
            budget,
        }
    }

    /// Creates a deadline from a millisecond budget.
    #[must_use]
    pub fn after_millis(millis: u64) -> Self {
        Self::after(Duration::from_millis(millis))
    }

    /// The instant at which the deadline expires.
    #[must_use]
    pub const fn instant(&self) -> Instant {
        self.at
    }

    /// The budget this deadline was created with.
    #[must_use]
    pub const fn budget(&self) -> Duration {
        self.budget
    }

    /// Budget in whole milliseconds, for error reporting.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn budget_ms(&self) -> u64 {
        self.budget.as_millis() as u64
    }

    /// Time left before expiry (zero once expired).
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    /// Returns true once the deadline has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remaining_shrinks() {
        let deadline = Deadline::after_millis(10_000);
        assert!(!deadline.is_expired());
        assert!(deadline.remaining() <= Duration::from_millis(10_000));
        assert_eq!(deadline.budget_ms(), 10_000);
    }

    #[test]
    fn test_zero_budget_is_expired() {
        let deadline = Deadline::after(Duration::ZERO);
        assert!(deadline.is_expired());
        assert_eq!(deadline.remaining(), Duration::ZERO);
    }
}

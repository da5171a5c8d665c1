//! System clock adapter

use chrono::{DateTime, Utc};
use conduit_application::Clock;

/// Wall-clock time from the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Creates a new system clock.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock frozen at one instant, for signing and expiry tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_system_clock() {
        let before = Utc::now();
        let now = SystemClock::new().now();
        assert!(now >= before);
    }

    #[test]
    fn test_fixed_clock() {
        let at = Utc.with_ymd_and_hms(2013, 5, 24, 0, 0, 0).single().unwrap_or_default();
        assert_eq!(FixedClock(at).now(), at);
    }
}

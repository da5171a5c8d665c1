//! Clock port

use chrono::{DateTime, Utc};

/// Source of wall-clock time for history timestamps and token expiry.
pub trait Clock: Send + Sync {
    /// Current UTC time.
    fn now(&self) -> DateTime<Utc>;
}

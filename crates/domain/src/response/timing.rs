//! Fine-grained request timing.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::spec::duration_millis;

/// Per-phase timing captured from connection lifecycle hooks.
///
/// Phases that did not happen (a reused connection skips DNS and connect,
/// plain HTTP skips TLS) are `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingBreakdown {
    /// Name resolution.
    #[serde(default, with = "duration_millis::option")]
    pub dns_lookup: Option<Duration>,
    /// TCP connect (for TLS targets this includes the handshake when the
    /// transport cannot separate the two).
    #[serde(default, with = "duration_millis::option")]
    pub tcp_connect: Option<Duration>,
    /// TLS handshake.
    #[serde(default, with = "duration_millis::option")]
    pub tls_handshake: Option<Duration>,
    /// From request start to response headers.
    #[serde(default, with = "duration_millis::option")]
    pub time_to_first_byte: Option<Duration>,
    /// From response headers to the last body byte.
    #[serde(default, with = "duration_millis::option")]
    pub body_transfer: Option<Duration>,
    /// Wall-clock total.
    #[serde(with = "duration_millis")]
    pub total: Duration,
}

impl TimingBreakdown {
    /// Sum of the connection-establishment phases.
    #[must_use]
    pub fn connection_setup(&self) -> Duration {
        [self.dns_lookup, self.tcp_connect, self.tls_handshake]
            .into_iter()
            .flatten()
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_setup_skips_missing_phases() {
        let timing = TimingBreakdown {
            dns_lookup: Some(Duration::from_millis(5)),
            tcp_connect: Some(Duration::from_millis(10)),
            total: Duration::from_millis(40),
            ..Default::default()
        };
        assert_eq!(timing.connection_setup(), Duration::from_millis(15));
    }
}

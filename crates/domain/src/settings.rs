//! Engine settings.
//!
//! Defines client-wide defaults for the request engine.

use serde::{Deserialize, Serialize};

use crate::proxy::ProxyConfig;
use crate::tls::TlsConfig;

/// Client-wide settings shared by every backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineSettings {
    /// Timeout applied when a request does not carry its own.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// User-Agent sent by HTTP-family backends.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Maximum redirects followed by the HTTP backend.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,

    /// Client-level proxy; a per-request proxy URL overrides it.
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// TLS settings for HTTP-family transports.
    #[serde(default)]
    pub tls: TlsConfig,

    /// Whether the shared cookie jar is attached to HTTP and GraphQL calls.
    #[serde(default = "default_true")]
    pub cookies_enabled: bool,

    /// How long the subscription client waits for `connection_ack`.
    #[serde(default = "default_graphql_ack_timeout_ms")]
    pub graphql_ack_timeout_ms: u64,

    /// Capacity of streaming message channels.
    #[serde(default = "default_stream_channel_capacity")]
    pub stream_channel_capacity: usize,

    /// Capacity of the gRPC client-stream input queue.
    #[serde(default = "default_client_stream_queue_capacity")]
    pub client_stream_queue_capacity: usize,

    /// Hard wall-clock limit for one script run.
    #[serde(default = "default_script_timeout_ms")]
    pub script_timeout_ms: u64,

    /// How long the OAuth2 callback listener waits for the redirect.
    #[serde(default = "default_oauth_callback_timeout_ms")]
    pub oauth_callback_timeout_ms: u64,
}

const fn default_timeout_ms() -> u64 {
    crate::request::DEFAULT_TIMEOUT_MS
}

fn default_user_agent() -> String {
    format!("Conduit/{}", env!("CARGO_PKG_VERSION"))
}

const fn default_max_redirects() -> usize {
    10
}

const fn default_true() -> bool {
    true
}

const fn default_graphql_ack_timeout_ms() -> u64 {
    10_000
}

const fn default_stream_channel_capacity() -> usize {
    64
}

const fn default_client_stream_queue_capacity() -> usize {
    16
}

const fn default_script_timeout_ms() -> u64 {
    5_000
}

const fn default_oauth_callback_timeout_ms() -> u64 {
    120_000
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            user_agent: default_user_agent(),
            max_redirects: default_max_redirects(),
            proxy: ProxyConfig::default(),
            tls: TlsConfig::default(),
            cookies_enabled: default_true(),
            graphql_ack_timeout_ms: default_graphql_ack_timeout_ms(),
            stream_channel_capacity: default_stream_channel_capacity(),
            client_stream_queue_capacity: default_client_stream_queue_capacity(),
            script_timeout_ms: default_script_timeout_ms(),
            oauth_callback_timeout_ms: default_oauth_callback_timeout_ms(),
        }
    }
}

impl EngineSettings {
    /// Ack wait as a `Duration`.
    #[must_use]
    pub const fn graphql_ack_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.graphql_ack_timeout_ms)
    }

    /// Script limit as a `Duration`.
    #[must_use]
    pub const fn script_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.script_timeout_ms)
    }

    /// OAuth2 callback wait as a `Duration`.
    #[must_use]
    pub const fn oauth_callback_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.oauth_callback_timeout_ms)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn default_settings() {
        let settings = EngineSettings::default();
        assert_eq!(settings.default_timeout_ms, 30_000);
        assert!(settings.user_agent.starts_with("Conduit/"));
        assert_eq!(settings.max_redirects, 10);
        assert!(settings.cookies_enabled);
        assert_eq!(settings.graphql_ack_timeout_ms, 10_000);
        assert_eq!(settings.client_stream_queue_capacity, 16);
        assert!(!settings.proxy.is_active());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let settings: EngineSettings =
            serde_json::from_str(r#"{"default_timeout_ms": 1000, "cookies_enabled": false}"#)
                .unwrap();
        assert_eq!(settings.default_timeout_ms, 1000);
        assert!(!settings.cookies_enabled);
        assert_eq!(settings.script_timeout_ms, 5_000);
    }
}

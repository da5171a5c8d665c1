//! Protocol tags understood by the engine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Wire protocols with a built-in backend.
///
/// Requests carry their protocol as a free-form tag so that callers can
/// register additional backends; this enum names the tags that ship with
/// the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Plain HTTP/1.1 or HTTP/2.
    #[default]
    Http,
    /// GraphQL over HTTP POST, or graphql-ws for subscriptions.
    GraphQl,
    /// gRPC resolved through server reflection.
    Grpc,
    /// Raw WebSocket session.
    WebSocket,
}

impl Protocol {
    /// Returns the registry tag for this protocol.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::GraphQl => "graphql",
            Self::Grpc => "grpc",
            Self::WebSocket => "websocket",
        }
    }

    /// Looks up a built-in protocol by tag (case-insensitive).
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "http" | "https" => Some(Self::Http),
            "graphql" => Some(Self::GraphQl),
            "grpc" => Some(Self::Grpc),
            "websocket" | "ws" => Some(Self::WebSocket),
            _ => None,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_tag_aliases() {
        assert_eq!(Protocol::from_tag("HTTP"), Some(Protocol::Http));
        assert_eq!(Protocol::from_tag("ws"), Some(Protocol::WebSocket));
        assert_eq!(Protocol::from_tag(" grpc "), Some(Protocol::Grpc));
        assert_eq!(Protocol::from_tag("mqtt"), None);
    }

    #[test]
    fn test_default_is_http() {
        assert_eq!(Protocol::default().as_str(), "http");
    }
}

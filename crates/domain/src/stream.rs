//! Streaming message envelope.
//!
//! WebSocket reads, gRPC streams and GraphQL subscriptions all deliver
//! their items as [`StreamMessage`]s over a channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Direction of a streamed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageDirection {
    /// Message sent by the client.
    Sent,
    /// Message received from the server.
    Received,
}

/// A single item of a streaming exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamMessage {
    /// Message content (text, or pretty JSON).
    pub content: String,
    /// Whether `content` is a JSON document.
    pub is_json: bool,
    /// When the message was sent/received.
    pub timestamp: DateTime<Utc>,
    /// Message direction.
    pub direction: MessageDirection,
    /// Error that ended the stream at this point, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StreamMessage {
    fn build(content: String, direction: MessageDirection) -> Self {
        Self {
            is_json: looks_like_json(&content),
            content,
            timestamp: Utc::now(),
            direction,
            error: None,
        }
    }

    /// Create an outgoing message.
    #[must_use]
    pub fn sent(content: impl Into<String>) -> Self {
        Self::build(content.into(), MessageDirection::Sent)
    }

    /// Create an incoming message.
    #[must_use]
    pub fn received(content: impl Into<String>) -> Self {
        Self::build(content.into(), MessageDirection::Received)
    }

    /// Create an incoming message that carries a stream error.
    #[must_use]
    pub fn received_error(content: impl Into<String>, error: impl Into<String>) -> Self {
        let mut message = Self::received(content);
        message.error = Some(error.into());
        message
    }

    /// Returns true if this message carries an error.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Returns true for outgoing messages.
    #[must_use]
    pub fn is_sent(&self) -> bool {
        self.direction == MessageDirection::Sent
    }
}

/// Text starting with `{` or `[` is treated as JSON.
#[must_use]
pub fn looks_like_json(text: &str) -> bool {
    matches!(text.trim_start().chars().next(), Some('{' | '['))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_detection() {
        assert!(StreamMessage::received(r#"{"a":1}"#).is_json);
        assert!(StreamMessage::received("  [1,2]").is_json);
        assert!(!StreamMessage::received("hello").is_json);
        assert!(!StreamMessage::received("").is_json);
    }

    #[test]
    fn test_directions() {
        let sent = StreamMessage::sent("ping");
        assert!(sent.is_sent());
        assert!(!sent.is_error());

        let failed = StreamMessage::received_error("", "stream reset");
        assert_eq!(failed.direction, MessageDirection::Received);
        assert_eq!(failed.error.as_deref(), Some("stream reset"));
    }
}

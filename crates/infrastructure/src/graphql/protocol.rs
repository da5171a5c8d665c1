//! graphql-ws (`graphql-transport-ws`) message envelope.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Sub-protocol negotiated during the WebSocket handshake.
pub const GRAPHQL_TRANSPORT_WS: &str = "graphql-transport-ws";

/// One frame of the protocol: `{id?, type, payload?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Operation id; absent on connection-level messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Message type.
    #[serde(rename = "type")]
    pub kind: String,
    /// Type-specific payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl Envelope {
    fn new(kind: &str, id: Option<&str>, payload: Option<Value>) -> Self {
        Self {
            id: id.map(str::to_string),
            kind: kind.to_string(),
            payload,
        }
    }

    /// `connection_init` with an empty payload.
    #[must_use]
    pub fn connection_init() -> Self {
        Self::new("connection_init", None, Some(json!({})))
    }

    /// `subscribe` carrying `{query, variables?}`.
    #[must_use]
    pub fn subscribe(id: &str, query: &str, variables: Option<Value>) -> Self {
        let mut payload = json!({ "query": query });
        if let Some(variables) = variables {
            payload["variables"] = variables;
        }
        Self::new("subscribe", Some(id), Some(payload))
    }

    /// `pong`, echoing the ping payload.
    #[must_use]
    pub fn pong(payload: Option<Value>) -> Self {
        Self::new("pong", None, payload)
    }

    /// `complete` for operation `id`.
    #[must_use]
    pub fn complete(id: &str) -> Self {
        Self::new("complete", Some(id), None)
    }

    /// Encodes the envelope as a text frame.
    #[must_use]
    pub fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Messages a client acts on.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// Handshake accepted.
    ConnectionAck,
    /// Result for operation `id`.
    Next {
        /// Operation id.
        id: Option<String>,
        /// Execution result.
        payload: Value,
    },
    /// Operation `id` failed; payload is a list of GraphQL errors.
    Error {
        /// Operation id.
        id: Option<String>,
        /// Error list.
        payload: Value,
    },
    /// Operation `id` finished.
    Complete {
        /// Operation id.
        id: Option<String>,
    },
    /// Keep-alive that must be answered with `pong`.
    Ping {
        /// Optional ping payload.
        payload: Option<Value>,
    },
    /// Reply to a client ping.
    Pong,
    /// A type this client does not handle.
    Other(String),
}

impl ServerMessage {
    /// Parses a text frame.
    ///
    /// # Errors
    ///
    /// Returns the JSON error for frames that are not an envelope.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let envelope: Envelope = serde_json::from_str(text)?;
        let payload = envelope.payload.unwrap_or(Value::Null);
        Ok(match envelope.kind.as_str() {
            "connection_ack" => Self::ConnectionAck,
            "next" | "data" => Self::Next {
                id: envelope.id,
                payload,
            },
            "error" => Self::Error {
                id: envelope.id,
                payload,
            },
            "complete" => Self::Complete { id: envelope.id },
            "ping" => Self::Ping {
                payload: (!payload.is_null()).then_some(payload),
            },
            "pong" => Self::Pong,
            other => Self::Other(other.to_string()),
        })
    }
}

/// Joins the `message` fields of a GraphQL error list.
#[must_use]
pub fn error_text(payload: &Value) -> String {
    let messages: Vec<&str> = match payload {
        Value::Array(errors) => errors
            .iter()
            .filter_map(|e| e.get("message").and_then(Value::as_str))
            .collect(),
        Value::Object(_) => payload
            .get("message")
            .and_then(Value::as_str)
            .into_iter()
            .collect(),
        _ => Vec::new(),
    };
    if messages.is_empty() {
        payload.to_string()
    } else {
        messages.join("; ")
    }
}

//! Application error types

use conduit_domain::{AuthError, DomainError};
use thiserror::Error;

/// Errors detected before any network activity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// URL or address is empty.
    #[error("URL is required")]
    MissingUrl,

    /// HTTP method is empty.
    #[error("method is required")]
    MissingMethod,

    /// HTTP method is not a valid token.
    #[error("invalid method: {0}")]
    InvalidMethod(String),

    /// gRPC service name is empty.
    #[error("gRPC service is required")]
    MissingService,

    /// gRPC method name is empty.
    #[error("gRPC method is required")]
    MissingGrpcMethod,

    /// GraphQL document is empty.
    #[error("GraphQL query is required")]
    MissingQuery,

    /// URL could not be parsed.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// A header name or value cannot be sent on the wire.
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// Body or GraphQL variables are malformed.
    #[error("invalid body: {0}")]
    InvalidBody(String),

    /// URL scheme is not handled by the selected backend.
    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),
}

/// Errors returned by the registry, the backends and the pipeline.
///
/// Protocol-level failures (HTTP 4xx/5xx, non-OK gRPC status) are not
/// errors; they come back as ordinary responses.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// No backend is registered for the tag.
    #[error("unknown protocol: {0}")]
    UnknownProtocol(String),

    /// The backend rejected the request before executing it.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Dial, connect, TLS or I/O failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The deadline passed before the call completed.
    #[error("request timed out after {timeout_ms}ms")]
    Timeout {
        /// Budget that was exceeded.
        timeout_ms: u64,
    },

    /// The caller cancelled the call.
    #[error("request cancelled")]
    Cancelled,

    /// A signer was misconfigured or a token grant failed.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The request body could not be encoded for the protocol.
    #[error("invalid body: {0}")]
    InvalidBody(String),

    /// The peer violated the protocol (e.g. no handshake ack).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server ended a GraphQL subscription with an error.
    #[error("subscription error: {0}")]
    Subscription(String),

    /// Send or close without an open client stream.
    #[error("no active client stream")]
    NoActiveClientStream,

    /// The client stream input queue is full.
    #[error("client stream queue is full")]
    StreamQueueFull,

    /// The stateful backend has no open connection.
    #[error("not connected")]
    NotConnected,

    /// Server reflection failed or the symbol is unknown.
    #[error("reflection error: {0}")]
    Reflection(String),
}

impl EngineError {
    /// Returns true for failures raised before any backend ran.
    #[must_use]
    pub const fn is_local(&self) -> bool {
        matches!(self, Self::UnknownProtocol(_) | Self::Validation(_))
    }

    /// Creates a transport error from any displayable error.
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<DomainError> for EngineError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::InvalidUrl(url) => Self::Validation(ValidationError::InvalidUrl(url)),
            DomainError::InvalidProtocol(tag) => Self::UnknownProtocol(tag),
            DomainError::InvalidBody(reason) => Self::InvalidBody(reason),
            header @ DomainError::InvalidHeader { .. } => {
                Self::Validation(ValidationError::InvalidHeader(header.to_string()))
            }
        }
    }
}

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        assert_eq!(
            EngineError::UnknownProtocol("ftp".to_string()).to_string(),
            "unknown protocol: ftp"
        );
        assert_eq!(
            EngineError::NoActiveClientStream.to_string(),
            "no active client stream"
        );
        assert!(
            EngineError::Subscription("boom".to_string())
                .to_string()
                .contains("subscription error")
        );
    }

    #[test]
    fn test_local_failures() {
        assert!(EngineError::from(ValidationError::MissingUrl).is_local());
        assert!(!EngineError::Timeout { timeout_ms: 10 }.is_local());
    }
}

//! Domain error types

use thiserror::Error;

/// Domain-level errors that can occur during validation or processing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// The provided URL is invalid or malformed.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// A header name or value cannot be sent on the wire.
    #[error("invalid header {name}: {reason}")]
    InvalidHeader {
        /// The offending header name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The request body is invalid for the selected protocol.
    #[error("invalid body: {0}")]
    InvalidBody(String),

    /// The protocol tag is empty or malformed.
    #[error("invalid protocol tag: {0}")]
    InvalidProtocol(String),
}

/// Result type alias for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;

//! Response specification type
//!
//! Contains types for representing responses from every backend, including
//! status codes, multi-valued headers, body, and timing information.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::TimingBreakdown;

/// Response headers; a header may repeat, so every name maps to all values.
pub type ResponseHeaders = BTreeMap<String, Vec<String>>;

/// HTTP status code with semantic helpers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatusCode(pub u16);

impl StatusCode {
    /// Creates a new `StatusCode`.
    #[must_use]
    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    /// Returns the numeric status code.
    #[must_use]
    pub const fn as_u16(&self) -> u16 {
        self.0
    }

    /// Returns true if this is a 2xx success status.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.0 >= 200 && self.0 < 300
    }

    /// Returns true if this is any error status (4xx or 5xx).
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.0 >= 400 && self.0 < 600
    }

    /// Returns the reason phrase for the status codes the engine produces.
    ///
    /// 499 is the non-standard "Client Closed Request" used for cancelled
    /// gRPC calls.
    #[must_use]
    pub const fn reason_phrase(&self) -> &'static str {
        match self.0 {
            100 => "Continue",
            101 => "Switching Protocols",
            200 => "OK",
            201 => "Created",
            202 => "Accepted",
            204 => "No Content",
            301 => "Moved Permanently",
            302 => "Found",
            304 => "Not Modified",
            307 => "Temporary Redirect",
            308 => "Permanent Redirect",
            400 => "Bad Request",
            401 => "Unauthorized",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            408 => "Request Timeout",
            409 => "Conflict",
            412 => "Precondition Failed",
            416 => "Range Not Satisfiable",
            422 => "Unprocessable Entity",
            429 => "Too Many Requests",
            499 => "Client Closed Request",
            500 => "Internal Server Error",
            501 => "Not Implemented",
            502 => "Bad Gateway",
            503 => "Service Unavailable",
            504 => "Gateway Timeout",
            _ => "Unknown",
        }
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.0, self.reason_phrase())
    }
}

impl From<u16> for StatusCode {
    fn from(code: u16) -> Self {
        Self(code)
    }
}

/// Response produced by any backend.
///
/// A `ResponseSpec` only exists once the transport succeeded; 4xx/5xx and
/// non-OK gRPC statuses are ordinary responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseSpec {
    /// Status code (pseudo-HTTP for gRPC and WebSocket).
    pub status: u16,
    /// Status text (e.g., "OK", "Subscription Detected").
    pub status_text: String,
    /// Response headers.
    #[serde(default)]
    pub headers: ResponseHeaders,
    /// Raw response body.
    #[serde(default)]
    pub body: Vec<u8>,
    /// Content-Type header value (extracted for convenience).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Wall-clock duration.
    #[serde(with = "duration_millis")]
    pub duration: Duration,
    /// Body size in bytes.
    pub size: usize,
    /// Transport protocol label (e.g. "HTTP/1.1", "HTTP/2.0", "gRPC").
    #[serde(default)]
    pub protocol: String,
    /// Whether the exchange ran over TLS.
    #[serde(default)]
    pub tls: bool,
    /// Optional per-phase timing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timing: Option<TimingBreakdown>,
}

impl ResponseSpec {
    /// Creates a new `ResponseSpec` from raw response data.
    #[must_use]
    pub fn new(
        status: impl Into<StatusCode>,
        headers: ResponseHeaders,
        body: Vec<u8>,
        duration: Duration,
    ) -> Self {
        let status_code = status.into();
        let content_type = headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
            .and_then(|(_, v)| v.first().cloned());

        Self {
            status: status_code.as_u16(),
            status_text: status_code.reason_phrase().to_string(),
            headers,
            size: body.len(),
            body,
            content_type,
            duration,
            protocol: String::new(),
            tls: false,
            timing: None,
        }
    }

    /// Creates a body-less response that reports a local state change
    /// rather than a server reply (e.g. "101 Subscription Detected").
    #[must_use]
    pub fn synthetic(status: u16, status_text: impl Into<String>, protocol: impl Into<String>) -> Self {
        let mut response = Self::new(status, ResponseHeaders::new(), Vec::new(), Duration::ZERO);
        response.status_text = status_text.into();
        response.protocol = protocol.into();
        response
    }

    /// Replaces the status text.
    #[must_use]
    pub fn with_status_text(mut self, text: impl Into<String>) -> Self {
        self.status_text = text.into();
        self
    }

    /// Sets the transport protocol label.
    #[must_use]
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    /// Marks whether the exchange used TLS.
    #[must_use]
    pub const fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    /// Attaches a timing breakdown.
    #[must_use]
    pub const fn with_timing(mut self, timing: TimingBreakdown) -> Self {
        self.timing = Some(timing);
        self
    }

    /// Sets the wall-clock duration.
    #[must_use]
    pub const fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Returns true if the status code indicates success (2xx).
    #[must_use]
    pub const fn is_success(&self) -> bool {
        StatusCode(self.status).is_success()
    }

    /// Returns the first value of a header, ignoring case.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .and_then(|(_, v)| v.first())
            .map(String::as_str)
    }

    /// Returns the body as UTF-8 text (lossy).
    #[must_use]
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Duration in whole milliseconds.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn duration_ms(&self) -> u64 {
        self.duration.as_millis() as u64
    }
}

impl Default for ResponseSpec {
    fn default() -> Self {
        Self::new(0, ResponseHeaders::new(), Vec::new(), Duration::ZERO)
    }
}

pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[allow(clippy::cast_possible_truncation)]
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }

    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        #[allow(clippy::cast_possible_truncation, clippy::ref_option)]
        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match duration {
                Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_new_extracts_content_type_and_size() {
        let mut headers = ResponseHeaders::new();
        headers.insert(
            "Content-Type".to_string(),
            vec!["application/json".to_string()],
        );
        let response = ResponseSpec::new(200_u16, headers, b"{}".to_vec(), Duration::from_millis(12));

        assert_eq!(response.status_text, "OK");
        assert_eq!(response.content_type.as_deref(), Some("application/json"));
        assert_eq!(response.size, 2);
        assert_eq!(response.header("content-type"), Some("application/json"));
    }

    #[test]
    fn test_reason_phrases() {
        assert_eq!(StatusCode(101).reason_phrase(), "Switching Protocols");
        assert_eq!(StatusCode(499).reason_phrase(), "Client Closed Request");
        assert_eq!(StatusCode(503).to_string(), "503 Service Unavailable");
    }

    #[test]
    fn test_synthetic_response() {
        let response = ResponseSpec::synthetic(101, "Subscription Detected", "GraphQL");
        assert_eq!(response.status, 101);
        assert_eq!(response.status_text, "Subscription Detected");
        assert!(response.body.is_empty());
        assert!(!response.is_success());
    }

    #[test]
    fn test_duration_serializes_as_millis() {
        let response = ResponseSpec::default().with_duration(Duration::from_millis(250));
        let json = serde_json::to_value(&response).unwrap_or_default();
        assert_eq!(json["duration"], 250);
    }
}

//! Scripting domain types.
//!
//! Pre-request scripts may mutate a [`ScriptRequest`] and environment
//! variables; post-response scripts also see a [`ScriptResponse`] and may
//! register tests.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::request::{Headers, RequestSpec};
use crate::response::ResponseSpec;

/// When a script runs relative to the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptPhase {
    /// Before the request is dispatched.
    PreRequest,
    /// After the response has been received.
    PostResponse,
}

impl ScriptPhase {
    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PreRequest => "pre-request",
            Self::PostResponse => "post-response",
        }
    }
}

/// The request as seen (and modified) by a script.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScriptRequest {
    /// HTTP method.
    pub method: String,
    /// Target URL.
    pub url: String,
    /// Request headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Query parameters.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    /// Body as text.
    #[serde(default)]
    pub body: String,
}

impl From<&RequestSpec> for ScriptRequest {
    fn from(request: &RequestSpec) -> Self {
        Self {
            method: request.method.clone(),
            url: request.url.clone(),
            headers: request.headers.to_map(),
            params: request.params.clone(),
            body: request.body_text(),
        }
    }
}

impl ScriptRequest {
    /// Copies the script's view back into `request`.
    ///
    /// The body is only replaced when the script changed it, so binary
    /// bodies survive a script that never touches them.
    pub fn apply_to(self, request: &mut RequestSpec) {
        request.method = self.method;
        request.url = self.url;
        request.headers = self.headers.into_iter().collect::<Headers>();
        request.params = self.params;
        if self.body != request.body_text() {
            request.body = self.body.into_bytes();
        }
    }
}

/// The response as seen by a post-response script.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScriptResponse {
    /// Status code.
    pub status: u16,
    /// Body as text.
    pub body: String,
    /// Response headers, first value per name.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Round-trip time.
    pub duration_ms: u64,
    /// Body size in bytes.
    pub size: usize,
    /// Content type, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

impl From<&ResponseSpec> for ScriptResponse {
    fn from(response: &ResponseSpec) -> Self {
        Self {
            status: response.status,
            body: response.body_text(),
            headers: response
                .headers
                .iter()
                .filter_map(|(name, values)| Some((name.clone(), values.first()?.clone())))
                .collect(),
            duration_ms: response.duration_ms(),
            size: response.size,
            content_type: response.content_type.clone(),
        }
    }
}

/// Outcome of a single `test(name, fn)` call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestResult {
    /// Test name.
    pub name: String,
    /// Whether the test body completed without throwing.
    pub passed: bool,
    /// Thrown message for failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TestResult {
    /// A passing test.
    #[must_use]
    pub fn pass(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            error: None,
        }
    }

    /// A failing test.
    #[must_use]
    pub fn fail(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: false,
            error: Some(error.into()),
        }
    }
}

/// Everything a script run produced.
///
/// Returned even when the script throws or times out, so logs and tests
/// recorded before the failure survive.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScriptResult {
    /// Lines passed to `log`.
    #[serde(default)]
    pub logs: Vec<String>,
    /// Registered test outcomes, in call order.
    #[serde(default)]
    pub tests: Vec<TestResult>,
    /// Variables written with `setEnvVar`.
    #[serde(default)]
    pub env_changes: BTreeMap<String, String>,
    /// Top-level error or timeout message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ScriptResult {
    /// True when the script finished without a top-level error.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// True when every registered test passed.
    #[must_use]
    pub fn all_tests_passed(&self) -> bool {
        self.tests.iter().all(|t| t.passed)
    }

    /// Count of failed tests.
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.tests.iter().filter(|t| !t.passed).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_summary() {
        let result = ScriptResult {
            tests: vec![TestResult::pass("a"), TestResult::fail("b", "boom")],
            ..Default::default()
        };
        assert!(result.is_ok());
        assert!(!result.all_tests_passed());
        assert_eq!(result.failed_count(), 1);
    }

    #[test]
    fn test_request_view_round_trip() {
        let mut request = RequestSpec::post("https://example.com/a", vec![0xff, 0x00])
            .with_header("X-One", "1");
        let mut view = ScriptRequest::from(&request);
        view.headers.insert("X-Two".to_string(), "2".to_string());
        view.url = "https://example.com/b".to_string();
        view.apply_to(&mut request);

        assert_eq!(request.url, "https://example.com/b");
        assert_eq!(request.headers.get("x-two"), Some("2"));
        assert_eq!(request.body, vec![0xff, 0x00]);
    }

    #[test]
    fn test_phase_names() {
        assert_eq!(ScriptPhase::PreRequest.as_str(), "pre-request");
        assert_eq!(ScriptPhase::PostResponse.as_str(), "post-response");
    }
}

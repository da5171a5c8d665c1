//! Script runner port

use std::collections::BTreeMap;

use async_trait::async_trait;
use conduit_domain::{ScriptPhase, ScriptRequest, ScriptResponse, ScriptResult};

/// Everything a single script run sees.
#[derive(Debug, Clone)]
pub struct ScriptInvocation {
    /// When the script runs.
    pub phase: ScriptPhase,
    /// Script source text.
    pub source: String,
    /// Mutable request view.
    pub request: ScriptRequest,
    /// Read-only response view (post-response only).
    pub response: Option<ScriptResponse>,
    /// Variables visible to `getEnvVar`.
    pub env: BTreeMap<String, String>,
}

impl ScriptInvocation {
    /// Creates a pre-request invocation.
    #[must_use]
    pub fn pre_request(
        source: impl Into<String>,
        request: ScriptRequest,
        env: BTreeMap<String, String>,
    ) -> Self {
        Self {
            phase: ScriptPhase::PreRequest,
            source: source.into(),
            request,
            response: None,
            env,
        }
    }

    /// Creates a post-response invocation.
    #[must_use]
    pub fn post_response(
        source: impl Into<String>,
        request: ScriptRequest,
        response: ScriptResponse,
        env: BTreeMap<String, String>,
    ) -> Self {
        Self {
            phase: ScriptPhase::PostResponse,
            source: source.into(),
            request,
            response: Some(response),
            env,
        }
    }
}

/// Result of a script run plus the request view as the script left it.
#[derive(Debug, Clone)]
pub struct ScriptRun {
    /// Logs, tests, env changes and any top-level error.
    pub result: ScriptResult,
    /// Request view after the script returned (or was interrupted).
    pub request: ScriptRequest,
}

/// Executes user scripts in an isolated sandbox.
///
/// A run never fails as a whole: errors and timeouts are reported in
/// [`ScriptResult::error`] next to whatever the script recorded before.
#[async_trait]
pub trait ScriptRunner: Send + Sync {
    /// Runs one script to completion or until its time limit.
    async fn run(&self, invocation: ScriptInvocation) -> ScriptRun;
}

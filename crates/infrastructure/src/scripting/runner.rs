//! QuickJS script runner.
//!
//! Every run gets a fresh runtime on a blocking thread. An interrupt
//! handler stops the VM once the deadline passes; whatever the script
//! recorded before that is still returned.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use conduit_application::{ScriptInvocation, ScriptRun, ScriptRunner};
use conduit_domain::{EngineSettings, ScriptRequest, ScriptResult};
use rquickjs::{CaughtError, Context, Ctx, Runtime, Value};
use thiserror::Error;
use tracing::{debug, warn};

use super::host::{HostState, install};

const PRELUDE: &str = include_str!("prelude.js");
const MEMORY_LIMIT: usize = 64 * 1024 * 1024;

/// Why a script run ended early.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptError {
    /// The VM was interrupted at the deadline.
    #[error("script timed out after {timeout_ms}ms")]
    Timeout {
        /// Configured limit.
        timeout_ms: u64,
    },
    /// The script threw.
    #[error("script error: {0}")]
    Runtime(String),
    /// The sandbox could not be prepared.
    #[error("script setup failed: {0}")]
    Setup(String),
}

/// Runs scripts in a sandboxed QuickJS VM with a wall-clock limit.
#[derive(Debug, Clone)]
pub struct QuickJsRunner {
    timeout: Duration,
}

impl QuickJsRunner {
    /// Creates a runner interrupting scripts after `timeout`.
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Creates a runner using `script_timeout_ms`.
    #[must_use]
    pub const fn from_settings(settings: &EngineSettings) -> Self {
        Self::new(settings.script_timeout())
    }

    /// Runs `invocation` on the current thread.
    #[must_use]
    pub fn run_blocking(&self, invocation: &ScriptInvocation) -> ScriptRun {
        let state = Rc::new(RefCell::new(HostState::new(invocation.env.clone())));
        let (error, request) = match self.execute(invocation, &state) {
            Ok((error, request)) => (error, request),
            Err(error) => (Some(error), None),
        };
        if let Some(error) = &error {
            debug!(phase = invocation.phase.as_str(), error = %error, "Script ended with an error");
        }

        let state = std::mem::take(&mut *state.borrow_mut());
        ScriptRun {
            result: ScriptResult {
                logs: state.logs,
                tests: state.tests,
                env_changes: state.env_changes,
                error: error.map(|e| e.to_string()),
            },
            request: request.unwrap_or_else(|| invocation.request.clone()),
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn execute(
        &self,
        invocation: &ScriptInvocation,
        state: &Rc<RefCell<HostState>>,
    ) -> Result<(Option<ScriptError>, Option<ScriptRequest>), ScriptError> {
        let setup = |e: rquickjs::Error| ScriptError::Setup(e.to_string());
        let runtime = Runtime::new().map_err(setup)?;
        runtime.set_memory_limit(MEMORY_LIMIT);

        let deadline = Instant::now() + self.timeout;
        let armed = Arc::new(AtomicBool::new(true));
        let interrupted = Arc::new(AtomicBool::new(false));
        {
            let armed = Arc::clone(&armed);
            let interrupted = Arc::clone(&interrupted);
            runtime.set_interrupt_handler(Some(Box::new(move || {
                if armed.load(Ordering::Relaxed) && Instant::now() >= deadline {
                    interrupted.store(true, Ordering::Relaxed);
                    return true;
                }
                false
            })));
        }

        let context = Context::full(&runtime).map_err(setup)?;
        let request_json = serde_json::to_string(&invocation.request)
            .map_err(|e| ScriptError::Setup(e.to_string()))?;
        let response_json = invocation
            .response
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| ScriptError::Setup(e.to_string()))?;

        context.with(|ctx| {
            let globals = ctx.globals();
            globals.set("__requestJson", request_json).map_err(setup)?;
            globals.set("__responseJson", response_json).map_err(setup)?;
            install(&ctx, state, deadline).map_err(setup)?;
            ctx.eval::<(), _>(PRELUDE)
                .map_err(|e| ScriptError::Setup(caught(&ctx, e)))?;

            let outcome = ctx.eval::<Value, _>(invocation.source.as_bytes());
            armed.store(false, Ordering::Relaxed);
            let error = match outcome {
                Ok(_) => None,
                Err(_) if interrupted.load(Ordering::Relaxed) => {
                    warn!(timeout_ms = self.timeout.as_millis() as u64, "Script interrupted at its time limit");
                    let _ = ctx.catch();
                    Some(ScriptError::Timeout {
                        timeout_ms: self.timeout.as_millis() as u64,
                    })
                }
                Err(e) => Some(ScriptError::Runtime(caught(&ctx, e))),
            };

            let request = ctx
                .eval::<String, _>("__exportRequest()")
                .ok()
                .and_then(|json| serde_json::from_str::<ScriptRequest>(&json).ok());
            Ok((error, request))
        })
    }
}

/// Message of a thrown value.
fn caught(ctx: &Ctx<'_>, error: rquickjs::Error) -> String {
    match CaughtError::from_error(ctx, error) {
        CaughtError::Exception(exception) => exception
            .message()
            .unwrap_or_else(|| exception.to_string()),
        CaughtError::Value(value) => value
            .as_string()
            .and_then(|s| s.to_string().ok())
            .unwrap_or_else(|| format!("uncaught {}", value.type_name())),
        CaughtError::Error(error) => error.to_string(),
    }
}

#[async_trait]
impl ScriptRunner for QuickJsRunner {
    async fn run(&self, invocation: ScriptInvocation) -> ScriptRun {
        let runner = self.clone();
        let fallback = invocation.request.clone();
        match tokio::task::spawn_blocking(move || runner.run_blocking(&invocation)).await {
            Ok(run) => run,
            Err(e) => ScriptRun {
                result: ScriptResult {
                    error: Some(ScriptError::Setup(e.to_string()).to_string()),
                    ..ScriptResult::default()
                },
                request: fallback,
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use conduit_domain::ScriptResponse;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn runner() -> QuickJsRunner {
        QuickJsRunner::new(Duration::from_millis(500))
    }

    fn request() -> ScriptRequest {
        ScriptRequest {
            method: "GET".to_string(),
            url: "https://api.example.com/users".to_string(),
            ..Default::default()
        }
    }

    fn pre(source: &str) -> ScriptInvocation {
        ScriptInvocation::pre_request(source, request(), BTreeMap::new())
    }

    #[test]
    fn test_request_mutations_are_returned() {
        let run = runner().run_blocking(&pre(
            r#"
            request.headers["X-Trace"] = "t-" + 42;
            request.params.page = 2;
            request.method = "POST";
            request.body = { hello: "world" };
            "#,
        ));
        assert!(run.result.is_ok(), "{:?}", run.result.error);
        assert_eq!(run.request.method, "POST");
        assert_eq!(run.request.headers.get("X-Trace").map(String::as_str), Some("t-42"));
        assert_eq!(run.request.params.get("page").map(String::as_str), Some("2"));
        assert_eq!(run.request.body, r#"{"hello":"world"}"#);
    }

    #[test]
    fn test_env_reads_and_writes() {
        let env = BTreeMap::from([("base".to_string(), "v1".to_string())]);
        let invocation = ScriptInvocation::pre_request(
            r#"
            setEnvVar("token", getEnvVar("base") + "-abc");
            log("token is", getEnvVar("token"), { n: 1 });
            log(getEnvVar("missing") === undefined);
            "#,
            request(),
            env,
        );
        let run = runner().run_blocking(&invocation);
        assert!(run.result.is_ok(), "{:?}", run.result.error);
        assert_eq!(
            run.result.env_changes,
            BTreeMap::from([("token".to_string(), "v1-abc".to_string())])
        );
        assert_eq!(run.result.logs, vec![r#"token is v1-abc {"n":1}"#, "true"]);
    }

    #[test]
    fn test_failed_assertion_only_fails_its_test() {
        let response = ScriptResponse {
            status: 404,
            body: r#"{"error":"missing"}"#.to_string(),
            ..Default::default()
        };
        let invocation = ScriptInvocation::post_response(
            r#"
            test("status is 200", () => assert(response.status === 200, "expected 200"));
            test("body has error", () => assert(response.json().error === "missing"));
            "#,
            request(),
            response,
            BTreeMap::new(),
        );
        let run = runner().run_blocking(&invocation);
        assert!(run.result.is_ok());
        assert_eq!(run.result.tests.len(), 2);
        assert!(!run.result.tests[0].passed);
        assert_eq!(run.result.tests[0].error.as_deref(), Some("expected 200"));
        assert!(run.result.tests[1].passed);
    }

    #[test]
    fn test_top_level_throw_keeps_env_changes() {
        let run = runner().run_blocking(&pre(
            r#"
            setEnvVar("before", "1");
            assert(false, "boom");
            setEnvVar("after", "2");
            "#,
        ));
        assert_eq!(run.result.error.as_deref(), Some("script error: boom"));
        assert_eq!(run.result.env_changes.get("before").map(String::as_str), Some("1"));
        assert!(!run.result.env_changes.contains_key("after"));
    }

    #[test]
    fn test_infinite_loop_is_interrupted() {
        let started = Instant::now();
        let run = QuickJsRunner::new(Duration::from_millis(200)).run_blocking(&pre(
            r#"
            log("starting");
            try { while (true) {} } catch (e) { log("caught"); }
            "#,
        ));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(run.result.error.as_deref(), Some("script timed out after 200ms"));
        assert_eq!(run.result.logs, vec!["starting"]);
    }

    #[test]
    fn test_utilities() {
        let run = runner().run_blocking(&pre(
            r#"
            log(base64Encode("user:pass"));
            log(base64Decode("dXNlcjpwYXNz"));
            log(sha256("abc"));
            log(md5("abc"));
            log(uuid().length);
            log(readFile("/definitely/not/here") === undefined);
            const n = randomInt(1, 3);
            log(n >= 1 && n <= 3);
            log(timestamp() > 1600000000);
            "#,
        ));
        assert!(run.result.is_ok(), "{:?}", run.result.error);
        assert_eq!(
            run.result.logs,
            vec![
                "dXNlcjpwYXNz",
                "user:pass",
                "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad",
                "900150983cd24fb0d6963f7d28e17f72",
                "36",
                "true",
                "true",
                "true",
            ]
        );
    }

    #[tokio::test]
    async fn test_async_run_uses_blocking_thread() {
        let run = runner().run(pre("log(request.url)")).await;
        assert_eq!(run.result.logs, vec!["https://api.example.com/users"]);
    }
}

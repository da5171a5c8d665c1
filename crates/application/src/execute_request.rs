//! Execute Request Use Case
//!
//! Runs one request through the full pipeline: variable resolution,
//! pre-request script, registry dispatch, post-response script, history.

use std::collections::BTreeMap;
use std::sync::Arc;

use conduit_domain::{RequestSpec, ResponseSpec, ScriptRequest, ScriptResponse, ScriptResult};

use crate::ports::{Clock, HistorySink, ScriptInvocation, ScriptRunner, VariableResolver};
use crate::registry::ProtocolRegistry;
use crate::variable_resolver::resolve_request;
use crate::EngineResult;

/// Everything produced by one pipeline run.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    /// The request as actually dispatched (resolved and script-mutated).
    pub request: RequestSpec,
    /// The response returned by the backend.
    pub response: ResponseSpec,
    /// Pre-request script result, if a script ran.
    pub pre_script: Option<ScriptResult>,
    /// Post-response script result, if a script ran.
    pub post_script: Option<ScriptResult>,
    /// Variable names that had no value.
    pub unresolved_variables: Vec<String>,
}

impl ExecutionOutcome {
    /// Variables written by both scripts, post-response winning.
    #[must_use]
    pub fn env_changes(&self) -> BTreeMap<String, String> {
        self.pre_script
            .iter()
            .chain(self.post_script.iter())
            .flat_map(|result| result.env_changes.clone())
            .collect()
    }

    /// Top-level script errors, in pipeline order.
    #[must_use]
    pub fn script_errors(&self) -> Vec<&str> {
        self.pre_script
            .iter()
            .chain(self.post_script.iter())
            .filter_map(|result| result.error.as_deref())
            .collect()
    }
}

/// Use case for executing requests of any protocol.
///
/// # Example
///
/// ```ignore
/// let pipeline = ExecuteRequest::new(Arc::new(registry), Arc::new(SystemClock))
///     .with_scripts(Arc::new(QuickJsRunner::default()));
///
/// let outcome = pipeline.execute(request, &variables).await?;
/// ```
pub struct ExecuteRequest {
    registry: Arc<ProtocolRegistry>,
    clock: Arc<dyn Clock>,
    scripts: Option<Arc<dyn ScriptRunner>>,
    history: Option<Arc<dyn HistorySink>>,
}

impl ExecuteRequest {
    /// Creates a pipeline over `registry` without scripting or history.
    #[must_use]
    pub fn new(registry: Arc<ProtocolRegistry>, clock: Arc<dyn Clock>) -> Self {
        Self {
            registry,
            clock,
            scripts: None,
            history: None,
        }
    }

    /// Enables pre/post scripts.
    #[must_use]
    pub fn with_scripts(mut self, runner: Arc<dyn ScriptRunner>) -> Self {
        self.scripts = Some(runner);
        self
    }

    /// Forwards completed exchanges to `sink`.
    #[must_use]
    pub fn with_history(mut self, sink: Arc<dyn HistorySink>) -> Self {
        self.history = Some(sink);
        self
    }

    /// Runs `request` through the pipeline.
    ///
    /// Script failures never abort the pipeline: they are reported in the
    /// outcome next to the response. The request deadline starts when the
    /// request is dispatched.
    ///
    /// # Errors
    ///
    /// Returns the registry's error when the request could not be executed.
    pub async fn execute(
        &self,
        mut request: RequestSpec,
        variables: &dyn VariableResolver,
    ) -> EngineResult<ExecutionOutcome> {
        let unresolved_variables = resolve_request(variables, &mut request);
        let mut env = variables.variables();

        let pre_script = match (self.scripts.as_ref(), script_source(request.pre_script.as_ref())) {
            (Some(runner), Some(source)) => {
                let invocation =
                    ScriptInvocation::pre_request(source, ScriptRequest::from(&request), env.clone());
                let run = runner.run(invocation).await;
                run.request.apply_to(&mut request);
                env.extend(run.result.env_changes.clone());
                Some(run.result)
            }
            _ => None,
        };

        let response = self.registry.execute(&request, request.deadline()).await?;

        let post_script = match (self.scripts.as_ref(), script_source(request.post_script.as_ref())) {
            (Some(runner), Some(source)) => {
                let invocation = ScriptInvocation::post_response(
                    source,
                    ScriptRequest::from(&request),
                    ScriptResponse::from(&response),
                    env,
                );
                Some(runner.run(invocation).await.result)
            }
            _ => None,
        };

        if let Some(history) = &self.history {
            history.record(&request, &response, self.clock.now()).await;
        }

        Ok(ExecutionOutcome {
            request,
            response,
            pre_script,
            post_script,
            unresolved_variables,
        })
    }
}

fn script_source(source: Option<&String>) -> Option<String> {
    source.filter(|s| !s.trim().is_empty()).cloned()
}

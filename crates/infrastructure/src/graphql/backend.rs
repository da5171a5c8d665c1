//! GraphQL backend.
//!
//! Queries and mutations go out as an HTTP POST through [`HttpBackend`].
//! Subscriptions are not executed here: `execute` answers
//! "101 Subscription Detected" and the caller switches to
//! [`GraphQlBackend::subscribe`].

use std::sync::Arc;

use async_trait::async_trait;
use conduit_application::{
    EngineError, EngineResult, MessageReceiver, ProtocolBackend, ValidationError,
};
use conduit_domain::{Deadline, EngineSettings, RequestSpec, ResponseSpec};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::operation::is_subscription;
use super::subscription::SubscriptionClient;
use crate::auth::AuthApplier;
use crate::http::{HttpBackend, validate_http_request};
use crate::websocket::websocket_url;

/// GraphQL over HTTP, with graphql-ws subscriptions on demand.
#[derive(Debug, Clone)]
pub struct GraphQlBackend {
    http: HttpBackend,
    auth: AuthApplier,
    settings: Arc<EngineSettings>,
}

impl GraphQlBackend {
    /// Creates a backend sending through `http`.
    ///
    /// Share the HTTP backend (or its cookie jar) with the `http` protocol
    /// so both see the same session.
    #[must_use]
    pub fn new(http: HttpBackend) -> Self {
        let settings = Arc::new(http.settings().clone());
        Self {
            http,
            auth: AuthApplier::new(),
            settings,
        }
    }

    /// Uses `auth` for the subscription handshake. The HTTP path uses the
    /// applier of the wrapped [`HttpBackend`].
    #[must_use]
    pub fn with_auth(mut self, auth: AuthApplier) -> Self {
        self.auth = auth;
        self
    }

    /// Runs a subscription in a background task.
    ///
    /// The handshake happens before this returns, so connection problems
    /// surface as errors here. Afterwards the channel receives the `sent`
    /// subscribe payload, then every result; a server error arrives as a
    /// final message carrying `error`. The channel closes when the
    /// operation ends or `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns validation, auth, dial and handshake errors.
    pub async fn subscribe(
        &self,
        request: &RequestSpec,
        cancel: CancellationToken,
    ) -> EngineResult<MessageReceiver> {
        self.validate(request)?;
        let variables = parse_variables(&request.graphql.variables)?;

        let mut headers = request.headers.clone();
        let mut params = request.params.clone();
        self.auth.apply(&request.auth, &mut headers, &mut params).await?;
        let url = websocket_url(&request.url, &params)?;

        let mut client =
            SubscriptionClient::connect(&url, &headers, self.settings.graphql_ack_timeout()).await?;

        let (tx, rx) = mpsc::channel(self.settings.stream_channel_capacity.max(1));
        let query = request.graphql.query.clone();
        tokio::spawn(async move {
            match client.subscribe(&query, variables, &tx, &cancel).await {
                Ok(()) | Err(EngineError::Cancelled) => {}
                Err(e) => debug!(error = %e, "GraphQL subscription ended"),
            }
            if let Err(e) = client.close().await {
                warn!(error = %e, "GraphQL subscription close failed");
            }
        });
        Ok(rx)
    }

    fn http_request(request: &RequestSpec, variables: Option<Value>) -> RequestSpec {
        let mut body = json!({ "query": request.graphql.query });
        if let Some(variables) = variables {
            body["variables"] = variables;
        }

        let mut http = request.clone();
        http.method = "POST".to_string();
        http.body = body.to_string().into_bytes();
        http.headers.insert_default("Content-Type", "application/json");
        http.headers.insert_default("Accept", "application/json");
        http
    }
}

/// Parses the variables string; empty means none.
fn parse_variables(raw: &str) -> Result<Option<Value>, ValidationError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Null) => Ok(None),
        Ok(value @ Value::Object(_)) => Ok(Some(value)),
        Ok(_) => Err(ValidationError::InvalidBody(
            "GraphQL variables must be a JSON object".to_string(),
        )),
        Err(e) => Err(ValidationError::InvalidBody(format!("GraphQL variables: {e}"))),
    }
}

#[async_trait]
impl ProtocolBackend for GraphQlBackend {
    fn name(&self) -> &'static str {
        "graphql"
    }

    fn validate(&self, request: &RequestSpec) -> Result<(), ValidationError> {
        if request.graphql.query.trim().is_empty() {
            return Err(ValidationError::MissingQuery);
        }
        parse_variables(&request.graphql.variables)?;
        if is_subscription(&request.graphql.query) {
            websocket_url(&request.url, &request.params)?;
            return Ok(());
        }
        validate_http_request(&Self::http_request(request, None))
    }

    async fn execute(&self, request: &RequestSpec, deadline: Deadline) -> EngineResult<ResponseSpec> {
        if is_subscription(&request.graphql.query) {
            debug!(url = %request.url, "Subscription detected, use the subscription client");
            return Ok(ResponseSpec::synthetic(101, "Subscription Detected", "GraphQL"));
        }

        let variables = parse_variables(&request.graphql.variables)?;
        debug!(url = %request.url, "Executing GraphQL operation");
        self.http
            .send(&Self::http_request(request, variables), deadline)
            .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::HeaderMap;
    use axum::routing::post;
    use pretty_assertions::assert_eq;

    fn backend() -> GraphQlBackend {
        GraphQlBackend::new(HttpBackend::new(EngineSettings::default()))
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/graphql")
    }

    #[tokio::test]
    async fn test_query_is_posted_as_json() {
        let app = Router::new().route(
            "/graphql",
            post(|headers: HeaderMap, body: String| async move {
                let content_type = headers
                    .get("content-type")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                let received: Value = serde_json::from_str(&body).unwrap();
                axum::Json(json!({ "content_type": content_type, "received": received }))
            }),
        );
        let url = serve(app).await;

        let mut request = RequestSpec::graphql(&url, "query Me($id: ID!) { user(id: $id) { name } }");
        request.graphql.variables = r#"{"id": "7"}"#.to_string();
        let response = backend().execute(&request, Deadline::after_millis(5_000)).await.unwrap();

        assert_eq!(response.status, 200);
        let body: Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(body["content_type"], "application/json");
        assert_eq!(body["received"]["variables"], json!({"id": "7"}));
        assert_eq!(
            body["received"]["query"],
            "query Me($id: ID!) { user(id: $id) { name } }"
        );
    }

    #[tokio::test]
    async fn test_user_content_type_wins() {
        let app = Router::new().route(
            "/graphql",
            post(|headers: HeaderMap| async move {
                headers
                    .get("content-type")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string()
            }),
        );
        let url = serve(app).await;
        let request = RequestSpec::graphql(&url, "{ me { id } }")
            .with_header("Content-Type", "application/graphql+json");

        let response = backend().execute(&request, Deadline::after_millis(5_000)).await.unwrap();
        assert_eq!(response.body_text(), "application/graphql+json");
    }

    #[tokio::test]
    async fn test_subscription_is_detected_without_network() {
        let request = RequestSpec::graphql(
            "http://127.0.0.1:9/graphql",
            "# live\nsubscription { tick }",
        );
        let response = backend().execute(&request, Deadline::after_millis(1_000)).await.unwrap();
        assert_eq!(response.status, 101);
        assert_eq!(response.status_text, "Subscription Detected");
        assert!(response.body.is_empty());
    }

    #[test]
    fn test_validation() {
        let backend = backend();
        assert_eq!(
            backend.validate(&RequestSpec::graphql("https://api.example.com/graphql", "  ")),
            Err(ValidationError::MissingQuery)
        );
        assert_eq!(
            backend.validate(&RequestSpec::graphql("", "{ a }")),
            Err(ValidationError::MissingUrl)
        );

        let mut request = RequestSpec::graphql("https://api.example.com/graphql", "{ a }");
        request.graphql.variables = "[1]".to_string();
        assert!(matches!(
            backend.validate(&request),
            Err(ValidationError::InvalidBody(_))
        ));

        request.graphql.variables = "null".to_string();
        assert!(backend.validate(&request).is_ok());
    }
}

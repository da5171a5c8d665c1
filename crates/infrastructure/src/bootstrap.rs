//! Wires the adapters into a ready-to-use engine.

use std::sync::Arc;

use conduit_application::{ExecuteRequest, ProtocolRegistry, TokenStore};
use conduit_domain::EngineSettings;

use crate::adapters::SystemClock;
use crate::auth::{AuthApplier, AuthorizePrompt, OAuth2Provider};
use crate::cookies::SharedCookieJar;
use crate::graphql::GraphQlBackend;
use crate::grpc::GrpcBackend;
use crate::http::HttpBackend;
use crate::scripting::QuickJsRunner;
use crate::websocket::WebSocketBackend;

/// Every backend plus the registry that dispatches to them.
///
/// The concrete handles stay reachable for the stateful operations the
/// registry contract does not cover (subscriptions, streams, closing).
#[derive(Clone)]
pub struct Engine {
    /// Registry with `http`, `graphql`, `grpc`, `websocket` and `ws`.
    pub registry: Arc<ProtocolRegistry>,
    /// HTTP backend.
    pub http: HttpBackend,
    /// GraphQL backend sharing the HTTP cookie jar.
    pub graphql: GraphQlBackend,
    /// gRPC backend.
    pub grpc: GrpcBackend,
    /// WebSocket backend.
    pub websocket: WebSocketBackend,
    /// Script sandbox.
    pub scripts: QuickJsRunner,
    /// Cookie jar shared by HTTP and GraphQL.
    pub cookies: SharedCookieJar,
    /// `OAuth2` grant runner and token cache.
    pub oauth: OAuth2Provider,
}

impl Engine {
    /// Builds an engine from `settings`.
    #[must_use]
    pub fn new(settings: EngineSettings) -> Self {
        Self::build(settings, None)
    }

    /// Builds an engine whose authorization code grant hands the authorize
    /// URL to `prompt`.
    #[must_use]
    pub fn with_prompt(settings: EngineSettings, prompt: AuthorizePrompt) -> Self {
        Self::build(settings, Some(prompt))
    }

    fn build(settings: EngineSettings, prompt: Option<AuthorizePrompt>) -> Self {
        let mut oauth = OAuth2Provider::with_token_store(TokenStore::new())
            .with_callback_timeout(settings.oauth_callback_timeout());
        if let Some(prompt) = prompt {
            oauth = oauth.with_prompt(prompt);
        }
        let auth = AuthApplier::with_token_provider(Arc::new(oauth.clone()));

        let cookies = SharedCookieJar::new();
        let http = HttpBackend::new(settings.clone())
            .with_cookie_jar(cookies.clone())
            .with_auth(auth.clone())
            .with_clock(Arc::new(SystemClock));
        let graphql = GraphQlBackend::new(http.clone()).with_auth(auth.clone());
        let grpc = GrpcBackend::new(settings.clone()).with_auth(auth.clone());
        let websocket = WebSocketBackend::new(settings.clone()).with_auth(auth);
        let scripts = QuickJsRunner::from_settings(&settings);

        let mut registry = ProtocolRegistry::new();
        registry.register(Arc::new(http.clone()));
        registry.register(Arc::new(graphql.clone()));
        registry.register(Arc::new(grpc.clone()));
        let ws = Arc::new(websocket.clone());
        registry.register(ws.clone());
        registry.register_alias("ws", ws);

        Self {
            registry: Arc::new(registry),
            http,
            graphql,
            grpc,
            websocket,
            scripts,
            cookies,
            oauth,
        }
    }

    /// Request pipeline over this engine with scripting enabled.
    #[must_use]
    pub fn pipeline(&self) -> ExecuteRequest {
        ExecuteRequest::new(Arc::clone(&self.registry), Arc::new(SystemClock))
            .with_scripts(Arc::new(self.scripts.clone()))
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("protocols", &self.registry.tags())
            .field("grpc", &self.grpc)
            .field("websocket", &self.websocket)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_every_protocol_is_registered() {
        let engine = Engine::new(EngineSettings::default());
        assert_eq!(
            engine.registry.tags(),
            vec!["graphql", "grpc", "http", "websocket", "ws"]
        );
    }
}

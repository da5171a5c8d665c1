//! Request specification type

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use super::{Deadline, Headers, Protocol, QueryParams};
use crate::auth::AuthConfig;
use crate::error::{DomainError, DomainResult};

/// Default request timeout when none is configured.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// GraphQL operation carried by a request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphQlSpec {
    /// Operation document (query, mutation or subscription).
    #[serde(default)]
    pub query: String,
    /// Variables as a JSON object string; empty means no variables.
    #[serde(default)]
    pub variables: String,
}

/// gRPC call target carried by a request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrpcSpec {
    /// Fully-qualified service name, e.g. `grpc.health.v1.Health`.
    #[serde(default)]
    pub service: String,
    /// Method name within the service, e.g. `Check`.
    #[serde(default)]
    pub method: String,
    /// Call metadata sent as gRPC headers.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl GrpcSpec {
    /// Returns the `/service/method` path used on the wire.
    #[must_use]
    pub fn full_method(&self) -> String {
        format!("/{}/{}", self.service, self.method)
    }
}

/// Complete, protocol-agnostic description of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSpec {
    /// Unique identifier for this request
    pub id: Uuid,
    /// Protocol tag used to pick a backend; `http` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    /// HTTP method (ignored by gRPC and WebSocket)
    #[serde(default = "default_method")]
    pub method: String,
    /// Target URL or address
    pub url: String,
    /// Request headers
    #[serde(default)]
    pub headers: Headers,
    /// Query parameters
    #[serde(default)]
    pub params: QueryParams,
    /// Raw request body
    #[serde(default)]
    pub body: Vec<u8>,
    /// Authentication configuration
    #[serde(default)]
    pub auth: AuthConfig,
    /// GraphQL operation
    #[serde(default)]
    pub graphql: GraphQlSpec,
    /// gRPC target
    #[serde(default)]
    pub grpc: GrpcSpec,
    /// Script run before the request is sent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_script: Option<String>,
    /// Script run after the response arrives
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_script: Option<String>,
    /// Explicit proxy URL overriding the client-level proxy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,
    /// Timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_method() -> String {
    "GET".to_string()
}

const fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

impl RequestSpec {
    /// Creates a new GET request for `url` over HTTP.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            protocol: None,
            method: default_method(),
            url: url.into(),
            headers: Headers::new(),
            params: QueryParams::new(),
            body: Vec::new(),
            auth: AuthConfig::default(),
            graphql: GraphQlSpec::default(),
            grpc: GrpcSpec::default(),
            pre_script: None,
            post_script: None,
            proxy_url: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }

    /// Creates a GET request with the given URL.
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(url)
    }

    /// Creates a POST request with the given URL and body.
    #[must_use]
    pub fn post(url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self::new(url).with_method("POST").with_body(body)
    }

    /// Creates a GraphQL request.
    #[must_use]
    pub fn graphql(url: impl Into<String>, query: impl Into<String>) -> Self {
        let mut request = Self::new(url)
            .with_protocol(Protocol::GraphQl)
            .with_method("POST");
        request.graphql.query = query.into();
        request
    }

    /// Creates a gRPC request for `service/method` at `address`.
    #[must_use]
    pub fn grpc(
        address: impl Into<String>,
        service: impl Into<String>,
        method: impl Into<String>,
    ) -> Self {
        let mut request = Self::new(address).with_protocol(Protocol::Grpc);
        request.grpc.service = service.into();
        request.grpc.method = method.into();
        request
    }

    /// Creates a WebSocket request.
    #[must_use]
    pub fn websocket(url: impl Into<String>) -> Self {
        Self::new(url).with_protocol(Protocol::WebSocket)
    }

    /// Sets the protocol tag.
    #[must_use]
    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = Some(protocol.as_str().to_string());
        self
    }

    /// Sets the method.
    #[must_use]
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    /// Sets the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Adds a query parameter.
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Sets the authentication configuration.
    #[must_use]
    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.auth = auth;
        self
    }

    /// Sets the timeout.
    #[must_use]
    pub const fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Returns the effective protocol tag, defaulting to `http`.
    #[must_use]
    pub fn protocol_tag(&self) -> String {
        self.protocol
            .as_deref()
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
            .map_or_else(|| Protocol::Http.as_str().to_string(), str::to_ascii_lowercase)
    }

    /// Returns the timeout as a `Duration`.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Starts the clock on this request's timeout.
    #[must_use]
    pub fn deadline(&self) -> Deadline {
        Deadline::after(self.timeout())
    }

    /// Returns the body as UTF-8 text (lossy).
    #[must_use]
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Parses the URL and appends the query parameters.
    ///
    /// # Errors
    ///
    /// Returns `InvalidUrl` if the URL is malformed.
    pub fn full_url(&self) -> DomainResult<Url> {
        self.url_with_params(&self.params)
    }

    /// Parses the URL and appends `params` instead of the request's own
    /// (e.g. after auth added an API key).
    ///
    /// # Errors
    ///
    /// Returns `InvalidUrl` if the URL is malformed.
    pub fn url_with_params(&self, params: &QueryParams) -> DomainResult<Url> {
        let mut url = Url::parse(self.url.trim())
            .map_err(|e| DomainError::InvalidUrl(format!("{e}: {}", self.url)))?;
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params.iter());
        }
        Ok(url)
    }

    /// Returns true if the URL contains variable placeholders.
    #[must_use]
    pub fn has_variables(&self) -> bool {
        self.url.contains("{{") && self.url.contains("}}")
    }
}

impl Default for RequestSpec {
    fn default() -> Self {
        Self::new(String::new())
    }
}

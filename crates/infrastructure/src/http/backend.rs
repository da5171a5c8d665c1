//! HTTP backend using reqwest.
//!
//! Applies authentication (static credentials, AWS `SigV4` signing, and a
//! single Digest retry on a 401 challenge), builds a per-call transport and
//! captures a timing breakdown.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use conduit_application::{
    Clock, EngineError, EngineResult, ProtocolBackend, ValidationError,
};
use conduit_domain::{
    AuthConfig, Deadline, EngineSettings, Headers, ResponseHeaders, ResponseSpec, RequestSpec,
};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, WWW_AUTHENTICATE};
use reqwest::{Client, Method, StatusCode, Version};
use tracing::{debug, info};
use url::Url;

use super::timing::TimingRecorder;
use super::transport::{TransportOptions, build_client};
use crate::adapters::SystemClock;
use crate::auth::AuthApplier;
use crate::cookies::SharedCookieJar;
use crate::signing::aws_sigv4::{self, SigningRequest};
use crate::signing::{DigestChallenge, generate_cnonce};

/// HTTP backend.
///
/// Also the transport underneath the GraphQL backend's query and mutation
/// path, so both share cookies, proxy and TLS settings.
#[derive(Clone)]
pub struct HttpBackend {
    settings: Arc<EngineSettings>,
    cookies: Option<SharedCookieJar>,
    auth: AuthApplier,
    clock: Arc<dyn Clock>,
}

impl HttpBackend {
    /// Creates a backend with its own cookie jar and no `OAuth2` provider.
    #[must_use]
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            settings: Arc::new(settings),
            cookies: Some(SharedCookieJar::new()),
            auth: AuthApplier::new(),
            clock: Arc::new(SystemClock::new()),
        }
    }

    /// Shares `jar` with other backends.
    #[must_use]
    pub fn with_cookie_jar(mut self, jar: SharedCookieJar) -> Self {
        self.cookies = Some(jar);
        self
    }

    /// Uses `auth` to resolve credentials.
    #[must_use]
    pub fn with_auth(mut self, auth: AuthApplier) -> Self {
        self.auth = auth;
        self
    }

    /// Overrides the clock used for request signing.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The cookie jar attached to calls.
    #[must_use]
    pub const fn cookie_jar(&self) -> Option<&SharedCookieJar> {
        self.cookies.as_ref()
    }

    /// Client-wide settings.
    #[must_use]
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Sends `request` with auth applied and returns the final response.
    ///
    /// # Errors
    ///
    /// Returns an error for auth misconfiguration, transport failures and
    /// timeouts. HTTP error statuses are responses.
    pub async fn send(&self, request: &RequestSpec, deadline: Deadline) -> EngineResult<ResponseSpec> {
        if deadline.is_expired() {
            return Err(EngineError::Timeout {
                timeout_ms: deadline.budget_ms(),
            });
        }

        let method = parse_method(&request.method)?;
        let mut headers = request.headers.clone();
        let mut params = request.params.clone();
        self.auth.apply(&request.auth, &mut headers, &mut params).await?;

        let url = request.url_with_params(&params)?;

        if let AuthConfig::AwsV4(config) = &request.auth {
            let pairs: Vec<(String, String)> = headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            let signing = SigningRequest {
                method: method.as_str(),
                url: &url,
                headers: &pairs,
                body: &request.body,
            };
            for (name, value) in aws_sigv4::sign(&signing, config, self.clock.now())? {
                headers.insert(name, value);
            }
            debug!(region = %config.region, service = %config.service, "Signed request with SigV4");
        }

        let recorder = TimingRecorder::new();
        let client = build_client(TransportOptions {
            settings: &self.settings,
            proxy_override: request.proxy_url.as_deref(),
            cookies: self.cookies.as_ref(),
            recorder: &recorder,
        })
        .await?;

        let outgoing = Outgoing {
            client: &client,
            method: &method,
            url: &url,
            body: &request.body,
            deadline,
        };

        let started = Instant::now();
        let mut sent_at = started;
        let mut response = outgoing.send(&headers).await?;

        if let AuthConfig::Digest { username, password } = &request.auth
            && response.status() == StatusCode::UNAUTHORIZED
            && let Some(challenge) = digest_challenge(response.headers())
        {
            let challenge = DigestChallenge::parse(&challenge)?;
            let authorization = challenge.authorization(
                username,
                password,
                method.as_str(),
                &request_target(&url),
                &generate_cnonce(),
                1,
            );
            info!(realm = %challenge.realm, url = %url, "Retrying with Digest authorization");
            headers.insert("Authorization", authorization);
            sent_at = Instant::now();
            response = outgoing.send(&headers).await?;
        }

        let time_to_first_byte = sent_at.elapsed();
        let status = response.status().as_u16();
        let protocol = version_label(response.version());
        let response_headers = collect_headers(response.headers());

        let body_started = Instant::now();
        let body = response
            .bytes()
            .await
            .map_err(|e| map_error(&e, deadline))?;
        let body_transfer = body_started.elapsed();
        let total = started.elapsed();

        debug!(status, size = body.len(), elapsed_ms = total.as_millis(), "HTTP response received");
        Ok(
            ResponseSpec::new(status, response_headers, body.to_vec(), total)
                .with_protocol(protocol)
                .with_tls(url.scheme() == "https")
                .with_timing(recorder.breakdown(time_to_first_byte, body_transfer, total)),
        )
    }
}

impl std::fmt::Debug for HttpBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBackend")
            .field("settings", &self.settings)
            .field("cookies", &self.cookies.is_some())
            .field("auth", &self.auth)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ProtocolBackend for HttpBackend {
    fn name(&self) -> &'static str {
        "http"
    }

    fn validate(&self, request: &RequestSpec) -> Result<(), ValidationError> {
        validate_http_request(request)
    }

    async fn execute(&self, request: &RequestSpec, deadline: Deadline) -> EngineResult<ResponseSpec> {
        debug!(method = %request.method, url = %request.url, auth = request.auth.scheme_name(), "Executing HTTP request");
        self.send(request, deadline).await
    }
}

/// One logical request; the Digest retry resends it with extra headers.
struct Outgoing<'a> {
    client: &'a Client,
    method: &'a Method,
    url: &'a Url,
    body: &'a [u8],
    deadline: Deadline,
}

impl Outgoing<'_> {
    async fn send(&self, headers: &Headers) -> EngineResult<reqwest::Response> {
        let remaining = self.deadline.remaining();
        if remaining.is_zero() {
            return Err(EngineError::Timeout {
                timeout_ms: self.deadline.budget_ms(),
            });
        }

        let mut builder = self
            .client
            .request(self.method.clone(), self.url.clone())
            .timeout(remaining);
        for (name, value) in headers.iter() {
            builder = builder.header(name, value);
        }
        if !self.body.is_empty() {
            builder = builder.body(self.body.to_vec());
        }

        builder
            .send()
            .await
            .map_err(|e| map_error(&e, self.deadline))
    }
}

/// Checks URL, scheme, method and headers without network activity.
///
/// # Errors
///
/// Returns the first problem found.
pub fn validate_http_request(request: &RequestSpec) -> Result<(), ValidationError> {
    let raw = request.url.trim();
    if raw.is_empty() {
        return Err(ValidationError::MissingUrl);
    }
    if request.method.trim().is_empty() {
        return Err(ValidationError::MissingMethod);
    }
    parse_method(&request.method)?;

    let url = Url::parse(raw).map_err(|e| ValidationError::InvalidUrl(format!("{e}: {raw}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ValidationError::UnsupportedScheme(url.scheme().to_string()));
    }

    for (name, value) in request.headers.iter() {
        HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| ValidationError::InvalidHeader(name.to_string()))?;
        HeaderValue::from_str(value)
            .map_err(|_| ValidationError::InvalidHeader(format!("{name}: invalid value")))?;
    }
    Ok(())
}

fn parse_method(method: &str) -> Result<Method, ValidationError> {
    let method = method.trim();
    if method.is_empty() {
        return Err(ValidationError::MissingMethod);
    }
    Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .map_err(|_| ValidationError::InvalidMethod(method.to_string()))
}

fn digest_challenge(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(WWW_AUTHENTICATE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find(|value| DigestChallenge::is_digest(value))
        .map(str::to_string)
}

/// Path and query as sent on the request line.
fn request_target(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{query}", url.path()),
        None => url.path().to_string(),
    }
}

/// Multi-valued response headers with lossy value decoding.
pub(crate) fn collect_headers(headers: &HeaderMap) -> ResponseHeaders {
    let mut collected = ResponseHeaders::new();
    for (name, value) in headers {
        collected
            .entry(name.as_str().to_string())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    collected
}

pub(crate) fn version_label(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_2 => "HTTP/2.0",
        Version::HTTP_3 => "HTTP/3.0",
        _ => "HTTP/1.1",
    }
}

/// Maps a reqwest failure onto the engine taxonomy.
pub(crate) fn map_error(error: &reqwest::Error, deadline: Deadline) -> EngineError {
    if error.is_timeout() {
        return EngineError::Timeout {
            timeout_ms: deadline.budget_ms(),
        };
    }
    EngineError::Transport(error_chain(error))
}

/// Joins an error with its sources, skipping repeated text.
pub(crate) fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::HeaderMap as AxumHeaders;
    use axum::response::{AppendHeaders, IntoResponse};
    use axum::routing::{get, post};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn test_app() -> Router {
        Router::new()
            .route(
                "/echo",
                post(|headers: AxumHeaders, body: String| async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    (
                        AppendHeaders([("x-multi", "a"), ("x-multi", "b")]),
                        [("content-type", "text/plain")],
                        format!("{auth}|{body}"),
                    )
                }),
            )
            .route(
                "/query",
                get(|uri: axum::http::Uri| async move { uri.query().unwrap_or_default().to_string() }),
            )
            .route(
                "/missing",
                get(|| async { (axum::http::StatusCode::NOT_FOUND, "nope").into_response() }),
            )
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    "late"
                }),
            )
    }

    fn backend() -> HttpBackend {
        HttpBackend::new(EngineSettings::default())
    }

    #[tokio::test]
    async fn test_post_with_auth_and_headers() {
        let base = serve(test_app()).await;
        let request = RequestSpec::post(format!("{base}/echo"), "hello")
            .with_auth(AuthConfig::bearer("t0k"));

        let response = backend().execute(&request, Deadline::after_millis(5_000)).await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.body_text(), "Bearer t0k|hello");
        assert_eq!(response.headers["x-multi"], vec!["a".to_string(), "b".to_string()]);
        assert_eq!(response.content_type.as_deref(), Some("text/plain"));
        assert_eq!(response.protocol, "HTTP/1.1");
        assert!(!response.tls);
        let timing = response.timing.unwrap();
        assert!(timing.time_to_first_byte.is_some());
        assert!(timing.tcp_connect.is_some());
    }

    #[tokio::test]
    async fn test_api_key_in_query() {
        let base = serve(test_app()).await;
        let request = RequestSpec::get(format!("{base}/query"))
            .with_param("page", "2")
            .with_auth(AuthConfig::api_key_query("api_key", "secret"));

        let response = backend().execute(&request, Deadline::after_millis(5_000)).await.unwrap();
        assert_eq!(response.body_text(), "api_key=secret&page=2");
    }

    #[tokio::test]
    async fn test_error_status_is_a_response() {
        let base = serve(test_app()).await;
        let response = backend()
            .execute(&RequestSpec::get(format!("{base}/missing")), Deadline::after_millis(5_000))
            .await
            .unwrap();
        assert_eq!(response.status, 404);
        assert_eq!(response.status_text, "Not Found");
        assert!(!response.is_success());
    }

    #[tokio::test]
    async fn test_deadline_is_enforced() {
        let base = serve(test_app()).await;
        let started = Instant::now();
        let err = backend()
            .execute(&RequestSpec::get(format!("{base}/slow")), Deadline::after_millis(100))
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::Timeout { timeout_ms: 100 }));
        assert!(started.elapsed() < Duration::from_millis(450));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = backend()
            .execute(&RequestSpec::get(format!("http://{addr}/")), Deadline::after_millis(5_000))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Transport(_)));
    }

    #[test]
    fn test_validation() {
        let backend = backend();
        assert_eq!(
            backend.validate(&RequestSpec::get("  ")),
            Err(ValidationError::MissingUrl)
        );
        assert_eq!(
            backend.validate(&RequestSpec::get("ftp://example.com")),
            Err(ValidationError::UnsupportedScheme("ftp".to_string()))
        );
        assert_eq!(
            backend.validate(&RequestSpec::get("https://example.com").with_method("GE T")),
            Err(ValidationError::InvalidMethod("GE T".to_string()))
        );
        assert!(matches!(
            backend.validate(&RequestSpec::get("https://{{host}}/")),
            Err(ValidationError::InvalidUrl(_))
        ));
        assert!(matches!(
            backend.validate(&RequestSpec::get("https://example.com").with_header("Bad Name", "v")),
            Err(ValidationError::InvalidHeader(_))
        ));
        assert!(backend.validate(&RequestSpec::get("https://example.com")).is_ok());
    }

    #[test]
    fn test_request_target_and_versions() {
        let url = Url::parse("https://example.com/dir/index.html?a=1").unwrap();
        assert_eq!(request_target(&url), "/dir/index.html?a=1");
        assert_eq!(version_label(Version::HTTP_2), "HTTP/2.0");
    }
}

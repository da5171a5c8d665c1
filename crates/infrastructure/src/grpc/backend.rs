//! gRPC backend driven by server reflection.
//!
//! Each call resolves the service through the reflection service of the
//! target, so no generated stubs are needed. Channels are cached per
//! normalized target address until evicted.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use conduit_application::{
    EngineError, EngineResult, MessageReceiver, ProtocolBackend, ValidationError,
};
use conduit_domain::{
    Deadline, EngineSettings, GrpcSpec, RequestSpec, ResponseHeaders, ResponseSpec, StreamMessage,
};
use futures_util::Stream;
use prost_reflect::{DynamicMessage, MethodDescriptor};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::metadata::{
    AsciiMetadataKey, BinaryMetadataKey, BinaryMetadataValue, MetadataMap, MetadataValue,
};
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint, Identity};
use tonic::{Code, Status, Streaming};
use tracing::{debug, info, warn};
use url::Url;

use super::codec::{DynamicCodec, message_from_json, message_to_json};
use super::reflection;
use super::status::{code_name, http_status};
use crate::auth::{AuthApplier, Credential};
use crate::http::error_chain;

const PROTOCOL_LABEL: &str = "gRPC";

/// A dial target derived from the request URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// `http://host:port` or `https://host:port`; also the cache key.
    pub uri: String,
    /// Whether the channel uses TLS.
    pub tls: bool,
}

impl Target {
    /// Normalizes an address.
    ///
    /// A bare `host:port` and `grpc://` dial in plaintext; `grpcs://` and
    /// `https://` dial with TLS. Paths and queries are ignored.
    ///
    /// # Errors
    ///
    /// Returns `MissingUrl` for blank input, `InvalidUrl` when there is no
    /// host, and `UnsupportedScheme` for other schemes.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ValidationError::MissingUrl);
        }
        let with_scheme = if raw.contains("://") {
            raw.to_string()
        } else {
            format!("http://{raw}")
        };
        let url = Url::parse(&with_scheme).map_err(|e| ValidationError::InvalidUrl(format!("{raw}: {e}")))?;
        let tls = match url.scheme() {
            "http" | "grpc" => false,
            "https" | "grpcs" => true,
            other => return Err(ValidationError::UnsupportedScheme(other.to_string())),
        };
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ValidationError::InvalidUrl(raw.to_string()))?;
        let scheme = if tls { "https" } else { "http" };
        let uri = match url.port() {
            Some(port) => format!("{scheme}://{host}:{port}"),
            None => format!("{scheme}://{host}"),
        };
        Ok(Self { uri, tls })
    }
}

/// Input side of a running client or bidirectional stream.
struct ClientStream {
    input: mpsc::Sender<DynamicMessage>,
    method: MethodDescriptor,
    messages: mpsc::Sender<StreamMessage>,
    task: JoinHandle<()>,
}

/// gRPC backend with a per-address channel cache.
#[derive(Clone)]
pub struct GrpcBackend {
    settings: Arc<EngineSettings>,
    auth: AuthApplier,
    connections: Arc<Mutex<HashMap<String, Channel>>>,
    client_stream: Arc<Mutex<Option<ClientStream>>>,
}

impl GrpcBackend {
    /// Creates a backend with an empty connection cache.
    #[must_use]
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            settings: Arc::new(settings),
            auth: AuthApplier::new(),
            connections: Arc::new(Mutex::new(HashMap::new())),
            client_stream: Arc::new(Mutex::new(None)),
        }
    }

    /// Uses `auth` to resolve metadata credentials.
    #[must_use]
    pub fn with_auth(mut self, auth: AuthApplier) -> Self {
        self.auth = auth;
        self
    }

    /// Number of cached channels.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Drops the cached channel for `address`; returns whether one existed.
    pub fn close_connection(&self, address: &str) -> bool {
        let Ok(target) = Target::parse(address) else {
            return false;
        };
        let removed = self
            .connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&target.uri)
            .is_some();
        if removed {
            debug!(target = %target.uri, "Closed gRPC connection");
        }
        removed
    }

    /// Drops every cached channel.
    pub fn close_all(&self) {
        self.connections.lock().unwrap_or_else(PoisonError::into_inner).clear();
        debug!("Closed all gRPC connections");
    }

    /// Lists the services exposed by the server at `address`.
    ///
    /// # Errors
    ///
    /// Returns validation, dial and reflection errors.
    pub async fn list_services(&self, address: &str, deadline: Deadline) -> EngineResult<Vec<String>> {
        let target = Target::parse(address)?;
        let budget = deadline.budget_ms();
        tokio::time::timeout(deadline.remaining(), async {
            let channel = self.channel(&target, &deadline).await?;
            reflection::list_services(channel).await
        })
        .await
        .map_err(|_| EngineError::Timeout { timeout_ms: budget })?
    }

    async fn channel(&self, target: &Target, deadline: &Deadline) -> EngineResult<Channel> {
        if let Some(channel) = self
            .connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&target.uri)
            .cloned()
        {
            debug!(target = %target.uri, "Reusing cached gRPC connection");
            return Ok(channel);
        }

        let mut endpoint = Endpoint::from_shared(target.uri.clone())
            .map_err(|e| ValidationError::InvalidUrl(format!("{}: {e}", target.uri)))?
            .connect_timeout(deadline.remaining())
            .user_agent(self.settings.user_agent.clone())
            .map_err(|e| EngineError::Transport(error_chain(&e)))?;
        if target.tls {
            endpoint = endpoint
                .tls_config(self.tls_config().await?)
                .map_err(|e| EngineError::Transport(error_chain(&e)))?;
        }

        let channel = endpoint
            .connect()
            .await
            .map_err(|e| EngineError::Transport(error_chain(&e)))?;
        info!(target = %target.uri, tls = target.tls, "Opened gRPC connection");

        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(target.uri.clone(), channel.clone());
        Ok(channel)
    }

    async fn tls_config(&self) -> EngineResult<ClientTlsConfig> {
        let tls = &self.settings.tls;
        let mut config = ClientTlsConfig::new().with_webpki_roots();
        if let Some(path) = &tls.ca_bundle {
            let pem = read_pem(path).await?;
            config = config.ca_certificate(Certificate::from_pem(pem));
        }
        if let Some(client) = &tls.client_certificate {
            let cert = read_pem(&client.cert_path).await?;
            let key = read_pem(&client.key_path).await?;
            config = config.identity(Identity::from_pem(cert, key));
        }
        if tls.insecure_skip_verify {
            warn!("insecure_skip_verify is not supported for gRPC, verifying certificates");
        }
        Ok(config)
    }

    async fn resolve_method(&self, channel: Channel, grpc: &GrpcSpec) -> EngineResult<MethodDescriptor> {
        let service = reflection::resolve_service(channel, &grpc.service).await?;
        service
            .methods()
            .find(|m| m.name() == grpc.method)
            .ok_or_else(|| EngineError::Reflection(format!("method not found: {}", grpc.full_method())))
    }

    /// Builds metadata from the request map, the custom headers (minus
    /// `content-type`) and the auth credentials, later entries winning.
    async fn metadata(&self, request: &RequestSpec) -> EngineResult<MetadataMap> {
        let mut entries: Vec<(String, String)> = request
            .grpc
            .metadata
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        entries.extend(
            request
                .headers
                .iter()
                .filter(|(name, _)| !name.eq_ignore_ascii_case("content-type"))
                .map(|(k, v)| (k.to_string(), v.to_string())),
        );
        for credential in self.auth.credentials(&request.auth).await? {
            match credential {
                Credential::Header { name, value } | Credential::Query { name, value } => {
                    entries.push((name, value));
                }
            }
        }

        let mut metadata = MetadataMap::new();
        for (name, value) in entries {
            insert_metadata(&mut metadata, &name, &value)?;
        }
        Ok(metadata)
    }

    /// Resolves, parses and starts a call; the deadline bounds everything.
    async fn prepare(
        &self,
        request: &RequestSpec,
        deadline: &Deadline,
    ) -> EngineResult<(Target, Channel, MethodDescriptor, MetadataMap)> {
        let target = Target::parse(&request.url)?;
        let channel = self.channel(&target, deadline).await?;
        let method = self.resolve_method(channel.clone(), &request.grpc).await?;
        let metadata = self.metadata(request).await?;
        Ok((target, channel, method, metadata))
    }

    async fn invoke(&self, request: &RequestSpec, deadline: &Deadline) -> EngineResult<ResponseSpec> {
        let started = Instant::now();
        let (target, channel, method, metadata) = self.prepare(request, deadline).await?;
        let input = message_from_json(&method.input(), &request.body_text()).map_err(EngineError::InvalidBody)?;
        debug!(method = %method.full_name(), target = %target.uri, "Invoking gRPC method");

        let outbound = futures_util::stream::iter([input]);
        let mut bodies = Vec::new();
        let mut headers = ResponseHeaders::new();
        let status = match start_call(channel, &method, outbound, metadata, Some(deadline.remaining())).await {
            Ok(response) => {
                let (metadata, mut stream, _) = response.into_parts();
                copy_metadata(&mut headers, metadata, "");
                let status = drain(&mut stream, &mut bodies).await;
                if status.code() == Code::Ok
                    && let Ok(Some(trailers)) = stream.trailers().await
                {
                    copy_metadata(&mut headers, trailers, "trailer-");
                }
                status
            }
            Err(status) => status,
        };
        if status.code() == Code::Unavailable {
            self.close_connection(&target.uri);
        }
        Ok(build_response(&status, bodies, headers, started.elapsed()).with_tls(target.tls))
    }

    /// Opens a streaming exchange and returns its message channel.
    ///
    /// The first message is the request body with direction `sent`. For
    /// client and bidirectional methods the body is optional and further
    /// messages go through [`send_stream_message`](Self::send_stream_message)
    /// until [`close_stream`](Self::close_stream). Server-streaming and
    /// unary methods send the body as their only message. A non-OK status
    /// arrives as a final message carrying `error`.
    ///
    /// # Errors
    ///
    /// Returns validation, dial, reflection and body errors.
    pub async fn open_stream(
        &self,
        request: &RequestSpec,
        cancel: CancellationToken,
    ) -> EngineResult<MessageReceiver> {
        self.validate(request)?;
        let deadline = request.deadline();
        let budget = deadline.budget_ms();
        let (target, channel, method, metadata) =
            tokio::time::timeout(deadline.remaining(), self.prepare(request, &deadline))
                .await
                .map_err(|_| EngineError::Timeout { timeout_ms: budget })??;

        let body = request.body_text();
        let (tx, rx) = mpsc::channel(self.settings.stream_channel_capacity.max(1));

        if method.is_client_streaming() {
            let (input, queue) = mpsc::channel(self.settings.client_stream_queue_capacity.max(1));
            if !body.trim().is_empty() {
                let first = message_from_json(&method.input(), &body).map_err(EngineError::InvalidBody)?;
                echo_sent(&tx, body.clone());
                input.try_send(first).map_err(|_| EngineError::StreamQueueFull)?;
            }
            let outbound = futures_util::stream::unfold(queue, |mut queue| async move {
                queue.recv().await.map(|message| (message, queue))
            });
            let task = tokio::spawn(run_stream(channel, method.clone(), outbound, metadata, tx.clone(), cancel));
            let previous = self
                .client_stream
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .replace(ClientStream {
                    input,
                    method: method.clone(),
                    messages: tx,
                    task,
                });
            if previous.is_some() {
                debug!("Replaced the previous client stream");
            }
        } else {
            let first = message_from_json(&method.input(), &body).map_err(EngineError::InvalidBody)?;
            echo_sent(&tx, pretty(&message_to_json(&first)));
            let outbound = futures_util::stream::iter([first]);
            tokio::spawn(run_stream(channel, method.clone(), outbound, metadata, tx, cancel));
        }
        info!(method = %method.full_name(), target = %target.uri, "gRPC stream opened");
        Ok(rx)
    }

    /// Queues one JSON message on the open client stream.
    ///
    /// # Errors
    ///
    /// Returns `NoActiveClientStream` without an open stream,
    /// `StreamQueueFull` when the queue is at capacity and `InvalidBody`
    /// when the JSON does not fit the input type. Never waits: the `sent`
    /// echo is dropped when the message channel is full.
    pub async fn send_stream_message(&self, json: &str) -> EngineResult<()> {
        let (input, method, messages) = {
            let slot = self.client_stream.lock().unwrap_or_else(PoisonError::into_inner);
            let stream = slot.as_ref().ok_or(EngineError::NoActiveClientStream)?;
            (stream.input.clone(), stream.method.clone(), stream.messages.clone())
        };
        let message = message_from_json(&method.input(), json).map_err(EngineError::InvalidBody)?;
        let echo = messages.try_reserve().ok();
        if echo.is_none() {
            debug!("Message channel full, dropping sent echo");
        }
        input.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EngineError::StreamQueueFull,
            mpsc::error::TrySendError::Closed(_) => EngineError::NoActiveClientStream,
        })?;
        if let Some(permit) = echo {
            permit.send(StreamMessage::sent(json));
        }
        Ok(())
    }

    /// Ends the client stream and waits for the call to finish.
    ///
    /// # Errors
    ///
    /// Returns `NoActiveClientStream` when no stream is open.
    pub async fn close_stream(&self) -> EngineResult<()> {
        let stream = self
            .client_stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(EngineError::NoActiveClientStream)?;
        let ClientStream { input, task, .. } = stream;
        drop(input);
        task.await
            .map_err(|e| EngineError::Transport(format!("stream task failed: {e}")))?;
        debug!("gRPC client stream closed");
        Ok(())
    }
}

impl std::fmt::Debug for GrpcBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrpcBackend")
            .field("connections", &self.connection_count())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ProtocolBackend for GrpcBackend {
    fn name(&self) -> &'static str {
        "grpc"
    }

    fn validate(&self, request: &RequestSpec) -> Result<(), ValidationError> {
        Target::parse(&request.url)?;
        if request.grpc.service.trim().is_empty() {
            return Err(ValidationError::MissingService);
        }
        if request.grpc.method.trim().is_empty() {
            return Err(ValidationError::MissingGrpcMethod);
        }
        Ok(())
    }

    async fn execute(&self, request: &RequestSpec, deadline: Deadline) -> EngineResult<ResponseSpec> {
        let budget = deadline.budget_ms();
        tokio::time::timeout(deadline.remaining(), self.invoke(request, &deadline))
            .await
            .map_err(|_| EngineError::Timeout { timeout_ms: budget })?
    }
}

/// Queues a `sent` echo without waiting on the consumer.
fn echo_sent(messages: &mpsc::Sender<StreamMessage>, content: String) {
    if messages.try_send(StreamMessage::sent(content)).is_err() {
        debug!("Message channel full, dropping sent echo");
    }
}

async fn start_call<S>(
    channel: Channel,
    method: &MethodDescriptor,
    messages: S,
    metadata: MetadataMap,
    timeout: Option<Duration>,
) -> Result<tonic::Response<Streaming<DynamicMessage>>, Status>
where
    S: Stream<Item = DynamicMessage> + Send + 'static,
{
    let mut grpc = tonic::client::Grpc::new(channel);
    grpc.ready()
        .await
        .map_err(|e| Status::unavailable(error_chain(&e)))?;
    let path = format!("/{}/{}", method.parent_service().full_name(), method.name());
    let path = PathAndQuery::try_from(path).map_err(|e| Status::internal(e.to_string()))?;

    let mut request = tonic::Request::new(messages);
    *request.metadata_mut() = metadata;
    if let Some(timeout) = timeout {
        request.set_timeout(timeout);
    }
    grpc.streaming(request, path, DynamicCodec::new(method.output()))
        .await
}

/// Reads every message; returns the terminal status.
async fn drain(stream: &mut Streaming<DynamicMessage>, bodies: &mut Vec<Value>) -> Status {
    loop {
        match stream.message().await {
            Ok(Some(message)) => bodies.push(message_to_json(&message)),
            Ok(None) => return Status::new(Code::Ok, ""),
            Err(status) => return status,
        }
    }
}

async fn run_stream<S>(
    channel: Channel,
    method: MethodDescriptor,
    outbound: S,
    metadata: MetadataMap,
    tx: mpsc::Sender<StreamMessage>,
    cancel: CancellationToken,
) where
    S: Stream<Item = DynamicMessage> + Send + 'static,
{
    let started = tokio::select! {
        () = cancel.cancelled() => return,
        started = start_call(channel, &method, outbound, metadata, None) => started,
    };
    let mut stream = match started {
        Ok(response) => response.into_inner(),
        Err(status) => {
            tokio::select! {
                () = cancel.cancelled() => {}
                sent = tx.send(status_message(&status)) => if sent.is_err() {
                    debug!("Stream consumer gone before the call started");
                },
            }
            return;
        }
    };

    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => break,
            next = stream.message() => next,
        };
        let message = match next {
            Ok(Some(message)) => StreamMessage::received(pretty(&message_to_json(&message))),
            Ok(None) => break,
            Err(status) => {
                warn!(code = code_name(status.code()), "gRPC stream ended with an error status");
                status_message(&status)
            }
        };
        let is_error = message.is_error();
        let sent = tokio::select! {
            () = cancel.cancelled() => false,
            sent = tx.send(message) => sent.is_ok(),
        };
        if !sent || is_error {
            break;
        }
    }
    debug!(method = %method.full_name(), "gRPC stream finished");
}

fn status_message(status: &Status) -> StreamMessage {
    StreamMessage::received_error(
        pretty(&status_body(status)),
        format!("{}: {}", code_name(status.code()), status.message()),
    )
}

fn status_body(status: &Status) -> Value {
    json!({
        "grpc_code": code_name(status.code()),
        "message": status.message(),
    })
}

fn build_response(status: &Status, bodies: Vec<Value>, mut headers: ResponseHeaders, elapsed: Duration) -> ResponseSpec {
    copy_metadata(&mut headers, status.metadata().clone(), "trailer-");
    headers.insert("grpc-status".to_string(), vec![i32::from(status.code()).to_string()]);
    if !status.message().is_empty() {
        headers.insert("grpc-message".to_string(), vec![status.message().to_string()]);
    }

    let body = match (status.code(), bodies.len()) {
        (Code::Ok, 0) => Value::Null,
        (_, 0) => status_body(status),
        (_, 1) => bodies.into_iter().next().unwrap_or(Value::Null),
        _ => Value::Array(bodies),
    };
    let body = if body.is_null() { Vec::new() } else { pretty(&body).into_bytes() };
    if !body.is_empty() {
        headers.insert("content-type".to_string(), vec!["application/json".to_string()]);
    }

    ResponseSpec::new(http_status(status.code()), headers, body, elapsed)
        .with_status_text(code_name(status.code()))
        .with_protocol(PROTOCOL_LABEL)
}

/// Copies metadata into response headers; status keys are handled separately.
fn copy_metadata(headers: &mut ResponseHeaders, metadata: MetadataMap, prefix: &str) {
    let map = metadata.into_headers();
    for name in map.keys() {
        let key = name.as_str();
        if matches!(key, "grpc-status" | "grpc-message" | "grpc-status-details-bin" | "content-type") {
            continue;
        }
        let values = map
            .get_all(name)
            .iter()
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .collect();
        headers.insert(format!("{prefix}{key}"), values);
    }
}

fn insert_metadata(metadata: &mut MetadataMap, name: &str, value: &str) -> Result<(), ValidationError> {
    let name = name.trim().to_ascii_lowercase();
    let invalid = || ValidationError::InvalidHeader(name.clone());
    if name.ends_with("-bin") {
        let key = BinaryMetadataKey::from_bytes(name.as_bytes()).map_err(|_| invalid())?;
        let bytes = STANDARD.decode(value.trim()).map_err(|_| invalid())?;
        metadata.insert_bin(key, BinaryMetadataValue::from_bytes(&bytes));
    } else {
        let key = AsciiMetadataKey::from_bytes(name.as_bytes()).map_err(|_| invalid())?;
        let value = MetadataValue::try_from(value).map_err(|_| invalid())?;
        metadata.insert(key, value);
    }
    Ok(())
}

async fn read_pem(path: &Path) -> EngineResult<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .map_err(|e| EngineError::transport(format!("failed to read {}: {e}", path.display())))
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

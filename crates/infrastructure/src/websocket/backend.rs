//! Stateful WebSocket backend.
//!
//! The first `execute` opens the connection; later calls send their body
//! as a text frame on it. Incoming frames are read by a background task
//! started with [`WebSocketBackend::read_messages`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use conduit_application::{
    EngineError, EngineResult, MessageReceiver, ProtocolBackend, ValidationError,
};
use conduit_domain::{Deadline, EngineSettings, RequestSpec, ResponseSpec, StreamMessage};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::handshake::{WsStream, dial, is_normal_closure, websocket_url};
use crate::auth::AuthApplier;
use crate::http::error_chain;

const PROTOCOL_LABEL: &str = "WebSocket";

#[derive(Default)]
struct Connection {
    writer: Option<SplitSink<WsStream, Message>>,
    reader: Option<SplitStream<WsStream>>,
    /// Channel of the running read loop, echoed into on send. Weak so the
    /// channel closes when the loop ends.
    messages: Option<mpsc::WeakSender<StreamMessage>>,
    /// Cleared by the read loop once the peer has gone away.
    open: Arc<AtomicBool>,
    tls: bool,
}

impl Connection {
    fn reset(&mut self) {
        *self = Self::default();
    }

    fn is_open(&self) -> bool {
        self.writer.is_some() && self.open.load(Ordering::Acquire)
    }

    /// Forgets a connection the peer has already closed.
    fn discard_if_closed(&mut self) {
        if self.writer.is_some() && !self.open.load(Ordering::Acquire) {
            debug!("WebSocket peer closed, forgetting connection");
            self.reset();
        }
    }

    /// Queues `message` for the read loop consumer without waiting.
    fn notify(&mut self, message: StreamMessage) {
        let Some(messages) = self.messages.as_ref().and_then(mpsc::WeakSender::upgrade) else {
            self.messages = None;
            return;
        };
        match messages.try_send(message) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => debug!("Message channel full, dropping notification"),
            Err(TrySendError::Closed(_)) => self.messages = None,
        }
    }
}

/// WebSocket backend holding at most one open connection.
#[derive(Clone)]
pub struct WebSocketBackend {
    settings: Arc<EngineSettings>,
    auth: AuthApplier,
    connection: Arc<Mutex<Connection>>,
}

impl WebSocketBackend {
    /// Creates an unconnected backend.
    #[must_use]
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            settings: Arc::new(settings),
            auth: AuthApplier::new(),
            connection: Arc::new(Mutex::new(Connection::default())),
        }
    }

    /// Uses `auth` to resolve handshake credentials.
    #[must_use]
    pub fn with_auth(mut self, auth: AuthApplier) -> Self {
        self.auth = auth;
        self
    }

    /// Returns true while a connection is open.
    pub async fn is_connected(&self) -> bool {
        self.connection.lock().await.is_open()
    }

    async fn connect(&self, request: &RequestSpec, deadline: Deadline) -> EngineResult<ResponseSpec> {
        let started = Instant::now();
        let mut headers = request.headers.clone();
        let mut params = request.params.clone();
        self.auth.apply(&request.auth, &mut headers, &mut params).await?;
        let url = websocket_url(&request.url, &params)?;

        let stream = dial(&url, &headers, None, deadline.remaining()).await?;
        let (writer, reader) = stream.split();
        let tls = url.scheme() == "wss";

        let mut connection = self.connection.lock().await;
        *connection = Connection {
            writer: Some(writer),
            reader: Some(reader),
            messages: None,
            open: Arc::new(AtomicBool::new(true)),
            tls,
        };
        info!(url = %url, "WebSocket session opened");

        Ok(
            ResponseSpec::synthetic(101, "Switching Protocols", PROTOCOL_LABEL)
                .with_tls(tls)
                .with_duration(started.elapsed()),
        )
    }

    /// Sends `text` as one frame on the open connection.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` without a connection and `Transport` when the
    /// write fails; a failed write drops the connection.
    ///
    /// The `sent` echo is queued ahead of the write so it precedes any reply.
    /// It never waits on the channel: a full channel drops it.
    pub async fn send_text(&self, text: String, deadline: Deadline) -> EngineResult<()> {
        let mut connection = self.connection.lock().await;
        connection.discard_if_closed();
        if connection.writer.is_none() {
            return Err(EngineError::NotConnected);
        }

        connection.notify(StreamMessage::sent(text.clone()));

        let Some(writer) = connection.writer.as_mut() else {
            return Err(EngineError::NotConnected);
        };
        let write = writer.send(Message::text(text));
        let Ok(result) = tokio::time::timeout(deadline.remaining(), write).await else {
            let timeout_ms = deadline.budget_ms();
            connection.notify(StreamMessage::received_error(
                "",
                format!("send timed out after {timeout_ms}ms"),
            ));
            return Err(EngineError::Timeout { timeout_ms });
        };
        if let Err(e) = result {
            warn!(error = %e, "WebSocket send failed, dropping connection");
            let error = error_chain(&e);
            connection.notify(StreamMessage::received_error("", error.clone()));
            connection.reset();
            return Err(EngineError::Transport(error));
        }
        Ok(())
    }

    /// Starts the background read loop and returns its channel.
    ///
    /// The channel closes on normal closure or cancellation; any other read
    /// error arrives as a final message carrying `error`. Binary frames are
    /// delivered base64-encoded.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` when there is no connection or a read loop is
    /// already running.
    pub async fn read_messages(&self, cancel: CancellationToken) -> EngineResult<MessageReceiver> {
        let mut connection = self.connection.lock().await;
        let reader = connection.reader.take().ok_or(EngineError::NotConnected)?;
        let (tx, rx) = mpsc::channel(self.settings.stream_channel_capacity.max(1));
        connection.messages = Some(tx.downgrade());
        tokio::spawn(read_loop(reader, tx, Arc::clone(&connection.open), cancel));
        Ok(rx)
    }

    /// Sends a normal close frame and forgets the connection.
    ///
    /// Closing an unconnected backend, or one the peer already closed, is
    /// not an error.
    pub async fn close(&self) {
        let mut connection = self.connection.lock().await;
        if let Some(mut writer) = connection.writer.take() {
            let frame = CloseFrame {
                code: CloseCode::Normal,
                reason: "".into(),
            };
            if let Err(e) = writer.send(Message::Close(Some(frame))).await {
                debug!(error = %e, "WebSocket close frame not delivered");
            }
            let _ = writer.close().await;
        }
        connection.reset();
        debug!("WebSocket session closed");
    }
}

async fn read_loop(
    mut reader: SplitStream<WsStream>,
    tx: mpsc::Sender<StreamMessage>,
    open: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => break,
            next = reader.next() => next,
        };

        let message = match next {
            None | Some(Ok(Message::Close(_))) => {
                open.store(false, Ordering::Release);
                break;
            }
            Some(Ok(Message::Text(text))) => StreamMessage::received(text.as_str()),
            Some(Ok(Message::Binary(data))) => StreamMessage::received(STANDARD.encode(&data)),
            Some(Ok(_)) => continue,
            Some(Err(e)) if is_normal_closure(&e) => {
                open.store(false, Ordering::Release);
                break;
            }
            Some(Err(e)) => {
                open.store(false, Ordering::Release);
                warn!(error = %e, "WebSocket read failed");
                let _ = tx.send(StreamMessage::received_error("", error_chain(&e))).await;
                break;
            }
        };

        tokio::select! {
            () = cancel.cancelled() => break,
            sent = tx.send(message) => if sent.is_err() { break },
        }
    }
    debug!("WebSocket read loop finished");
}

impl std::fmt::Debug for WebSocketBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketBackend")
            .field("auth", &self.auth)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ProtocolBackend for WebSocketBackend {
    fn name(&self) -> &'static str {
        "websocket"
    }

    fn validate(&self, request: &RequestSpec) -> Result<(), ValidationError> {
        websocket_url(&request.url, &request.params)?;
        for (name, value) in request.headers.iter() {
            if name.is_empty() || name.chars().any(|c| c.is_whitespace() || c == ':') {
                return Err(ValidationError::InvalidHeader(name.to_string()));
            }
            if value.contains(['\r', '\n']) {
                return Err(ValidationError::InvalidHeader(format!("{name}: invalid value")));
            }
        }
        Ok(())
    }

    async fn execute(&self, request: &RequestSpec, deadline: Deadline) -> EngineResult<ResponseSpec> {
        let (connected, tls) = {
            let mut connection = self.connection.lock().await;
            connection.discard_if_closed();
            (connection.writer.is_some(), connection.tls)
        };
        if !connected {
            return self.connect(request, deadline).await;
        }

        if request.body.is_empty() {
            return Ok(ResponseSpec::synthetic(200, "Already Connected", PROTOCOL_LABEL).with_tls(tls));
        }

        let started = Instant::now();
        let size = request.body.len();
        self.send_text(request.body_text(), deadline).await?;
        debug!(size, "WebSocket frame sent");
        Ok(ResponseSpec::synthetic(200, "OK", PROTOCOL_LABEL)
            .with_tls(tls)
            .with_duration(started.elapsed()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_unconnected_operations() {
        let backend = WebSocketBackend::new(EngineSettings::default());
        assert!(!backend.is_connected().await);

        let err = backend
            .send_text("hi".to_string(), Deadline::after_millis(1_000))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotConnected));

        let err = backend.read_messages(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::NotConnected));

        backend.close().await;
    }

    #[test]
    fn test_validation() {
        let backend = WebSocketBackend::new(EngineSettings::default());
        assert_eq!(
            backend.validate(&RequestSpec::websocket("")),
            Err(ValidationError::MissingUrl)
        );
        assert_eq!(
            backend.validate(&RequestSpec::websocket("ftp://x")),
            Err(ValidationError::UnsupportedScheme("ftp".to_string()))
        );
        assert!(matches!(
            backend.validate(&RequestSpec::websocket("ws://x").with_header("a b", "c")),
            Err(ValidationError::InvalidHeader(_))
        ));
        assert!(backend.validate(&RequestSpec::websocket("wss://echo.example.com")).is_ok());
    }
}

//! graphql-ws subscription client.
//!
//! Lifecycle: [`SubscriptionClient::connect`] dials with the
//! `graphql-transport-ws` sub-protocol, sends `connection_init` and waits
//! for `connection_ack`; [`SubscriptionClient::subscribe`] runs one
//! operation until `complete`, `error`, closure or cancellation;
//! [`SubscriptionClient::close`] completes the active operation and closes
//! the socket.

use std::time::Duration;

use conduit_application::{EngineError, EngineResult};
use conduit_domain::{Headers, StreamMessage};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::protocol::{Envelope, GRAPHQL_TRANSPORT_WS, ServerMessage, error_text};
use crate::http::error_chain;
use crate::websocket::{WsStream, dial, is_normal_closure};

/// An acknowledged graphql-ws connection.
pub struct SubscriptionClient {
    stream: Option<WsStream>,
    active: Option<String>,
    next_id: u64,
}

impl SubscriptionClient {
    /// Dials `url` and completes the init/ack handshake.
    ///
    /// Dialing and the ack wait are each bounded by `ack_timeout`. Pings
    /// received before the ack are answered.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if no ack arrives in time, `Protocol` if the server
    /// closes or rejects the connection first, and `Transport` for dial
    /// failures.
    pub async fn connect(url: &Url, headers: &Headers, ack_timeout: Duration) -> EngineResult<Self> {
        let stream = dial(url, headers, Some(GRAPHQL_TRANSPORT_WS), ack_timeout).await?;
        let mut client = Self {
            stream: Some(stream),
            active: None,
            next_id: 1,
        };
        client.send(&Envelope::connection_init()).await?;
        client.await_ack(ack_timeout).await?;
        info!(url = %url, "GraphQL subscription connection acknowledged");
        Ok(client)
    }

    /// Returns true until [`close`](Self::close) is called.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Id of the running operation, if any.
    #[must_use]
    pub fn active_id(&self) -> Option<&str> {
        self.active.as_deref()
    }

    async fn await_ack(&mut self, ack_timeout: Duration) -> EngineResult<()> {
        let deadline = Instant::now() + ack_timeout;
        #[allow(clippy::cast_possible_truncation)]
        let timeout = EngineError::Timeout {
            timeout_ms: ack_timeout.as_millis() as u64,
        };
        loop {
            let frame = tokio::time::timeout_at(deadline, self.stream()?.next())
                .await
                .map_err(|_| timeout.clone())?;
            let text = match frame {
                None | Some(Ok(Message::Close(_))) => {
                    return Err(EngineError::Protocol(
                        "connection closed before connection_ack".to_string(),
                    ));
                }
                Some(Err(e)) => return Err(EngineError::Transport(error_chain(&e))),
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(_)) => continue,
            };
            match ServerMessage::parse(text.as_str()) {
                Ok(ServerMessage::ConnectionAck) => return Ok(()),
                Ok(ServerMessage::Ping { payload }) => self.send(&Envelope::pong(payload)).await?,
                Ok(ServerMessage::Error { payload, .. }) => {
                    return Err(EngineError::Protocol(format!(
                        "connection rejected: {}",
                        error_text(&payload)
                    )));
                }
                Ok(other) => debug!(message = ?other, "Ignoring message before connection_ack"),
                Err(e) => warn!(error = %e, "Ignoring malformed graphql-ws frame"),
            }
        }
    }

    /// Starts an operation and forwards its results to `messages`.
    ///
    /// The first message sent is always the subscribe payload with
    /// direction `sent`. Returns `Ok` on `complete` or normal closure. On a
    /// server `error` the error is forwarded as a final message and returned
    /// as [`EngineError::Subscription`].
    ///
    /// # Errors
    ///
    /// Returns `Subscription`, `Transport` on read/write failures, and
    /// `Cancelled` once `cancel` fires.
    pub async fn subscribe(
        &mut self,
        query: &str,
        variables: Option<Value>,
        messages: &mpsc::Sender<StreamMessage>,
        cancel: &CancellationToken,
    ) -> EngineResult<()> {
        let id = self.next_id.to_string();
        self.next_id += 1;

        let envelope = Envelope::subscribe(&id, query, variables);
        self.send(&envelope).await?;
        self.active = Some(id.clone());
        debug!(id = %id, "GraphQL subscription started");

        let payload = envelope.payload.as_ref().map_or_else(String::new, pretty);
        if !emit(messages, cancel, StreamMessage::sent(payload)).await {
            return Err(EngineError::Cancelled);
        }

        loop {
            let stream = self.stream()?;
            let frame = tokio::select! {
                () = cancel.cancelled() => return Err(EngineError::Cancelled),
                frame = stream.next() => frame,
            };

            let text = match frame {
                None | Some(Ok(Message::Close(_))) => {
                    debug!(id = %id, "Server closed the subscription connection");
                    self.active = None;
                    return Ok(());
                }
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(_)) => continue,
                Some(Err(e)) if is_normal_closure(&e) => {
                    self.active = None;
                    return Ok(());
                }
                Some(Err(e)) => {
                    let error = EngineError::Transport(error_chain(&e));
                    emit(messages, cancel, StreamMessage::received_error("", error.to_string())).await;
                    self.active = None;
                    return Err(error);
                }
            };

            let message = match ServerMessage::parse(text.as_str()) {
                Ok(message) => message,
                Err(e) => {
                    warn!(error = %e, "Ignoring malformed graphql-ws frame");
                    continue;
                }
            };
            match message {
                ServerMessage::Next { id: op, payload } if is_for(op.as_deref(), &id) => {
                    if !emit(messages, cancel, StreamMessage::received(pretty(&payload))).await {
                        return Err(EngineError::Cancelled);
                    }
                }
                ServerMessage::Error { id: op, payload } if is_for(op.as_deref(), &id) => {
                    let error = EngineError::Subscription(error_text(&payload));
                    emit(
                        messages,
                        cancel,
                        StreamMessage::received_error(pretty(&payload), error.to_string()),
                    )
                    .await;
                    self.active = None;
                    warn!(id = %id, "GraphQL subscription ended with an error");
                    return Err(error);
                }
                ServerMessage::Complete { id: op } if is_for(op.as_deref(), &id) => {
                    self.active = None;
                    debug!(id = %id, "GraphQL subscription completed");
                    return Ok(());
                }
                ServerMessage::Ping { payload } => self.send(&Envelope::pong(payload)).await?,
                other => debug!(message = ?other, "Ignoring graphql-ws message"),
            }
        }
    }

    /// Completes the active operation (best effort) and closes the socket.
    ///
    /// Closing a connection the peer already closed is not an error.
    ///
    /// # Errors
    ///
    /// Returns `Transport` if the close handshake fails for another reason.
    pub async fn close(&mut self) -> EngineResult<()> {
        let Some(mut stream) = self.stream.take() else {
            return Ok(());
        };
        if let Some(id) = self.active.take() {
            let complete = Envelope::complete(&id).to_text();
            if let Err(e) = stream.send(Message::text(complete)).await {
                debug!(error = %e, "Could not send complete");
            }
        }
        match stream.close(None).await {
            Ok(()) => Ok(()),
            Err(e) if is_normal_closure(&e) => Ok(()),
            Err(e) => Err(EngineError::Transport(error_chain(&e))),
        }
    }

    fn stream(&mut self) -> EngineResult<&mut WsStream> {
        self.stream.as_mut().ok_or(EngineError::NotConnected)
    }

    async fn send(&mut self, envelope: &Envelope) -> EngineResult<()> {
        self.stream()?
            .send(Message::text(envelope.to_text()))
            .await
            .map_err(|e| EngineError::Transport(error_chain(&e)))
    }
}

impl std::fmt::Debug for SubscriptionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionClient")
            .field("open", &self.stream.is_some())
            .field("active", &self.active)
            .finish()
    }
}

/// Messages without an id belong to the only running operation.
fn is_for(message_id: Option<&str>, active: &str) -> bool {
    message_id.is_none_or(|id| id == active)
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Sends unless cancelled; false means stop.
async fn emit(
    messages: &mpsc::Sender<StreamMessage>,
    cancel: &CancellationToken,
    message: StreamMessage,
) -> bool {
    tokio::select! {
        () = cancel.cancelled() => false,
        sent = messages.send(message) => sent.is_ok(),
    }
}

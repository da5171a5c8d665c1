//! WebSocket dialing shared by the WebSocket backend and the graphql-ws
//! subscription client.

use std::time::Duration;

use conduit_application::{EngineError, EngineResult, ValidationError};
use conduit_domain::{Headers, QueryParams};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::{self, Error as WsError};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;
use url::Url;

use crate::http::error_chain;

/// Client side of an open WebSocket.
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Rewrites `http`/`https` to `ws`/`wss` and appends `params`.
///
/// # Errors
///
/// Returns a validation error for unparsable URLs and schemes other than
/// `ws`, `wss`, `http` and `https`.
pub fn websocket_url(raw: &str, params: &QueryParams) -> Result<Url, ValidationError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ValidationError::MissingUrl);
    }
    let mut url = Url::parse(raw).map_err(|e| ValidationError::InvalidUrl(format!("{e}: {raw}")))?;
    let scheme = match url.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => return Err(ValidationError::UnsupportedScheme(other.to_string())),
    };
    if url.scheme() != scheme {
        url.set_scheme(scheme)
            .map_err(|()| ValidationError::InvalidUrl(raw.to_string()))?;
    }
    if !params.is_empty() {
        url.query_pairs_mut().extend_pairs(params.iter());
    }
    Ok(url)
}

/// Opens a WebSocket, sending `headers` and offering `subprotocol`.
///
/// # Errors
///
/// Returns `Timeout` when the handshake does not finish within `timeout`,
/// `Protocol` when the server refuses the upgrade, and `Transport` for
/// connection failures.
pub async fn dial(
    url: &Url,
    headers: &Headers,
    subprotocol: Option<&str>,
    timeout: Duration,
) -> EngineResult<WsStream> {
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| ValidationError::InvalidUrl(format!("{e}: {url}")))?;

    for (name, value) in headers.iter() {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| ValidationError::InvalidHeader(name.to_string()))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| ValidationError::InvalidHeader(format!("{name}: invalid value")))?;
        request.headers_mut().insert(name, value);
    }
    if let Some(protocol) = subprotocol {
        let value = HeaderValue::from_str(protocol)
            .map_err(|_| ValidationError::InvalidHeader("Sec-WebSocket-Protocol".to_string()))?;
        request.headers_mut().insert("Sec-WebSocket-Protocol", value);
    }

    debug!(url = %url, subprotocol, "Dialing WebSocket");
    let handshake = tokio_tungstenite::connect_async(request);
    #[allow(clippy::cast_possible_truncation)]
    let (stream, response) = tokio::time::timeout(timeout, handshake)
        .await
        .map_err(|_| EngineError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        })?
        .map_err(|e| handshake_error(&e))?;
    debug!(url = %url, status = response.status().as_u16(), "WebSocket connected");
    Ok(stream)
}

fn handshake_error(error: &WsError) -> EngineError {
    match error {
        WsError::Http(response) => EngineError::Protocol(format!(
            "WebSocket upgrade rejected with status {}",
            response.status()
        )),
        WsError::Protocol(e) => EngineError::Protocol(format!("WebSocket handshake failed: {e}")),
        WsError::Url(e) => EngineError::Validation(ValidationError::InvalidUrl(e.to_string())),
        other => EngineError::Transport(error_chain(other)),
    }
}

/// True for errors that mean the peer closed the connection normally.
#[must_use]
pub fn is_normal_closure(error: &WsError) -> bool {
    matches!(
        error,
        WsError::ConnectionClosed
            | WsError::AlreadyClosed
            | WsError::Protocol(tungstenite::error::ProtocolError::ResetWithoutClosingHandshake)
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_http_schemes_become_websocket_schemes() {
        let params = QueryParams::new();
        assert_eq!(
            websocket_url("https://api.example.com/graphql", &params).unwrap().as_str(),
            "wss://api.example.com/graphql"
        );
        assert_eq!(
            websocket_url("http://localhost:4000/", &params).unwrap().as_str(),
            "ws://localhost:4000/"
        );
        assert_eq!(
            websocket_url("ws://localhost/socket", &params).unwrap().as_str(),
            "ws://localhost/socket"
        );
    }

    #[test]
    fn test_params_and_bad_schemes() {
        let mut params = QueryParams::new();
        params.insert("token".to_string(), "abc".to_string());
        assert_eq!(
            websocket_url("ws://localhost/socket", &params).unwrap().as_str(),
            "ws://localhost/socket?token=abc"
        );
        assert_eq!(
            websocket_url("ftp://localhost", &QueryParams::new()),
            Err(ValidationError::UnsupportedScheme("ftp".to_string()))
        );
        assert_eq!(
            websocket_url(" ", &QueryParams::new()),
            Err(ValidationError::MissingUrl)
        );
    }

    #[tokio::test]
    async fn test_refused_connection_is_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let url = Url::parse(&format!("ws://{addr}/")).unwrap();
        let err = dial(&url, &Headers::new(), None, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Transport(_)));
    }
}

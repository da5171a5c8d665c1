//! End-to-end tests for the HTTP-family backends against local servers.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use conduit_application::EngineError;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use conduit_domain::{AuthConfig, Deadline, EngineSettings, MessageDirection, ProxyConfig, RequestSpec};
use conduit_infrastructure::Engine;
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

async fn serve(app: Router) -> std::net::SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn protected(State(calls): State<Arc<AtomicUsize>>, headers: HeaderMap) -> impl IntoResponse {
    calls.fetch_add(1, Ordering::SeqCst);
    let authorization = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    if authorization.starts_with("Digest ") {
        (StatusCode::OK, HeaderMap::new(), authorization).into_response()
    } else {
        let mut challenge = HeaderMap::new();
        challenge.insert(
            "www-authenticate",
            r#"Digest realm="conduit@test", qop="auth", nonce="dcd98b7102dd2f0e", opaque="5ccc069c""#
                .parse()
                .unwrap(),
        );
        (StatusCode::UNAUTHORIZED, challenge, String::new()).into_response()
    }
}

#[tokio::test]
async fn test_digest_challenge_is_answered_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route("/protected", get(protected))
        .with_state(Arc::clone(&calls));
    let addr = serve(app).await;

    let engine = Engine::new(EngineSettings::default());
    let request = RequestSpec::get(format!("http://{addr}/protected"))
        .with_auth(AuthConfig::digest("alice", "s3cret"));
    let response = engine
        .registry
        .execute(&request, Deadline::after_millis(5_000))
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    let authorization = response.body_text();
    assert!(authorization.contains(r#"username="alice""#), "{authorization}");
    assert!(authorization.contains(r#"realm="conduit@test""#));
    assert!(authorization.contains("nc=00000001"));
}

async fn echo(ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(|mut socket: WebSocket| async move {
        while let Some(Ok(message)) = socket.recv().await {
            match message {
                Message::Text(text) if text.as_str() == "bye" => {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
                Message::Text(text) => {
                    if socket.send(Message::Text(format!("echo:{}", text.as_str()).into())).await.is_err() {
                        break;
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    })
}

#[tokio::test]
async fn test_websocket_connect_send_and_read() {
    let addr = serve(Router::new().route("/ws", get(echo))).await;
    let engine = Engine::new(EngineSettings::default());
    let url = format!("ws://{addr}/ws");

    let opened = engine
        .registry
        .execute(&RequestSpec::websocket(&url), Deadline::after_millis(5_000))
        .await
        .unwrap();
    assert_eq!(opened.status, 101);
    assert_eq!(opened.protocol, "WebSocket");
    assert!(engine.websocket.is_connected().await);

    let cancel = CancellationToken::new();
    let mut messages = engine.websocket.read_messages(cancel.clone()).await.unwrap();

    let sent = engine
        .registry
        .execute(
            &RequestSpec::websocket(&url).with_body("hello"),
            Deadline::after_millis(5_000),
        )
        .await
        .unwrap();
    assert_eq!(sent.status, 200);

    let outgoing = messages.recv().await.unwrap();
    assert_eq!(outgoing.direction, MessageDirection::Sent);
    assert_eq!(outgoing.content, "hello");
    let incoming = messages.recv().await.unwrap();
    assert_eq!(incoming.direction, MessageDirection::Received);
    assert_eq!(incoming.content, "echo:hello");

    engine.websocket.close().await;
    engine.websocket.close().await;
    assert!(!engine.websocket.is_connected().await);
    cancel.cancel();
}

#[tokio::test]
async fn test_websocket_send_without_connection() {
    let engine = Engine::new(EngineSettings::default());
    let err = engine
        .websocket
        .send_text("hi".to_string(), Deadline::after_millis(1_000))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotConnected));
}

#[tokio::test]
async fn test_websocket_sends_do_not_wait_for_a_stalled_reader() {
    let addr = serve(Router::new().route("/ws", get(echo))).await;
    let settings = EngineSettings {
        stream_channel_capacity: 1,
        ..EngineSettings::default()
    };
    let engine = Engine::new(settings);
    let url = format!("ws://{addr}/ws");
    engine
        .registry
        .execute(&RequestSpec::websocket(&url), Deadline::after_millis(5_000))
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let mut messages = engine.websocket.read_messages(cancel.clone()).await.unwrap();

    for text in ["one", "two", "three"] {
        let send = engine
            .websocket
            .send_text(text.to_string(), Deadline::after_millis(200));
        tokio::time::timeout(Duration::from_secs(2), send)
            .await
            .expect("send waited on the message channel")
            .unwrap();
    }
    assert!(engine.websocket.is_connected().await);

    let first = messages.recv().await.unwrap();
    assert_eq!(first.direction, MessageDirection::Sent);
    assert_eq!(first.content, "one");

    tokio::time::timeout(Duration::from_secs(2), engine.websocket.close())
        .await
        .unwrap();
    cancel.cancel();
}

#[tokio::test]
async fn test_websocket_peer_close_disconnects() {
    let addr = serve(Router::new().route("/ws", get(echo))).await;
    let engine = Engine::new(EngineSettings::default());
    let url = format!("ws://{addr}/ws");
    engine
        .registry
        .execute(&RequestSpec::websocket(&url), Deadline::after_millis(5_000))
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let mut messages = engine.websocket.read_messages(cancel.clone()).await.unwrap();
    engine
        .websocket
        .send_text("bye".to_string(), Deadline::after_millis(1_000))
        .await
        .unwrap();

    let mut received = Vec::new();
    while let Some(message) = tokio::time::timeout(Duration::from_secs(2), messages.recv())
        .await
        .unwrap()
    {
        received.push(message);
    }
    assert_eq!(received.len(), 1);
    assert!(received.iter().all(|m| !m.is_error()));
    assert!(!engine.websocket.is_connected().await);

    let err = engine
        .websocket
        .send_text("again".to_string(), Deadline::after_millis(1_000))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotConnected));

    let reopened = engine
        .registry
        .execute(&RequestSpec::websocket(&url), Deadline::after_millis(5_000))
        .await
        .unwrap();
    assert_eq!(reopened.status, 101);
    engine.websocket.close().await;
}

#[tokio::test]
async fn test_proxy_credentials_with_reserved_characters() {
    let proxy = Router::new().fallback(|headers: HeaderMap| async move {
        headers
            .get("proxy-authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("missing")
            .to_string()
    });
    let addr = serve(proxy).await;
    let settings = EngineSettings {
        proxy: ProxyConfig::with_url(format!("http://{addr}")).with_auth("alice", "p/ss#1?"),
        ..EngineSettings::default()
    };
    let engine = Engine::new(settings);

    let response = engine
        .registry
        .execute(
            &RequestSpec::get("http://upstream.invalid/resource"),
            Deadline::after_millis(5_000),
        )
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(
        response.body_text(),
        format!("Basic {}", STANDARD.encode("alice:p/ss#1?"))
    );
}

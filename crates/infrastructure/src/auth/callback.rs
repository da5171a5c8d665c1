//! Local listener for the authorization-code redirect.
//!
//! Binds `127.0.0.1` on an ephemeral port, serves `/callback` once and
//! shuts down when the outcome has been collected or the wait times out.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use conduit_domain::AuthError;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Path the authorization server redirects to.
pub const CALLBACK_PATH: &str = "/callback";

/// Query parameters of the redirect.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    /// Authorization code on success.
    pub code: Option<String>,
    /// Echoed `state`.
    pub state: Option<String>,
    /// Error code on failure.
    pub error: Option<String>,
    /// Human-readable error.
    pub error_description: Option<String>,
}

type Slot = Arc<Mutex<Option<oneshot::Sender<CallbackParams>>>>;

/// A running callback listener.
pub struct CallbackListener {
    addr: SocketAddr,
    expected_state: String,
    outcome: oneshot::Receiver<CallbackParams>,
    shutdown: Option<oneshot::Sender<()>>,
    server: JoinHandle<()>,
}

impl CallbackListener {
    /// Starts listening on `127.0.0.1:0`.
    ///
    /// # Errors
    ///
    /// Returns `CallbackServerError` if the socket cannot be bound.
    pub async fn bind(expected_state: impl Into<String>) -> Result<Self, AuthError> {
        let listener = TcpListener::bind(("127.0.0.1", 0))
            .await
            .map_err(|e| callback_error(format!("failed to bind: {e}")))?;
        let addr = listener
            .local_addr()
            .map_err(|e| callback_error(format!("no local address: {e}")))?;

        let (outcome_tx, outcome) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let slot: Slot = Arc::new(Mutex::new(Some(outcome_tx)));

        let app = Router::new()
            .route(CALLBACK_PATH, get(handle_callback))
            .with_state(slot);

        let server = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = result {
                warn!(error = %e, "OAuth2 callback listener failed");
            }
        });

        debug!(%addr, "OAuth2 callback listener started");
        Ok(Self {
            addr,
            expected_state: expected_state.into(),
            outcome,
            shutdown: Some(shutdown_tx),
            server,
        })
    }

    /// The `redirect_uri` to register with the authorization request.
    #[must_use]
    pub fn redirect_uri(&self) -> String {
        format!("http://{}{CALLBACK_PATH}", self.addr)
    }

    /// The bound address.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Waits for the redirect and returns the authorization code.
    ///
    /// # Errors
    ///
    /// Fails on timeout, on an `error` redirect, on a `state` mismatch or
    /// when the redirect carries no code.
    pub async fn wait(mut self, timeout: Duration) -> Result<String, AuthError> {
        let received = tokio::time::timeout(timeout, &mut self.outcome).await;
        self.stop();

        let params = match received {
            Ok(Ok(params)) => params,
            Ok(Err(_)) => return Err(callback_error("listener stopped before the redirect")),
            Err(_) => {
                return Err(callback_error(format!(
                    "no redirect within {}s",
                    timeout.as_secs()
                )));
            }
        };

        if let Some(error) = params.error {
            return Err(AuthError::OAuth2AuthorizationFailed {
                message: params.error_description.unwrap_or(error),
            });
        }
        if params.state.as_deref() != Some(self.expected_state.as_str()) {
            return Err(callback_error("state mismatch"));
        }
        params
            .code
            .filter(|code| !code.is_empty())
            .ok_or_else(|| callback_error("redirect carried no code"))
    }

    fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

impl Drop for CallbackListener {
    fn drop(&mut self) {
        self.stop();
        if !self.server.is_finished() {
            debug!(addr = %self.addr, "OAuth2 callback listener stopping");
        }
    }
}

async fn handle_callback(
    State(slot): State<Slot>,
    Query(params): Query<CallbackParams>,
) -> Html<&'static str> {
    let failed = params.error.is_some();
    if let Ok(mut slot) = slot.lock()
        && let Some(sender) = slot.take()
    {
        let _ = sender.send(params);
    }
    if failed {
        Html("<html><body><h1>Authorization failed</h1><p>You can close this window.</p></body></html>")
    } else {
        Html("<html><body><h1>Authorization complete</h1><p>You can close this window.</p></body></html>")
    }
}

fn callback_error(message: impl Into<String>) -> AuthError {
    AuthError::CallbackServerError {
        message: message.into(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    async fn redirect(listener: &CallbackListener, query: &str) -> reqwest::StatusCode {
        let url = format!("{}?{query}", listener.redirect_uri());
        reqwest::get(url).await.unwrap().status()
    }

    #[tokio::test]
    async fn test_captures_code() {
        let listener = CallbackListener::bind("xyz").await.unwrap();
        assert!(listener.redirect_uri().starts_with("http://127.0.0.1:"));
        assert!(listener.redirect_uri().ends_with("/callback"));

        assert_eq!(redirect(&listener, "code=abc&state=xyz").await, 200);
        let code = listener.wait(Duration::from_secs(5)).await.unwrap();
        assert_eq!(code, "abc");
    }

    #[tokio::test]
    async fn test_error_redirect() {
        let listener = CallbackListener::bind("xyz").await.unwrap();
        redirect(&listener, "error=access_denied&error_description=denied&state=xyz").await;

        let err = listener.wait(Duration::from_secs(5)).await.unwrap_err();
        assert_eq!(
            err,
            AuthError::OAuth2AuthorizationFailed {
                message: "denied".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_state_mismatch() {
        let listener = CallbackListener::bind("expected").await.unwrap();
        redirect(&listener, "code=abc&state=forged").await;

        let err = listener.wait(Duration::from_secs(5)).await.unwrap_err();
        assert!(err.to_string().contains("state mismatch"));
    }

    #[tokio::test]
    async fn test_times_out() {
        let listener = CallbackListener::bind("s").await.unwrap();
        let err = listener.wait(Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, AuthError::CallbackServerError { .. }));
    }
}

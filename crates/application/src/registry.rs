//! Protocol registry
//!
//! Maps a protocol tag to the backend that handles it and enforces
//! validate-then-execute.

use std::collections::HashMap;
use std::sync::Arc;

use conduit_domain::{Deadline, RequestSpec, ResponseSpec};

use crate::ports::ProtocolBackend;
use crate::{EngineError, EngineResult};

/// Lookup table of protocol backends keyed by tag.
#[derive(Clone, Default)]
pub struct ProtocolRegistry {
    backends: HashMap<String, Arc<dyn ProtocolBackend>>,
}

impl ProtocolRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `backend` under its own name, replacing any previous one.
    pub fn register(&mut self, backend: Arc<dyn ProtocolBackend>) {
        let tag = backend.name().to_string();
        self.backends.insert(tag, backend);
    }

    /// Registers `backend` under an additional tag (e.g. `ws` for `websocket`).
    pub fn register_alias(&mut self, tag: impl Into<String>, backend: Arc<dyn ProtocolBackend>) {
        self.backends
            .insert(tag.into().to_ascii_lowercase(), backend);
    }

    /// Builder form of [`register`](Self::register).
    #[must_use]
    pub fn with(mut self, backend: Arc<dyn ProtocolBackend>) -> Self {
        self.register(backend);
        self
    }

    /// Returns the backend for `tag`, if any.
    #[must_use]
    pub fn get(&self, tag: &str) -> Option<Arc<dyn ProtocolBackend>> {
        self.backends.get(tag).cloned()
    }

    /// Returns true if a backend answers to `tag`.
    #[must_use]
    pub fn contains(&self, tag: &str) -> bool {
        self.backends.contains_key(tag)
    }

    /// Registered tags, sorted.
    #[must_use]
    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.backends.keys().cloned().collect();
        tags.sort();
        tags
    }

    /// Dispatches `request` to its backend.
    ///
    /// The tag defaults to `http`. Unknown tags fail without touching any
    /// backend, and a failed validation never reaches `execute`. The call is
    /// bounded by `deadline` regardless of how the backend honours it.
    ///
    /// # Errors
    ///
    /// Returns `UnknownProtocol`, `Validation`, `Timeout` or whatever the
    /// backend reports.
    pub async fn execute(
        &self,
        request: &RequestSpec,
        deadline: Deadline,
    ) -> EngineResult<ResponseSpec> {
        let tag = request.protocol_tag();
        let backend = self
            .backends
            .get(&tag)
            .ok_or(EngineError::UnknownProtocol(tag))?;

        backend.validate(request)?;

        let at = tokio::time::Instant::from_std(deadline.instant());
        tokio::time::timeout_at(at, backend.execute(request, deadline))
            .await
            .map_err(|_| EngineError::Timeout {
                timeout_ms: deadline.budget_ms(),
            })?
    }
}

impl std::fmt::Debug for ProtocolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolRegistry")
            .field("tags", &self.tags())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::ValidationError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Backend that counts calls and optionally fails validation.
    struct CountingBackend {
        name: &'static str,
        reject: bool,
        delay: Duration,
        validated: AtomicUsize,
        executed: AtomicUsize,
    }

    impl CountingBackend {
        fn new(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                reject: false,
                delay: Duration::ZERO,
                validated: AtomicUsize::new(0),
                executed: AtomicUsize::new(0),
            })
        }

        fn rejecting(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                reject: true,
                ..Arc::into_inner(Self::new(name)).unwrap()
            })
        }

        fn slow(name: &'static str, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay,
                ..Arc::into_inner(Self::new(name)).unwrap()
            })
        }

        fn counts(&self) -> (usize, usize) {
            (
                self.validated.load(Ordering::SeqCst),
                self.executed.load(Ordering::SeqCst),
            )
        }
    }

    #[async_trait]
    impl ProtocolBackend for CountingBackend {
        fn name(&self) -> &'static str {
            self.name
        }

        fn validate(&self, _request: &RequestSpec) -> Result<(), ValidationError> {
            self.validated.fetch_add(1, Ordering::SeqCst);
            if self.reject {
                Err(ValidationError::MissingUrl)
            } else {
                Ok(())
            }
        }

        async fn execute(
            &self,
            _request: &RequestSpec,
            _deadline: Deadline,
        ) -> EngineResult<ResponseSpec> {
            self.executed.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(ResponseSpec::synthetic(200, "OK", self.name))
        }
    }

    #[tokio::test]
    async fn test_default_tag_is_http() {
        let http = CountingBackend::new("http");
        let registry = ProtocolRegistry::new().with(http.clone());

        let response = registry
            .execute(&RequestSpec::get("https://example.com"), Deadline::after_millis(1000))
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(http.counts(), (1, 1));
    }

    #[tokio::test]
    async fn test_unknown_protocol_touches_nothing() {
        let http = CountingBackend::new("http");
        let registry = ProtocolRegistry::new().with(http.clone());

        let mut request = RequestSpec::get("ftp://example.com");
        request.protocol = Some("ftp".to_string());
        let err = registry
            .execute(&request, Deadline::after_millis(1000))
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "unknown protocol: ftp");
        assert_eq!(http.counts(), (0, 0));
    }

    #[tokio::test]
    async fn test_failed_validation_never_executes() {
        let grpc = CountingBackend::rejecting("grpc");
        let registry = ProtocolRegistry::new().with(grpc.clone());

        let request = RequestSpec::grpc("localhost:50051", "", "");
        let err = registry
            .execute(&request, Deadline::after_millis(1000))
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::Validation(ValidationError::MissingUrl)));
        assert_eq!(grpc.counts(), (1, 0));
    }

    #[tokio::test]
    async fn test_deadline_bounds_slow_backend() {
        let slow = CountingBackend::slow("http", Duration::from_secs(30));
        let registry = ProtocolRegistry::new().with(slow);

        let started = std::time::Instant::now();
        let err = registry
            .execute(&RequestSpec::get("https://example.com"), Deadline::after_millis(50))
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::Timeout { timeout_ms: 50 }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_alias_dispatch() {
        let ws = CountingBackend::new("websocket");
        let mut registry = ProtocolRegistry::new().with(ws.clone());
        registry.register_alias("WS", ws.clone());

        let mut request = RequestSpec::websocket("ws://localhost/socket");
        request.protocol = Some("ws".to_string());
        registry
            .execute(&request, Deadline::after_millis(1000))
            .await
            .unwrap();

        assert_eq!(ws.counts(), (1, 1));
        assert_eq!(registry.tags(), vec!["websocket".to_string(), "ws".to_string()]);
    }
}

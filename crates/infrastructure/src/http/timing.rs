//! Connection-lifecycle timing hooks for reqwest.
//!
//! A [`TimingResolver`] times name resolution and a [`ConnectTimingLayer`]
//! times the connector (which resolves, connects and, for `https`,
//! performs the TLS handshake). Both write into one [`TimingRecorder`].

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use conduit_domain::TimingBreakdown;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use tower::{Layer, Service};

#[derive(Debug, Default, Clone, Copy)]
struct Phases {
    dns: Option<Duration>,
    connect: Option<Duration>,
}

/// Collects phase durations for one client.
#[derive(Debug, Clone, Default)]
pub struct TimingRecorder {
    phases: Arc<Mutex<Phases>>,
}

impl TimingRecorder {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, f: impl FnOnce(&mut Phases)) {
        let mut phases = self.phases.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut phases);
    }

    fn snapshot(&self) -> Phases {
        *self.phases.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records a DNS lookup.
    pub fn record_dns(&self, elapsed: Duration) {
        self.update(|p| p.dns = Some(elapsed));
    }

    /// Records a completed connector call.
    pub fn record_connect(&self, elapsed: Duration) {
        self.update(|p| p.connect = Some(elapsed));
    }

    /// Builds the breakdown.
    ///
    /// The connector call includes resolution, so the DNS time is taken
    /// out of `tcp_connect`. A reused connection records neither phase.
    #[must_use]
    pub fn breakdown(
        &self,
        time_to_first_byte: Duration,
        body_transfer: Duration,
        total: Duration,
    ) -> TimingBreakdown {
        let phases = self.snapshot();
        TimingBreakdown {
            dns_lookup: phases.dns,
            tcp_connect: phases
                .connect
                .map(|connect| connect.saturating_sub(phases.dns.unwrap_or_default())),
            tls_handshake: None,
            time_to_first_byte: Some(time_to_first_byte),
            body_transfer: Some(body_transfer),
            total,
        }
    }
}

/// System resolver that records how long each lookup took.
#[derive(Debug, Clone)]
pub struct TimingResolver {
    recorder: TimingRecorder,
}

impl TimingResolver {
    /// Creates a resolver writing into `recorder`.
    #[must_use]
    pub const fn new(recorder: TimingRecorder) -> Self {
        Self { recorder }
    }
}

impl Resolve for TimingResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let recorder = self.recorder.clone();
        Box::pin(async move {
            let started = Instant::now();
            let addrs: Vec<SocketAddr> = tokio::net::lookup_host((name.as_str(), 0))
                .await?
                .collect();
            recorder.record_dns(started.elapsed());
            let addrs: Addrs = Box::new(addrs.into_iter());
            Ok(addrs)
        })
    }
}

/// Layer wrapping reqwest's connector with a stopwatch.
#[derive(Debug, Clone)]
pub struct ConnectTimingLayer {
    recorder: TimingRecorder,
}

impl ConnectTimingLayer {
    /// Creates a layer writing into `recorder`.
    #[must_use]
    pub const fn new(recorder: TimingRecorder) -> Self {
        Self { recorder }
    }
}

impl<S> Layer<S> for ConnectTimingLayer {
    type Service = ConnectTiming<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ConnectTiming {
            inner,
            recorder: self.recorder.clone(),
        }
    }
}

/// Connector service produced by [`ConnectTimingLayer`].
#[derive(Debug, Clone)]
pub struct ConnectTiming<S> {
    inner: S,
    recorder: TimingRecorder,
}

impl<S, R> Service<R> for ConnectTiming<S>
where
    S: Service<R> + 'static,
    S::Future: Send + 'static,
    S::Response: 'static,
    S::Error: 'static,
    R: 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<S::Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: R) -> Self::Future {
        let recorder = self.recorder.clone();
        let started = Instant::now();
        let future = self.inner.call(request);
        Box::pin(async move {
            let result = future.await;
            if result.is_ok() {
                recorder.record_connect(started.elapsed());
            }
            result
        })
    }
}

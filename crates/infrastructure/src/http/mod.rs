//! HTTP backend and the transport pieces it shares with GraphQL.
//!
//! This module provides:
//! - The `http` protocol backend with auth, `SigV4` and Digest retry
//! - Per-call client construction (proxy, TLS, cookies)
//! - Connection-lifecycle timing hooks

mod backend;
mod timing;
mod transport;

pub use backend::{HttpBackend, validate_http_request};
pub(crate) use backend::error_chain;
pub use timing::{ConnectTimingLayer, TimingRecorder, TimingResolver};
pub use transport::{TransportOptions, build_client, effective_proxy};

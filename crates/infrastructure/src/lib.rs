//! Conduit Infrastructure - protocol backends and adapters
//!
//! This crate provides the concrete implementations behind the
//! application ports: the HTTP, GraphQL, gRPC and WebSocket backends,
//! request signing, `OAuth2` grants, the QuickJS script sandbox and the
//! settings file.

pub mod adapters;
pub mod auth;
pub mod bootstrap;
pub mod cookies;
pub mod graphql;
pub mod grpc;
pub mod http;
pub mod persistence;
pub mod scripting;
pub mod signing;
pub mod websocket;

pub use adapters::{FixedClock, SystemClock};
pub use auth::{AuthApplier, AuthorizePrompt, OAuth2Provider};
pub use bootstrap::Engine;
pub use cookies::SharedCookieJar;
pub use graphql::{GraphQlBackend, SubscriptionClient};
pub use grpc::GrpcBackend;
pub use http::HttpBackend;
pub use persistence::{SettingsError, SettingsRepository};
pub use scripting::{QuickJsRunner, ScriptError};
pub use websocket::WebSocketBackend;

//! Conduit Domain - Core request/response model
//!
//! This crate defines the protocol-agnostic carrier types shared by every
//! backend of the Conduit execution engine.
//! All types here are pure Rust with no I/O dependencies.

pub mod auth;
pub mod cookie;
pub mod error;
pub mod proxy;
pub mod request;
pub mod response;
pub mod scripting;
pub mod settings;
pub mod stream;
pub mod tls;

pub use auth::{
    ApiKeyLocation, AuthConfig, AuthError, AwsSigV4Config, OAuth2Config, OAuth2GrantType,
    OAuth2Token,
};
pub use cookie::{Cookie, CookieJar, SameSite};
pub use error::{DomainError, DomainResult};
pub use proxy::{ProxyConfig, ProxyError, ProxyType};
pub use request::{Deadline, GraphQlSpec, GrpcSpec, Headers, Protocol, QueryParams, RequestSpec};
pub use response::{ResponseHeaders, ResponseSpec, StatusCode, TimingBreakdown};
pub use scripting::{ScriptPhase, ScriptRequest, ScriptResponse, ScriptResult, TestResult};
pub use settings::EngineSettings;
pub use stream::{MessageDirection, StreamMessage};
pub use tls::{ClientCertificate, TlsConfig, TlsSecurityWarning};

//! Conduit Application - Ports, registry and request pipeline
//!
//! This crate defines the application layer with:
//! - Port traits implemented by protocol backends and collaborators
//! - The protocol registry enforcing validate-then-execute
//! - The request pipeline (variables, scripts, dispatch, history)
//! - Application-level error handling

pub mod auth;
pub mod error;
pub mod execute_request;
pub mod ports;
pub mod registry;
pub mod variable_resolver;

pub use auth::{TokenStatus, TokenStore};
pub use error::{EngineError, EngineResult, ValidationError};
pub use execute_request::{ExecuteRequest, ExecutionOutcome};
pub use ports::{
    Clock, HistorySink, MessageReceiver, ProtocolBackend, Resolution, ScriptInvocation,
    ScriptRun, ScriptRunner, TokenProvider, VariableResolver,
};
pub use registry::ProtocolRegistry;
pub use variable_resolver::{MapVariableResolver, resolve_request};

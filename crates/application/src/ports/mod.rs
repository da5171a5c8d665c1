//! Port definitions (interfaces)
//!
//! Ports define the boundaries between the application core and external systems.
//! Protocol backends, the scripting sandbox, token grants, history storage and
//! variable resolution are all implemented outside this crate.

mod backend;
mod clock;
mod history_sink;
mod script_runner;
mod token_provider;
mod variable_resolver;

pub use backend::{MessageReceiver, ProtocolBackend};
pub use clock::Clock;
pub use history_sink::HistorySink;
pub use script_runner::{ScriptInvocation, ScriptRun, ScriptRunner};
pub use token_provider::TokenProvider;
pub use variable_resolver::{Resolution, VariableResolver};

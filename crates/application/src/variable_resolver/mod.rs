//! Variable resolution
//!
//! `{{name}}` substitution against a flat variable map, plus the `$`-prefixed
//! dynamic values (`{{$uuid}}`, `{{$timestamp}}`, ...).

pub mod builtins;
mod map;
pub mod parser;

pub use map::{MapVariableResolver, resolve_request};
pub use parser::{VariableReference, parse_variables};

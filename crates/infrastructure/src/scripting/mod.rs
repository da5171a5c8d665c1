//! Sandboxed pre-request and post-response scripts (QuickJS).

mod host;
mod runner;

pub use host::hmac_sha256_hex;
pub use runner::{QuickJsRunner, ScriptError};

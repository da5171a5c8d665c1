//! gRPC over server reflection.
//!
//! - [`GrpcBackend`]: unary calls, all streaming shapes and the channel cache
//! - [`DynamicCodec`]: JSON-to-protobuf marshaling from runtime descriptors
//! - Status mapping to pseudo-HTTP codes

mod backend;
mod codec;
mod reflection;
mod status;

pub use backend::{GrpcBackend, Target};
pub use codec::{DynamicCodec, message_from_json, message_to_json};
pub use reflection::{list_services, resolve_service};
pub use status::{code_name, http_status};

//! Request domain types

mod deadline;
mod header;
mod protocol;
mod spec;

pub use deadline::Deadline;
pub use header::{Headers, QueryParams};
pub use protocol::Protocol;
pub use spec::{DEFAULT_TIMEOUT_MS, GraphQlSpec, GrpcSpec, RequestSpec};

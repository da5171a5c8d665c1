//! GraphQL backend and graphql-ws subscription client.

mod backend;
mod operation;
mod protocol;
mod subscription;

pub use backend::GraphQlBackend;
pub use operation::{OperationKind, is_subscription, operation_kind};
pub use protocol::{Envelope, GRAPHQL_TRANSPORT_WS, ServerMessage};
pub use subscription::SubscriptionClient;

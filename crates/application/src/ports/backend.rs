//! Protocol backend port

use async_trait::async_trait;
use conduit_domain::{Deadline, RequestSpec, ResponseSpec, StreamMessage};
use tokio::sync::mpsc;

use crate::{EngineResult, ValidationError};

/// Receiving end of a streaming exchange.
///
/// The producing task closes the channel when the stream completes; a
/// message carrying `error` is always the last one.
pub type MessageReceiver = mpsc::Receiver<StreamMessage>;

/// One protocol-specific implementation of the validate/execute contract.
///
/// The registry only calls [`execute`](Self::execute) after
/// [`validate`](Self::validate) succeeded.
#[async_trait]
pub trait ProtocolBackend: Send + Sync {
    /// Protocol tag this backend answers to (e.g. `http`, `grpc`).
    fn name(&self) -> &'static str;

    /// Checks the request without any network activity.
    ///
    /// # Errors
    ///
    /// Returns the first missing or malformed field.
    fn validate(&self, request: &RequestSpec) -> Result<(), ValidationError>;

    /// Executes the request, returning promptly once `deadline` passes.
    ///
    /// # Errors
    ///
    /// Returns an error only when the exchange could not be completed;
    /// protocol-level failures are ordinary responses.
    async fn execute(&self, request: &RequestSpec, deadline: Deadline)
    -> EngineResult<ResponseSpec>;
}

//! History sink port

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conduit_domain::{RequestSpec, ResponseSpec};

/// Receives the final request/response pair of every pipeline run.
#[async_trait]
pub trait HistorySink: Send + Sync {
    /// Records one completed exchange. Failures are the sink's concern.
    async fn record(&self, request: &RequestSpec, response: &ResponseSpec, at: DateTime<Utc>);
}

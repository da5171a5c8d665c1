//! `OAuth2` token provider port

use async_trait::async_trait;
use conduit_domain::{AuthError, OAuth2Config, OAuth2Token};

/// Obtains `OAuth2` access tokens for backends that need a live token.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Returns a usable token for `config`.
    ///
    /// `current` is the token already attached to the request, if any. An
    /// implementation returns it unchanged while it is still valid, refreshes
    /// it when possible, and otherwise runs the configured grant.
    ///
    /// # Errors
    ///
    /// Returns an error if the grant or refresh fails.
    async fn token(
        &self,
        config: &OAuth2Config,
        current: Option<&OAuth2Token>,
    ) -> Result<OAuth2Token, AuthError>;
}

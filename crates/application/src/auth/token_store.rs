//! In-memory token storage with expiry tracking.
//!
//! Tokens are keyed by [`OAuth2Config::cache_key`], so two requests with the
//! same grant configuration share one token.

use std::collections::HashMap;
use std::sync::Arc;

use conduit_domain::{OAuth2Config, OAuth2Token};
use tokio::sync::RwLock;

/// Thread-safe in-memory token store.
#[derive(Debug, Clone)]
pub struct TokenStore {
    tokens: Arc<RwLock<HashMap<String, OAuth2Token>>>,
    /// Seconds before expiry at which a token counts as expiring.
    refresh_buffer_seconds: i64,
}

impl TokenStore {
    /// Create a new token store that treats tokens as expiring 60s early.
    #[must_use]
    pub fn new() -> Self {
        Self::with_refresh_buffer(60)
    }

    /// Create with custom refresh buffer.
    #[must_use]
    pub fn with_refresh_buffer(refresh_buffer_seconds: i64) -> Self {
        Self {
            tokens: Arc::new(RwLock::new(HashMap::new())),
            refresh_buffer_seconds,
        }
    }

    /// Store the token obtained for `config`.
    pub async fn store(&self, config: &OAuth2Config, token: OAuth2Token) {
        let mut tokens = self.tokens.write().await;
        tokens.insert(config.cache_key(), token);
    }

    /// Get the token for `config`, expired or not.
    pub async fn get(&self, config: &OAuth2Config) -> Option<OAuth2Token> {
        let tokens = self.tokens.read().await;
        tokens.get(&config.cache_key()).cloned()
    }

    /// Get a token that is not within the refresh buffer of its expiry.
    pub async fn get_valid(&self, config: &OAuth2Config) -> Option<OAuth2Token> {
        let tokens = self.tokens.read().await;
        tokens
            .get(&config.cache_key())
            .filter(|t| !t.is_expired_or_expiring(self.refresh_buffer_seconds))
            .cloned()
    }

    /// Check if a token exists, is expiring, and carries a refresh token.
    pub async fn needs_refresh(&self, config: &OAuth2Config) -> bool {
        let tokens = self.tokens.read().await;
        tokens.get(&config.cache_key()).is_some_and(|t| {
            t.is_expired_or_expiring(self.refresh_buffer_seconds) && t.can_refresh()
        })
    }

    /// Remove the token for `config`.
    pub async fn remove(&self, config: &OAuth2Config) -> Option<OAuth2Token> {
        let mut tokens = self.tokens.write().await;
        tokens.remove(&config.cache_key())
    }

    /// Clear all tokens.
    pub async fn clear(&self) {
        let mut tokens = self.tokens.write().await;
        tokens.clear();
    }

    /// Token status for `config`.
    pub async fn status(&self, config: &OAuth2Config) -> TokenStatus {
        let tokens = self.tokens.read().await;
        tokens
            .get(&config.cache_key())
            .map_or(TokenStatus::Missing, |token| {
                TokenStatus::of(token, self.refresh_buffer_seconds)
            })
    }

    /// Get count of stored tokens.
    pub async fn count(&self) -> usize {
        let tokens = self.tokens.read().await;
        tokens.len()
    }
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle state of a stored token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenStatus {
    /// No token exists for this configuration.
    Missing,
    /// Token is valid and not expiring soon.
    Valid {
        /// Seconds until expiry, or None if no expiry.
        seconds_remaining: Option<i64>,
    },
    /// Token is valid but inside the refresh buffer.
    Expiring {
        /// Seconds until expiry.
        seconds_remaining: i64,
        /// Whether the token can be refreshed.
        can_refresh: bool,
    },
    /// Token has expired.
    Expired {
        /// Whether the token can be refreshed.
        can_refresh: bool,
    },
}

impl TokenStatus {
    /// Classifies `token` against a refresh buffer.
    #[must_use]
    pub fn of(token: &OAuth2Token, refresh_buffer_seconds: i64) -> Self {
        if token.is_expired_or_expiring(0) {
            Self::Expired {
                can_refresh: token.can_refresh(),
            }
        } else if token.is_expired_or_expiring(refresh_buffer_seconds) {
            Self::Expiring {
                seconds_remaining: token.seconds_until_expiry().unwrap_or(0),
                can_refresh: token.can_refresh(),
            }
        } else {
            Self::Valid {
                seconds_remaining: token.seconds_until_expiry(),
            }
        }
    }

    /// Returns true if the token can still be sent.
    #[must_use]
    pub const fn is_usable(&self) -> bool {
        matches!(self, Self::Valid { .. } | Self::Expiring { .. })
    }
}

//! Turns an [`AuthConfig`] into header or query credentials.
//!
//! AWS `SigV4` and Digest need the full request (or a server challenge) and
//! are applied by the HTTP backend itself; they resolve to no static
//! credentials here.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use conduit_application::TokenProvider;
use conduit_domain::{ApiKeyLocation, AuthConfig, AuthError, Headers, QueryParams};

/// A single credential to attach to an outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// Sent as a header (or gRPC metadata entry).
    Header {
        /// Header name.
        name: String,
        /// Header value.
        value: String,
    },
    /// Sent as a query parameter.
    Query {
        /// Parameter name.
        name: String,
        /// Parameter value.
        value: String,
    },
}

impl Credential {
    fn authorization(value: String) -> Self {
        Self::Header {
            name: "Authorization".to_string(),
            value,
        }
    }

    /// Adds this credential to a header map and query map, replacing any
    /// user-set value of the same name.
    pub fn apply(self, headers: &mut Headers, params: &mut QueryParams) {
        match self {
            Self::Header { name, value } => headers.insert(name, value),
            Self::Query { name, value } => {
                params.insert(name, value);
            }
        }
    }
}

/// Resolves authentication for every backend.
#[derive(Clone, Default)]
pub struct AuthApplier {
    tokens: Option<Arc<dyn TokenProvider>>,
}

impl AuthApplier {
    /// Creates an applier without an `OAuth2` token provider; `OAuth2`
    /// requests must then carry their own token.
    #[must_use]
    pub const fn new() -> Self {
        Self { tokens: None }
    }

    /// Creates an applier that obtains `OAuth2` tokens from `tokens`.
    #[must_use]
    pub fn with_token_provider(tokens: Arc<dyn TokenProvider>) -> Self {
        Self {
            tokens: Some(tokens),
        }
    }

    /// Resolves the static credentials for `auth`.
    ///
    /// # Errors
    ///
    /// Returns `MissingCredentials` when a required field is empty, or the
    /// token provider's error for `OAuth2`.
    pub async fn credentials(&self, auth: &AuthConfig) -> Result<Vec<Credential>, AuthError> {
        let credential = match auth {
            AuthConfig::None | AuthConfig::AwsV4(_) | AuthConfig::Digest { .. } => return Ok(Vec::new()),
            AuthConfig::Basic { username, password } => {
                require("basic", "username", username)?;
                let encoded = STANDARD.encode(format!("{username}:{password}"));
                Credential::authorization(format!("Basic {encoded}"))
            }
            AuthConfig::Bearer { token } => {
                require("bearer", "token", token)?;
                Credential::authorization(format!("Bearer {token}"))
            }
            AuthConfig::ApiKey {
                key,
                value,
                location,
            } => {
                require("apikey", "key", key)?;
                let (name, value) = (key.clone(), value.clone());
                match location {
                    ApiKeyLocation::Header => Credential::Header { name, value },
                    ApiKeyLocation::Query => Credential::Query { name, value },
                }
            }
            AuthConfig::OAuth2 { config, token } => {
                let token = match (&self.tokens, token) {
                    (Some(provider), current) => provider.token(config, current.as_ref()).await?,
                    (None, Some(token)) if !token.access_token.is_empty() => token.clone(),
                    (None, _) => {
                        return Err(AuthError::MissingCredentials {
                            scheme: "oauth2",
                            field: "access token",
                        });
                    }
                };
                Credential::authorization(format!("{} {}", bearer_type(&token.token_type), token.access_token))
            }
        };
        Ok(vec![credential])
    }

    /// Resolves credentials and applies them to `headers` and `params`.
    ///
    /// # Errors
    ///
    /// See [`AuthApplier::credentials`].
    pub async fn apply(
        &self,
        auth: &AuthConfig,
        headers: &mut Headers,
        params: &mut QueryParams,
    ) -> Result<(), AuthError> {
        for credential in self.credentials(auth).await? {
            credential.apply(headers, params);
        }
        Ok(())
    }
}

impl std::fmt::Debug for AuthApplier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthApplier")
            .field("has_token_provider", &self.tokens.is_some())
            .finish()
    }
}

fn require(scheme: &'static str, field: &'static str, value: &str) -> Result<(), AuthError> {
    if value.is_empty() {
        return Err(AuthError::MissingCredentials { scheme, field });
    }
    Ok(())
}

/// Token endpoints report `bearer` in any casing.
fn bearer_type(token_type: &str) -> &str {
    if token_type.is_empty() || token_type.eq_ignore_ascii_case("bearer") {
        "Bearer"
    } else {
        token_type
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use conduit_domain::{OAuth2Config, OAuth2Token};
    use pretty_assertions::assert_eq;

    struct FixedTokens;

    #[async_trait]
    impl TokenProvider for FixedTokens {
        async fn token(
            &self,
            _config: &OAuth2Config,
            _current: Option<&OAuth2Token>,
        ) -> Result<OAuth2Token, AuthError> {
            Ok(OAuth2Token::new("fresh", Some(60), None))
        }
    }

    async fn applied(applier: &AuthApplier, auth: AuthConfig) -> (Headers, QueryParams) {
        let mut headers = Headers::new();
        headers.insert("Authorization", "user-set");
        let mut params = QueryParams::new();
        applier.apply(&auth, &mut headers, &mut params).await.unwrap();
        (headers, params)
    }

    #[tokio::test]
    async fn test_basic_overrides_user_header() {
        let (headers, _) = applied(&AuthApplier::new(), AuthConfig::basic("user", "pass")).await;
        assert_eq!(headers.get("authorization"), Some("Basic dXNlcjpwYXNz"));
    }

    #[tokio::test]
    async fn test_api_key_locations() {
        let (headers, params) =
            applied(&AuthApplier::new(), AuthConfig::api_key_query("api_key", "k")).await;
        assert_eq!(params.get("api_key").map(String::as_str), Some("k"));
        assert_eq!(headers.get("authorization"), Some("user-set"));

        let (headers, _) =
            applied(&AuthApplier::new(), AuthConfig::api_key_header("X-API-Key", "k")).await;
        assert_eq!(headers.get("x-api-key"), Some("k"));
    }

    #[tokio::test]
    async fn test_oauth2_token_sources() {
        let auth = AuthConfig::OAuth2 {
            config: OAuth2Config::default(),
            token: Some(OAuth2Token::new("attached", None, None)),
        };
        let (headers, _) = applied(&AuthApplier::new(), auth.clone()).await;
        assert_eq!(headers.get("authorization"), Some("Bearer attached"));

        let with_provider = AuthApplier::with_token_provider(Arc::new(FixedTokens));
        let (headers, _) = applied(&with_provider, auth).await;
        assert_eq!(headers.get("authorization"), Some("Bearer fresh"));
    }

    #[tokio::test]
    async fn test_missing_credentials() {
        let applier = AuthApplier::new();
        let err = applier.credentials(&AuthConfig::bearer("")).await.unwrap_err();
        assert_eq!(err.to_string(), "bearer auth requires token");

        let err = applier
            .credentials(&AuthConfig::OAuth2 {
                config: OAuth2Config::default(),
                token: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "oauth2 auth requires access token");
    }

    #[tokio::test]
    async fn test_signing_schemes_have_no_static_credentials() {
        let applier = AuthApplier::new();
        assert!(applier.credentials(&AuthConfig::digest("u", "p")).await.unwrap().is_empty());
        assert!(applier.credentials(&AuthConfig::None).await.unwrap().is_empty());
    }
}

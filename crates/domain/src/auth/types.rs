//! Authentication configuration types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Authentication configuration for a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    /// No authentication
    #[default]
    None,
    /// Basic authentication
    Basic {
        /// Username (may contain variables)
        username: String,
        /// Password (may contain variables)
        password: String,
    },
    /// Bearer token authentication
    Bearer {
        /// The bearer token (may contain variables like `{{access_token}}`)
        token: String,
    },
    /// API key sent as a header or query parameter
    ApiKey {
        /// Header or query parameter name
        key: String,
        /// The API key value
        value: String,
        /// Where to add the key
        #[serde(default)]
        location: ApiKeyLocation,
    },
    /// `OAuth2` grant configuration plus the live token, once obtained
    #[serde(rename = "oauth2")]
    OAuth2 {
        /// Grant configuration
        config: OAuth2Config,
        /// Token obtained by a previous grant
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<OAuth2Token>,
    },
    /// AWS Signature Version 4 request signing
    #[serde(rename = "awsv4")]
    AwsV4(AwsSigV4Config),
    /// HTTP Digest authentication (challenge/response)
    Digest {
        /// Username
        username: String,
        /// Password
        password: String,
    },
}

/// Location for API key authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ApiKeyLocation {
    /// Add to request headers
    #[default]
    Header,
    /// Add to query parameters
    Query,
}

/// Credentials and scope for AWS `SigV4` signing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwsSigV4Config {
    /// Access key id
    pub access_key: String,
    /// Secret access key
    pub secret_key: String,
    /// Temporary session token (STS)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    /// Region, e.g. `us-east-1`
    pub region: String,
    /// Service name, e.g. `s3`
    pub service: String,
}

/// Supported `OAuth2` grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OAuth2GrantType {
    /// Machine-to-machine client credentials grant
    #[default]
    ClientCredentials,
    /// Resource owner password grant
    Password,
    /// Authorization code grant with PKCE
    AuthorizationCode,
}

impl OAuth2GrantType {
    /// The `grant_type` form value sent to the token endpoint.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ClientCredentials => "client_credentials",
            Self::Password => "password",
            Self::AuthorizationCode => "authorization_code",
        }
    }
}

/// `OAuth2` grant configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuth2Config {
    /// Which grant to run
    #[serde(default)]
    pub grant_type: OAuth2GrantType,
    /// Token endpoint URL
    pub token_url: String,
    /// Authorization endpoint URL (authorization code grant only)
    #[serde(default)]
    pub auth_url: String,
    /// Client ID
    pub client_id: String,
    /// Client secret (empty for public clients)
    #[serde(default)]
    pub client_secret: String,
    /// Space-separated scopes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Resource owner username (password grant only)
    #[serde(default)]
    pub username: String,
    /// Resource owner password (password grant only)
    #[serde(default)]
    pub password: String,
    /// Additional parameters to send with the token request
    #[serde(default)]
    pub extra_params: BTreeMap<String, String>,
}

impl OAuth2Config {
    /// Generates a unique key for token caching.
    #[must_use]
    pub fn cache_key(&self) -> String {
        let scope_part = self.scope.as_deref().unwrap_or("");
        format!(
            "{}:{}:{}:{scope_part}",
            self.grant_type.as_str(),
            self.token_url,
            self.client_id
        )
    }
}

impl AuthConfig {
    /// Returns true if authentication is configured.
    #[must_use]
    pub const fn is_configured(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Returns true for Digest authentication.
    #[must_use]
    pub const fn is_digest(&self) -> bool {
        matches!(self, Self::Digest { .. })
    }

    /// Creates a bearer token authentication.
    #[must_use]
    pub fn bearer(token: impl Into<String>) -> Self {
        Self::Bearer {
            token: token.into(),
        }
    }

    /// Creates a basic authentication.
    #[must_use]
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Creates a digest authentication.
    #[must_use]
    pub fn digest(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Digest {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Creates an API key authentication in a header.
    #[must_use]
    pub fn api_key_header(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::ApiKey {
            key: name.into(),
            value: value.into(),
            location: ApiKeyLocation::Header,
        }
    }

    /// Creates an API key authentication in the query string.
    #[must_use]
    pub fn api_key_query(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::ApiKey {
            key: name.into(),
            value: value.into(),
            location: ApiKeyLocation::Query,
        }
    }

    /// Short name of the scheme, safe to log.
    #[must_use]
    pub const fn scheme_name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Basic { .. } => "basic",
            Self::Bearer { .. } => "bearer",
            Self::ApiKey { .. } => "apikey",
            Self::OAuth2 { .. } => "oauth2",
            Self::AwsV4(_) => "awsv4",
            Self::Digest { .. } => "digest",
        }
    }
}

/// `OAuth2` token with metadata for expiry tracking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuth2Token {
    /// The access token string
    pub access_token: String,
    /// Token type (usually "Bearer")
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Lifetime in seconds reported by the token endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    /// Refresh token for obtaining new access tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// When this token was obtained
    pub obtained_at: DateTime<Utc>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl OAuth2Token {
    /// Create a new token obtained now.
    #[must_use]
    pub fn new(
        access_token: impl Into<String>,
        expires_in: Option<u64>,
        refresh_token: Option<String>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: default_token_type(),
            expires_in,
            refresh_token,
            obtained_at: Utc::now(),
        }
    }

    /// Overrides the acquisition time.
    #[must_use]
    pub const fn obtained_at(mut self, at: DateTime<Utc>) -> Self {
        self.obtained_at = at;
        self
    }

    /// When the token expires: `obtained_at + expires_in`.
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_in
            .map(|secs| self.obtained_at + chrono::Duration::seconds(secs.cast_signed()))
    }

    /// Check if the token is expired or will expire within the given buffer.
    #[must_use]
    pub fn is_expired_or_expiring(&self, buffer_seconds: i64) -> bool {
        self.expires_at().is_some_and(|expires_at| {
            let buffer = chrono::Duration::seconds(buffer_seconds);
            Utc::now() + buffer >= expires_at
        })
    }

    /// Seconds until expiry (negative once expired), or None without an expiry.
    #[must_use]
    pub fn seconds_until_expiry(&self) -> Option<i64> {
        self.expires_at()
            .map(|expires_at| (expires_at - Utc::now()).num_seconds())
    }

    /// Check if the token can be refreshed.
    #[must_use]
    pub const fn can_refresh(&self) -> bool {
        self.refresh_token.is_some()
    }

    /// Returns the Authorization header value.
    #[must_use]
    pub fn authorization_header(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

/// Authentication errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// A signer was invoked without a required credential.
    #[error("{scheme} auth requires {field}")]
    MissingCredentials {
        /// Scheme being applied.
        scheme: &'static str,
        /// The missing field.
        field: &'static str,
    },
    /// The token endpoint rejected the grant.
    #[error("OAuth2 authorization failed: {message}")]
    OAuth2AuthorizationFailed {
        /// Error description.
        message: String,
    },
    /// Failed to refresh token.
    #[error("Failed to refresh token: {message}")]
    RefreshFailed {
        /// Error description.
        message: String,
    },
    /// Invalid `OAuth2` configuration.
    #[error("Invalid OAuth2 configuration: {message}")]
    InvalidConfiguration {
        /// Error description.
        message: String,
    },
    /// The authorization callback listener failed or timed out.
    #[error("Callback server error: {message}")]
    CallbackServerError {
        /// Error description.
        message: String,
    },
    /// A Digest challenge could not be parsed or answered.
    #[error("Digest challenge error: {message}")]
    DigestChallenge {
        /// Error description.
        message: String,
    },
    /// Network error while talking to an authorization server.
    #[error("Network error: {message}")]
    NetworkError {
        /// Error description.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_auth_none() {
        let auth = AuthConfig::None;
        assert!(!auth.is_configured());
        assert_eq!(auth.scheme_name(), "none");
    }

    #[test]
    fn test_bearer_auth() {
        let auth = AuthConfig::bearer("my-token");
        assert!(auth.is_configured());
        let AuthConfig::Bearer { token } = auth else {
            unreachable!("Expected Bearer auth variant");
        };
        assert_eq!(token, "my-token");
    }

    #[test]
    fn test_serde_tags() {
        let json = serde_json::to_value(AuthConfig::AwsV4(AwsSigV4Config {
            access_key: "AK".to_string(),
            secret_key: "SK".to_string(),
            session_token: None,
            region: "us-east-1".to_string(),
            service: "s3".to_string(),
        }))
        .unwrap_or_default();
        assert_eq!(json["type"], "awsv4");
        assert_eq!(json["region"], "us-east-1");

        let parsed: AuthConfig = serde_json::from_str(
            r#"{"type":"api_key","key":"X-API-Key","value":"k","location":"query"}"#,
        )
        .unwrap_or_default();
        assert_eq!(parsed, AuthConfig::api_key_query("X-API-Key", "k"));
    }

    #[test]
    fn test_oauth2_cache_key_distinguishes_grants() {
        let mut config = OAuth2Config {
            token_url: "https://auth.example.com/token".to_string(),
            client_id: "my-client".to_string(),
            scope: Some("read write".to_string()),
            ..Default::default()
        };
        let cc = config.cache_key();
        config.grant_type = OAuth2GrantType::Password;
        assert_ne!(cc, config.cache_key());
        assert!(cc.starts_with("client_credentials:"));
    }

    #[test]
    fn test_oauth2_token_expiry() {
        let token = OAuth2Token::new("access123", Some(3600), Some("refresh456".to_string()));

        assert!(!token.is_expired_or_expiring(0));
        assert!(token.can_refresh());
        assert_eq!(token.authorization_header(), "Bearer access123");
    }

    #[test]
    fn test_oauth2_token_expired_from_obtained_at() {
        let token = OAuth2Token::new("access123", Some(60), None)
            .obtained_at(Utc::now() - chrono::Duration::seconds(120));
        assert!(token.is_expired_or_expiring(0));
        assert!(!token.can_refresh());
    }

    #[test]
    fn test_oauth2_token_no_expiry() {
        let token = OAuth2Token::new("access123", None, None);
        assert!(!token.is_expired_or_expiring(0));
        assert!(token.expires_at().is_none());
    }
}

//! `OAuth2` token provider.
//!
//! Runs the client credentials, password and authorization code (PKCE)
//! grants against a token endpoint, refreshes tokens that carry a refresh
//! token, and caches results in a [`TokenStore`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use conduit_application::{TokenProvider, TokenStore};
use conduit_domain::{AuthError, OAuth2Config, OAuth2GrantType, OAuth2Token};
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use super::callback::CallbackListener;
use super::pkce::{PkcePair, generate_state};

/// Content-Type for form-urlencoded data.
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Default wait for the authorization redirect.
const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(120);

/// `OAuth2` token response from token endpoint.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// `OAuth2` error response.
#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Called with the authorize URL the user has to visit.
pub type AuthorizePrompt = Arc<dyn Fn(&Url) + Send + Sync>;

/// `OAuth2` grant runner with token caching.
#[derive(Clone)]
pub struct OAuth2Provider {
    token_store: TokenStore,
    http_client: reqwest::Client,
    callback_timeout: Duration,
    prompt: Option<AuthorizePrompt>,
}

impl OAuth2Provider {
    /// Create a provider with its own token store.
    #[must_use]
    pub fn new() -> Self {
        Self::with_token_store(TokenStore::new())
    }

    /// Create with a shared token store.
    #[must_use]
    pub fn with_token_store(token_store: TokenStore) -> Self {
        Self {
            token_store,
            http_client: reqwest::Client::builder()
                .redirect(reqwest::redirect::Policy::none())
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            callback_timeout: DEFAULT_CALLBACK_TIMEOUT,
            prompt: None,
        }
    }

    /// Sets how long the authorization code grant waits for the redirect.
    #[must_use]
    pub const fn with_callback_timeout(mut self, timeout: Duration) -> Self {
        self.callback_timeout = timeout;
        self
    }

    /// Sets the hook that presents the authorize URL (e.g. opens a browser).
    #[must_use]
    pub fn with_prompt(mut self, prompt: AuthorizePrompt) -> Self {
        self.prompt = Some(prompt);
        self
    }

    /// Get access to the token store.
    #[must_use]
    pub const fn token_store(&self) -> &TokenStore {
        &self.token_store
    }

    /// Runs the configured grant, ignoring any cached token.
    ///
    /// # Errors
    ///
    /// Returns an error for incomplete configuration, network failures or
    /// an endpoint rejection.
    pub async fn fetch(&self, config: &OAuth2Config) -> Result<OAuth2Token, AuthError> {
        validate(config)?;
        info!(grant = config.grant_type.as_str(), token_url = %config.token_url, "Requesting OAuth2 token");

        match config.grant_type {
            OAuth2GrantType::ClientCredentials => {
                let params = base_params(config, "client_credentials");
                self.token_request(&config.token_url, params, false).await
            }
            OAuth2GrantType::Password => {
                if config.username.is_empty() {
                    return Err(AuthError::MissingCredentials {
                        scheme: "oauth2",
                        field: "username",
                    });
                }
                let mut params = base_params(config, "password");
                params.push(("username".to_string(), config.username.clone()));
                params.push(("password".to_string(), config.password.clone()));
                self.token_request(&config.token_url, params, false).await
            }
            OAuth2GrantType::AuthorizationCode => self.authorization_code_flow(config).await,
        }
    }

    /// Exchanges a refresh token for a new access token.
    ///
    /// The old refresh token is kept when the endpoint does not rotate it.
    ///
    /// # Errors
    ///
    /// Returns `RefreshFailed` when the endpoint rejects the refresh.
    pub async fn refresh(
        &self,
        config: &OAuth2Config,
        refresh_token: &str,
    ) -> Result<OAuth2Token, AuthError> {
        validate(config)?;
        let mut params = vec![
            ("grant_type".to_string(), "refresh_token".to_string()),
            ("refresh_token".to_string(), refresh_token.to_string()),
            ("client_id".to_string(), config.client_id.clone()),
        ];
        if !config.client_secret.is_empty() {
            params.push(("client_secret".to_string(), config.client_secret.clone()));
        }
        if let Some(scope) = config.scope.as_ref().filter(|s| !s.is_empty()) {
            params.push(("scope".to_string(), scope.clone()));
        }

        let mut token = self.token_request(&config.token_url, params, true).await?;
        if token.refresh_token.is_none() {
            token.refresh_token = Some(refresh_token.to_string());
        }
        Ok(token)
    }

    /// Builds the authorize URL for the authorization code grant.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` when `auth_url` is not a valid URL.
    pub fn authorize_url(
        config: &OAuth2Config,
        redirect_uri: &str,
        state: &str,
        pkce: &PkcePair,
    ) -> Result<Url, AuthError> {
        let mut url = Url::parse(&config.auth_url).map_err(|e| AuthError::InvalidConfiguration {
            message: format!("invalid authorization URL: {e}"),
        })?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &config.client_id)
                .append_pair("redirect_uri", redirect_uri)
                .append_pair("state", state)
                .append_pair("code_challenge", &pkce.challenge)
                .append_pair("code_challenge_method", PkcePair::METHOD);
            if let Some(scope) = config.scope.as_ref().filter(|s| !s.is_empty()) {
                query.append_pair("scope", scope);
            }
            for (key, value) in &config.extra_params {
                query.append_pair(key, value);
            }
        }
        Ok(url)
    }

    async fn authorization_code_flow(&self, config: &OAuth2Config) -> Result<OAuth2Token, AuthError> {
        if config.auth_url.trim().is_empty() {
            return Err(AuthError::InvalidConfiguration {
                message: "authorization code grant requires an authorization URL".to_string(),
            });
        }

        let pkce = PkcePair::generate();
        let state = generate_state();
        let listener = CallbackListener::bind(state.clone()).await?;
        let redirect_uri = listener.redirect_uri();
        let authorize = Self::authorize_url(config, &redirect_uri, &state, &pkce)?;

        match &self.prompt {
            Some(prompt) => prompt(&authorize),
            None => info!(url = %authorize, "Open this URL to authorize"),
        }

        let code = listener.wait(self.callback_timeout).await?;
        debug!("Authorization code received");

        let mut params = vec![
            ("grant_type".to_string(), "authorization_code".to_string()),
            ("code".to_string(), code),
            ("redirect_uri".to_string(), redirect_uri),
            ("client_id".to_string(), config.client_id.clone()),
            ("code_verifier".to_string(), pkce.verifier),
        ];
        if !config.client_secret.is_empty() {
            params.push(("client_secret".to_string(), config.client_secret.clone()));
        }
        self.token_request(&config.token_url, params, false).await
    }

    async fn token_request(
        &self,
        token_url: &str,
        params: Vec<(String, String)>,
        refreshing: bool,
    ) -> Result<OAuth2Token, AuthError> {
        let body = serde_urlencoded::to_string(&params).map_err(|e| AuthError::NetworkError {
            message: format!("Failed to encode form: {e}"),
        })?;

        let response = self
            .http_client
            .post(token_url)
            .header("Content-Type", FORM_CONTENT_TYPE)
            .header("Accept", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| AuthError::NetworkError {
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<TokenErrorResponse>(&error_text).map_or_else(
                |_| format!("token endpoint returned {status}: {error_text}"),
                |e| e.error_description.unwrap_or(e.error),
            );
            return Err(if refreshing {
                AuthError::RefreshFailed { message }
            } else {
                AuthError::OAuth2AuthorizationFailed { message }
            });
        }

        let token_response: TokenResponse =
            response.json().await.map_err(|e| AuthError::NetworkError {
                message: format!("Failed to parse token response: {e}"),
            })?;

        let mut token = OAuth2Token::new(
            token_response.access_token,
            token_response.expires_in,
            token_response.refresh_token,
        );
        if let Some(token_type) = token_response.token_type {
            token.token_type = token_type;
        }
        Ok(token)
    }
}

impl Default for OAuth2Provider {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for OAuth2Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuth2Provider")
            .field("callback_timeout", &self.callback_timeout)
            .field("has_prompt", &self.prompt.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TokenProvider for OAuth2Provider {
    async fn token(
        &self,
        config: &OAuth2Config,
        current: Option<&OAuth2Token>,
    ) -> Result<OAuth2Token, AuthError> {
        if let Some(token) = current.filter(|t| !t.is_expired_or_expiring(0)) {
            return Ok(token.clone());
        }
        if let Some(token) = self.token_store.get_valid(config).await {
            debug!("Using cached OAuth2 token");
            return Ok(token);
        }

        let stale = match current {
            Some(token) => Some(token.clone()),
            None => self.token_store.get(config).await,
        };
        if let Some(refresh_token) = stale.and_then(|t| t.refresh_token) {
            match self.refresh(config, &refresh_token).await {
                Ok(token) => {
                    self.token_store.store(config, token.clone()).await;
                    return Ok(token);
                }
                Err(e) => warn!(error = %e, "OAuth2 refresh failed, running the grant again"),
            }
        }

        let token = self.fetch(config).await?;
        self.token_store.store(config, token.clone()).await;
        Ok(token)
    }
}

fn validate(config: &OAuth2Config) -> Result<(), AuthError> {
    if config.token_url.trim().is_empty() {
        return Err(AuthError::InvalidConfiguration {
            message: "token URL is required".to_string(),
        });
    }
    if config.client_id.trim().is_empty() {
        return Err(AuthError::MissingCredentials {
            scheme: "oauth2",
            field: "client id",
        });
    }
    Ok(())
}

fn base_params(config: &OAuth2Config, grant_type: &str) -> Vec<(String, String)> {
    let mut params = vec![
        ("grant_type".to_string(), grant_type.to_string()),
        ("client_id".to_string(), config.client_id.clone()),
    ];
    if !config.client_secret.is_empty() {
        params.push(("client_secret".to_string(), config.client_secret.clone()));
    }
    if let Some(scope) = config.scope.as_ref().filter(|s| !s.is_empty()) {
        params.push(("scope".to_string(), scope.clone()));
    }
    params.extend(
        config
            .extra_params
            .iter()
            .map(|(k, v)| (k.clone(), v.clone())),
    );
    params
}

//! Proxy configuration.
//!
//! A client-level [`ProxyConfig`] applies to every HTTP-family request; a
//! request may override the proxy URL explicitly. The no-proxy list is
//! honoured either way.

use serde::{Deserialize, Serialize};
use url::Url;

/// Proxy configuration for outgoing requests.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ProxyConfig {
    /// Proxy server URL (e.g. `http://proxy:8080`, `socks5://proxy:1080`).
    /// Empty disables the proxy.
    #[serde(default)]
    pub url: String,
    /// Proxy authentication username.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Proxy authentication password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Hosts that bypass the proxy. Entries match exactly, or as a domain
    /// suffix when written with a leading dot (`.internal.example.com`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub no_proxy: Vec<String>,
}

impl ProxyConfig {
    /// Create a proxy configuration with URL.
    #[must_use]
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set authentication credentials.
    #[must_use]
    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Set the no-proxy host list.
    #[must_use]
    pub fn with_no_proxy(mut self, hosts: Vec<String>) -> Self {
        self.no_proxy = hosts;
        self
    }

    /// Returns a copy that routes through `url` but keeps credentials and
    /// the no-proxy list.
    #[must_use]
    pub fn overridden_by(&self, url: &str) -> Self {
        Self {
            url: url.to_string(),
            ..self.clone()
        }
    }

    /// Check if the proxy is in use.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.url.trim().is_empty()
    }

    /// The proxy type implied by the URL scheme.
    #[must_use]
    pub fn proxy_type(&self) -> Option<ProxyType> {
        let (scheme, _) = self.url.trim().split_once("://")?;
        ProxyType::from_scheme(scheme)
    }

    /// Get the proxy URL with authentication if present.
    ///
    /// Credentials are percent-encoded into the userinfo part.
    ///
    /// # Errors
    ///
    /// Returns `InvalidUrl` when the URL does not parse or cannot carry
    /// credentials. An inactive proxy yields `Ok(None)`.
    pub fn url_with_auth(&self) -> Result<Option<Url>, ProxyError> {
        if !self.is_active() {
            return Ok(None);
        }

        let mut url = Url::parse(self.url.trim()).map_err(|e| ProxyError::InvalidUrl(e.to_string()))?;
        if let (Some(user), Some(pass)) = (&self.username, &self.password) {
            url.set_username(user)
                .and_then(|()| url.set_password(Some(pass)))
                .map_err(|()| ProxyError::InvalidUrl(format!("{} cannot carry credentials", self.url)))?;
        }
        Ok(Some(url))
    }

    /// Check if a host should bypass the proxy.
    #[must_use]
    pub fn should_bypass(&self, host: &str) -> bool {
        let host = host.trim().trim_end_matches('.').to_ascii_lowercase();
        self.no_proxy.iter().any(|entry| {
            let entry = entry.trim().to_ascii_lowercase();
            if entry.is_empty() {
                return false;
            }
            if entry == "*" {
                return true;
            }
            let suffix = entry
                .strip_prefix("*.")
                .map(|rest| format!(".{rest}"))
                .or_else(|| entry.starts_with('.').then(|| entry.clone()));
            suffix.map_or_else(|| host == entry, |suffix| host.ends_with(&suffix))
        })
    }

    /// Validate the proxy configuration.
    ///
    /// # Errors
    ///
    /// Returns an error for unsupported schemes or half-specified credentials.
    pub fn validate(&self) -> Result<(), ProxyError> {
        if !self.is_active() {
            return Ok(());
        }

        if self.proxy_type().is_none() {
            return Err(ProxyError::InvalidUrl(
                "URL must start with http://, https://, or socks5://".to_string(),
            ));
        }

        if self.username.is_some() != self.password.is_some() {
            return Err(ProxyError::IncompleteAuth);
        }

        Ok(())
    }
}

/// Type of proxy server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProxyType {
    /// HTTP proxy.
    #[default]
    Http,
    /// HTTPS proxy (HTTP CONNECT over TLS).
    Https,
    /// SOCKS5 proxy.
    Socks5,
}

impl ProxyType {
    /// Maps a URL scheme to a proxy type.
    #[must_use]
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme.to_ascii_lowercase().as_str() {
            "http" => Some(Self::Http),
            "https" => Some(Self::Https),
            "socks5" | "socks5h" => Some(Self::Socks5),
            _ => None,
        }
    }

    /// Get the scheme for this proxy type.
    #[must_use]
    pub const fn scheme(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
            Self::Socks5 => "socks5",
        }
    }
}

/// Proxy-related errors.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ProxyError {
    /// Invalid proxy URL.
    #[error("Invalid proxy URL: {0}")]
    InvalidUrl(String),
    /// Incomplete authentication.
    #[error("Both username and password are required for proxy authentication")]
    IncompleteAuth,
}

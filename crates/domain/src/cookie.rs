//! Cookie model and per-host cookie store.
//!
//! The store itself is not thread-safe; infrastructure wraps it in a mutex
//! and plugs it into the HTTP transport.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// A single HTTP cookie.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Cookie {
    /// Cookie name.
    pub name: String,
    /// Cookie value.
    pub value: String,
    /// Domain the cookie belongs to (no leading dot).
    pub domain: String,
    /// Path the cookie applies to.
    #[serde(default = "default_path")]
    pub path: String,
    /// Expiration time (None for session cookies).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,
    /// `HttpOnly` flag.
    #[serde(default)]
    pub http_only: bool,
    /// Secure flag.
    #[serde(default)]
    pub secure: bool,
    /// `SameSite` attribute.
    #[serde(default)]
    pub same_site: SameSite,
}

fn default_path() -> String {
    "/".to_string()
}

impl Cookie {
    /// Create a new session cookie with path `/`.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        value: impl Into<String>,
        domain: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: domain.into(),
            path: default_path(),
            expires: None,
            http_only: false,
            secure: false,
            same_site: SameSite::default(),
        }
    }

    /// Set the path.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Set the expiration.
    #[must_use]
    pub const fn with_expires(mut self, expires: DateTime<Utc>) -> Self {
        self.expires = Some(expires);
        self
    }

    /// Set Secure flag.
    #[must_use]
    pub const fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Check if the cookie is expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires.is_some_and(|exp| exp < Utc::now())
    }

    /// Check if the cookie should be sent with a request to `url`.
    #[must_use]
    pub fn applies_to(&self, url: &Url) -> bool {
        if self.secure && url.scheme() != "https" && url.scheme() != "wss" {
            return false;
        }
        let Some(host) = url.host_str() else {
            return false;
        };
        domain_matches(&self.domain, host) && path_matches(&self.path, url.path())
    }

    /// Format for the Cookie header.
    #[must_use]
    pub fn to_cookie_header(&self) -> String {
        format!("{}={}", self.name, self.value)
    }

    /// Parse a `Set-Cookie` header received from `request_host`.
    #[must_use]
    pub fn from_set_cookie(header: &str, request_host: &str) -> Option<Self> {
        let mut parts = header.split(';');
        let (name, value) = parts.next()?.split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        let mut cookie = Self::new(name, value.trim(), request_host.to_ascii_lowercase());

        for part in parts {
            let part = part.trim();
            let (attr, val) = part.split_once('=').unwrap_or((part, ""));
            let val = val.trim();
            match attr.trim().to_ascii_lowercase().as_str() {
                "domain" if !val.is_empty() => {
                    cookie.domain = val.trim_start_matches('.').to_ascii_lowercase();
                }
                "path" if val.starts_with('/') => cookie.path = val.to_string(),
                "expires" => {
                    if let Ok(exp) = DateTime::parse_from_rfc2822(val) {
                        cookie.expires = Some(exp.with_timezone(&Utc));
                    }
                }
                "max-age" => {
                    if let Ok(secs) = val.parse::<i64>() {
                        cookie.expires = Some(Utc::now() + chrono::Duration::seconds(secs));
                    }
                }
                "samesite" => cookie.same_site = SameSite::parse(val),
                "httponly" => cookie.http_only = true,
                "secure" => cookie.secure = true,
                _ => {}
            }
        }

        Some(cookie)
    }
}

/// `SameSite` attribute values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SameSite {
    /// Cookies are sent with all requests.
    #[default]
    None,
    /// Cookies are sent with top-level navigations.
    Lax,
    /// Cookies are only sent in first-party context.
    Strict,
}

impl SameSite {
    fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "strict" => Self::Strict,
            "lax" => Self::Lax,
            _ => Self::None,
        }
    }
}

/// Cookie store keyed by cookie domain.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CookieJar {
    #[serde(default)]
    cookies: HashMap<String, Vec<Cookie>>,
}

impl CookieJar {
    /// Create a new empty cookie jar.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a cookie, replacing one with the same name and path.
    /// An already-expired cookie deletes its counterpart instead.
    pub fn add(&mut self, cookie: Cookie) {
        let cookies = self.cookies.entry(cookie.domain.clone()).or_default();
        cookies.retain(|c| c.name != cookie.name || c.path != cookie.path);
        if !cookie.is_expired() {
            cookies.push(cookie);
        }
    }

    /// Store every `Set-Cookie` value received from `url`.
    pub fn store_response_cookies<'a>(&mut self, set_cookies: impl Iterator<Item = &'a str>, url: &Url) {
        let Some(host) = url.host_str() else {
            return;
        };
        for header in set_cookies {
            if let Some(cookie) = Cookie::from_set_cookie(header, host) {
                // A server may only set cookies for its own domain or a parent.
                if domain_matches(&cookie.domain, host) {
                    self.add(cookie);
                }
            }
        }
    }

    /// Get all live cookies for a URL.
    #[must_use]
    pub fn get_for_url(&self, url: &Url) -> Vec<&Cookie> {
        self.cookies
            .values()
            .flatten()
            .filter(|c| !c.is_expired() && c.applies_to(url))
            .collect()
    }

    /// Build the Cookie header value for a URL.
    #[must_use]
    pub fn cookie_header(&self, url: &Url) -> Option<String> {
        let cookies = self.get_for_url(url);
        if cookies.is_empty() {
            return None;
        }
        let values: Vec<String> = cookies.iter().map(|c| c.to_cookie_header()).collect();
        Some(values.join("; "))
    }

    /// Clear cookies for a specific domain.
    pub fn clear_domain(&mut self, domain: &str) {
        self.cookies.remove(domain);
    }

    /// Clear all cookies.
    pub fn clear(&mut self) {
        self.cookies.clear();
    }

    /// Get the total number of cookies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cookies.values().map(Vec::len).sum()
    }

    /// Check if the jar is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn domain_matches(cookie_domain: &str, request_host: &str) -> bool {
    let cookie_domain = cookie_domain.to_ascii_lowercase();
    let request_host = request_host.to_ascii_lowercase();
    request_host == cookie_domain || request_host.ends_with(&format!(".{cookie_domain}"))
}

fn path_matches(cookie_path: &str, request_path: &str) -> bool {
    if cookie_path == "/" || request_path == cookie_path {
        return true;
    }
    request_path.starts_with(cookie_path)
        && (cookie_path.ends_with('/') || request_path[cookie_path.len()..].starts_with('/'))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_cookie_expired() {
        let cookie = Cookie::new("test", "value", "example.com")
            .with_expires(Utc::now() - chrono::Duration::hours(1));
        assert!(cookie.is_expired());
    }

    #[test]
    fn test_cookie_applies_to_path_and_secure() {
        let cookie = Cookie::new("test", "value", "example.com").with_path("/api");
        assert!(cookie.applies_to(&url("https://example.com/api/users")));
        assert!(cookie.applies_to(&url("http://example.com/api")));
        assert!(!cookie.applies_to(&url("https://example.com/apiary")));
        assert!(!cookie.applies_to(&url("https://example.com/other")));

        let secure = Cookie::new("s", "v", "example.com").with_secure(true);
        assert!(!secure.applies_to(&url("http://example.com/")));
    }

    #[test]
    fn test_from_set_cookie() {
        let header = "session=abc123; Domain=.example.com; Path=/; HttpOnly; Secure; SameSite=Strict";
        let cookie = Cookie::from_set_cookie(header, "api.example.com").unwrap();

        assert_eq!(cookie.name, "session");
        assert_eq!(cookie.value, "abc123");
        assert_eq!(cookie.domain, "example.com");
        assert!(cookie.http_only);
        assert!(cookie.secure);
        assert_eq!(cookie.same_site, SameSite::Strict);
    }

    #[test]
    fn test_jar_scopes_by_host() {
        let mut jar = CookieJar::new();
        jar.add(Cookie::new("session", "abc", "example.com"));
        jar.add(Cookie::new("token", "xyz", "api.example.com"));

        assert_eq!(jar.get_for_url(&url("https://example.com/")).len(), 1);
        assert_eq!(jar.get_for_url(&url("https://api.example.com/")).len(), 2);
        assert!(jar.cookie_header(&url("https://other.com/")).is_none());
    }

    #[test]
    fn test_jar_rejects_foreign_domain() {
        let mut jar = CookieJar::new();
        jar.store_response_cookies(
            ["a=1", "b=2; Domain=evil.com"].into_iter(),
            &url("https://example.com/login"),
        );
        assert_eq!(jar.len(), 1);
        assert_eq!(
            jar.cookie_header(&url("https://example.com/")).as_deref(),
            Some("a=1")
        );
    }

    #[test]
    fn test_expired_set_cookie_deletes() {
        let mut jar = CookieJar::new();
        jar.store_response_cookies(["a=1"].into_iter(), &url("https://example.com/"));
        jar.store_response_cookies(["a=; Max-Age=-1"].into_iter(), &url("https://example.com/"));
        assert!(jar.is_empty());
    }
}

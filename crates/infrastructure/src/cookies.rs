//! Thread-safe cookie jar shared by the HTTP-family backends.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use conduit_domain::{Cookie, CookieJar};
use reqwest::header::HeaderValue;
use url::Url;

/// A [`CookieJar`] behind a mutex, usable as reqwest's cookie provider.
#[derive(Debug, Clone, Default)]
pub struct SharedCookieJar {
    inner: Arc<Mutex<CookieJar>>,
}

impl SharedCookieJar {
    /// Creates an empty jar.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CookieJar> {
        // A panic while holding the lock cannot leave the jar half-written.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a cookie.
    pub fn add(&self, cookie: Cookie) {
        self.lock().add(cookie);
    }

    /// Returns the `Cookie` header value for `url`, if any cookie applies.
    #[must_use]
    pub fn cookie_header(&self, url: &Url) -> Option<String> {
        self.lock().cookie_header(url)
    }

    /// Number of stored cookies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true when the jar is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Removes every cookie for `domain`.
    pub fn clear_domain(&self, domain: &str) {
        self.lock().clear_domain(domain);
    }

    /// Removes every cookie.
    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl reqwest::cookie::CookieStore for SharedCookieJar {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        let values = cookie_headers.filter_map(|value| value.to_str().ok());
        self.lock().store_response_cookies(values, url);
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        let header = self.cookie_header(url)?;
        HeaderValue::from_str(&header).ok()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use reqwest::cookie::CookieStore;

    #[test]
    fn test_round_trip_through_store() {
        let jar = SharedCookieJar::new();
        let url = Url::parse("https://api.example.com/login").unwrap();
        let headers = [
            HeaderValue::from_static("session=abc; Path=/"),
            HeaderValue::from_static("theme=dark; Path=/"),
        ];

        jar.set_cookies(&mut headers.iter(), &url);

        assert_eq!(jar.len(), 2);
        let sent = jar.cookies(&Url::parse("https://api.example.com/users").unwrap());
        let sent = sent.unwrap();
        let sent = sent.to_str().unwrap();
        assert!(sent.contains("session=abc"));
        assert!(sent.contains("theme=dark"));
    }

    #[test]
    fn test_clones_share_state() {
        let jar = SharedCookieJar::new();
        let other = jar.clone();
        other.add(Cookie::new("a", "1", "example.com"));
        assert_eq!(jar.len(), 1);

        jar.clear();
        assert!(other.is_empty());
        assert!(
            other
                .cookies(&Url::parse("https://example.com/").unwrap())
                .is_none()
        );
    }
}

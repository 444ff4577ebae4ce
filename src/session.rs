//! Per-host session cookies shared by both fetch rungs.
//!
//! Anti-bot clearance is a cookie issued to the stealth client. Keeping it in
//! one process-wide reqwest [`Jar`] lets the plain client reuse it, so one
//! cleared challenge serves the whole process.

use std::sync::Arc;

use reqwest::cookie::{CookieStore, Jar};
use tracing::debug;
use url::Url;

/// Cookie storage for the fetch ladder.
pub trait SessionStore: Send + Sync {
    /// `Cookie` header value for a request to `url`, if anything applies.
    fn cookie_header(&self, url: &Url) -> Option<String>;

    /// Merge `Set-Cookie` values received from `url`.
    fn absorb(&self, url: &Url, set_cookies: &[String]);

    /// Jar handed to reqwest clients so redirect hops see the same cookies.
    fn jar(&self) -> Option<Arc<Jar>> {
        None
    }
}

/// Process-wide in-memory store. Expiry, `Domain` and `Path` follow the jar.
#[derive(Debug, Default, Clone)]
pub struct HostCookieStore {
    jar: Arc<Jar>,
}

impl HostCookieStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for HostCookieStore {
    fn cookie_header(&self, url: &Url) -> Option<String> {
        let value = self.jar.cookies(url)?;
        value
            .to_str()
            .ok()
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    fn absorb(&self, url: &Url, set_cookies: &[String]) {
        if set_cookies.is_empty() {
            return;
        }
        for line in set_cookies {
            self.jar.add_cookie_str(line, url);
        }
        debug!(host = url.host_str().unwrap_or_default(), count = set_cookies.len(), "Stored session cookies");
    }

    fn jar(&self) -> Option<Arc<Jar>> {
        Some(self.jar.clone())
    }
}

/// Store that remembers nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSessionStore;

impl SessionStore for NoopSessionStore {
    fn cookie_header(&self, _url: &Url) -> Option<String> {
        None
    }

    fn absorb(&self, _url: &Url, _set_cookies: &[String]) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(raw: &str) -> Url {
        Url::parse(raw).unwrap()
    }

    #[test]
    fn cookies_are_scoped_by_host() {
        let store = HostCookieStore::new();
        store.absorb(
            &url("https://a.example/"),
            &["cf_clearance=abc; Path=/; HttpOnly".into(), "lang=es".into()],
        );
        let header = store.cookie_header(&url("https://a.example/peliculas/")).unwrap();
        assert!(header.contains("cf_clearance=abc"));
        assert!(header.contains("lang=es"));
        assert_eq!(store.cookie_header(&url("https://b.example/")), None);
    }

    #[test]
    fn later_cookie_replaces_earlier_value() {
        let store = HostCookieStore::new();
        store.absorb(&url("https://a.example/"), &["k=1".into()]);
        store.absorb(&url("https://a.example/"), &["k=2".into()]);
        assert_eq!(store.cookie_header(&url("https://a.example/")).as_deref(), Some("k=2"));
    }

    #[test]
    fn max_age_zero_deletes_the_cookie() {
        let store = HostCookieStore::new();
        store.absorb(&url("https://a.example/"), &["k=1".into()]);
        store.absorb(&url("https://a.example/"), &["k=; Max-Age=0".into()]);
        assert_eq!(store.cookie_header(&url("https://a.example/")), None);
    }

    #[test]
    fn expired_cookie_is_not_sent() {
        let store = HostCookieStore::new();
        store.absorb(
            &url("https://a.example/"),
            &[
                "old=1; Expires=Thu, 01 Jan 1970 00:00:00 GMT".into(),
                "fresh=2".into(),
            ],
        );
        assert_eq!(store.cookie_header(&url("https://a.example/")).as_deref(), Some("fresh=2"));
    }

    #[test]
    fn path_attribute_limits_the_cookie() {
        let store = HostCookieStore::new();
        store.absorb(&url("https://a.example/"), &["scoped=1; Path=/player".into()]);
        assert_eq!(store.cookie_header(&url("https://a.example/listado/")), None);
        assert_eq!(
            store.cookie_header(&url("https://a.example/player/1")).as_deref(),
            Some("scoped=1")
        );
    }

    #[test]
    fn store_shares_its_jar() {
        let store = HostCookieStore::new();
        let jar = store.jar().unwrap();
        jar.add_cookie_str("k=1", &url("https://a.example/"));
        assert_eq!(store.cookie_header(&url("https://a.example/")).as_deref(), Some("k=1"));
    }

    #[test]
    fn noop_store_forgets() {
        let store = NoopSessionStore;
        store.absorb(&url("https://a.example/"), &["k=1".into()]);
        assert_eq!(store.cookie_header(&url("https://a.example/")), None);
        assert!(store.jar().is_none());
    }
}

//! HTTP transport.
//!
//! [`Transport`] is the seam between the fetch ladder and the network. The
//! reqwest implementation comes in two flavours: a fingerprinted stealth
//! client and a plain one.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, COOKIE, LOCATION, SET_COOKIE, USER_AGENT};
use reqwest::cookie::Jar;
use reqwest::{Client, Url};
use tracing::{debug, instrument};

use crate::config::FetchSettings;
use crate::error::{ConfigError, FetchError};
use crate::fingerprint::{plain_user_agent, BrowserProfile};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    #[default]
    Get,
    Post,
}

/// One outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    pub method: Method,
    pub headers: Vec<(String, String)>,
    /// Form-encoded body for `POST`.
    pub form: Vec<(String, String)>,
    pub follow_redirects: bool,
    /// Skip reading the body.
    pub headers_only: bool,
    /// Return an empty result instead of an error.
    pub raise_errors: bool,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::Get,
            headers: Vec::new(),
            form: Vec::new(),
            follow_redirects: true,
            headers_only: false,
            raise_errors: true,
        }
    }

    pub fn post_form(url: impl Into<String>, form: Vec<(String, String)>) -> Self {
        Self {
            method: Method::Post,
            form,
            ..Self::get(url)
        }
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn referer(self, referer: Option<&str>) -> Self {
        match referer {
            Some(r) if !r.is_empty() => self.header("Referer", r),
            _ => self,
        }
    }

    #[must_use]
    pub fn no_redirects(mut self) -> Self {
        self.follow_redirects = false;
        self
    }

    #[must_use]
    pub fn headers_only(mut self) -> Self {
        self.headers_only = true;
        self
    }

    #[must_use]
    pub fn lenient(mut self) -> Self {
        self.raise_errors = false;
        self
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    pub fn host(&self) -> Option<String> {
        crate::policy::host_of(&self.url)
    }
}

/// Response as seen by adapters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchResult {
    /// Final URL after redirects.
    pub url: String,
    pub status: u16,
    /// Lower-cased names; repeated headers keep every value.
    pub headers: BTreeMap<String, Vec<String>>,
    pub body: String,
}

impl FetchResult {
    /// Result handed out when the caller opted out of errors.
    pub fn empty(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .and_then(|v| v.first())
            .map(String::as_str)
    }

    pub fn location(&self) -> Option<&str> {
        self.header(LOCATION.as_str())
    }

    pub fn set_cookies(&self) -> &[String] {
        self.headers
            .get(SET_COOKIE.as_str())
            .map_or(&[], Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.status == 0 && self.body.is_empty() && self.headers.is_empty()
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }
}

/// A way to perform one HTTP exchange. Non-2xx statuses are results, not
/// errors; the fetch ladder classifies them.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;

    async fn execute(&self, request: &FetchRequest) -> Result<FetchResult, FetchError>;
}

/// reqwest-backed transport.
pub struct ReqwestTransport {
    name: &'static str,
    follow: Client,
    no_follow: Client,
}

impl ReqwestTransport {
    /// Fingerprinted client for the anti-bot rung.
    pub fn stealth(settings: &FetchSettings, jar: Option<Arc<Jar>>) -> Result<Self, ConfigError> {
        let headers = BrowserProfile::new(settings.browser, settings.platform).to_headers();
        Self::build("stealth", headers, settings, jar)
    }

    /// Minimal client for the fallback rung.
    pub fn plain(settings: &FetchSettings, jar: Option<Arc<Jar>>) -> Result<Self, ConfigError> {
        let mut headers = HeaderMap::new();
        if let Ok(ua) = HeaderValue::from_str(&plain_user_agent()) {
            headers.insert(USER_AGENT, ua);
        }
        Self::build("plain", headers, settings, jar)
    }

    fn build(
        name: &'static str,
        headers: HeaderMap,
        settings: &FetchSettings,
        jar: Option<Arc<Jar>>,
    ) -> Result<Self, ConfigError> {
        let builder = |redirect: reqwest::redirect::Policy| {
            let builder = Client::builder()
                .pool_max_idle_per_host(10)
                .pool_idle_timeout(Duration::from_secs(90))
                .tcp_keepalive(Duration::from_secs(60))
                .use_rustls_tls()
                .brotli(true)
                .gzip(true)
                .deflate(true)
                .default_headers(headers.clone())
                .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
                .timeout(Duration::from_secs(settings.timeout_secs))
                .redirect(redirect);
            // Both rungs share the session jar; without one, no cookies at all.
            let builder = match &jar {
                Some(jar) => builder.cookie_provider(jar.clone()),
                None => builder,
            };
            builder.build().map_err(|e| ConfigError::Client(e.to_string()))
        };

        Ok(Self {
            name,
            follow: builder(reqwest::redirect::Policy::limited(settings.max_redirects))?,
            no_follow: builder(reqwest::redirect::Policy::none())?,
        })
    }
}

fn classify(url: &str, err: &reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout(url.to_string())
    } else if err.is_builder() {
        FetchError::InvalidUrl(url.to_string())
    } else {
        FetchError::ConnectionFailed(err.to_string())
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    fn name(&self) -> &'static str {
        self.name
    }

    #[instrument(skip(self, request), fields(rung = self.name, url = %request.url))]
    async fn execute(&self, request: &FetchRequest) -> Result<FetchResult, FetchError> {
        let url = Url::parse(&request.url).map_err(|_| FetchError::InvalidUrl(request.url.clone()))?;
        let client = if request.follow_redirects {
            &self.follow
        } else {
            &self.no_follow
        };

        let mut builder = match request.method {
            Method::Get => client.get(url),
            Method::Post => client.post(url).form(&request.form),
        };
        for (name, value) in &request.headers {
            let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) else {
                debug!(header = %name, "Skipping invalid header");
                continue;
            };
            builder = builder.header(name, value);
        }

        let response = builder.send().await.map_err(|e| classify(&request.url, &e))?;
        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let mut headers: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers
                    .entry(name.as_str().to_string())
                    .or_default()
                    .push(value.to_string());
            }
        }

        let body = if request.headers_only {
            String::new()
        } else {
            response.text().await.map_err(|e| classify(&request.url, &e))?
        };
        debug!(status, bytes = body.len(), "Response received");

        Ok(FetchResult {
            url: final_url,
            status,
            headers,
            body,
        })
    }
}

/// Insert or replace the `Cookie` header of a request.
pub(crate) fn with_cookie(mut request: FetchRequest, cookie: Option<String>) -> FetchRequest {
    let Some(cookie) = cookie else {
        return request;
    };
    request
        .headers
        .retain(|(n, _)| !n.eq_ignore_ascii_case(COOKIE.as_str()));
    request.headers.push(("Cookie".to_string(), cookie));
    request
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_builder_flags() {
        let req = FetchRequest::get("https://a.example/x")
            .referer(Some("https://ref/"))
            .no_redirects()
            .headers_only()
            .lenient();
        assert!(!req.follow_redirects);
        assert!(req.headers_only);
        assert!(!req.raise_errors);
        assert!(req.has_header("referer"));
        assert_eq!(req.host().as_deref(), Some("a.example"));
        assert!(!FetchRequest::get("x").referer(Some("")).has_header("Referer"));
    }

    #[test]
    fn result_header_lookup_is_case_insensitive() {
        let mut result = FetchResult::empty("https://a/");
        result.status = 302;
        result
            .headers
            .insert("location".into(), vec!["https://b/".into()]);
        result
            .headers
            .insert("set-cookie".into(), vec!["a=1".into(), "b=2".into()]);
        assert_eq!(result.location(), Some("https://b/"));
        assert_eq!(result.header("Location"), Some("https://b/"));
        assert_eq!(result.set_cookies().len(), 2);
        assert!(result.is_redirect());
    }

    #[test]
    fn cookie_header_is_replaced() {
        let req = FetchRequest::get("https://a/").header("cookie", "old=1");
        let req = with_cookie(req, Some("cf=2".into()));
        let cookies: Vec<_> = req.headers.iter().filter(|(n, _)| n == "Cookie").collect();
        assert_eq!(cookies.len(), 1);
        assert_eq!(cookies[0].1, "cf=2");
        assert!(!req.headers.iter().any(|(n, _)| n == "cookie"));
    }

    #[test]
    fn transports_build_from_defaults() {
        let settings = FetchSettings::default();
        let jar = Some(Arc::new(Jar::default()));
        assert_eq!(ReqwestTransport::stealth(&settings, jar.clone()).unwrap().name(), "stealth");
        assert_eq!(ReqwestTransport::plain(&settings, jar).unwrap().name(), "plain");
        assert_eq!(ReqwestTransport::plain(&settings, None).unwrap().name(), "plain");
    }
}

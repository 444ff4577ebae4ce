//! Browser fingerprint for the anti-bot fetch rung.
//!
//! Challenge pages mostly key on the header set, so the stealth client sends
//! the same headers a desktop browser would for a top-level navigation.

use rand::seq::SliceRandom;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_ENCODING, ACCEPT_LANGUAGE, USER_AGENT,
};
use serde::{Deserialize, Serialize};

const CHROME_VERSIONS: &[(&str, &str)] = &[
    ("131", "131.0.0.0"),
    ("130", "130.0.0.0"),
    ("129", "129.0.0.0"),
    ("128", "128.0.0.0"),
];

const FIREFOX_VERSIONS: &[&str] = &["133.0", "132.0", "131.0"];

/// Scraped sources are Spanish-language.
const ACCEPT_LANGUAGES: &[&str] = &[
    "es-ES,es;q=0.9",
    "es-ES,es;q=0.9,en;q=0.8",
    "es-419,es;q=0.9,en;q=0.8",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Browser {
    #[default]
    Chrome,
    Firefox,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    MacOS,
    #[default]
    Windows,
    Linux,
}

impl Platform {
    fn os_string(self) -> &'static str {
        match self {
            Platform::MacOS => "Macintosh; Intel Mac OS X 10_15_7",
            Platform::Windows => "Windows NT 10.0; Win64; x64",
            Platform::Linux => "X11; Linux x86_64",
        }
    }

    fn sec_ch_platform(self) -> &'static str {
        match self {
            Platform::MacOS => "\"macOS\"",
            Platform::Windows => "\"Windows\"",
            Platform::Linux => "\"Linux\"",
        }
    }
}

/// Header values of one browser identity.
#[derive(Debug, Clone)]
pub struct BrowserProfile {
    pub user_agent: String,
    pub accept: String,
    pub accept_language: String,
    pub accept_encoding: String,
    /// Client hints; empty for browsers that do not send them.
    pub sec_ch_ua: String,
    pub sec_ch_ua_mobile: String,
    pub sec_ch_ua_platform: String,
}

impl BrowserProfile {
    pub fn new(browser: Browser, platform: Platform) -> Self {
        match browser {
            Browser::Chrome => chrome_profile(platform),
            Browser::Firefox => firefox_profile(platform),
        }
    }

    /// Headers for a top-level navigation. Values that are not valid header
    /// text are skipped.
    pub fn to_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let mut put = |name: HeaderName, value: &str| {
            if value.is_empty() {
                return;
            }
            if let Ok(value) = HeaderValue::from_str(value) {
                headers.insert(name, value);
            }
        };

        put(USER_AGENT, &self.user_agent);
        put(ACCEPT, &self.accept);
        put(ACCEPT_LANGUAGE, &self.accept_language);
        put(ACCEPT_ENCODING, &self.accept_encoding);
        put(HeaderName::from_static("sec-ch-ua"), &self.sec_ch_ua);
        put(HeaderName::from_static("sec-ch-ua-mobile"), &self.sec_ch_ua_mobile);
        put(HeaderName::from_static("sec-ch-ua-platform"), &self.sec_ch_ua_platform);
        put(HeaderName::from_static("sec-fetch-dest"), "document");
        put(HeaderName::from_static("sec-fetch-mode"), "navigate");
        put(HeaderName::from_static("sec-fetch-site"), "none");
        put(HeaderName::from_static("sec-fetch-user"), "?1");
        put(HeaderName::from_static("upgrade-insecure-requests"), "1");

        headers
    }
}

fn pick<T: Copy>(items: &[T], fallback: T) -> T {
    items
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(fallback)
}

fn chrome_profile(platform: Platform) -> BrowserProfile {
    let (major, full) = pick(CHROME_VERSIONS, ("131", "131.0.0.0"));
    BrowserProfile {
        user_agent: format!(
            "Mozilla/5.0 ({}) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/{full} Safari/537.36",
            platform.os_string()
        ),
        accept: "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8".to_string(),
        accept_language: pick(ACCEPT_LANGUAGES, "es-ES,es;q=0.9").to_string(),
        accept_encoding: "gzip, deflate, br".to_string(),
        sec_ch_ua: format!(
            "\"Google Chrome\";v=\"{major}\", \"Chromium\";v=\"{major}\", \"Not_A Brand\";v=\"24\""
        ),
        sec_ch_ua_mobile: "?0".to_string(),
        sec_ch_ua_platform: platform.sec_ch_platform().to_string(),
    }
}

fn firefox_profile(platform: Platform) -> BrowserProfile {
    let version = pick(FIREFOX_VERSIONS, "133.0");
    BrowserProfile {
        user_agent: format!(
            "Mozilla/5.0 ({}; rv:{version}) Gecko/20100101 Firefox/{version}",
            platform.os_string()
        ),
        accept: "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8".to_string(),
        accept_language: pick(ACCEPT_LANGUAGES, "es-ES,es;q=0.9").to_string(),
        accept_encoding: "gzip, deflate, br".to_string(),
        sec_ch_ua: String::new(),
        sec_ch_ua_mobile: String::new(),
        sec_ch_ua_platform: String::new(),
    }
}

/// Identity of the plain rung: a bare user agent and nothing else.
pub fn plain_user_agent() -> String {
    format!("canal/{}", crate::VERSION)
}

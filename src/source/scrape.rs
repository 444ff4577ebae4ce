//! Markup helpers shared by the built-in adapters.

use anyhow::{anyhow, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

static WHITESPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n|\r|\t|\s{2}|&nbsp;").expect("static regex"));

/// Remove line breaks, tabs and doubled spaces so `.*?` patterns can span
/// what used to be several lines.
pub fn collapse(html: &str) -> String {
    WHITESPACE.replace_all(html, "").into_owned()
}

/// First capture group of `re` in `text`, trimmed. Empty matches count as
/// missing.
pub fn capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// First capture of the first pattern that matches.
pub fn capture_any(patterns: &[&Regex], text: &str) -> Option<String> {
    patterns.iter().find_map(|re| capture(re, text))
}

/// Decode HTML entities in a text fragment.
pub fn unescape(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    Html::parse_fragment(text)
        .root_element()
        .text()
        .collect::<String>()
}

pub fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow!("invalid selector {css}: {e:?}"))
}

/// Collected, whitespace-normalized text of an element.
pub fn text_of(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Resolve `href` against `base`, accepting scheme-relative links.
pub fn absolute(base: &str, href: &str) -> String {
    let href = href.trim();
    if href.starts_with("//") {
        return format!("https:{href}");
    }
    Url::parse(base)
        .and_then(|b| b.join(href))
        .map_or_else(|_| href.to_string(), |u| u.to_string())
}

/// Normalize a configured host to `scheme://host/`.
pub fn with_trailing_slash(host: &str) -> String {
    if host.ends_with('/') {
        host.to_string()
    } else {
        format!("{host}/")
    }
}

/// Query string for a site search: spaces become `+`.
pub fn search_query(query: &str) -> String {
    urlencoding::encode(query.trim()).replace("%20", "+")
}

/// Uppercase the first character, lowercase the rest.
pub fn capitalize(text: &str) -> String {
    let lower = text.to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapse_and_capture() {
        let html = "<div>\n\t<span class=\"Year\">1999</span>\n</div>";
        let collapsed = collapse(html);
        assert_eq!(collapsed, "<div><span class=\"Year\">1999</span></div>");
        let re = Regex::new(r#"<span class="Year">(.*?)</span>"#).unwrap();
        assert_eq!(capture(&re, &collapsed).as_deref(), Some("1999"));
        let empty = Regex::new(r"<b>(.*?)</b>").unwrap();
        assert_eq!(capture(&empty, "<b></b>"), None);
    }

    #[test]
    fn entities_are_decoded() {
        assert_eq!(unescape("Amélie &amp; Co &#8211; 2001"), "Amélie & Co – 2001");
        assert_eq!(unescape("plain"), "plain");
    }

    #[test]
    fn links_resolve_against_base() {
        assert_eq!(absolute("https://a.example/x/", "/y/"), "https://a.example/y/");
        assert_eq!(absolute("https://a.example/", "//cdn.example/i.jpg"), "https://cdn.example/i.jpg");
        assert_eq!(absolute("https://a.example/", "https://b.example/"), "https://b.example/");
    }

    #[test]
    fn text_helpers() {
        assert_eq!(search_query("la matrix"), "la+matrix");
        assert_eq!(capitalize("ACCIÓN"), "Acción");
        assert_eq!(with_trailing_slash("https://a.example"), "https://a.example/");
    }
}

//! URL resolution policy.
//!
//! Pure functions over a rule set: alias rewrite, referer choice, denylist and
//! redirector unwrap. Rules are data, loaded from `[policy]` in the config
//! and merged with the rules each source declares.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ResolveError;

/// Rewrite `from` host to `to` host before any fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainAlias {
    pub from: String,
    pub to: String,
}

/// Redirector path shape and its resolve variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnwrapRule {
    /// Substring identifying the redirector locator.
    pub from: String,
    /// Replacement for `from`.
    pub to: String,
    /// Follow one `Location` header (headers-only, no redirects) after
    /// rewriting.
    #[serde(default = "default_hop")]
    pub hop: bool,
    /// `Referer` sent on the hop request; the locator's own policy referer
    /// when unset.
    #[serde(default)]
    pub referer: Option<String>,
}

fn default_hop() -> bool {
    true
}

/// Host fragments that identify a hosting server, for stream labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerPattern {
    pub name: String,
    pub hosts: Vec<String>,
}

/// One rule set. Host entries match as substrings of the URL host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyRules {
    pub aliases: Vec<DomainAlias>,
    pub referer_sensitive: Vec<String>,
    pub known_good_referer: Option<String>,
    pub denylist: Vec<String>,
    pub unwrap: Vec<UnwrapRule>,
    pub servers: Vec<ServerPattern>,
}

impl Default for PolicyRules {
    fn default() -> Self {
        Self {
            denylist: vec!["gounlimited".into()],
            servers: builtin_servers(),
            ..Self::empty()
        }
    }
}

impl PolicyRules {
    /// No rules at all.
    pub fn empty() -> Self {
        Self {
            aliases: Vec::new(),
            referer_sensitive: Vec::new(),
            known_good_referer: None,
            denylist: Vec::new(),
            unwrap: Vec::new(),
            servers: Vec::new(),
        }
    }
}

fn builtin_servers() -> Vec<ServerPattern> {
    let table: &[(&str, &[&str])] = &[
        ("streamwish", &["wish", "swdyu", "playerwish"]),
        ("filemoon", &["filemoon", "moonplayer"]),
        ("voe", &["voe.sx", "voe-", "voeunblock"]),
        ("streamtape", &["streamtape", "strtape"]),
        ("doodstream", &["dood", "ds2play"]),
        ("vidhide", &["vidhide", "vidhidepro", "filelions"]),
        ("okru", &["ok.ru", "odnoklassniki"]),
        ("mixdrop", &["mixdrop"]),
        ("uqload", &["uqload"]),
        ("mp4upload", &["mp4upload"]),
        ("upstream", &["upstream"]),
        ("netu", &["hqq.", "netu", "waaw"]),
        ("vidguard", &["vgfplay", "vidguard", "listeamed"]),
    ];
    table
        .iter()
        .map(|(name, hosts)| ServerPattern {
            name: (*name).to_string(),
            hosts: hosts.iter().map(|h| (*h).to_string()).collect(),
        })
        .collect()
}

/// Locator after the policy ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prepared {
    pub url: String,
    pub referer: Option<String>,
    /// An unwrap rule asked for one extra `Location` hop.
    pub hop: bool,
    pub hop_referer: Option<String>,
}

/// Effective rules for one source.
#[derive(Debug, Clone, Default)]
pub struct UrlPolicy {
    rules: PolicyRules,
}

impl UrlPolicy {
    pub fn new(rules: PolicyRules) -> Self {
        Self { rules }
    }

    /// Source rules first, then global ones. A source referer overrides the
    /// global one.
    pub fn merged(global: &PolicyRules, source: &PolicyRules) -> Self {
        fn join<T: Clone + PartialEq>(first: &[T], second: &[T]) -> Vec<T> {
            let mut out = first.to_vec();
            for item in second {
                if !out.contains(item) {
                    out.push(item.clone());
                }
            }
            out
        }

        Self::new(PolicyRules {
            aliases: join(&source.aliases, &global.aliases),
            referer_sensitive: join(&source.referer_sensitive, &global.referer_sensitive),
            known_good_referer: source
                .known_good_referer
                .clone()
                .or_else(|| global.known_good_referer.clone()),
            denylist: join(&source.denylist, &global.denylist),
            unwrap: join(&source.unwrap, &global.unwrap),
            servers: join(&source.servers, &global.servers),
        })
    }

    pub fn rules(&self) -> &PolicyRules {
        &self.rules
    }

    /// Clean entity-escaped and scheme-relative locators, then apply domain
    /// aliases.
    pub fn normalize(&self, raw: &str) -> String {
        let mut cleaned = raw
            .trim()
            .replace("&#038;", "&")
            .replace("&amp;", "&")
            .replace("\\/", "/");
        if cleaned.starts_with("//") {
            cleaned = format!("https:{cleaned}");
        }

        let Ok(mut parsed) = Url::parse(&cleaned) else {
            return cleaned;
        };
        let Some(host) = parsed.host_str().map(str::to_string) else {
            return cleaned;
        };
        if let Some(alias) = self.rules.aliases.iter().find(|a| a.from == host) {
            if parsed.set_host(Some(&alias.to)).is_ok() {
                return parsed.to_string();
            }
        }
        cleaned
    }

    /// The denylist entry matching `url`, if any.
    pub fn denylisted(&self, url: &str) -> Option<&str> {
        let host = host_of(url);
        let haystack = host.as_deref().unwrap_or(url);
        self.rules
            .denylist
            .iter()
            .find(|entry| !entry.is_empty() && haystack.contains(entry.as_str()))
            .map(String::as_str)
    }

    /// Rewrite a known redirector shape. Returns the new locator and the
    /// rule that matched.
    pub fn unwrap_redirector(&self, url: &str) -> Option<(String, &UnwrapRule)> {
        self.rules
            .unwrap
            .iter()
            .find(|rule| !rule.from.is_empty() && url.contains(&rule.from))
            .map(|rule| (url.replacen(&rule.from, &rule.to, 1), rule))
    }

    /// Explicit referer, else the known-good one for sensitive hosts, else
    /// the locator itself.
    pub fn referer_for(&self, url: &str, explicit: Option<&str>) -> Option<String> {
        if let Some(explicit) = explicit.filter(|r| !r.is_empty()) {
            return Some(explicit.to_string());
        }
        let host = host_of(url)?;
        if let Some(fixed) = &self.rules.known_good_referer {
            if self
                .rules
                .referer_sensitive
                .iter()
                .any(|h| !h.is_empty() && host.contains(h.as_str()))
            {
                return Some(fixed.clone());
            }
        }
        Some(url.to_string())
    }

    /// Run the whole policy over an extracted locator. Denylisted hosts fail
    /// here, before any network access.
    pub fn prepare(&self, raw: &str, explicit_referer: Option<&str>) -> Result<Prepared, ResolveError> {
        let url = self.normalize(raw);
        if let Some(entry) = self.denylisted(&url) {
            return Err(ResolveError::Denylisted(entry.to_string()));
        }
        let (url, hop, hop_referer) = match self.unwrap_redirector(&url) {
            Some((rewritten, rule)) => (self.normalize(&rewritten), rule.hop, rule.referer.clone()),
            None => (url, false, None),
        };
        let referer = self.referer_for(&url, explicit_referer);
        let hop_referer = if hop { hop_referer.or_else(|| referer.clone()) } else { None };
        Ok(Prepared {
            url,
            referer,
            hop,
            hop_referer,
        })
    }

    /// Re-run the policy on a `Location` target. No further hops.
    pub fn after_hop(&self, location: &str, explicit_referer: Option<&str>) -> Result<Prepared, ResolveError> {
        let mut prepared = self.prepare(location, explicit_referer)?;
        prepared.hop = false;
        prepared.hop_referer = None;
        Ok(prepared)
    }

    /// Server name for a locator, from the host pattern table.
    pub fn identify_server(&self, url: &str) -> Option<&str> {
        let host = host_of(url)?;
        self.rules
            .servers
            .iter()
            .find(|s| s.hosts.iter().any(|h| !h.is_empty() && host.contains(h.as_str())))
            .map(|s| s.name.as_str())
    }
}

pub fn host_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()?
        .host_str()
        .map(str::to_ascii_lowercase)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source_rules() -> PolicyRules {
        PolicyRules {
            aliases: vec![DomainAlias {
                from: "pelisforte.co".into(),
                to: "www2.pelisforte.se".into(),
            }],
            referer_sensitive: vec!["ok.ru".into(), "wish".into()],
            known_good_referer: Some("https://mp4.nu/".into()),
            denylist: vec!["playpf.link".into()],
            unwrap: vec![UnwrapRule {
                from: "/mp4.nu//?h=".into(),
                to: "/mp4.nu/r.php?h=".into(),
                hop: true,
                referer: Some("https://www2.pelisforte.se/".into()),
            }],
            servers: Vec::new(),
        }
    }

    fn policy() -> UrlPolicy {
        UrlPolicy::merged(&PolicyRules::default(), &source_rules())
    }

    #[test]
    fn alias_rewrites_host_only() {
        assert_eq!(
            policy().normalize("https://pelisforte.co/pelicula/x/?a=1&#038;b=2"),
            "https://www2.pelisforte.se/pelicula/x/?a=1&b=2"
        );
        assert_eq!(policy().normalize("//cdn.example/v.mp4"), "https://cdn.example/v.mp4");
    }

    #[test]
    fn sensitive_host_gets_fixed_referer() {
        let p = policy();
        assert_eq!(
            p.referer_for("https://ok.ru/videoembed/1", None).as_deref(),
            Some("https://mp4.nu/")
        );
        assert_eq!(
            p.referer_for("https://streamwish.to/e/abc", None).as_deref(),
            Some("https://mp4.nu/")
        );
        assert_eq!(
            p.referer_for("https://ok.ru/videoembed/1", Some("https://site/")).as_deref(),
            Some("https://site/")
        );
    }

    #[test]
    fn other_hosts_refer_to_themselves() {
        let p = policy();
        assert_eq!(
            p.referer_for("https://voe.sx/e/abc", None).as_deref(),
            Some("https://voe.sx/e/abc")
        );
        assert_eq!(
            UrlPolicy::default().referer_for("https://ok.ru/videoembed/1?x=2", None).as_deref(),
            Some("https://ok.ru/videoembed/1?x=2")
        );
        assert_eq!(
            p.referer_for("https://voe.sx/e/abc", Some("")).as_deref(),
            Some("https://voe.sx/e/abc")
        );
        assert_eq!(p.referer_for("not a url", None), None);
    }

    #[test]
    fn denylist_merges_global_and_source() {
        let p = policy();
        assert!(matches!(
            p.prepare("https://gounlimited.to/embed", None),
            Err(ResolveError::Denylisted(_))
        ));
        assert!(matches!(
            p.prepare("https://playpf.link/x", None),
            Err(ResolveError::Denylisted(_))
        ));
        assert!(p.prepare("https://voe.sx/e/1", None).is_ok());
    }

    #[test]
    fn redirector_shape_asks_for_one_hop() {
        let prepared = policy().prepare("https://mp4.nu//?h=abc", None).unwrap();
        assert_eq!(prepared.url, "https://mp4.nu/r.php?h=abc");
        assert!(prepared.hop);
        assert_eq!(prepared.hop_referer.as_deref(), Some("https://www2.pelisforte.se/"));
        let after = policy().after_hop("https://ok.ru/videoembed/9", None).unwrap();
        assert!(!after.hop);
        assert_eq!(after.referer.as_deref(), Some("https://mp4.nu/"));
    }

    #[test]
    fn servers_are_identified_by_host() {
        let p = policy();
        assert_eq!(p.identify_server("https://filemoon.sx/e/1"), Some("filemoon"));
        assert_eq!(p.identify_server("https://dood.wf/e/1"), Some("doodstream"));
        assert_eq!(p.identify_server("https://unknown.example/"), None);
    }

    #[test]
    fn source_referer_overrides_global() {
        let global = PolicyRules {
            known_good_referer: Some("https://global/".into()),
            ..PolicyRules::empty()
        };
        let merged = UrlPolicy::merged(&global, &PolicyRules::empty());
        assert_eq!(merged.rules().known_good_referer.as_deref(), Some("https://global/"));
        let merged = UrlPolicy::merged(&global, &source_rules());
        assert_eq!(merged.rules().known_good_referer.as_deref(), Some("https://mp4.nu/"));
    }
}

//! Best-effort canonical metadata.
//!
//! The [`MetadataBridge`] matches a scraped title against an external
//! [`CanonicalCatalog`] (TMDb in production). Lookups are cached and every
//! failure collapses to `None`: enrichment must never block resolution.

pub mod tmdb;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::TtlCache;
use crate::config::MetadataSettings;
use crate::error::ConfigError;
use crate::model::CatalogKind;

pub use tmdb::TmdbCatalog;

/// Trailing `(1999)`-style year suffix.
static YEAR_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*[\(\[]\s*(\d{4})\s*[\)\]]\s*$").expect("static regex"));

/// A confident match in the canonical catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    /// Provider id, without the `canonical:` prefix.
    pub id: String,
    pub kind: CatalogKind,
    /// Localized title.
    pub title: String,
    pub original_title: Option<String>,
    pub poster: Option<String>,
    pub backdrop: Option<String>,
    pub overview: Option<String>,
    pub year: Option<u16>,
    pub rating: Option<f32>,
    #[serde(default)]
    pub genres: Vec<String>,
}

impl CanonicalRecord {
    /// Titles worth searching a source with, localized first.
    pub fn search_titles(&self) -> Vec<&str> {
        let mut titles = vec![self.title.as_str()];
        if let Some(original) = self.original_title.as_deref() {
            if !original.is_empty() && original != self.title {
                titles.push(original);
            }
        }
        titles
    }
}

/// External catalog lookups.
#[async_trait]
pub trait CanonicalCatalog: Send + Sync {
    fn name(&self) -> &str;

    /// Best match for a title, `None` when nothing matches.
    async fn search(
        &self,
        title: &str,
        kind: CatalogKind,
        year: Option<u16>,
    ) -> anyhow::Result<Option<CanonicalRecord>>;

    /// Full record for a provider id.
    async fn details(&self, id: &str, kind: CatalogKind) -> anyhow::Result<Option<CanonicalRecord>>;
}

type MatchKey = (String, CatalogKind, Option<u16>);

pub struct MetadataBridge {
    catalog: Option<Arc<dyn CanonicalCatalog>>,
    matches: TtlCache<MatchKey, Option<CanonicalRecord>>,
    details: TtlCache<(String, CatalogKind), Option<CanonicalRecord>>,
}

impl std::fmt::Debug for MetadataBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataBridge")
            .field("catalog", &self.catalog.as_ref().map(|c| c.name().to_string()))
            .field("cached", &self.matches.len())
            .finish_non_exhaustive()
    }
}

impl MetadataBridge {
    pub fn new(catalog: Arc<dyn CanonicalCatalog>, ttl: Duration, capacity: usize) -> Self {
        Self {
            catalog: Some(catalog),
            matches: TtlCache::new(ttl, capacity),
            details: TtlCache::new(ttl, capacity),
        }
    }

    /// Bridge that never matches.
    pub fn disabled() -> Self {
        Self {
            catalog: None,
            matches: TtlCache::new(Duration::ZERO, 1),
            details: TtlCache::new(Duration::ZERO, 1),
        }
    }

    /// TMDb when an API key is configured, disabled otherwise.
    pub fn from_settings(settings: &MetadataSettings) -> Result<Self, ConfigError> {
        let Some(api_key) = settings.api_key.as_deref().filter(|k| !k.trim().is_empty()) else {
            debug!("No TMDb API key, metadata enrichment disabled");
            return Ok(Self::disabled());
        };
        let catalog = TmdbCatalog::new(api_key, settings)?;
        Ok(Self::new(
            Arc::new(catalog),
            Duration::from_secs(settings.ttl_secs),
            settings.capacity,
        ))
    }

    pub fn is_enabled(&self) -> bool {
        self.catalog.is_some()
    }

    /// Match a scraped title. A trailing `(year)` is stripped and used as
    /// the year when none is given.
    pub async fn lookup(&self, title: &str, kind: CatalogKind, year: Option<u16>) -> Option<CanonicalRecord> {
        let catalog = self.catalog.as_ref()?;
        let (clean, suffix_year) = normalize_title(title);
        if clean.is_empty() {
            return None;
        }
        let key = (clean, kind, year.or(suffix_year));
        if let Some(hit) = self.matches.get(&key) {
            return hit;
        }

        match catalog.search(&key.0, kind, key.2).await {
            Ok(found) => {
                debug!(title = %key.0, year = ?key.2, matched = found.is_some(), "Canonical lookup");
                self.matches.insert(key, found.clone());
                found
            }
            Err(err) => {
                warn!(catalog = catalog.name(), title = %key.0, error = %err, "Canonical lookup failed");
                None
            }
        }
    }

    /// Record for a canonical id. Failures are `None`.
    pub async fn details(&self, id: &str, kind: CatalogKind) -> Option<CanonicalRecord> {
        let catalog = self.catalog.as_ref()?;
        let key = (id.to_string(), kind);
        if let Some(hit) = self.details.get(&key) {
            return hit;
        }
        match catalog.details(id, kind).await {
            Ok(found) => {
                self.details.insert(key, found.clone());
                found
            }
            Err(err) => {
                warn!(catalog = catalog.name(), id, error = %err, "Canonical details failed");
                None
            }
        }
    }
}

/// Split `"Matrix (1999)"` into `("Matrix", Some(1999))`.
pub fn normalize_title(title: &str) -> (String, Option<u16>) {
    let trimmed = title.trim();
    match YEAR_SUFFIX.captures(trimmed) {
        Some(caps) => {
            let year = caps.get(1).and_then(|m| m.as_str().parse::<u16>().ok()).filter(|y| *y > 1800);
            let start = caps.get(0).map_or(trimmed.len(), |m| m.start());
            (trimmed[..start].trim().to_string(), year)
        }
        None => (trimmed.to_string(), None),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Catalog returning one fixed record for any query, recording queries.
    pub struct FixedCatalog {
        pub record: Option<CanonicalRecord>,
        pub fail: bool,
        pub queries: Mutex<Vec<(String, CatalogKind, Option<u16>)>>,
    }

    impl FixedCatalog {
        pub fn new(record: Option<CanonicalRecord>) -> Arc<Self> {
            Arc::new(Self {
                record,
                fail: false,
                queries: Mutex::new(Vec::new()),
            })
        }

        pub fn failing() -> Arc<Self> {
            Arc::new(Self {
                record: None,
                fail: true,
                queries: Mutex::new(Vec::new()),
            })
        }

        pub fn queries(&self) -> Vec<(String, CatalogKind, Option<u16>)> {
            self.queries.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CanonicalCatalog for FixedCatalog {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn search(
            &self,
            title: &str,
            kind: CatalogKind,
            year: Option<u16>,
        ) -> anyhow::Result<Option<CanonicalRecord>> {
            self.queries.lock().unwrap().push((title.to_string(), kind, year));
            if self.fail {
                anyhow::bail!("catalog offline");
            }
            Ok(self.record.clone())
        }

        async fn details(&self, id: &str, _kind: CatalogKind) -> anyhow::Result<Option<CanonicalRecord>> {
            if self.fail {
                anyhow::bail!("catalog offline");
            }
            Ok(self.record.clone().filter(|r| r.id == id))
        }
    }

    pub fn matrix() -> CanonicalRecord {
        CanonicalRecord {
            id: "603".into(),
            kind: CatalogKind::Movie,
            title: "Matrix".into(),
            original_title: Some("The Matrix".into()),
            poster: Some("https://image.tmdb.org/t/p/w500/m.jpg".into()),
            backdrop: None,
            overview: Some("Un hacker descubre la verdad.".into()),
            year: Some(1999),
            rating: Some(8.2),
            genres: vec!["Acción".into()],
        }
    }
}

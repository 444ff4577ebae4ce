//! TMDb catalog over the v3 REST API.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

use super::{CanonicalCatalog, CanonicalRecord};
use crate::config::MetadataSettings;
use crate::error::ConfigError;
use crate::model::CatalogKind;

const POSTER_SIZE: &str = "w500";
const BACKDROP_SIZE: &str = "w1280";

pub struct TmdbCatalog {
    client: reqwest::Client,
    api_key: String,
    language: String,
    base_url: String,
    image_base_url: String,
}

/// Search hit or details body; movies and shows use different key names.
#[derive(Debug, Deserialize)]
struct TmdbItem {
    id: u64,
    title: Option<String>,
    name: Option<String>,
    original_title: Option<String>,
    original_name: Option<String>,
    overview: Option<String>,
    poster_path: Option<String>,
    backdrop_path: Option<String>,
    release_date: Option<String>,
    first_air_date: Option<String>,
    vote_average: Option<f32>,
    #[serde(default)]
    genres: Vec<TmdbGenre>,
}

#[derive(Debug, Deserialize)]
struct TmdbGenre {
    name: String,
}

#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(default)]
    results: Vec<TmdbItem>,
}

impl TmdbCatalog {
    pub fn new(api_key: &str, settings: &MetadataSettings) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .user_agent(crate::fingerprint::plain_user_agent())
            .build()
            .map_err(|e| ConfigError::Client(e.to_string()))?;
        Ok(Self {
            client,
            api_key: api_key.to_string(),
            language: settings.language.clone(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            image_base_url: settings.image_base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get<T: for<'de> Deserialize<'de>>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let url = format!("{}{path}", self.base_url);
        debug!(%url, "TMDb request");
        self.client
            .get(&url)
            .query(&[("api_key", self.api_key.as_str()), ("language", self.language.as_str())])
            .query(query)
            .send()
            .await
            .with_context(|| format!("TMDb request to {path} failed"))?
            .error_for_status()
            .with_context(|| format!("TMDb rejected {path}"))?
            .json()
            .await
            .with_context(|| format!("Failed to parse TMDb response for {path}"))
    }

    fn image(&self, size: &str, path: Option<&str>) -> Option<String> {
        path.filter(|p| !p.is_empty())
            .map(|p| format!("{}/{size}{p}", self.image_base_url))
    }

    fn record(&self, item: TmdbItem, kind: CatalogKind) -> CanonicalRecord {
        let date = item.release_date.or(item.first_air_date).unwrap_or_default();
        CanonicalRecord {
            id: item.id.to_string(),
            kind,
            title: item.title.or(item.name).unwrap_or_default(),
            original_title: item.original_title.or(item.original_name),
            poster: self.image(POSTER_SIZE, item.poster_path.as_deref()),
            backdrop: self.image(BACKDROP_SIZE, item.backdrop_path.as_deref()),
            overview: item.overview.filter(|o| !o.is_empty()),
            year: date.get(..4).and_then(|y| y.parse().ok()),
            rating: item.vote_average.filter(|r| *r > 0.0),
            genres: item.genres.into_iter().map(|g| g.name).collect(),
        }
    }
}

fn segment(kind: CatalogKind) -> &'static str {
    match kind {
        CatalogKind::Movie => "movie",
        CatalogKind::Series => "tv",
    }
}

#[async_trait]
impl CanonicalCatalog for TmdbCatalog {
    fn name(&self) -> &str {
        "tmdb"
    }

    /// First search result wins.
    #[instrument(skip(self))]
    async fn search(&self, title: &str, kind: CatalogKind, year: Option<u16>) -> Result<Option<CanonicalRecord>> {
        let mut query = vec![("query", title.to_string())];
        if let Some(year) = year {
            let key = match kind {
                CatalogKind::Movie => "year",
                CatalogKind::Series => "first_air_date_year",
            };
            query.push((key, year.to_string()));
        }
        let page: SearchPage = self.get(&format!("/search/{}", segment(kind)), &query).await?;
        Ok(page.results.into_iter().next().map(|item| self.record(item, kind)))
    }

    async fn details(&self, id: &str, kind: CatalogKind) -> Result<Option<CanonicalRecord>> {
        if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
            return Ok(None);
        }
        let item: TmdbItem = self.get(&format!("/{}/{id}", segment(kind)), &[]).await?;
        Ok(Some(self.record(item, kind)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> TmdbCatalog {
        TmdbCatalog::new("key", &MetadataSettings::default()).unwrap()
    }

    #[test]
    fn movie_hit_maps_to_record() {
        let item: TmdbItem = serde_json::from_str(
            r#"{"id":603,"title":"Matrix","original_title":"The Matrix","overview":"",
                "poster_path":"/p.jpg","backdrop_path":null,"release_date":"1999-03-30",
                "vote_average":8.2,"genre_ids":[28]}"#,
        )
        .unwrap();
        let record = catalog().record(item, CatalogKind::Movie);
        assert_eq!(record.id, "603");
        assert_eq!(record.original_title.as_deref(), Some("The Matrix"));
        assert_eq!(record.poster.as_deref(), Some("https://image.tmdb.org/t/p/w500/p.jpg"));
        assert_eq!(record.backdrop, None);
        assert_eq!(record.overview, None);
        assert_eq!(record.year, Some(1999));
    }

    #[test]
    fn show_details_use_tv_keys() {
        let item: TmdbItem = serde_json::from_str(
            r#"{"id":70523,"name":"Dark","original_name":"Dark","first_air_date":"2017-12-01",
                "backdrop_path":"/b.jpg","vote_average":0,"genres":[{"id":18,"name":"Drama"}]}"#,
        )
        .unwrap();
        let record = catalog().record(item, CatalogKind::Series);
        assert_eq!(record.title, "Dark");
        assert_eq!(record.year, Some(2017));
        assert_eq!(record.rating, None);
        assert_eq!(record.backdrop.as_deref(), Some("https://image.tmdb.org/t/p/w1280/b.jpg"));
        assert_eq!(record.genres, vec!["Drama"]);
        assert_eq!(segment(CatalogKind::Series), "tv");
    }

    #[tokio::test]
    async fn non_numeric_ids_are_not_requested() {
        assert_eq!(catalog().details("tt0133093", CatalogKind::Movie).await.unwrap(), None);
    }
}

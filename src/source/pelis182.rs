//! Pelis182: small movie catalog with a self-hosted HLS player.

use anyhow::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use super::scrape::{self, capture, collapse};
use super::{Capabilities, Playable, SourceAdapter, SourceContext, SourceSettings};
use crate::error::{FetchError, ResolveError};
use crate::model::{CatalogKind, ContentKind, ContentUnit, Stage, StreamDescriptor};
use crate::policy::{DomainAlias, PolicyRules};

pub const NAME: &str = "pelis182";
const DEFAULT_HOST: &str = "https://www.pelis182.com/";
/// The HLS CDN only serves playlists with this referer.
const MEDIA_REFERER: &str = "https://lauchacohete.top/";

static MENU_BLOCK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)>Menu<(.*?)</form>").expect("static regex"));
static MENU_LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r#"<a href="(.*?)">(.*?)</a>"#).expect("static regex"));
static ARTICLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<article(.*?)</article>").expect("static regex"));
static HREF: Lazy<Regex> = Lazy::new(|| Regex::new(r#"<a href="([^"]+)""#).expect("static regex"));
static TITLE_ATTR: Lazy<Regex> = Lazy::new(|| Regex::new(r#"title="(.*?)""#).expect("static regex"));
static SRC: Lazy<Regex> = Lazy::new(|| Regex::new(r#"src="(.*?)""#).expect("static regex"));
static YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d{4})").expect("static regex"));
static NEXT_PAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)<nav class="navigation pagination".*?class="page-numbers current">.*?href="(.*?)".*?</nav>"#)
        .expect("static regex")
});
static IFRAME: Lazy<Regex> = Lazy::new(|| Regex::new(r#"(?s)<iframe.*?src="(.*?)".*?</iframe>"#).expect("static regex"));
static SOURCE_FILE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"sources:\s+\[\{"file":"([^"]+)"#).expect("static regex"));
static TRACK_FILE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"tracks:\s+\[\{"file":"([^"]+)"#).expect("static regex"));

pub struct Pelis182 {
    host: String,
    alias_hosts: Vec<String>,
}

impl Pelis182 {
    pub fn new(host: &str) -> Self {
        Self {
            host: scrape::with_trailing_slash(host),
            alias_hosts: Vec::new(),
        }
    }

    pub fn from_settings(settings: &SourceSettings) -> Self {
        let mut source = Self::new(settings.host.as_deref().unwrap_or(DEFAULT_HOST));
        source.alias_hosts.clone_from(&settings.alias_hosts);
        source
    }

    async fn genres(&self, ctx: &SourceContext) -> Result<Vec<ContentUnit>> {
        let html = ctx.page(&self.host, None).await?;
        let genres = parse_genres(&html);
        if genres.is_empty() {
            return Err(ResolveError::ParseMismatch("genre menu not found".into()).into());
        }
        Ok(genres)
    }
}

#[async_trait]
impl SourceAdapter for Pelis182 {
    fn name(&self) -> &str {
        NAME
    }

    fn display_name(&self) -> &str {
        "Pelis182"
    }

    fn kinds(&self) -> &[CatalogKind] {
        &[CatalogKind::Movie]
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::all()
    }

    fn url_policy(&self) -> PolicyRules {
        let host = crate::policy::host_of(&self.host).unwrap_or_default();
        PolicyRules {
            aliases: self
                .alias_hosts
                .iter()
                .map(|from| DomainAlias {
                    from: from.clone(),
                    to: host.clone(),
                })
                .collect(),
            ..PolicyRules::empty()
        }
    }

    async fn list_root(&self, _ctx: &SourceContext) -> Result<Vec<ContentUnit>> {
        Ok(vec![
            ContentUnit::new(NAME, Stage::Discover)
                .with_title("Catálogo")
                .with_url(self.host.clone()),
            ContentUnit::new(NAME, Stage::Discover)
                .with_title("Por género")
                .with_extra_tag("menu:generos"),
        ])
    }

    async fn list_category(&self, ctx: &SourceContext, unit: &ContentUnit) -> Result<Vec<ContentUnit>> {
        if unit.extra_tag.as_deref() == Some("menu:generos") {
            return self.genres(ctx).await;
        }
        let url = unit
            .canonical_url
            .as_deref()
            .ok_or_else(|| ResolveError::ParseMismatch("category without url".into()))?;
        let html = ctx.page(url, None).await?;
        Ok(parse_listing(&html))
    }

    async fn search(&self, ctx: &SourceContext, query: &str) -> Result<Vec<ContentUnit>> {
        let url = format!("{}?s={}", self.host, scrape::search_query(query));
        let html = ctx.page(&url, None).await?;
        let mut units = parse_listing(&html);
        units.retain(|u| !u.is_next_page());
        Ok(units)
    }

    async fn list_video_sources(&self, ctx: &SourceContext, unit: &ContentUnit) -> Result<Vec<ContentUnit>> {
        let url = unit
            .canonical_url
            .as_deref()
            .ok_or_else(|| ResolveError::ParseMismatch("unit without url".into()))?;
        let html = ctx.page(url, None).await?;
        Ok(parse_players(&html, unit))
    }

    async fn resolve_playable(&self, ctx: &SourceContext, unit: &ContentUnit) -> Result<Playable> {
        let url = unit
            .canonical_url
            .as_deref()
            .ok_or_else(|| ResolveError::ParseMismatch("play unit without url".into()))?;
        let html = match ctx.page(url, Some(&self.host)).await {
            Ok(html) => html,
            Err(err) => {
                if let Some(FetchError::HttpStatusError(code)) = err.downcast_ref::<FetchError>() {
                    return Ok(Playable::Gone(format!("player answered {code}")));
                }
                return Err(err);
            }
        };
        Ok(parse_player(&html, unit))
    }
}

/// Catalog cards. Season pages are skipped; the year is moved from the
/// title into `infoFields`.
pub fn parse_listing(html: &str) -> Vec<ContentUnit> {
    let mut units: Vec<ContentUnit> = ARTICLE
        .captures_iter(html)
        .filter_map(|c| {
            let card = c.get(1)?.as_str();
            let url = capture(&HREF, card)?;
            let raw_title = scrape::unescape(&capture(&TITLE_ATTR, card)?);
            if url.contains("-temporada-") {
                return None;
            }
            let (title, year) = match capture(&YEAR, &raw_title) {
                Some(year) => (raw_title.replace(&format!("({year})"), "").trim().to_string(), year),
                None => (raw_title, "-".to_string()),
            };
            let mut unit = ContentUnit::new(NAME, Stage::ListVideos)
                .with_title(title)
                .with_url(url)
                .with_kind(ContentKind::Movie)
                .with_language("Lat")
                .with_info("year", year.as_str());
            unit.thumbnail = capture(&SRC, card);
            Some(unit)
        })
        .collect();

    if !units.is_empty() && html.contains("<nav class=\"navigation pagination\"") {
        if let Some(next) = capture(&NEXT_PAGE, html).filter(|n| n.contains("/page/")) {
            units.push(ContentUnit::next_page(NAME, next));
        }
    }
    units
}

/// Genres from the site menu, sorted by title.
pub fn parse_genres(html: &str) -> Vec<ContentUnit> {
    let Some(block) = capture(&MENU_BLOCK, html) else {
        return Vec::new();
    };
    let mut genres: Vec<ContentUnit> = MENU_LINK
        .captures_iter(&block)
        .filter_map(|c| {
            let url = c.get(1)?.as_str();
            let title = c.get(2)?.as_str().trim();
            (title != "Series" && !title.is_empty()).then(|| {
                ContentUnit::new(NAME, Stage::Discover)
                    .with_title(scrape::capitalize(title))
                    .with_url(url)
            })
        })
        .collect();
    genres.sort_by(|a, b| a.title.cmp(&b.title));
    genres
}

/// One play unit per embedded player.
pub fn parse_players(html: &str, parent: &ContentUnit) -> Vec<ContentUnit> {
    IFRAME
        .captures_iter(html)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .filter(|src| !src.is_empty())
        .map(|src| {
            let mut unit = parent
                .clone()
                .with_stage(Stage::Play)
                .with_url(src)
                .with_server("directo")
                .with_extra_tag("M3u8");
            if unit.language.is_none() {
                unit.language = Some("Lat".into());
            }
            unit
        })
        .collect()
}

/// The player page embeds a JW-style `sources` list; only HLS is playable.
/// An `.srt` entry in `tracks` rides along as the subtitle.
pub fn parse_player(html: &str, unit: &ContentUnit) -> Playable {
    if html.contains("NOT FOUND!") {
        return Playable::Gone("file not found".into());
    }
    let collapsed = collapse(html);
    let find = |re: &Regex| capture(re, &collapsed).or_else(|| capture(re, html));
    match find(&SOURCE_FILE) {
        Some(file) if file.ends_with(".m3u8") => {
            let mut stream = StreamDescriptor::new(file.replace("\\/", "/"), "m3u8");
            stream.language.clone_from(&unit.language);
            stream.referer = Some(MEDIA_REFERER.to_string());
            stream.subtitle = find(&TRACK_FILE)
                .filter(|track| track.ends_with(".srt"))
                .map(|track| track.replace("\\/", "/"));
            Playable::Streams(vec![stream])
        }
        other => {
            debug!(file = ?other, "No HLS source in player");
            Playable::Streams(Vec::new())
        }
    }
}

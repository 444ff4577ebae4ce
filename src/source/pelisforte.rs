//! PelisForte: WordPress movie catalog behind an anti-bot wall.
//!
//! Listings are `<article>` cards; a title page lists numbered player
//! options, each an iframe that usually goes through the `mp4.nu`
//! redirector before reaching the hosting server.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Datelike;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::Html;
use tracing::{debug, info};

use super::scrape::{self, capture, capture_any, collapse, selector, unescape};
use super::{Capabilities, Playable, SourceAdapter, SourceContext, SourceSettings};
use crate::error::ResolveError;
use crate::model::{CatalogKind, ContentKind, ContentUnit, Stage, StreamDescriptor};
use crate::policy::{DomainAlias, PolicyRules, UnwrapRule};

pub const NAME: &str = "pelisforte";
const DEFAULT_HOST: &str = "https://www2.pelisforte.se/";
const LEGACY_HOSTS: &[&str] = &["pelisforte.co", "pelisforte.nu", "www1.pelisforte.se"];

/// Option labels that never lead to a playable server.
const SKIPPED_SERVERS: &[&str] = &["trailer", "+ veloz", "sdav", "guayhd", "pf", "w1tv"];

const MENU_TAG: &str = "menu";
const MENU_LANGUAGES: &str = "idiomas";
const MENU_GENRES: &str = "generos";
const MENU_YEARS: &str = "anios";
const MENU_LETTERS: &str = "alfabetico";

static YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<span class=.?year.?>(.*?)</span>").expect("static regex"));
static RELEASE_YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"/release/(\d{4})").expect("static regex"));
static LISTING_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<h1(.*?)<p class=.copy.>© PelisForte").expect("static regex"));
static NEXT_PAGE: Lazy<[Regex; 3]> = Lazy::new(|| {
    [
        r#"(?s)class="page-link current".*?class="page-link".*?</a>.*?href='(.*?)'.*?</section>"#,
        r#"(?s)class="page-link current".*?class="page-link".*?</a>.*?href="(.*?)".*?</section>"#,
        r"(?s)class=.?page-link current.*?</a>.*?class=page-link.*?href=(.*?)>.*?</section>",
    ]
    .map(|p| Regex::new(p).expect("static regex"))
});
static GENRE_BLOCK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)>Géneros<(.*?)</ul>").expect("static regex"));
static GENRE_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<a href="?([^"> ]+)"?>(.*?)</a>"#).expect("static regex"));
static EPISODE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)<div class="numerando">(\d+)\s*-\s*(\d+)</div>.*?<a href="([^"]+)">([^<]+)</a>"#)
        .expect("static regex")
});
static OPTIONS_BLOCK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)>OPCIONES<(.*?)</section>").expect("static regex"));
static OPTION: Lazy<[Regex; 2]> = Lazy::new(|| {
    [
        r##"(?s)href="#options-(.*?)">.*?<span class="server">(.*?)-(.*?)</span>"##,
        r"(?s)href=#options-(.*?)>.*?<spanclass=server>(.*?)-(.*?)</span>",
    ]
    .map(|p| Regex::new(p).expect("static regex"))
});
static PLAYER_IFRAME: Lazy<[Regex; 4]> = Lazy::new(|| {
    [
        r#"(?s)<div class="Video">.*?src="(.*?)""#,
        r#"<IFRAME SRC="(.*?)""#,
        r#"(?s)<iframe.*?src="(.*?)""#,
        r"src=(.*?) ",
    ]
    .map(|p| Regex::new(p).expect("static regex"))
});
static REHD_URL: Lazy<Regex> = Lazy::new(|| Regex::new(r#""url": "(.*?)""#).expect("static regex"));
static TRHIDE_TID: Lazy<Regex> = Lazy::new(|| Regex::new(r"tid=([A-Za-z0-9]+)").expect("static regex"));

pub struct PelisForte {
    host: String,
    legacy_hosts: Vec<String>,
}

impl PelisForte {
    pub fn new(host: &str) -> Self {
        Self {
            host: scrape::with_trailing_slash(host),
            legacy_hosts: LEGACY_HOSTS.iter().map(|h| (*h).to_string()).collect(),
        }
    }

    pub fn from_settings(settings: &SourceSettings) -> Self {
        let mut source = Self::new(settings.host.as_deref().unwrap_or(DEFAULT_HOST));
        source.legacy_hosts.extend(settings.alias_hosts.iter().cloned());
        source
    }

    fn host_name(&self) -> String {
        crate::policy::host_of(&self.host).unwrap_or_default()
    }

    fn menu(&self, title: &str, menu: &str) -> ContentUnit {
        ContentUnit::new(NAME, Stage::Discover)
            .with_title(title)
            .with_extra_tag(format!("{MENU_TAG}:{menu}"))
    }

    fn category(&self, title: &str, url: String) -> ContentUnit {
        ContentUnit::new(NAME, Stage::Discover).with_title(title).with_url(url)
    }

    fn root(&self) -> Vec<ContentUnit> {
        vec![
            self.category("Catálogo", format!("{}todas-las-peliculas/", self.host)),
            self.menu("Por idioma", MENU_LANGUAGES),
            self.menu("Por género", MENU_GENRES),
            self.menu("Por año", MENU_YEARS),
            self.menu("Por letra (A - Z)", MENU_LETTERS),
        ]
    }

    fn languages(&self) -> Vec<ContentUnit> {
        [
            ("Castellano", "castellano"),
            ("Latino", "espanol-latino"),
            ("Subtitulado", "subtituladas"),
        ]
        .into_iter()
        .map(|(title, slug)| self.category(title, format!("{}pelis/idiomas/{slug}/", self.host)))
        .collect()
    }

    fn years(&self) -> Vec<ContentUnit> {
        let current = chrono::Local::now().year();
        (1940..=current)
            .rev()
            .map(|year| self.category(&year.to_string(), format!("{}release/{year}", self.host)))
            .collect()
    }

    fn letters(&self) -> Vec<ContentUnit> {
        std::iter::once('#')
            .chain('A'..='Z')
            .map(|letter| {
                let slug = if letter == '#' { "0-9".to_string() } else { letter.to_string() };
                self.category(&letter.to_string(), format!("{}letter/{slug}/", self.host))
            })
            .collect()
    }

    async fn genres(&self, ctx: &SourceContext) -> Result<Vec<ContentUnit>> {
        let html = ctx.page(&format!("{}portal003/", self.host), None).await?;
        let genres = parse_genres(&html, &self.host);
        if genres.is_empty() {
            return Err(ResolveError::ParseMismatch("genre menu not found".into()).into());
        }
        Ok(genres)
    }

    async fn episodes(&self, ctx: &SourceContext, show: &ContentUnit) -> Result<Vec<ContentUnit>> {
        let url = show
            .canonical_url
            .as_deref()
            .ok_or_else(|| ResolveError::ParseMismatch("series unit without url".into()))?;
        let html = ctx.page(url, None).await?;
        Ok(parse_episodes(&html, show))
    }

    /// Player pages live on the source host (or a redirector the pipeline
    /// already followed); the hosting server's iframe is inside.
    async fn extract_player(&self, ctx: &SourceContext, unit: &ContentUnit, url: &str) -> Result<Option<String>> {
        if url.contains("/rehd.net/") {
            let html = ctx.page(url, None).await?;
            return Ok(capture(&REHD_URL, &html));
        }

        let page_referer = unit.referer.clone().unwrap_or_else(|| self.host.clone());
        let html = ctx.page(url, Some(&self.host)).await?;
        let Some(mut found) = find_player_iframe(&html) else {
            return Ok(None);
        };

        if found.contains("trhide") {
            let Some(decoded) = decode_trhide(&found) else {
                return Ok(None);
            };
            let check = ctx.page(&decoded, Some(&page_referer)).await?;
            if check.contains("grecaptcha.execute") {
                info!(url = %decoded, "Player protected by captcha");
                return Ok(None);
            }
            found = decoded;
        } else if found.starts_with(&self.host) {
            let inner = found.trim_end_matches('&').to_string();
            let html = ctx.page(&inner, Some(&page_referer)).await?;
            found = match capture_any(&[&PLAYER_IFRAME[0], &PLAYER_IFRAME[1]], &html) {
                Some(url) => url,
                None => return Ok(None),
            };
        }
        Ok(Some(found))
    }
}

#[async_trait]
impl SourceAdapter for PelisForte {
    fn name(&self) -> &str {
        NAME
    }

    fn display_name(&self) -> &str {
        "PelisForte"
    }

    fn kinds(&self) -> &[CatalogKind] {
        &[CatalogKind::Movie, CatalogKind::Series]
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::all()
    }

    fn url_policy(&self) -> PolicyRules {
        let host = self.host_name();
        PolicyRules {
            aliases: self
                .legacy_hosts
                .iter()
                .map(|from| DomainAlias {
                    from: from.clone(),
                    to: host.clone(),
                })
                .collect(),
            referer_sensitive: [
                "wish", "swhoi", "fsdcmo", "swdyu", "iplayerhls", "hlsflast", "ghbrisk", "doodporn",
                "ok.ru", "vgfplay", "listeamed",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            known_good_referer: Some("https://mp4.nu/".into()),
            denylist: vec!["guayhd.me".into(), "playpf.link".into()],
            unwrap: ["/mp4.nu//?h=", "/mp4.nu/?h="]
                .into_iter()
                .map(|from| UnwrapRule {
                    from: from.into(),
                    to: "/mp4.nu/r.php?h=".into(),
                    hop: true,
                    referer: Some(self.host.clone()),
                })
                .collect(),
            servers: Vec::new(),
        }
    }

    async fn list_root(&self, _ctx: &SourceContext) -> Result<Vec<ContentUnit>> {
        Ok(self.root())
    }

    async fn list_category(&self, ctx: &SourceContext, unit: &ContentUnit) -> Result<Vec<ContentUnit>> {
        if let Some(menu) = unit.extra_tag.as_deref().and_then(|t| t.strip_prefix("menu:")) {
            return match menu {
                MENU_LANGUAGES => Ok(self.languages()),
                MENU_GENRES => self.genres(ctx).await,
                MENU_YEARS => Ok(self.years()),
                MENU_LETTERS => Ok(self.letters()),
                other => Err(ResolveError::ParseMismatch(format!("unknown menu `{other}`")).into()),
            };
        }
        if matches!(unit.content_kind, Some(ContentKind::Show | ContentKind::Season)) {
            return self.episodes(ctx, unit).await;
        }

        let url = unit
            .canonical_url
            .as_deref()
            .ok_or_else(|| ResolveError::ParseMismatch("category without url".into()))?;
        let html = ctx.page(url, None).await?;
        Ok(parse_listing(&html, url))
    }

    async fn search(&self, ctx: &SourceContext, query: &str) -> Result<Vec<ContentUnit>> {
        let url = format!("{}?s={}", self.host, scrape::search_query(query));
        let html = ctx.page(&url, None).await.context("pelisforte search")?;
        let mut units = parse_listing(&html, &url);
        units.retain(|u| !u.is_next_page());
        Ok(units)
    }

    async fn list_video_sources(&self, ctx: &SourceContext, unit: &ContentUnit) -> Result<Vec<ContentUnit>> {
        let url = unit
            .canonical_url
            .as_deref()
            .ok_or_else(|| ResolveError::ParseMismatch("unit without url".into()))?;
        let html = ctx.page(url, None).await?;
        let options = parse_options(&html, unit);
        debug!(url, count = options.len(), "Player options");
        Ok(options)
    }

    async fn resolve_playable(&self, ctx: &SourceContext, unit: &ContentUnit) -> Result<Playable> {
        let url = unit
            .canonical_url
            .as_deref()
            .ok_or_else(|| ResolveError::ParseMismatch("play unit without url".into()))?;
        let url = ctx.policy.normalize(url);

        // Direct options and anything already on a known server are final.
        let on_player = url.starts_with(&self.host)
            || url.contains("/rehd.net/")
            || (unit.extra_tag.is_some() && ctx.policy.identify_server(&url).is_none());
        let target = if on_player {
            match self.extract_player(ctx, unit, &url).await? {
                Some(found) => ctx.policy.normalize(&found),
                None => return Ok(Playable::Streams(Vec::new())),
            }
        } else {
            url
        };

        if let Some(entry) = ctx.policy.denylisted(&target) {
            debug!(url = %target, entry, "Resolved to denylisted host");
            return Ok(Playable::Streams(Vec::new()));
        }

        let server = ctx
            .policy
            .identify_server(&target)
            .map(str::to_string)
            .or_else(|| unit.server.clone().filter(|s| s != "directo"))
            .unwrap_or_else(|| "directo".to_string());
        let mut stream = StreamDescriptor::new(target.clone(), server);
        stream.language.clone_from(&unit.language);
        stream.referer = ctx.policy.referer_for(&target, unit.referer.as_deref());
        Ok(Playable::Streams(vec![stream]))
    }
}

/// Parse an `<article>` listing page. A trailing next-page unit is added
/// when the pager links to another `/page/`.
pub fn parse_listing(html: &str, page_url: &str) -> Vec<ContentUnit> {
    let collapsed = collapse(html);
    let block = capture(&LISTING_BLOCK, &collapsed).unwrap_or_else(|| collapsed.clone());
    let page_year = capture(&RELEASE_YEAR, page_url);

    let Ok([article, link, heading, image]) = card_selectors() else {
        return Vec::new();
    };

    let document = Html::parse_fragment(&block);
    let mut units: Vec<ContentUnit> = document
        .select(&article)
        .filter_map(|card| {
            let url = card.select(&link).next()?.value().attr("href")?.trim().to_string();
            let title = card.select(&heading).next().map(scrape::text_of)?;
            if url.is_empty() || title.is_empty() {
                return None;
            }
            let thumbnail = card.select(&image).next().and_then(|img| {
                img.value()
                    .attr("data-src")
                    .or_else(|| img.value().attr("src"))
                    .map(|src| scrape::absolute(page_url, src))
            });
            let year = capture(&YEAR, &card.html())
                .or_else(|| page_year.clone())
                .unwrap_or_else(|| "-".to_string());

            let is_series = url.contains("/series/") || title.to_lowercase().contains("temporada");
            let (stage, kind) = if is_series {
                (Stage::Discover, ContentKind::Show)
            } else {
                (Stage::ListVideos, ContentKind::Movie)
            };
            let mut unit = ContentUnit::new(NAME, stage)
                .with_title(title)
                .with_url(scrape::absolute(page_url, &url))
                .with_kind(kind)
                .with_info("year", year.as_str());
            unit.thumbnail = thumbnail;
            Some(unit)
        })
        .collect();

    if !units.is_empty() && collapsed.contains(">SIGUIENTE") {
        let patterns: Vec<&Regex> = NEXT_PAGE.iter().collect();
        if let Some(next) = capture_any(&patterns, &collapsed) {
            let next = next.replace("&#038;", "&");
            if next.contains("/page/") {
                units.push(ContentUnit::next_page(NAME, scrape::absolute(page_url, &next)));
            }
        }
    }
    units
}

fn card_selectors() -> Result<[scraper::Selector; 4]> {
    Ok([
        selector("article")?,
        selector("a[href]")?,
        selector(".entry-title, h2")?,
        selector("img")?,
    ])
}

/// Genre links from the `Géneros` menu block.
pub fn parse_genres(html: &str, host: &str) -> Vec<ContentUnit> {
    let Some(block) = capture(&GENRE_BLOCK, html) else {
        return Vec::new();
    };
    GENRE_LINK
        .captures_iter(&block)
        .filter_map(|c| {
            let url = c.get(1)?.as_str();
            let title = unescape(c.get(2)?.as_str().trim());
            (!title.is_empty()).then(|| {
                ContentUnit::new(NAME, Stage::Discover)
                    .with_title(title)
                    .with_url(scrape::absolute(host, url))
            })
        })
        .collect()
}

/// Episodes of a series page, stamped with the series name.
pub fn parse_episodes(html: &str, show: &ContentUnit) -> Vec<ContentUnit> {
    let collapsed = collapse(html);
    EPISODE
        .captures_iter(&collapsed)
        .filter_map(|c| {
            let season: u32 = c.get(1)?.as_str().parse().ok()?;
            let episode: u32 = c.get(2)?.as_str().parse().ok()?;
            let url = c.get(3)?.as_str();
            let name = unescape(c.get(4)?.as_str().trim());
            let mut unit = ContentUnit::new(NAME, Stage::ListVideos)
                .with_title(format!("{season}x{episode} - {name}"))
                .with_url(url)
                .with_kind(ContentKind::Episode);
            unit.thumbnail.clone_from(&show.thumbnail);
            unit.season_number = Some(season);
            unit.episode_number = Some(episode);
            unit.series_name = show.series_name.clone().or_else(|| show.title.clone());
            Some(unit)
        })
        .collect()
}

fn language_code(label: &str) -> String {
    let label = label.trim();
    if label.contains("Latino") {
        "Lat".into()
    } else if label.contains("Castellano") {
        "Esp".into()
    } else if label.contains("Subtitulado") {
        "Vose".into()
    } else {
        label.to_string()
    }
}

/// Server-tagged play units from the numbered player options of a title
/// page. `parent` supplies the title data and page url.
pub fn parse_options(html: &str, parent: &ContentUnit) -> Vec<ContentUnit> {
    let collapsed = collapse(html);
    let block = capture(&OPTIONS_BLOCK, &collapsed).unwrap_or_else(|| collapsed.clone());
    let patterns: Vec<&Regex> = OPTION.iter().collect();
    let matches: Vec<(String, String, String)> = patterns
        .iter()
        .map(|re| {
            re.captures_iter(&block)
                .filter_map(|c| {
                    Some((
                        c.get(1)?.as_str().to_string(),
                        c.get(2)?.as_str().to_string(),
                        c.get(3)?.as_str().to_string(),
                    ))
                })
                .collect::<Vec<_>>()
        })
        .find(|found| !found.is_empty())
        .unwrap_or_default();

    let mut units = Vec::new();
    for (option, server, language) in matches {
        let server = server.trim().to_lowercase();
        if server.is_empty() || SKIPPED_SERVERS.contains(&server.as_str()) {
            continue;
        }
        let Some(url) = option_iframe(&collapsed, &option) else {
            continue;
        };

        let (server_name, extra, referer) = match server.as_str() {
            "ok" => ("directo".to_string(), Some("Ok".to_string()), None),
            "okhd" => ("directo".to_string(), Some("Tiwi".to_string()), parent.canonical_url.clone()),
            "playpf" | "ds" => ("directo".to_string(), Some(scrape::capitalize(&server)), None),
            _ => (server.clone(), None, None),
        };

        let mut unit = parent
            .clone()
            .with_stage(Stage::Play)
            .with_url(url)
            .with_server(server_name)
            .with_language(language_code(&language));
        unit.extra_tag = extra;
        unit.referer = referer;
        units.push(unit);
    }
    units
}

fn option_iframe(html: &str, option: &str) -> Option<String> {
    let escaped = regex::escape(option);
    let primary = Regex::new(&format!(r#"(?s)<div id="options-{escaped}".*?src="([^"]+)""#)).ok()?;
    let minified = Regex::new(&format!(r#"(?s)<divid=options-{escaped}.*?data-src="(.*?)""#)).ok()?;
    capture_any(&[&primary, &minified], html)
}

fn find_player_iframe(html: &str) -> Option<String> {
    let collapsed = collapse(html);
    let patterns: Vec<&Regex> = PLAYER_IFRAME.iter().collect();
    capture_any(&patterns, &collapsed)
}

/// `trhide` links carry the target as reversed hex in `tid`.
pub fn decode_trhide(url: &str) -> Option<String> {
    let tid = capture(&TRHIDE_TID, url)?;
    let reversed: Vec<u8> = tid.bytes().rev().collect();
    if reversed.len() % 2 != 0 {
        return None;
    }
    let bytes = reversed
        .chunks(2)
        .map(|pair| {
            let text = std::str::from_utf8(pair).ok()?;
            u8::from_str_radix(text, 16).ok()
        })
        .collect::<Option<Vec<u8>>>()?;
    String::from_utf8(bytes).ok().filter(|s| s.starts_with("http"))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::fetch::testing::{page, ScriptedTransport};
    use crate::fetch::FetchClient;
    use crate::http_client::Transport;
    use crate::policy::UrlPolicy;
    use crate::session::NoopSessionStore;

    const LISTING: &str = r#"
<html><body><h1>Películas</h1>
<article class="TPost">
  <a href="https://www2.pelisforte.se/pelicula/matrix/">
    <img src="//img.example/matrix.jpg">
    <h2 class="entry-title">Matrix</h2>
  </a>
  <span class="Year">1999</span>
</article>
<article class="TPost">
  <a href="https://www2.pelisforte.se/series/dark/">
    <h2 class="entry-title">Dark &amp; Light</h2>
  </a>
</article>
<section><a class="page-link current">1</a> <a class="page-link" href="https://www2.pelisforte.se/page/1/">1</a> <a href="https://www2.pelisforte.se/todas-las-peliculas/page/2/">SIGUIENTE</a></section>
<p class="copy">© PelisForte 2024</p>
</body></html>"#;

    const TITLE_PAGE: &str = r##"
<section><h3>OPCIONES</h3><ul>
<li><a href="#options-0"><span class="server">Streamwish-Latino</span></a></li>
<li><a href="#options-1"><span class="server">Trailer-Latino</span></a></li>
<li><a href="#options-2"><span class="server">OKHD-Castellano</span></a></li>
<li><a href="#options-3"><span class="server">Filemoon-Subtitulado</span></a></li>
</ul></section>
<div id="options-0" class="Video"><iframe src="https://mp4.nu//?h=abc"></iframe></div>
<div id="options-1" class="Video"><iframe src="https://youtube.com/embed/x"></iframe></div>
<div id="options-2" class="Video"><iframe src="https://www2.pelisforte.se/player/?id=2&#038;x=1"></iframe></div>
"##;

    fn movie() -> ContentUnit {
        ContentUnit::new(NAME, Stage::ListVideos)
            .with_title("Matrix")
            .with_url("https://www2.pelisforte.se/pelicula/matrix/")
            .with_kind(ContentKind::Movie)
    }

    #[test]
    fn listing_cards_and_pagination() {
        let units = parse_listing(LISTING, "https://www2.pelisforte.se/todas-las-peliculas/");
        assert_eq!(units.len(), 3);

        assert_eq!(units[0].title.as_deref(), Some("Matrix"));
        assert_eq!(units[0].stage, Stage::ListVideos);
        assert_eq!(units[0].content_kind, Some(ContentKind::Movie));
        assert_eq!(units[0].year(), Some(1999));
        assert_eq!(units[0].thumbnail.as_deref(), Some("https://img.example/matrix.jpg"));

        assert_eq!(units[1].title.as_deref(), Some("Dark & Light"));
        assert_eq!(units[1].content_kind, Some(ContentKind::Show));
        assert_eq!(units[1].stage, Stage::Discover);
        assert_eq!(units[1].year(), None);

        assert!(units[2].is_next_page());
        assert_eq!(
            units[2].canonical_url.as_deref(),
            Some("https://www2.pelisforte.se/todas-las-peliculas/page/2/")
        );
    }

    #[test]
    fn release_page_supplies_year() {
        let html = r#"<article><a href="/pelicula/x/"><h2 class="entry-title">X</h2></a></article>"#;
        let units = parse_listing(html, "https://www2.pelisforte.se/release/2004");
        assert_eq!(units[0].year(), Some(2004));
        assert_eq!(
            units[0].canonical_url.as_deref(),
            Some("https://www2.pelisforte.se/pelicula/x/")
        );
    }

    #[test]
    fn options_skip_trailers_and_remap_servers() {
        let units = parse_options(TITLE_PAGE, &movie());
        assert_eq!(units.len(), 2);

        assert_eq!(units[0].server.as_deref(), Some("streamwish"));
        assert_eq!(units[0].language.as_deref(), Some("Lat"));
        assert_eq!(units[0].canonical_url.as_deref(), Some("https://mp4.nu//?h=abc"));
        assert_eq!(units[0].stage, Stage::Play);
        assert_eq!(units[0].title.as_deref(), Some("Matrix"));

        assert_eq!(units[1].server.as_deref(), Some("directo"));
        assert_eq!(units[1].extra_tag.as_deref(), Some("Tiwi"));
        assert_eq!(units[1].language.as_deref(), Some("Esp"));
        assert_eq!(
            units[1].referer.as_deref(),
            Some("https://www2.pelisforte.se/pelicula/matrix/")
        );
    }

    #[test]
    fn episodes_are_numbered() {
        let html = r#"<li><div class="numerando">2 - 5</div><h2><a href="https://www2.pelisforte.se/episodio/dark-2x5/">El ciclo</a></h2></li>"#;
        let show = ContentUnit::new(NAME, Stage::Discover)
            .with_title("Dark")
            .with_kind(ContentKind::Show);
        let units = parse_episodes(html, &show);
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].title.as_deref(), Some("2x5 - El ciclo"));
        assert_eq!(units[0].season_number, Some(2));
        assert_eq!(units[0].episode_number, Some(5));
        assert_eq!(units[0].series_name.as_deref(), Some("Dark"));
        assert_eq!(units[0].content_kind, Some(ContentKind::Episode));
    }

    #[test]
    fn genre_menu() {
        let html = r#"<h3>Géneros</h3><ul><li><a href="https://www2.pelisforte.se/genero/accion/">Acción</a></li><li><a href=/genero/drama/>Drama</a></li></ul>"#;
        let units = parse_genres(html, "https://www2.pelisforte.se/");
        let titles: Vec<_> = units.iter().map(|u| u.title.clone().unwrap()).collect();
        assert_eq!(titles, vec!["Acción", "Drama"]);
        assert_eq!(
            units[1].canonical_url.as_deref(),
            Some("https://www2.pelisforte.se/genero/drama/")
        );
    }

    #[test]
    fn trhide_target_is_reversed_hex() {
        let target = "https://voe.sx/e/1";
        let hex: String = target.bytes().map(|b| format!("{b:02x}")).collect();
        let tid: String = hex.chars().rev().collect();
        let url = format!("https://trhide.example/?tid={tid}");
        assert_eq!(decode_trhide(&url).as_deref(), Some(target));
        assert_eq!(decode_trhide("https://trhide.example/?tid=zz"), None);
    }

    #[test]
    fn static_menus() {
        let source = PelisForte::new(DEFAULT_HOST);
        let letters = source.letters();
        assert_eq!(letters.len(), 27);
        assert_eq!(
            letters[0].canonical_url.as_deref(),
            Some("https://www2.pelisforte.se/letter/0-9/")
        );
        let years = source.years();
        assert_eq!(years.last().unwrap().title.as_deref(), Some("1940"));
        assert!(source.root().iter().all(ContentUnit::is_category));
    }

    #[test]
    fn legacy_hosts_alias_to_current() {
        let source = PelisForte::new(DEFAULT_HOST);
        let policy = UrlPolicy::merged(&PolicyRules::default(), &source.url_policy());
        assert_eq!(
            policy.normalize("https://pelisforte.nu/pelicula/matrix/"),
            "https://www2.pelisforte.se/pelicula/matrix/"
        );
        assert!(policy.denylisted("https://guayhd.me/v/1").is_some());
    }

    fn context(transport: &Arc<ScriptedTransport>) -> SourceContext {
        let source = PelisForte::new(DEFAULT_HOST);
        let fetch = FetchClient::new(
            None,
            transport.clone() as Arc<dyn Transport>,
            Arc::new(NoopSessionStore),
            Vec::new(),
        );
        let policy = UrlPolicy::merged(&PolicyRules::default(), &source.url_policy());
        SourceContext::new(fetch, policy, CatalogKind::Movie)
    }

    #[tokio::test]
    async fn player_page_resolves_to_server_iframe() {
        let transport = ScriptedTransport::new(
            "plain",
            vec![page(200, r#"<div class="Video"><iframe src="https://ok.ru/videoembed/77"></iframe></div>"#)],
        );
        let ctx = context(&transport);
        let unit = movie()
            .with_stage(Stage::Play)
            .with_url("https://www2.pelisforte.se/player/?id=2&#038;x=1")
            .with_server("directo")
            .with_extra_tag("Ok")
            .with_language("Esp");

        let Playable::Streams(streams) = PelisForte::new(DEFAULT_HOST)
            .resolve_playable(&ctx, &unit)
            .await
            .unwrap()
        else {
            panic!("expected streams");
        };
        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].url, "https://ok.ru/videoembed/77");
        assert_eq!(streams[0].label, "okru");
        assert_eq!(streams[0].referer.as_deref(), Some("https://mp4.nu/"));
        assert_eq!(streams[0].language.as_deref(), Some("Esp"));

        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen[0].url, "https://www2.pelisforte.se/player/?id=2&x=1");
        assert!(seen[0].has_header("Referer"));
    }

    #[tokio::test]
    async fn embed_url_needs_no_fetch() {
        let transport = ScriptedTransport::new("plain", vec![]);
        let ctx = context(&transport);
        let unit = movie()
            .with_stage(Stage::Play)
            .with_url("https://filemoon.sx/e/abc")
            .with_server("filemoon");
        let Playable::Streams(streams) = PelisForte::new(DEFAULT_HOST)
            .resolve_playable(&ctx, &unit)
            .await
            .unwrap()
        else {
            panic!("expected streams");
        };
        assert_eq!(streams[0].label, "filemoon");
        assert_eq!(streams[0].referer.as_deref(), Some("https://filemoon.sx/e/abc"));
        assert_eq!(transport.calls(), 0);
    }
}

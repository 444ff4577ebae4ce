//! Request-scoped entities flowing through the pipeline.
//!
//! A [`ContentUnit`] is what adapters produce and consume. Its serde shape is
//! the identity token wire format, so field names follow the item vocabulary
//! that existing tokens already use (`channel`, `action`, `url`, `fanart`...).

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Which adapter capability applies to a unit next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "&'static str")]
pub enum Stage {
    /// Browse or expand: `listRoot`/`listCategory`.
    Discover,
    Search,
    /// Expand a playable candidate into server-hosted options.
    ListVideos,
    /// Terminal: resolve to stream URLs.
    Play,
}

impl Stage {
    pub fn as_action(self) -> &'static str {
        match self {
            Stage::Discover => "list_all",
            Stage::Search => "search",
            Stage::ListVideos => "findvideos",
            Stage::Play => "play",
        }
    }
}

impl From<String> for Stage {
    /// Unknown actions are listing actions of some menu; treat them as
    /// discovery so old tokens keep decoding.
    fn from(action: String) -> Self {
        match action.as_str() {
            "search" => Stage::Search,
            "findvideos" | "listVideos" => Stage::ListVideos,
            "play" => Stage::Play,
            _ => Stage::Discover,
        }
    }
}

impl From<Stage> for &'static str {
    fn from(stage: Stage) -> Self {
        stage.as_action()
    }
}

/// What a unit represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "&'static str")]
pub enum ContentKind {
    Movie,
    Show,
    Season,
    Episode,
}

impl ContentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentKind::Movie => "movie",
            ContentKind::Show => "tvshow",
            ContentKind::Season => "season",
            ContentKind::Episode => "episode",
        }
    }
}

impl TryFrom<String> for ContentKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "movie" => Ok(ContentKind::Movie),
            "tvshow" | "show" | "series" => Ok(ContentKind::Show),
            "season" => Ok(ContentKind::Season),
            "episode" => Ok(ContentKind::Episode),
            other => Err(format!("unknown content type `{other}`")),
        }
    }
}

impl From<ContentKind> for &'static str {
    fn from(kind: ContentKind) -> Self {
        kind.as_str()
    }
}

/// Catalog-level kind requested by the façade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalogKind {
    Movie,
    Series,
}

impl CatalogKind {
    /// Whether a unit of `kind` belongs in a catalog of this kind.
    /// Episodes are resolvable but never listed as catalog entries.
    pub fn accepts(self, kind: ContentKind) -> bool {
        match self {
            CatalogKind::Movie => kind == ContentKind::Movie,
            CatalogKind::Series => matches!(kind, ContentKind::Show | ContentKind::Season),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CatalogKind::Movie => "movie",
            CatalogKind::Series => "series",
        }
    }
}

impl From<ContentKind> for CatalogKind {
    fn from(kind: ContentKind) -> Self {
        match kind {
            ContentKind::Movie => CatalogKind::Movie,
            ContentKind::Show | ContentKind::Season | ContentKind::Episode => CatalogKind::Series,
        }
    }
}

impl std::str::FromStr for CatalogKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "movie" | "movies" => Ok(CatalogKind::Movie),
            "series" | "show" | "tvshow" => Ok(CatalogKind::Series),
            other => Err(format!("unknown catalog kind `{other}`")),
        }
    }
}

impl fmt::Display for CatalogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Open-ended metadata value (year, rating, cast...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InfoValue {
    Int(i64),
    Text(String),
}

impl InfoValue {
    pub fn as_text(&self) -> String {
        match self {
            InfoValue::Int(n) => n.to_string(),
            InfoValue::Text(s) => s.clone(),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            InfoValue::Int(n) => Some(*n),
            InfoValue::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl From<&str> for InfoValue {
    fn from(value: &str) -> Self {
        InfoValue::Text(value.to_string())
    }
}

impl From<i64> for InfoValue {
    fn from(value: i64) -> Self {
        InfoValue::Int(value)
    }
}

/// One browsing/search/video result.
///
/// Only `source` and `stage` are required. An empty string is "not set":
/// the codec skips it on encode and it decodes back as `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentUnit {
    #[serde(rename = "channel")]
    pub source: String,
    #[serde(rename = "action")]
    pub stage: Stage,
    #[serde(default, skip_serializing_if = "is_unset", deserialize_with = "non_empty")]
    pub title: Option<String>,
    #[serde(rename = "url", default, skip_serializing_if = "is_unset", deserialize_with = "non_empty")]
    pub canonical_url: Option<String>,
    #[serde(default, skip_serializing_if = "is_unset", deserialize_with = "non_empty")]
    pub thumbnail: Option<String>,
    #[serde(rename = "fanart", default, skip_serializing_if = "is_unset", deserialize_with = "non_empty")]
    pub backdrop: Option<String>,
    #[serde(rename = "plot", default, skip_serializing_if = "is_unset", deserialize_with = "non_empty")]
    pub description: Option<String>,
    #[serde(rename = "contentType", default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_kind")]
    pub content_kind: Option<ContentKind>,
    #[serde(rename = "contentSerieName", default, skip_serializing_if = "is_unset", deserialize_with = "non_empty")]
    pub series_name: Option<String>,
    #[serde(rename = "contentSeason", default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_number")]
    pub season_number: Option<u32>,
    #[serde(rename = "contentEpisodeNumber", default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_number")]
    pub episode_number: Option<u32>,
    #[serde(default, skip_serializing_if = "is_unset", deserialize_with = "non_empty")]
    pub server: Option<String>,
    #[serde(default, skip_serializing_if = "is_unset", deserialize_with = "non_empty")]
    pub language: Option<String>,
    #[serde(rename = "other", default, skip_serializing_if = "is_unset", deserialize_with = "non_empty")]
    pub extra_tag: Option<String>,
    /// Explicit reference locator sent as `Referer` by the URL policy.
    #[serde(rename = "ref", default, skip_serializing_if = "is_unset", deserialize_with = "non_empty")]
    pub referer: Option<String>,
    #[serde(rename = "infoLabels", default, skip_serializing_if = "BTreeMap::is_empty", deserialize_with = "lenient_info")]
    pub info_fields: BTreeMap<String, InfoValue>,
}

/// Marker placed in `extra_tag` of the synthetic trailing unit that asks for
/// another `listCategory` call.
pub const NEXT_PAGE_TAG: &str = "next-page";

impl ContentUnit {
    pub fn new(source: impl Into<String>, stage: Stage) -> Self {
        Self {
            source: source.into(),
            stage,
            title: None,
            canonical_url: None,
            thumbnail: None,
            backdrop: None,
            description: None,
            content_kind: None,
            series_name: None,
            season_number: None,
            episode_number: None,
            server: None,
            language: None,
            extra_tag: None,
            referer: None,
            info_fields: BTreeMap::new(),
        }
    }

    /// Synthetic pagination unit for `source` pointing at `url`.
    pub fn next_page(source: impl Into<String>, url: impl Into<String>) -> Self {
        Self::new(source, Stage::Discover)
            .with_title("Next page")
            .with_url(url)
            .with_extra_tag(NEXT_PAGE_TAG)
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.canonical_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn with_kind(mut self, kind: ContentKind) -> Self {
        self.content_kind = Some(kind);
        self
    }

    #[must_use]
    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stage = stage;
        self
    }

    #[must_use]
    pub fn with_server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }

    #[must_use]
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    #[must_use]
    pub fn with_extra_tag(mut self, tag: impl Into<String>) -> Self {
        self.extra_tag = Some(tag.into());
        self
    }

    #[must_use]
    pub fn with_info(mut self, key: impl Into<String>, value: impl Into<InfoValue>) -> Self {
        self.info_fields.insert(key.into(), value.into());
        self
    }

    pub fn is_next_page(&self) -> bool {
        self.extra_tag.as_deref() == Some(NEXT_PAGE_TAG)
    }

    /// A browse entry that is not itself content (menu item, genre, letter).
    pub fn is_category(&self) -> bool {
        self.stage == Stage::Discover && self.content_kind.is_none() && !self.is_next_page()
    }

    /// Names a server and carries a locator: no `listVideoSources` needed.
    pub fn is_directly_playable(&self) -> bool {
        self.server.as_deref().is_some_and(|s| !s.is_empty())
            && self.canonical_url.as_deref().is_some_and(|u| !u.is_empty())
    }

    /// Year from `infoFields`, ignoring placeholders such as `-`.
    pub fn year(&self) -> Option<u16> {
        self.info_fields
            .get("year")
            .and_then(InfoValue::as_int)
            .and_then(|y| u16::try_from(y).ok())
            .filter(|y| *y > 1800)
    }

    pub fn info_text(&self, key: &str) -> Option<String> {
        self.info_fields
            .get(key)
            .map(InfoValue::as_text)
            .filter(|s| !s.trim().is_empty() && s != "-")
    }
}

/// One playable result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub url: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Header the player must send to the media host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referer: Option<String>,
    /// External `.srt` track served next to the stream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
}

impl StreamDescriptor {
    pub fn new(url: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            label: label.into(),
            language: None,
            referer: None,
            subtitle: None,
        }
    }

    /// Kodi-style locator with the referer appended as `|Referer=`.
    pub fn player_url(&self) -> String {
        with_referer(&self.url, self.referer.as_deref())
    }

    /// Subtitle locator in the same form as [`Self::player_url`].
    pub fn player_subtitle(&self) -> Option<String> {
        self.subtitle
            .as_deref()
            .map(|subtitle| with_referer(subtitle, self.referer.as_deref()))
    }
}

fn with_referer(url: &str, referer: Option<&str>) -> String {
    match referer {
        Some(referer) => format!("{url}|Referer={referer}"),
        None => url.to_string(),
    }
}

/// Normalized catalog output. Built once per result, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: CatalogKind,
    #[serde(rename = "name")]
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poster: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub genres: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cast: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub director: Option<String>,
    /// Always present so stream resolution works without the canonical id.
    pub local_token: String,
}

impl CatalogEntry {
    pub fn is_canonical(&self) -> bool {
        self.id.starts_with(crate::identity::CANONICAL_PREFIX)
    }
}

fn is_unset(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, str::is_empty)
}

fn non_empty<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}

/// Season/episode numbers arrive as numbers or numeric strings.
fn lenient_number<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Unknown content types decode as unset, like unknown actions decode as
/// discovery.
fn lenient_kind<'de, D>(deserializer: D) -> Result<Option<ContentKind>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => ContentKind::try_from(s).ok(),
        _ => None,
    })
}

/// Keep strings and integers, stringify other scalars, join scalar lists,
/// drop anything nested. Never fails on shape.
fn lenient_info<'de, D>(deserializer: D) -> Result<BTreeMap<String, InfoValue>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde_json::Value;

    fn scalar(value: &Value) -> Option<String> {
        match value {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    let raw = Option::<BTreeMap<String, Value>>::deserialize(deserializer)?.unwrap_or_default();
    let mut out = BTreeMap::new();
    for (key, value) in raw {
        let converted = match &value {
            Value::Number(n) => match n.as_i64() {
                Some(i) => Some(InfoValue::Int(i)),
                None => Some(InfoValue::Text(n.to_string())),
            },
            Value::String(s) => Some(InfoValue::Text(s.clone())),
            Value::Bool(b) => Some(InfoValue::Text(b.to_string())),
            Value::Array(items) => {
                let parts: Vec<String> = items.iter().filter_map(scalar).collect();
                (!parts.is_empty()).then(|| InfoValue::Text(parts.join(", ")))
            }
            Value::Null | Value::Object(_) => None,
        };
        if let Some(v) = converted {
            out.insert(key, v);
        }
    }
    Ok(out)
}

//! Catalog entries from content units.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::identity::Token;
use crate::metadata::CanonicalRecord;
use crate::model::{CatalogEntry, CatalogKind, ContentUnit};

const UNTITLED: &str = "Sin título";

static MARKUP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\[/?COLOR[^\]]*\]|\[/?(?:B|I|UPPERCASE|LOWERCASE|CAPITALIZE)\]").expect("static regex")
});
static SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s{2,}").expect("static regex"));

/// Strip Kodi label markup (`[COLOR red]`, `[B]`, `[CR]`...).
pub fn clean_markup(text: &str) -> String {
    let text = text.replace("[CR]", " ");
    let text = MARKUP.replace_all(&text, "");
    SPACES.replace_all(text.trim(), " ").into_owned()
}

/// Display title of a unit, cleaned.
pub fn display_title(unit: &ContentUnit) -> String {
    let title = unit.title.as_deref().map(clean_markup).unwrap_or_default();
    if title.is_empty() {
        UNTITLED.to_string()
    } else {
        title
    }
}

fn split_list(text: Option<String>) -> Vec<String> {
    text.map(|t| {
        t.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    })
    .unwrap_or_default()
}

/// Build the entry for `unit`. A canonical match supplies the id and is
/// preferred for display fields; the local token is always kept.
pub fn build_entry(
    unit: &ContentUnit,
    kind: CatalogKind,
    local: &Token,
    canonical: Option<&CanonicalRecord>,
) -> CatalogEntry {
    let genres = canonical
        .map(|r| r.genres.clone())
        .filter(|g| !g.is_empty())
        .unwrap_or_else(|| split_list(unit.info_text("genre")));
    let rating = canonical
        .and_then(|r| r.rating)
        .or_else(|| unit.info_text("rating").and_then(|r| r.parse().ok()));
    let poster = canonical
        .and_then(|r| r.poster.clone())
        .or_else(|| unit.thumbnail.clone());

    CatalogEntry {
        id: canonical.map_or_else(|| local.to_string(), |r| Token::canonical(r.id.as_str()).to_string()),
        kind,
        display_name: canonical
            .map(|r| r.title.clone())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| display_title(unit)),
        background: canonical
            .and_then(|r| r.backdrop.clone())
            .or_else(|| unit.backdrop.clone())
            .or_else(|| poster.clone()),
        poster,
        description: canonical
            .and_then(|r| r.overview.clone())
            .or_else(|| unit.description.clone()),
        year: canonical.and_then(|r| r.year).or_else(|| unit.year()),
        rating,
        genres,
        cast: split_list(unit.info_text("cast")),
        director: unit.info_text("director"),
        local_token: local.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::testing::matrix;
    use crate::model::Stage;

    fn unit() -> ContentUnit {
        let mut unit = ContentUnit::new("pelisforte", Stage::ListVideos)
            .with_title("[COLOR gold][B]Matrix[/B][/COLOR] (1999)")
            .with_url("https://www2.pelisforte.se/matrix/")
            .with_info("year", 1999_i64)
            .with_info("genre", "Acción, Ciencia ficción")
            .with_info("director", "Lana Wachowski");
        unit.thumbnail = Some("https://img/m.jpg".into());
        unit
    }

    #[test]
    fn markup_is_removed() {
        assert_eq!(clean_markup("[COLOR red]Dark[/COLOR][CR][I]T1[/i]"), "Dark T1");
        assert_eq!(clean_markup("[b]  Amélie  [/B]"), "Amélie");
        assert_eq!(display_title(&ContentUnit::new("x", Stage::Play)), "Sin título");
    }

    #[test]
    fn native_entry_uses_local_token() {
        let local = Token::Local("abc".into());
        let entry = build_entry(&unit(), CatalogKind::Movie, &local, None);
        assert_eq!(entry.id, "local:abc");
        assert!(!entry.is_canonical());
        assert_eq!(entry.display_name, "Matrix (1999)");
        assert_eq!(entry.year, Some(1999));
        assert_eq!(entry.background.as_deref(), Some("https://img/m.jpg"));
        assert_eq!(entry.genres, vec!["Acción", "Ciencia ficción"]);
        assert_eq!(entry.director.as_deref(), Some("Lana Wachowski"));
    }

    #[test]
    fn canonical_match_is_preferred_but_local_kept() {
        let local = Token::Local("abc".into());
        let record = matrix();
        let entry = build_entry(&unit(), CatalogKind::Movie, &local, Some(&record));
        assert_eq!(entry.id, "canonical:603");
        assert!(entry.is_canonical());
        assert_eq!(entry.local_token, "local:abc");
        assert_eq!(entry.display_name, "Matrix");
        assert_eq!(entry.poster.as_deref(), Some("https://image.tmdb.org/t/p/w500/m.jpg"));
        assert_eq!(entry.rating, Some(8.2));
        assert_eq!(entry.genres, vec!["Acción"]);
    }
}

//! Process-wide configuration loaded from `~/.config/canal/config.toml`.
//!
//! Every section is optional; a missing file means defaults. Environment
//! variables override the file.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;
use crate::fingerprint::{Browser, Platform};
use crate::identity::DEFAULT_MAX_TOKEN_LEN;
use crate::policy::PolicyRules;
use crate::source::ReloadPolicy;

pub const ENV_TMDB_API_KEY: &str = "CANAL_TMDB_API_KEY";
pub const ENV_DEV: &str = "CANAL_DEV";
pub const ENV_SOURCES_FILE: &str = "CANAL_SOURCES_FILE";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub pipeline: PipelineSettings,
    pub fetch: FetchSettings,
    pub metadata: MetadataSettings,
    pub policy: PolicyRules,
    pub registry: RegistrySettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Sources queried, in order, when a request names none.
    pub default_sources: Vec<String>,
    pub search_cap: usize,
    pub listing_cap: usize,
    /// Pagination units followed per listed category.
    pub max_listing_pages: usize,
    /// Concurrent adapter calls.
    pub pool_width: usize,
    pub branch_timeout_secs: u64,
    pub max_token_len: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            default_sources: vec!["pelisforte".into(), "pelis182".into()],
            search_cap: 50,
            listing_cap: 100,
            max_listing_pages: 5,
            pool_width: 8,
            branch_timeout_secs: 45,
            max_token_len: DEFAULT_MAX_TOKEN_LEN,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Try the fingerprinted client first.
    pub stealth: bool,
    pub browser: Browser,
    pub platform: Platform,
    /// Body fragments that identify an anti-bot challenge page.
    pub challenge_markers: Vec<String>,
    pub max_redirects: usize,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            connect_timeout_secs: 10,
            stealth: true,
            browser: Browser::Chrome,
            platform: Platform::Windows,
            challenge_markers: vec![
                "<title>Just a moment...</title>".into(),
                "<title>You are being redirected...</title>".into(),
                "<title>Attention Required! | Cloudflare</title>".into(),
            ],
            max_redirects: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetadataSettings {
    /// Without a key the metadata bridge is disabled.
    pub api_key: Option<String>,
    pub language: String,
    pub ttl_secs: u64,
    pub capacity: usize,
    pub base_url: String,
    pub image_base_url: String,
    pub timeout_secs: u64,
}

impl Default for MetadataSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            language: "es-ES".into(),
            ttl_secs: 3600,
            capacity: 1024,
            base_url: "https://api.themoviedb.org/3".into(),
            image_base_url: "https://image.tmdb.org/t/p".into(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    pub reload: ReloadPolicy,
    /// Per-source settings (`sources.toml`); defaults next to the config.
    pub sources_file: Option<PathBuf>,
}

impl Config {
    /// Load the user config and apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::from_path(&config_path())?;
        config.apply_env();
        Ok(config)
    }

    /// Load from `path`. A missing file yields defaults.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })
    }

    pub fn apply_env(&mut self) {
        self.apply_vars(|name| std::env::var(name).ok());
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(key) = var(ENV_TMDB_API_KEY).filter(|k| !k.trim().is_empty()) {
            self.metadata.api_key = Some(key.trim().to_string());
        }
        if var(ENV_DEV).is_some_and(|v| matches!(v.as_str(), "1" | "true" | "yes")) {
            self.registry.reload = ReloadPolicy::AlwaysFresh;
        }
        if let Some(path) = var(ENV_SOURCES_FILE).filter(|p| !p.is_empty()) {
            self.registry.sources_file = Some(PathBuf::from(path));
        }
    }

    /// Path of the per-source settings file.
    pub fn sources_path(&self) -> PathBuf {
        self.registry
            .sources_file
            .clone()
            .unwrap_or_else(|| config_dir().join("sources.toml"))
    }
}

fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("canal")
}

/// Return the path to the main config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_is_default() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.pipeline.search_cap, 50);
        assert_eq!(config.pipeline.listing_cap, 100);
        assert_eq!(config.pipeline.default_sources, vec!["pelisforte", "pelis182"]);
        assert_eq!(config.metadata.language, "es-ES");
        assert_eq!(config.registry.reload, ReloadPolicy::Cached);
        assert!(config.policy.denylist.contains(&"gounlimited".to_string()));
    }

    #[test]
    fn sections_override_defaults() {
        let config = Config::from_toml_str(
            r#"
[pipeline]
default_sources = ["pelis182"]
search_cap = 10

[fetch]
stealth = false
browser = "firefox"

[metadata]
api_key = "k"
ttl_secs = 60

[policy]
denylist = ["bad.host"]
referer_sensitive = ["ok.ru"]
known_good_referer = "https://mp4.nu/"

[[policy.aliases]]
from = "old.example"
to = "new.example"

[registry]
reload = "always_fresh"
"#,
        )
        .unwrap();
        assert_eq!(config.pipeline.default_sources, vec!["pelis182"]);
        assert_eq!(config.pipeline.search_cap, 10);
        assert_eq!(config.pipeline.listing_cap, 100);
        assert!(!config.fetch.stealth);
        assert_eq!(config.fetch.browser, Browser::Firefox);
        assert_eq!(config.metadata.api_key.as_deref(), Some("k"));
        assert_eq!(config.policy.denylist, vec!["bad.host"]);
        assert_eq!(config.policy.aliases[0].to, "new.example");
        assert!(!config.policy.servers.is_empty());
        assert_eq!(config.registry.reload, ReloadPolicy::AlwaysFresh);
    }

    #[test]
    fn invalid_toml_is_a_parse_error() {
        assert!(matches!(
            Config::from_toml_str("[pipeline\n"),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = Config::from_path(Path::new("/nonexistent/canal/config.toml")).unwrap();
        assert_eq!(config.fetch.timeout_secs, 30);
    }

    #[test]
    fn environment_overrides() {
        let mut config = Config::default();
        config.apply_vars(|name| match name {
            ENV_TMDB_API_KEY => Some(" secret ".into()),
            ENV_DEV => Some("1".into()),
            ENV_SOURCES_FILE => Some("/tmp/sources.toml".into()),
            _ => None,
        });
        assert_eq!(config.metadata.api_key.as_deref(), Some("secret"));
        assert_eq!(config.registry.reload, ReloadPolicy::AlwaysFresh);
        assert_eq!(config.sources_path(), PathBuf::from("/tmp/sources.toml"));
    }
}

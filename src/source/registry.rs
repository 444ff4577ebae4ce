//! Adapter registry.
//!
//! Sources are registered as factories in declaration order. A factory builds
//! an adapter from its [`SourceSettings`], read from `sources.toml`.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{pelis182, pelisforte, SourceAdapter};
use crate::error::LoadError;
use crate::model::CatalogKind;

/// Whether loaded adapters are memoized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReloadPolicy {
    #[default]
    Cached,
    /// Rebuild on every load, re-reading the settings file.
    AlwaysFresh,
}

/// Per-source settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SourceSettings {
    /// Overrides the adapter's built-in host.
    pub host: Option<String>,
    /// Former hosts rewritten to the current one.
    pub alias_hosts: Vec<String>,
    pub disabled: bool,
}

pub type AdapterFactory =
    Arc<dyn Fn(&SourceSettings) -> anyhow::Result<Arc<dyn SourceAdapter>> + Send + Sync>;

/// Listing entry for `sources`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceDescriptor {
    pub name: String,
    pub display_name: String,
    pub kinds: Vec<CatalogKind>,
}

pub struct Registry {
    factories: Vec<(String, AdapterFactory)>,
    reload: ReloadPolicy,
    settings_path: Option<PathBuf>,
    cache: Mutex<HashMap<String, Arc<dyn SourceAdapter>>>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("sources", &self.names())
            .field("reload", &self.reload)
            .field("settings_path", &self.settings_path)
            .finish_non_exhaustive()
    }
}

impl Registry {
    /// Empty registry.
    pub fn new(reload: ReloadPolicy) -> Self {
        Self {
            factories: Vec::new(),
            reload,
            settings_path: None,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Registry with the built-in sources.
    pub fn with_builtin(reload: ReloadPolicy, settings_path: Option<PathBuf>) -> Self {
        let mut registry = Self::new(reload);
        registry.settings_path = settings_path;
        registry.register(pelisforte::NAME, |s| Ok(Arc::new(pelisforte::PelisForte::from_settings(s))));
        registry.register(pelis182::NAME, |s| Ok(Arc::new(pelis182::Pelis182::from_settings(s))));
        registry
    }

    /// Add a factory. Re-registering a name replaces it in place.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&SourceSettings) -> anyhow::Result<Arc<dyn SourceAdapter>> + Send + Sync + 'static,
    {
        let name = name.into();
        let factory: AdapterFactory = Arc::new(factory);
        self.cache
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&name);
        match self.factories.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = factory,
            None => self.factories.push((name, factory)),
        }
    }

    /// Register a ready instance under its own name.
    pub fn register_adapter(&mut self, adapter: Arc<dyn SourceAdapter>) {
        let name = adapter.name().to_string();
        self.register(name, move |_| Ok(adapter.clone()));
    }

    pub fn reload_policy(&self) -> ReloadPolicy {
        self.reload
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Names in declaration order.
    pub fn names(&self) -> Vec<String> {
        self.factories.iter().map(|(n, _)| n.clone()).collect()
    }

    /// Load an adapter by name.
    pub fn load(&self, name: &str) -> Result<Arc<dyn SourceAdapter>, LoadError> {
        if self.reload == ReloadPolicy::Cached {
            let cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(adapter) = cache.get(name) {
                return Ok(adapter.clone());
            }
        }

        let result = self.build(name);
        match &result {
            Ok(adapter) if self.reload == ReloadPolicy::Cached => {
                self.cache
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(name.to_string(), adapter.clone());
            }
            Ok(_) => debug!(source = name, "Adapter rebuilt"),
            Err(err) => warn!(source = name, error = %err, "Failed to load source"),
        }
        result
    }

    fn build(&self, name: &str) -> Result<Arc<dyn SourceAdapter>, LoadError> {
        let (_, factory) = self
            .factories
            .iter()
            .find(|(n, _)| n == name)
            .ok_or_else(|| LoadError::Unknown(name.to_string()))?;
        let settings = self.settings_for(name).map_err(|e| LoadError::Broken {
            name: name.to_string(),
            reason: format!("{e:#}"),
        })?;
        if settings.disabled {
            return Err(LoadError::Broken {
                name: name.to_string(),
                reason: "disabled in source settings".into(),
            });
        }
        factory(&settings).map_err(|e| LoadError::Broken {
            name: name.to_string(),
            reason: format!("{e:#}"),
        })
    }

    fn settings_for(&self, name: &str) -> anyhow::Result<SourceSettings> {
        let Some(path) = &self.settings_path else {
            return Ok(SourceSettings::default());
        };
        let mut all = read_settings(path)?;
        Ok(all.remove(name).unwrap_or_default())
    }

    /// Loadable sources with their display data. Broken ones are skipped.
    pub fn descriptors(&self) -> Vec<SourceDescriptor> {
        self.factories
            .iter()
            .filter_map(|(name, _)| self.load(name).ok())
            .map(|adapter| SourceDescriptor {
                name: adapter.name().to_string(),
                display_name: adapter.display_name().to_string(),
                kinds: adapter.kinds().to_vec(),
            })
            .collect()
    }
}

/// Parse `sources.toml`. A missing file means no overrides.
pub fn read_settings(path: &Path) -> anyhow::Result<HashMap<String, SourceSettings>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("invalid TOML in {}", path.display()))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::source::Capabilities;

    struct Named(String);

    #[async_trait]
    impl SourceAdapter for Named {
        fn name(&self) -> &str {
            &self.0
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities::NONE
        }
    }

    fn counting(registry: &mut Registry, name: &'static str) -> Arc<AtomicUsize> {
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = builds.clone();
        registry.register(name, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Named(name.to_string())))
        });
        builds
    }

    #[test]
    fn cached_policy_builds_once() {
        let mut registry = Registry::new(ReloadPolicy::Cached);
        let builds = counting(&mut registry, "a");
        registry.load("a").unwrap();
        registry.load("a").unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn always_fresh_rebuilds() {
        let mut registry = Registry::new(ReloadPolicy::AlwaysFresh);
        let builds = counting(&mut registry, "a");
        registry.load("a").unwrap();
        registry.load("a").unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unknown_and_broken_sources() {
        let mut registry = Registry::new(ReloadPolicy::Cached);
        registry.register("broken", |_| anyhow::bail!("missing selector table"));
        assert_eq!(
            registry.load("nope").err(),
            Some(LoadError::Unknown("nope".into()))
        );
        assert!(matches!(
            registry.load("broken"),
            Err(LoadError::Broken { ref reason, .. }) if reason.contains("selector")
        ));
    }

    #[test]
    fn declaration_order_is_kept() {
        let mut registry = Registry::new(ReloadPolicy::Cached);
        counting(&mut registry, "b");
        counting(&mut registry, "a");
        counting(&mut registry, "b");
        assert_eq!(registry.names(), vec!["b", "a"]);
    }

    #[test]
    fn builtin_sources_describe_themselves() {
        let registry = Registry::with_builtin(ReloadPolicy::Cached, None);
        let descriptors = registry.descriptors();
        let names: Vec<_> = descriptors.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["pelisforte", "pelis182"]);
        assert_eq!(descriptors[1].kinds, vec![CatalogKind::Movie]);
    }

    #[test]
    fn settings_file_overrides_and_disables() {
        let dir = std::env::temp_dir().join(format!("canal-registry-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("sources.toml");
        std::fs::write(
            &path,
            "[pelisforte]\nhost = \"https://mirror.example/\"\n\n[pelis182]\ndisabled = true\n",
        )
        .unwrap();

        let registry = Registry::with_builtin(ReloadPolicy::AlwaysFresh, Some(path.clone()));
        assert!(registry.load("pelisforte").is_ok());
        assert!(matches!(registry.load("pelis182"), Err(LoadError::Broken { .. })));
        let settings = read_settings(&path).unwrap();
        assert_eq!(settings["pelisforte"].host.as_deref(), Some("https://mirror.example/"));

        std::fs::remove_dir_all(&dir).ok();
    }
}

//! Resolution pipeline.
//!
//! [`Resolver`] is the façade: `list_or_search`, `get_detail` and
//! `resolve_streams`. It fans out over adapters from the [`Registry`],
//! isolates every source and branch failure, and drives each unit through
//!
//! ```text
//! Discovered -> SourceExpanded -> UrlRewritten -> Playable
//!                                              \-> Failed(reason)
//! ```
//!
//! Only leaf adapter calls and fetches run on the [`WorkerPool`]; the
//! orchestration around them never holds a permit.

mod branch;
pub mod catalog;
mod pool;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, instrument, warn};

use crate::config::{Config, PipelineSettings};
use crate::error::{ConfigError, ResolveError};
use crate::fetch::FetchClient;
use crate::http_client::FetchRequest;
use crate::identity::{IdentityCodec, Token};
use crate::metadata::MetadataBridge;
use crate::model::{CatalogEntry, CatalogKind, ContentKind, ContentUnit, Stage, StreamDescriptor};
use crate::policy::{PolicyRules, Prepared, UrlPolicy};
use crate::session::HostCookieStore;
use crate::source::scrape;
use crate::source::{Capability, Playable, Registry, SourceAdapter, SourceContext, SourceDescriptor};

pub use branch::{BranchReport, BranchState, Resolution};
pub use pool::WorkerPool;

/// Builds a [`Resolver`], defaulting each collaborator from the config.
pub struct ResolverBuilder {
    config: Config,
    registry: Option<Registry>,
    fetch: Option<FetchClient>,
    metadata: Option<MetadataBridge>,
}

impl ResolverBuilder {
    #[must_use]
    pub fn registry(mut self, registry: Registry) -> Self {
        self.registry = Some(registry);
        self
    }

    #[must_use]
    pub fn fetch_client(mut self, fetch: FetchClient) -> Self {
        self.fetch = Some(fetch);
        self
    }

    #[must_use]
    pub fn metadata(mut self, bridge: MetadataBridge) -> Self {
        self.metadata = Some(bridge);
        self
    }

    /// Fails only on configuration problems, including an empty registry.
    pub fn build(self) -> Result<Resolver, ConfigError> {
        let config = self.config;
        let registry = match self.registry {
            Some(registry) => registry,
            None => Registry::with_builtin(config.registry.reload, Some(config.sources_path())),
        };
        if registry.is_empty() {
            return Err(ConfigError::NoAdapters);
        }
        let fetch = match self.fetch {
            Some(fetch) => fetch,
            None => FetchClient::from_settings(&config.fetch, Arc::new(HostCookieStore::new()))?,
        };
        let bridge = match self.metadata {
            Some(bridge) => bridge,
            None => MetadataBridge::from_settings(&config.metadata)?,
        };
        let pipeline = config.pipeline;

        Ok(Resolver {
            registry: Arc::new(registry),
            fetch,
            policy: config.policy,
            bridge: Arc::new(bridge),
            codec: IdentityCodec::new(pipeline.max_token_len),
            pool: WorkerPool::new(
                pipeline.pool_width,
                Duration::from_secs(pipeline.branch_timeout_secs),
            ),
            settings: pipeline,
        })
    }
}

#[derive(Debug)]
pub struct Resolver {
    registry: Arc<Registry>,
    fetch: FetchClient,
    policy: PolicyRules,
    bridge: Arc<MetadataBridge>,
    codec: IdentityCodec,
    pool: WorkerPool,
    settings: PipelineSettings,
}

/// Whether a unit belongs in a result list for `kind`.
fn listable(kind: CatalogKind, unit: &ContentUnit) -> bool {
    !unit.is_next_page() && !unit.is_category() && unit.content_kind.map_or(true, |k| kind.accepts(k))
}

/// Append ` [language]` to each label, from the stream or else its unit.
fn with_language_suffix(mut streams: Vec<StreamDescriptor>, fallback: Option<&str>) -> Vec<StreamDescriptor> {
    for stream in &mut streams {
        let Some(language) = stream.language.as_deref().or(fallback).filter(|l| !l.is_empty()) else {
            continue;
        };
        let suffix = format!(" [{language}]");
        if !stream.label.ends_with(&suffix) {
            stream.label.push_str(&suffix);
        }
    }
    streams
}

fn branch_label(unit: &ContentUnit) -> String {
    unit.server
        .clone()
        .or_else(|| unit.canonical_url.clone())
        .unwrap_or_else(|| unit.source.clone())
}

impl Resolver {
    pub fn builder(config: Config) -> ResolverBuilder {
        ResolverBuilder {
            config,
            registry: None,
            fetch: None,
            metadata: None,
        }
    }

    /// Resolver with every collaborator built from `config`.
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        Self::builder(config).build()
    }

    pub fn codec(&self) -> &IdentityCodec {
        &self.codec
    }

    pub fn sources(&self) -> Vec<SourceDescriptor> {
        self.registry.descriptors()
    }

    fn context(&self, adapter: &dyn SourceAdapter, kind: CatalogKind) -> SourceContext {
        SourceContext::new(
            self.fetch.clone(),
            UrlPolicy::merged(&self.policy, &adapter.url_policy()),
            kind,
        )
    }

    fn load(&self, name: &str) -> Result<Arc<dyn SourceAdapter>, ResolveError> {
        Ok(self.registry.load(name)?)
    }

    /// Run one adapter operation on the pool after checking the capability.
    async fn call<T, F, Fut>(
        &self,
        adapter: &Arc<dyn SourceAdapter>,
        ctx: &SourceContext,
        capability: Capability,
        op: F,
    ) -> Result<T, ResolveError>
    where
        F: FnOnce(Arc<dyn SourceAdapter>, SourceContext) -> Fut,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        if !adapter.capabilities().supports(capability) {
            return Err(ResolveError::Unsupported(capability.as_str()));
        }
        let label = format!("{}.{}", adapter.name(), capability.as_str());
        let task = op(adapter.clone(), ctx.clone());
        self.pool
            .run(&label, async move { task.await.map_err(|e| ResolveError::from_adapter(&e)) })
            .await
    }

    // ------------------------------------------------------------------
    // listOrSearch
    // ------------------------------------------------------------------

    /// Search (with `query`) or list (without) one named source, or the
    /// default sources in order. Results stop at the search or listing cap.
    #[instrument(skip(self))]
    pub async fn list_or_search(
        &self,
        source: Option<&str>,
        kind: CatalogKind,
        query: Option<&str>,
        season: Option<u32>,
        episode: Option<u32>,
    ) -> Vec<CatalogEntry> {
        let sources: Vec<String> = match source {
            Some(name) => vec![name.to_string()],
            None => self.settings.default_sources.clone(),
        };
        let query = query.map(str::trim).filter(|q| !q.is_empty());
        let cap = if query.is_some() {
            self.settings.search_cap
        } else {
            self.settings.listing_cap
        };

        let mut units: Vec<ContentUnit> = Vec::new();
        for name in &sources {
            if units.len() >= cap {
                break;
            }
            let room = cap - units.len();
            let found = match query {
                Some(q) => self.search_source(name, kind, q).await,
                None => self.list_source(name, kind, room).await,
            };
            match found {
                Ok(found) => {
                    debug!(source = %name, count = found.len(), "Source contributed");
                    units.extend(found.into_iter().take(room));
                }
                Err(err) => warn!(source = %name, error = %err, "Source skipped"),
            }
        }

        if season.is_some() || episode.is_some() {
            for unit in &mut units {
                unit.season_number = season.or(unit.season_number);
                unit.episode_number = episode.or(unit.episode_number);
            }
        }
        info!(count = units.len(), cap, "Catalog assembled");
        self.entries(units, kind).await
    }

    async fn search_source(&self, name: &str, kind: CatalogKind, query: &str) -> Result<Vec<ContentUnit>, ResolveError> {
        let adapter = self.load(name)?;
        if !adapter.kinds().contains(&kind) {
            debug!(source = name, %kind, "Source does not list this kind");
            return Ok(Vec::new());
        }
        let ctx = self.context(adapter.as_ref(), kind);
        let query = query.to_string();
        let found = self
            .call(&adapter, &ctx, Capability::Search, move |a, c| async move { a.search(&c, &query).await })
            .await?;
        Ok(found.into_iter().filter(|u| listable(kind, u)).collect())
    }

    /// Root content is kept; root categories are expanded in order, following
    /// pagination up to `max_listing_pages` each. Nested categories are
    /// dropped.
    async fn list_source(&self, name: &str, kind: CatalogKind, room: usize) -> Result<Vec<ContentUnit>, ResolveError> {
        let adapter = self.load(name)?;
        if !adapter.kinds().contains(&kind) {
            debug!(source = name, %kind, "Source does not list this kind");
            return Ok(Vec::new());
        }
        let ctx = self.context(adapter.as_ref(), kind);
        let root = self
            .call(&adapter, &ctx, Capability::ListRoot, |a, c| async move { a.list_root(&c).await })
            .await?;

        let mut units = Vec::new();
        let mut categories = Vec::new();
        for unit in root {
            if unit.is_category() {
                categories.push(unit);
            } else if listable(kind, &unit) {
                units.push(unit);
            }
        }

        for category in categories {
            let mut next = Some(category);
            let mut pages = 0;
            while let Some(page) = next.take() {
                if units.len() >= room || pages >= self.settings.max_listing_pages {
                    break;
                }
                pages += 1;
                let title = page.title.clone().unwrap_or_default();
                let listed = match self
                    .call(&adapter, &ctx, Capability::ListCategory, move |a, c| async move {
                        a.list_category(&c, &page).await
                    })
                    .await
                {
                    Ok(listed) => listed,
                    Err(err) => {
                        warn!(source = name, category = %title, error = %err, "Category skipped");
                        break;
                    }
                };
                for unit in listed {
                    if unit.is_next_page() {
                        next = Some(unit);
                    } else if listable(kind, &unit) {
                        units.push(unit);
                    }
                }
            }
            if units.len() >= room {
                break;
            }
        }
        units.truncate(room);
        Ok(units)
    }

    async fn entries(&self, units: Vec<ContentUnit>, kind: CatalogKind) -> Vec<CatalogEntry> {
        stream::iter(units)
            .map(|unit| self.entry_for(unit, kind))
            .buffered(self.settings.pool_width.max(1))
            .collect()
            .await
    }

    async fn entry_for(&self, unit: ContentUnit, kind: CatalogKind) -> CatalogEntry {
        let local = self.codec.encode(&unit).into_token();
        let title = unit
            .series_name
            .as_deref()
            .or(unit.title.as_deref())
            .map(catalog::clean_markup)
            .unwrap_or_default();
        let record = if title.is_empty() {
            None
        } else {
            self.bridge.lookup(&title, kind, unit.year()).await
        };
        catalog::build_entry(&unit, kind, &local, record.as_ref())
    }

    // ------------------------------------------------------------------
    // getDetail
    // ------------------------------------------------------------------

    /// Entry for a `local:` token. Canonical and malformed tokens are not
    /// found.
    #[instrument(skip(self))]
    pub async fn get_detail(&self, token: &str) -> Option<CatalogEntry> {
        let unit = match self.codec.decode(token) {
            Ok(unit) => unit,
            Err(err) => {
                debug!(error = %err, "Detail not found");
                return None;
            }
        };
        let kind = unit.content_kind.map_or(CatalogKind::Movie, CatalogKind::from);
        Some(self.entry_for(unit, kind).await)
    }

    // ------------------------------------------------------------------
    // resolveStreams
    // ------------------------------------------------------------------

    /// Playable streams for a token, in branch order.
    pub async fn resolve_streams(&self, token: &str, kind: CatalogKind) -> Vec<StreamDescriptor> {
        self.resolve(token, kind).await.streams
    }

    /// Like [`Resolver::resolve_streams`], keeping every branch's outcome.
    #[instrument(skip(self))]
    pub async fn resolve(&self, token: &str, kind: CatalogKind) -> Resolution {
        match Token::parse(token) {
            Token::Canonical(id) => self.resolve_canonical(&id, kind).await,
            local @ Token::Local(_) => match self.codec.decode_token(&local) {
                Ok(unit) => self.resolve_unit(unit, kind).await,
                Err(err) => {
                    warn!(error = %err, "Unresolvable token");
                    Resolution::default()
                }
            },
        }
    }

    /// Search every default source for the canonical title (localized, then
    /// original), resolve the first hit of each, and prefix labels with the
    /// source name.
    async fn resolve_canonical(&self, id: &str, kind: CatalogKind) -> Resolution {
        let Some(record) = self.bridge.details(id, kind).await else {
            info!(id, "No canonical record");
            return Resolution::default();
        };

        let mut branches = Vec::new();
        for name in &self.settings.default_sources {
            let mut hit = None;
            for title in record.search_titles() {
                match self.search_source(name, kind, title).await {
                    Ok(found) => {
                        hit = found.into_iter().next();
                        if hit.is_some() {
                            break;
                        }
                    }
                    Err(err) => {
                        warn!(source = %name, error = %err, "Source skipped");
                        break;
                    }
                }
            }
            let Some(unit) = hit else {
                debug!(source = %name, title = %record.title, "Not found in source");
                continue;
            };

            let prefix = name.to_uppercase();
            let resolution = self.resolve_unit(unit, kind).await;
            branches.extend(resolution.branches.into_iter().map(|mut branch| {
                for stream in &mut branch.streams {
                    stream.label = format!("[{prefix}] {}", stream.label);
                }
                branch
            }));
        }
        Resolution::from_branches(branches)
    }

    /// Drive one decoded unit to streams.
    pub async fn resolve_unit(&self, unit: ContentUnit, kind: CatalogKind) -> Resolution {
        let adapter = match self.load(&unit.source) {
            Ok(adapter) => adapter,
            Err(err) => return Resolution::failed(unit.source.clone(), err),
        };
        let ctx = self.context(adapter.as_ref(), kind);

        let unit = match self.select_episode(&adapter, &ctx, unit).await {
            Ok(unit) => unit,
            Err(err) => {
                warn!(source = adapter.name(), error = %err, "No episode to resolve");
                return Resolution::failed(adapter.name(), err);
            }
        };

        // Discovered -> SourceExpanded
        let candidates = if unit.is_directly_playable() || unit.stage == Stage::Play {
            debug!(server = ?unit.server, "Unit already names a server");
            vec![unit]
        } else {
            let label = branch_label(&unit);
            match self
                .call(&adapter, &ctx, Capability::ListVideoSources, move |a, c| async move {
                    a.list_video_sources(&c, &unit).await
                })
                .await
            {
                Ok(found) => found,
                Err(err) => {
                    warn!(source = adapter.name(), error = %err, "Video source listing failed");
                    return Resolution::failed(label, err);
                }
            }
        };
        debug!(source = adapter.name(), branches = candidates.len(), "Fanning out");

        let reports: Vec<BranchReport> = stream::iter(candidates)
            .map(|candidate| self.resolve_branch(&adapter, &ctx, candidate))
            .buffered(self.settings.pool_width.max(1))
            .collect()
            .await;
        let resolution = Resolution::from_branches(reports);
        info!(
            source = adapter.name(),
            streams = resolution.streams.len(),
            failed = resolution.failures().count(),
            "Resolution finished"
        );
        resolution
    }

    /// Series units resolve through the requested episode.
    async fn select_episode(
        &self,
        adapter: &Arc<dyn SourceAdapter>,
        ctx: &SourceContext,
        unit: ContentUnit,
    ) -> Result<ContentUnit, ResolveError> {
        let is_series = matches!(unit.content_kind, Some(ContentKind::Show | ContentKind::Season));
        if !is_series || unit.stage == Stage::Play || unit.is_directly_playable() {
            return Ok(unit);
        }
        let (Some(season), Some(episode)) = (unit.season_number, unit.episode_number) else {
            return Err(ResolveError::ParseMismatch("series without season and episode".into()));
        };
        let referer = unit.referer.clone();
        let listed = self
            .call(adapter, ctx, Capability::ListCategory, move |a, c| async move {
                a.list_category(&c, &unit).await
            })
            .await?;
        listed
            .into_iter()
            .find(|e| e.season_number == Some(season) && e.episode_number == Some(episode))
            .map(|mut found| {
                if found.referer.is_none() {
                    found.referer = referer;
                }
                found
            })
            .ok_or_else(|| ResolveError::ParseMismatch(format!("episode {season}x{episode} not listed")))
    }

    /// SourceExpanded -> UrlRewritten -> Playable for one server-tagged unit.
    async fn resolve_branch(
        &self,
        adapter: &Arc<dyn SourceAdapter>,
        ctx: &SourceContext,
        unit: ContentUnit,
    ) -> BranchReport {
        let label = branch_label(&unit);
        let Some(raw) = unit.canonical_url.clone() else {
            return BranchReport::failed(label, ResolveError::ParseMismatch("unit without locator".into()));
        };

        let prepared = match self.rewrite(ctx, &raw, unit.referer.as_deref()).await {
            Ok(prepared) => prepared,
            Err(err) => {
                debug!(branch = %label, error = %err, "Branch failed before resolution");
                return BranchReport::failed(label, err);
            }
        };
        debug!(branch = %label, url = %prepared.url, state = %BranchState::UrlRewritten, "Locator rewritten");

        if !adapter.capabilities().supports(Capability::ResolvePlayable) {
            let mut stream = StreamDescriptor::new(prepared.url, unit.server.clone().unwrap_or_else(|| "directo".into()));
            stream.language.clone_from(&unit.language);
            stream.referer = prepared.referer;
            return BranchReport::playable(label, with_language_suffix(vec![stream], None));
        }

        let language = unit.language.clone();
        let mut rewritten = unit;
        rewritten.canonical_url = Some(prepared.url);
        match self
            .call(adapter, ctx, Capability::ResolvePlayable, move |a, c| async move {
                a.resolve_playable(&c, &rewritten).await
            })
            .await
        {
            Ok(Playable::Streams(streams)) => {
                BranchReport::playable(label, with_language_suffix(streams, language.as_deref()))
            }
            Ok(Playable::Gone(reason)) => BranchReport::failed(label, ResolveError::TerminalFailure(reason)),
            Err(err) => {
                debug!(branch = %label, error = %err, "Branch failed");
                BranchReport::failed(label, err)
            }
        }
    }

    /// URL policy, plus at most one redirector hop.
    async fn rewrite(&self, ctx: &SourceContext, raw: &str, referer: Option<&str>) -> Result<Prepared, ResolveError> {
        let prepared = ctx.policy.prepare(raw, referer)?;
        if !prepared.hop {
            return Ok(prepared);
        }

        let request = FetchRequest::get(&prepared.url)
            .referer(prepared.hop_referer.as_deref())
            .no_redirects()
            .headers_only();
        let fetch = ctx.fetch.clone();
        let result = self
            .pool
            .run("redirector", async move { fetch.fetch(request).await.map_err(ResolveError::from) })
            .await?;
        let location = result
            .location()
            .ok_or_else(|| ResolveError::ParseMismatch(format!("no Location from {}", prepared.url)))?;
        let target = scrape::absolute(&prepared.url, location);
        debug!(from = %prepared.url, to = %target, "Followed redirector");
        ctx.policy.after_hop(&target, referer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_registry_is_fatal() {
        let result = Resolver::builder(Config::default())
            .registry(Registry::new(crate::source::ReloadPolicy::Cached))
            .metadata(MetadataBridge::disabled())
            .build();
        assert!(matches!(result, Err(ConfigError::NoAdapters)));
    }

    #[test]
    fn listable_filters_kind_and_navigation() {
        let movie = ContentUnit::new("a", Stage::ListVideos).with_kind(ContentKind::Movie);
        let show = ContentUnit::new("a", Stage::Discover).with_kind(ContentKind::Show);
        let category = ContentUnit::new("a", Stage::Discover).with_title("Géneros");
        let next = ContentUnit::next_page("a", "https://a/page/2/");
        assert!(listable(CatalogKind::Movie, &movie));
        assert!(!listable(CatalogKind::Movie, &show));
        assert!(listable(CatalogKind::Series, &show));
        assert!(!listable(CatalogKind::Movie, &category));
        assert!(!listable(CatalogKind::Movie, &next));
    }

    #[test]
    fn language_suffix_from_stream_or_unit() {
        let mut tagged = StreamDescriptor::new("https://a/1", "voe");
        tagged.language = Some("Esp".into());
        let bare = StreamDescriptor::new("https://a/2", "filemoon");
        let streams = with_language_suffix(vec![tagged, bare], Some("Lat"));
        assert_eq!(streams[0].label, "voe [Esp]");
        assert_eq!(streams[1].label, "filemoon [Lat]");

        let again = with_language_suffix(streams, None);
        assert_eq!(again[0].label, "voe [Esp]");
        assert_eq!(with_language_suffix(vec![StreamDescriptor::new("u", "m3u8")], None)[0].label, "m3u8");
    }
}

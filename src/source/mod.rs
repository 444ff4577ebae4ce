//! Source adapters.
//!
//! # Architecture
//!
//! - [`SourceAdapter`]: async trait every scraping source implements. An
//!   adapter declares its [`Capabilities`]; the pipeline checks them before
//!   calling a method, and the default method bodies answer
//!   [`ResolveError::Unsupported`].
//! - [`Registry`]: loads adapters by name under a [`ReloadPolicy`].
//! - [`SourceContext`]: what an adapter may touch while it runs: the fetch
//!   ladder and its effective URL policy.
//!
//! Adapters return `anyhow::Result`; the pipeline converts failures with
//! [`ResolveError::from_adapter`] and treats the source as empty.

pub mod pelis182;
pub mod pelisforte;
mod registry;
pub(crate) mod scrape;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::error::ResolveError;
use crate::fetch::FetchClient;
use crate::http_client::FetchRequest;
use crate::model::{CatalogKind, ContentUnit, StreamDescriptor};
use crate::policy::{PolicyRules, UrlPolicy};

pub use registry::{AdapterFactory, Registry, ReloadPolicy, SourceDescriptor, SourceSettings};

/// One adapter operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    ListRoot,
    ListCategory,
    Search,
    ListVideoSources,
    ResolvePlayable,
}

impl Capability {
    fn bit(self) -> u8 {
        match self {
            Capability::ListRoot => 1,
            Capability::ListCategory => 1 << 1,
            Capability::Search => 1 << 2,
            Capability::ListVideoSources => 1 << 3,
            Capability::ResolvePlayable => 1 << 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Capability::ListRoot => "listRoot",
            Capability::ListCategory => "listCategory",
            Capability::Search => "search",
            Capability::ListVideoSources => "listVideoSources",
            Capability::ResolvePlayable => "resolvePlayable",
        }
    }
}

/// Set of supported operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities(u8);

impl Capabilities {
    pub const NONE: Self = Self(0);

    #[must_use]
    pub fn with(self, capability: Capability) -> Self {
        Self(self.0 | capability.bit())
    }

    pub fn all() -> Self {
        [
            Capability::ListRoot,
            Capability::ListCategory,
            Capability::Search,
            Capability::ListVideoSources,
            Capability::ResolvePlayable,
        ]
        .into_iter()
        .fold(Self::NONE, Self::with)
    }

    pub fn supports(self, capability: Capability) -> bool {
        self.0 & capability.bit() != 0
    }
}

impl FromIterator<Capability> for Capabilities {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        iter.into_iter().fold(Self::NONE, Self::with)
    }
}

/// Outcome of `resolvePlayable`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Playable {
    Streams(Vec<StreamDescriptor>),
    /// The source reports the content as removed.
    Gone(String),
}

/// Per-call collaborators handed to adapters.
#[derive(Debug, Clone)]
pub struct SourceContext {
    pub fetch: FetchClient,
    /// Global rules merged with the adapter's own.
    pub policy: UrlPolicy,
    pub kind: CatalogKind,
}

impl SourceContext {
    pub fn new(fetch: FetchClient, policy: UrlPolicy, kind: CatalogKind) -> Self {
        Self { fetch, policy, kind }
    }

    /// Fetch a page body after alias rewriting.
    pub async fn page(&self, url: &str, referer: Option<&str>) -> Result<String> {
        let url = self.policy.normalize(url);
        let result = self
            .fetch
            .fetch(FetchRequest::get(&url).referer(referer))
            .await
            .with_context(|| format!("fetching {url}"))?;
        Ok(result.body)
    }
}

/// A scraping source.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Registry name, also the `source` of every unit this adapter emits.
    fn name(&self) -> &str;

    fn display_name(&self) -> &str {
        self.name()
    }

    /// Catalog kinds this source lists.
    fn kinds(&self) -> &[CatalogKind] {
        &[CatalogKind::Movie, CatalogKind::Series]
    }

    fn capabilities(&self) -> Capabilities;

    /// Source-specific URL rules, merged over the global ones.
    fn url_policy(&self) -> PolicyRules {
        PolicyRules::empty()
    }

    async fn list_root(&self, _ctx: &SourceContext) -> Result<Vec<ContentUnit>> {
        Err(ResolveError::Unsupported(Capability::ListRoot.as_str()).into())
    }

    /// Expand a category or pagination unit.
    async fn list_category(&self, _ctx: &SourceContext, _unit: &ContentUnit) -> Result<Vec<ContentUnit>> {
        Err(ResolveError::Unsupported(Capability::ListCategory.as_str()).into())
    }

    async fn search(&self, _ctx: &SourceContext, _query: &str) -> Result<Vec<ContentUnit>> {
        Err(ResolveError::Unsupported(Capability::Search.as_str()).into())
    }

    /// Expand a candidate into server-tagged units.
    async fn list_video_sources(&self, _ctx: &SourceContext, _unit: &ContentUnit) -> Result<Vec<ContentUnit>> {
        Err(ResolveError::Unsupported(Capability::ListVideoSources.as_str()).into())
    }

    /// Resolve a policy-rewritten unit into streams.
    async fn resolve_playable(&self, _ctx: &SourceContext, _unit: &ContentUnit) -> Result<Playable> {
        Err(ResolveError::Unsupported(Capability::ResolvePlayable.as_str()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_set() {
        let caps: Capabilities = [Capability::Search, Capability::ResolvePlayable]
            .into_iter()
            .collect();
        assert!(caps.supports(Capability::Search));
        assert!(caps.supports(Capability::ResolvePlayable));
        assert!(!caps.supports(Capability::ListRoot));
        assert!(Capabilities::all().supports(Capability::ListVideoSources));
        assert!(!Capabilities::NONE.supports(Capability::Search));
    }

    struct Bare;

    #[async_trait]
    impl SourceAdapter for Bare {
        fn name(&self) -> &str {
            "bare"
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities::NONE
        }
    }

    #[tokio::test]
    async fn default_methods_are_unsupported() {
        let ctx = SourceContext::new(
            FetchClient::with_defaults().unwrap(),
            UrlPolicy::default(),
            CatalogKind::Movie,
        );
        let err = Bare.search(&ctx, "x").await.unwrap_err();
        assert_eq!(
            ResolveError::from_adapter(&err),
            ResolveError::Unsupported("search")
        );
        assert_eq!(Bare.display_name(), "bare");
    }
}

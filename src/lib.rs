//! `canal` - stateless resolver over a federation of scraping sources
//!
//! # Features
//!
//! - **Opaque identities**: `local:` tokens carry the scraped unit itself, so
//!   no state survives between requests
//! - **Source adapters**: small capability contract, registry with hot reload
//! - **Resolution pipeline**: discovery to playable URL, one failing source or
//!   server never hides the others
//! - **Fetch ladder**: fingerprinted client first, plain client on challenge
//! - **Metadata bridge**: best-effort TMDb matching behind a TTL cache
//!
//! # Example
//!
//! ```rust,no_run
//! use canal::{CatalogKind, Config, Resolver};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let resolver = Resolver::new(Config::load()?)?;
//!     let entries = resolver
//!         .list_or_search(None, CatalogKind::Movie, Some("matrix"), None, None)
//!         .await;
//!     if let Some(entry) = entries.first() {
//!         for stream in resolver.resolve_streams(&entry.local_token, entry.kind).await {
//!             println!("{} {}", stream.label, stream.player_url());
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod fingerprint;
pub mod http_client;
pub mod identity;
pub mod metadata;
pub mod model;
pub mod pipeline;
pub mod policy;
pub mod session;
pub mod source;

pub use config::Config;
pub use error::{ConfigError, DecodeError, FetchError, LoadError, ResolveError};
pub use fetch::FetchClient;
pub use identity::{Encoded, IdentityCodec, Token};
pub use metadata::{CanonicalCatalog, CanonicalRecord, MetadataBridge, TmdbCatalog};
pub use model::{CatalogEntry, CatalogKind, ContentKind, ContentUnit, Stage, StreamDescriptor};
pub use pipeline::{Resolution, Resolver, ResolverBuilder};
pub use policy::{PolicyRules, UrlPolicy};
pub use session::{HostCookieStore, NoopSessionStore, SessionStore};
pub use source::{Capabilities, Capability, Playable, Registry, ReloadPolicy, SourceAdapter, SourceContext};

/// Version of canal
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

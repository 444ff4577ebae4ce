//! Error taxonomy for the resolution pipeline.
//!
//! Every per-source and per-branch error is converted into one of these
//! types at its origin, logged, and turned into "contributed nothing" by the
//! pipeline. Only [`ConfigError`] is allowed to stop construction.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure to turn a token back into a content unit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Canonical ids reference an external catalog and carry no unit.
    #[error("canonical token `{0}` needs its paired local token to resolve")]
    RequiresCanonicalContext(String),
    /// Bad base64, bad JSON, or a payload missing required fields.
    #[error("malformed token: {0}")]
    MalformedToken(String),
}

/// Internal encoding fault. Never escapes the codec; reported through
/// [`crate::identity::Encoded::degradation`].
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("failed to serialize content unit: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("token of {len} bytes exceeds the {limit} byte limit")]
    TooLarge { len: usize, limit: usize },
}

/// Failure to produce an adapter for a source name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("unknown source `{0}`")]
    Unknown(String),
    #[error("source `{name}` failed to load: {reason}")]
    Broken { name: String, reason: String },
}

/// Transport-level failures, after the fallback ladder has run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("request to {0} timed out")]
    Timeout(String),
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("anti-bot challenge not cleared for {0}")]
    ChallengeDetected(String),
    #[error("HTTP status {0}")]
    HttpStatusError(u16),
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

/// Why a source or a branch contributed nothing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// Expected pattern not found in scraped markup.
    #[error("markup mismatch: {0}")]
    ParseMismatch(String),
    #[error("host `{0}` is denylisted")]
    Denylisted(String),
    /// The adapter reported the content as gone.
    #[error("content unavailable: {0}")]
    TerminalFailure(String),
    #[error("source does not support {0}")]
    Unsupported(&'static str),
    #[error("gave up after {0:?}")]
    TimedOut(Duration),
    #[error("adapter failed: {0}")]
    Adapter(String),
}

impl ResolveError {
    /// Recover a typed error from an adapter's `anyhow` error, falling back
    /// to [`ResolveError::Adapter`] with the full context chain.
    pub fn from_adapter(err: &anyhow::Error) -> Self {
        if let Some(resolve) = err.downcast_ref::<ResolveError>() {
            return resolve.clone();
        }
        if let Some(fetch) = err.downcast_ref::<FetchError>() {
            return Self::Fetch(fetch.clone());
        }
        Self::Adapter(format!("{err:#}"))
    }
}

/// Startup configuration problems. These are the only fatal errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no source adapters are registered")]
    NoAdapters,
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid TOML in {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

//! Opaque identity tokens.
//!
//! A `local:` token is a self-contained, URL-safe encoding of a
//! [`ContentUnit`], so a stateless service can hand out ids and later rebuild
//! the exact scraped object without touching the network. A `canonical:`
//! token names a record in the external catalog and carries no unit.

use std::fmt;
use std::str::FromStr;

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use tracing::{debug, warn};

use crate::error::{DecodeError, EncodeError};
use crate::model::ContentUnit;

pub const LOCAL_PREFIX: &str = "local:";
pub const CANONICAL_PREFIX: &str = "canonical:";
/// Prefix used by tokens issued before the `local:` spelling.
pub const LEGACY_LOCAL_PREFIX: &str = "balandro:";
pub const LEGACY_CANONICAL_PREFIX: &str = "tmdb:";

/// Default upper bound on an encoded token.
pub const DEFAULT_MAX_TOKEN_LEN: usize = 8192;

const PLACEHOLDER_TITLE: &str = "unknown";

/// URL-safe alphabet, padded on encode, either form accepted on decode.
const TOKEN_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// A parsed identity token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Token {
    /// Base64 payload, prefix removed.
    Local(String),
    /// External catalog id, prefix removed.
    Canonical(String),
}

impl Token {
    /// Classify a raw id. Bare payloads and `balandro:` ids are local.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if let Some(id) = raw
            .strip_prefix(CANONICAL_PREFIX)
            .or_else(|| raw.strip_prefix(LEGACY_CANONICAL_PREFIX))
        {
            return Token::Canonical(id.to_string());
        }
        let payload = raw
            .strip_prefix(LOCAL_PREFIX)
            .or_else(|| raw.strip_prefix(LEGACY_LOCAL_PREFIX))
            .unwrap_or(raw);
        Token::Local(payload.to_string())
    }

    pub fn canonical(id: impl Into<String>) -> Self {
        Token::Canonical(id.into())
    }

    pub fn is_canonical(&self) -> bool {
        matches!(self, Token::Canonical(_))
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Local(payload) => write!(f, "{LOCAL_PREFIX}{payload}"),
            Token::Canonical(id) => write!(f, "{CANONICAL_PREFIX}{id}"),
        }
    }
}

impl FromStr for Token {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Token::parse(s))
    }
}

/// Result of [`IdentityCodec::encode`]. Always carries a usable token.
#[derive(Debug)]
pub struct Encoded {
    pub token: Token,
    degradation: Option<EncodeError>,
}

impl Encoded {
    /// The fault that forced a minimal token, if any.
    pub fn degradation(&self) -> Option<&EncodeError> {
        self.degradation.as_ref()
    }

    pub fn is_degraded(&self) -> bool {
        self.degradation.is_some()
    }

    pub fn into_token(self) -> Token {
        self.token
    }
}

/// Encodes and decodes `local:` tokens.
#[derive(Debug, Clone, Copy)]
pub struct IdentityCodec {
    max_token_len: usize,
}

impl Default for IdentityCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TOKEN_LEN)
    }
}

impl IdentityCodec {
    pub fn new(max_token_len: usize) -> Self {
        Self { max_token_len }
    }

    /// Encode the populated fields of `unit`. Never fails: on an internal
    /// fault the token degrades to source, stage and title.
    pub fn encode(&self, unit: &ContentUnit) -> Encoded {
        match self.try_encode(unit) {
            Ok(token) => Encoded {
                token,
                degradation: None,
            },
            Err(err) => {
                warn!(
                    source = %unit.source,
                    title = unit.title.as_deref().unwrap_or(PLACEHOLDER_TITLE),
                    "Identity token degraded: {}",
                    err
                );
                Encoded {
                    token: self.minimal(unit),
                    degradation: Some(err),
                }
            }
        }
    }

    fn try_encode(&self, unit: &ContentUnit) -> Result<Token, EncodeError> {
        let json = serde_json::to_vec(unit)?;
        let payload = TOKEN_ENGINE.encode(json);
        let len = LOCAL_PREFIX.len() + payload.len();
        if len > self.max_token_len {
            return Err(EncodeError::TooLarge {
                len,
                limit: self.max_token_len,
            });
        }
        Ok(Token::Local(payload))
    }

    fn minimal(&self, unit: &ContentUnit) -> Token {
        let title = unit
            .title
            .as_deref()
            .filter(|t| !t.is_empty())
            .unwrap_or(PLACEHOLDER_TITLE);
        let reduced = ContentUnit::new(unit.source.clone(), unit.stage).with_title(title);
        if let Ok(token) = self.try_encode(&reduced) {
            return token;
        }
        let placeholder = ContentUnit::new(unit.source.clone(), unit.stage)
            .with_title(PLACEHOLDER_TITLE);
        match serde_json::to_vec(&placeholder) {
            Ok(json) => Token::Local(TOKEN_ENGINE.encode(json)),
            Err(_) => Token::Local(TOKEN_ENGINE.encode(
                br#"{"channel":"","action":"list_all","title":"unknown"}"#,
            )),
        }
    }

    /// Decode a raw id. Canonical ids need their paired local token.
    pub fn decode(&self, raw: &str) -> Result<ContentUnit, DecodeError> {
        match Token::parse(raw) {
            Token::Canonical(id) => Err(DecodeError::RequiresCanonicalContext(id)),
            Token::Local(payload) => self.decode_payload(&payload),
        }
    }

    pub fn decode_token(&self, token: &Token) -> Result<ContentUnit, DecodeError> {
        match token {
            Token::Canonical(id) => Err(DecodeError::RequiresCanonicalContext(id.clone())),
            Token::Local(payload) => self.decode_payload(payload),
        }
    }

    fn decode_payload(&self, payload: &str) -> Result<ContentUnit, DecodeError> {
        if payload.is_empty() {
            return Err(DecodeError::MalformedToken("empty payload".into()));
        }
        let bytes = TOKEN_ENGINE
            .decode(payload.as_bytes())
            .map_err(|e| DecodeError::MalformedToken(format!("base64: {e}")))?;
        let unit: ContentUnit = serde_json::from_slice(&bytes)
            .map_err(|e| DecodeError::MalformedToken(format!("json: {e}")))?;
        if unit.source.is_empty() {
            return Err(DecodeError::MalformedToken("missing source".into()));
        }
        debug!(source = %unit.source, stage = unit.stage.as_action(), "Decoded token");
        Ok(unit)
    }
}

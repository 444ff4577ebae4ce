//! Fetch client with the anti-blocking fallback ladder.
//!
//! 1. Stealth rung (browser fingerprint, session cookies).
//! 2. Plain rung, when the stealth rung is missing, fails, or is served a
//!    challenge page.
//! 3. [`FetchError::ChallengeDetected`] when the plain rung is also
//!    challenged, or fails after a challenge was seen.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::config::FetchSettings;
use crate::error::{ConfigError, FetchError};
use crate::http_client::{with_cookie, FetchRequest, FetchResult, ReqwestTransport, Transport};
use crate::session::{HostCookieStore, SessionStore};

#[derive(Clone)]
pub struct FetchClient {
    stealth: Option<Arc<dyn Transport>>,
    plain: Arc<dyn Transport>,
    sessions: Arc<dyn SessionStore>,
    markers: Arc<[String]>,
}

impl std::fmt::Debug for FetchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchClient")
            .field("stealth", &self.stealth.as_ref().map(|t| t.name()))
            .field("plain", &self.plain.name())
            .field("markers", &self.markers.len())
            .finish_non_exhaustive()
    }
}

/// Outcome of one rung, before error classification.
enum Rung {
    Ok(FetchResult),
    Challenged,
    Failed(FetchError),
}

impl FetchClient {
    /// Ladder over explicit transports.
    pub fn new(
        stealth: Option<Arc<dyn Transport>>,
        plain: Arc<dyn Transport>,
        sessions: Arc<dyn SessionStore>,
        markers: Vec<String>,
    ) -> Self {
        Self {
            stealth,
            plain,
            sessions,
            markers: markers.into(),
        }
    }

    /// reqwest transports configured from `[fetch]`.
    pub fn from_settings(
        settings: &FetchSettings,
        sessions: Arc<dyn SessionStore>,
    ) -> Result<Self, ConfigError> {
        let stealth: Option<Arc<dyn Transport>> = if settings.stealth {
            Some(Arc::new(ReqwestTransport::stealth(settings, sessions.jar())?))
        } else {
            None
        };
        let plain: Arc<dyn Transport> = Arc::new(ReqwestTransport::plain(settings, sessions.jar())?);
        Ok(Self::new(
            stealth,
            plain,
            sessions,
            settings.challenge_markers.clone(),
        ))
    }

    /// Default settings with a fresh process-wide cookie store.
    pub fn with_defaults() -> Result<Self, ConfigError> {
        Self::from_settings(&FetchSettings::default(), Arc::new(HostCookieStore::new()))
    }

    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }

    pub fn is_challenge(&self, body: &str) -> bool {
        self.markers.iter().any(|m| !m.is_empty() && body.contains(m.as_str()))
    }

    /// Run the ladder. With `raise_errors = false` every failure becomes an
    /// empty result.
    #[instrument(skip(self, request), fields(url = %request.url))]
    pub async fn fetch(&self, request: FetchRequest) -> Result<FetchResult, FetchError> {
        let raise = request.raise_errors;
        let url = request.url.clone();
        match self.run_ladder(request).await {
            Ok(result) => Ok(result),
            Err(err) if !raise => {
                debug!(error = %err, "Fetch failed, returning empty result");
                Ok(FetchResult::empty(url))
            }
            Err(err) => Err(err),
        }
    }

    /// Shorthand for a `GET` of the body.
    pub async fn get_text(&self, url: &str, referer: Option<&str>) -> Result<String, FetchError> {
        let result = self.fetch(FetchRequest::get(url).referer(referer)).await?;
        Ok(result.body)
    }

    async fn run_ladder(&self, request: FetchRequest) -> Result<FetchResult, FetchError> {
        let host = request.host().ok_or_else(|| FetchError::InvalidUrl(request.url.clone()))?;
        let target = Url::parse(&request.url).map_err(|_| FetchError::InvalidUrl(request.url.clone()))?;
        let mut challenged = false;

        if let Some(stealth) = &self.stealth {
            let req = with_cookie(request.clone(), self.sessions.cookie_header(&target));
            match self.attempt(stealth.as_ref(), &req).await {
                Rung::Ok(result) => {
                    self.sessions.absorb(&target, result.set_cookies());
                    return Ok(result);
                }
                Rung::Challenged => {
                    info!(host = %host, "Challenge page on stealth rung, trying plain client");
                    challenged = true;
                }
                Rung::Failed(FetchError::HttpStatusError(code)) => {
                    return Err(FetchError::HttpStatusError(code));
                }
                Rung::Failed(err) => {
                    warn!(host = %host, error = %err, "Stealth rung failed, trying plain client");
                }
            }
        }

        let req = with_cookie(request, self.sessions.cookie_header(&target));
        match self.attempt(self.plain.as_ref(), &req).await {
            Rung::Ok(result) => Ok(result),
            Rung::Challenged => Err(FetchError::ChallengeDetected(host)),
            Rung::Failed(_) if challenged => Err(FetchError::ChallengeDetected(host)),
            Rung::Failed(err) => Err(err),
        }
    }

    async fn attempt(&self, transport: &dyn Transport, request: &FetchRequest) -> Rung {
        match transport.execute(request).await {
            Ok(result) if self.is_challenge(&result.body) => Rung::Challenged,
            Ok(result) if result.status >= 400 => {
                Rung::Failed(FetchError::HttpStatusError(result.status))
            }
            Ok(result) => Rung::Ok(result),
            Err(err) => Rung::Failed(err),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted transport for ladder and adapter tests.

    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;

    pub struct ScriptedTransport {
        name: &'static str,
        replies: Mutex<VecDeque<Result<FetchResult, FetchError>>>,
        pub seen: Mutex<Vec<FetchRequest>>,
    }

    impl ScriptedTransport {
        pub fn new(name: &'static str, replies: Vec<Result<FetchResult, FetchError>>) -> Arc<Self> {
            Arc::new(Self {
                name,
                replies: Mutex::new(replies.into()),
                seen: Mutex::new(Vec::new()),
            })
        }

        pub fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    pub fn page(status: u16, body: &str) -> Result<FetchResult, FetchError> {
        Ok(FetchResult {
            url: "https://site.example/".into(),
            status,
            headers: Default::default(),
            body: body.into(),
        })
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn execute(&self, request: &FetchRequest) -> Result<FetchResult, FetchError> {
            self.seen.lock().unwrap().push(request.clone());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(FetchError::ConnectionFailed("script exhausted".into())))
        }
    }
}

//! WeRead Web API Client
//!
//! Provides REST integration for:
//! - Posting signed reading progress to `/web/book/read`
//! - Renewing the `wr_skey` session cookie
//! - Repairing sessions whose responses lack a `synckey`
//!
//! # Authentication
//!
//! WeRead authenticates with the browser cookies captured in the account's
//! request template. The short-lived `wr_skey` cookie is renewed through
//! `/web/login/renewal`, which answers with a `Set-Cookie` header.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, COOKIE, SET_COOKIE};
use reqwest::Client;
use serde_json::Value;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use weread_domain::{SeedRecord, SESSION_COOKIE};
use weread_engine::SignedPayload;
use weread_exec::{CredentialRefresher, ExecError, ReadingTransport, SendOutcome};

// =============================================================================
// Constants
// =============================================================================

/// WeRead web base URL
const WEREAD_WEB_URL: &str = "https://weread.qq.com";

/// Reading progress endpoint
const READ_PATH: &str = "/web/book/read";

/// Cookie renewal endpoint
const RENEW_PATH: &str = "/web/login/renewal";

/// Chapter info endpoint, used to restore a missing synckey
const FIX_SYNCKEY_PATH: &str = "/web/book/chapterInfos";

/// Renewal request body
const RENEW_BODY: &str = r#"{"rq":"%2Fweb%2Fbook%2Fread"}"#;

/// Synckey repair request body
const FIX_SYNCKEY_BODY: &str = r#"{"bookIds":["3300060341"]}"#;

/// Length of the renewed `wr_skey` value
const SESSION_KEY_LEN: usize = 8;

/// Template headers that are never replayed.
///
/// `Cookie` is rebuilt from the seed's cookie jar, the client computes its own
/// length and host, and compressed bodies are not decoded.
const SKIPPED_HEADERS: &[&str] = &["cookie", "content-length", "host", "accept-encoding"];

// =============================================================================
// Errors
// =============================================================================

/// Errors that can occur in the WeRead client.
#[derive(Debug, Clone, Error)]
pub enum WereadError {
    /// HTTP client could not be built
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),

    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    /// Failed to parse response
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// Request timed out
    #[error("Request timed out")]
    Timeout,

    /// Renewal response carried no usable `wr_skey`
    #[error("Renewal response carried no wr_skey cookie")]
    MissingSessionKey,
}

// =============================================================================
// Response Classification
// =============================================================================

/// How the reading endpoint answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadVerdict {
    /// `succ` and `synckey` present: progress recorded
    Synced,
    /// `succ` without `synckey`: session needs a repair call
    MissingSynckey,
    /// No `succ`: the session cookie is no longer accepted
    Rejected,
}

/// Classify a parsed reading response by key presence.
pub fn classify_response(body: &Value) -> ReadVerdict {
    let has = |key: &str| body.get(key).is_some();
    match (has("succ"), has("synckey")) {
        (true, true) => ReadVerdict::Synced,
        (true, false) => ReadVerdict::MissingSynckey,
        (false, _) => ReadVerdict::Rejected,
    }
}

/// Extract the renewed `wr_skey` from `Set-Cookie` header values.
///
/// Takes the text after the last `=` of the first segment mentioning
/// `wr_skey`, truncated to 8 characters. Empty values are ignored.
pub fn extract_session_key<'a>(set_cookie: impl IntoIterator<Item = &'a str>) -> Option<String> {
    set_cookie
        .into_iter()
        .flat_map(|value| value.split(';'))
        .find(|segment| segment.contains(SESSION_COOKIE))
        .and_then(|segment| segment.rsplit('=').next())
        .map(|value| value.trim().chars().take(SESSION_KEY_LEN).collect::<String>())
        .filter(|key| !key.is_empty())
}

/// Render the seed's cookie jar as a `Cookie` header value.
pub fn cookie_header(seed: &SeedRecord) -> String {
    seed.cookies()
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Build the request headers replayed for a seed.
fn request_headers(seed: &SeedRecord) -> HeaderMap {
    let mut headers = HeaderMap::new();

    for (name, value) in seed.headers() {
        if SKIPPED_HEADERS.iter().any(|skip| name.eq_ignore_ascii_case(skip)) {
            continue;
        }
        match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => debug!(header = %name, "Skipping header that is not valid HTTP"),
        }
    }

    match HeaderValue::from_str(&cookie_header(seed)) {
        Ok(cookie) => {
            headers.insert(COOKIE, cookie);
        }
        Err(_) => warn!("Cookie jar is not a valid header value, sending without cookies"),
    }
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    headers
}

// =============================================================================
// WeRead Client
// =============================================================================

/// WeRead web API client.
///
/// Implements both the reading transport and the cookie renewal port.
pub struct WereadClient {
    /// HTTP client
    client: Client,
    /// Per-request timeout
    request_timeout: Duration,
    /// Base URL (overridable for testing)
    base_url: String,
}

impl WereadClient {
    /// Create a new client with the given per-request timeout.
    pub fn new(request_timeout: Duration) -> Result<Self, WereadError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| WereadError::ClientBuild(e.to_string()))?;

        Ok(Self {
            client,
            request_timeout,
            base_url: WEREAD_WEB_URL.to_string(),
        })
    }

    /// Point the client at another host.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// POST a JSON body with the seed's headers and cookies.
    async fn post(
        &self,
        path: &str,
        seed: &SeedRecord,
        body: String,
    ) -> Result<reqwest::Response, WereadError> {
        timeout(
            self.request_timeout,
            self.client
                .post(self.url(path))
                .headers(request_headers(seed))
                .body(body)
                .send(),
        )
        .await
        .map_err(|_| WereadError::Timeout)?
        .map_err(|e| WereadError::RequestFailed(e.to_string()))
    }

    /// Post one signed payload and return the parsed body and latency.
    pub async fn read(
        &self,
        seed: &SeedRecord,
        payload: &SignedPayload,
    ) -> Result<(Value, Duration), WereadError> {
        let body = payload.to_json().map_err(|e| WereadError::ParseError(e.to_string()))?;

        let started = Instant::now();
        let response = self.post(READ_PATH, seed, body).await?;

        let status = response.status();
        let text = response.text().await.map_err(|e| WereadError::ParseError(e.to_string()))?;
        let elapsed = started.elapsed();

        if !status.is_success() {
            return Err(WereadError::RequestFailed(format!("HTTP {}: {}", status, text)));
        }

        let parsed = serde_json::from_str(&text).map_err(|e| WereadError::ParseError(e.to_string()))?;
        Ok((parsed, elapsed))
    }

    /// Ask the renewal endpoint for a fresh `wr_skey`.
    pub async fn renew_session_key(&self, seed: &SeedRecord) -> Result<String, WereadError> {
        let response = self.post(RENEW_PATH, seed, RENEW_BODY.to_string()).await?;

        let values = response.headers().get_all(SET_COOKIE);
        extract_session_key(values.iter().filter_map(|value| value.to_str().ok()))
            .ok_or(WereadError::MissingSessionKey)
    }

    /// Call the chapter info endpoint, which restores the synckey.
    pub async fn fix_synckey(&self, seed: &SeedRecord) -> Result<(), WereadError> {
        let response = self.post(FIX_SYNCKEY_PATH, seed, FIX_SYNCKEY_BODY.to_string()).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(WereadError::RequestFailed(format!("HTTP {}", status)));
        }
        Ok(())
    }
}

#[async_trait]
impl ReadingTransport for WereadClient {
    async fn send(&self, seed: &SeedRecord, payload: &SignedPayload) -> SendOutcome {
        let (body, response_time) = match self.read(seed, payload).await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "Reading request failed");
                return SendOutcome::NetworkFailure { reason: e.to_string() };
            }
        };

        match classify_response(&body) {
            ReadVerdict::Synced => {
                debug!(response_ms = response_time.as_millis() as u64, "Reading progress accepted");
                SendOutcome::Accepted { response_time }
            }
            ReadVerdict::MissingSynckey => {
                warn!(response = %body, "Response without synckey, repairing session");
                if let Err(e) = self.fix_synckey(seed).await {
                    error!(error = %e, "Synckey repair failed");
                }
                SendOutcome::NetworkFailure {
                    reason: "response without synckey".to_string(),
                }
            }
            ReadVerdict::Rejected => {
                warn!(
                    response = %body,
                    book = ?payload.get("b"),
                    chapter = ?payload.get("c"),
                    "Reading request rejected, cookie probably expired"
                );
                SendOutcome::AuthExpired {
                    reason: format!("no succ in response: {}", body),
                }
            }
        }
    }
}

#[async_trait]
impl CredentialRefresher for WereadClient {
    async fn refresh(&self, seed: &SeedRecord) -> Result<String, ExecError> {
        info!("Renewing session cookie");
        self.renew_session_key(seed)
            .await
            .map_err(|e| ExecError::CredentialRefresh(e.to_string()))
    }
}

// =============================================================================
// Tests
// =============================================================================

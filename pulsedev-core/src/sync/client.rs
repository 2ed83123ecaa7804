//! HTTP client for the gamification API
//!
//! Endpoints are joined onto `server_url + api_prefix`. Each call is one
//! attempt; [`with_retry`] wraps calls that should ride out transient
//! failures.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::BackendConfig;
use crate::error::{Error, Result};

use super::backend::Backend;
use super::events::{
    Achievements, AchievementsBody, AwardBody, AwardRequest, BatchPayload, DashboardBody, Envelope,
    ProfileBody, SessionSyncRequest, SyncBody, SyncData, TrackBody, UserStats,
};

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// HTTP client for the scoring backend
pub struct ApiClient {
    config: BackendConfig,
    http_client: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    /// Create a new client from configuration
    ///
    /// Returns an error if the configuration is invalid or missing required fields.
    pub fn new(config: BackendConfig) -> Result<Self> {
        config.validate()?;

        let server_url = config
            .server_url
            .as_deref()
            .ok_or_else(|| Error::Config("backend.server_url is required".to_string()))?
            .trim_end_matches('/');
        let prefix = config.api_prefix.trim_matches('/');
        let base_url = if prefix.is_empty() {
            server_url.to_string()
        } else {
            format!("{}/{}", server_url, prefix)
        };

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(api_key) = &config.api_key {
            let auth_value = format!("Bearer {}", api_key);
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&auth_value)
                    .map_err(|e| Error::Config(format!("invalid api_key: {}", e)))?,
            );
        }

        headers.insert(
            "X-Client-Platform",
            HeaderValue::from_str(&config.platform)
                .map_err(|e| Error::Config(format!("invalid platform: {}", e)))?,
        );

        let http_client = reqwest::Client::builder()
            .timeout(config.timeout())
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            http_client,
            base_url,
        })
    }

    /// Base URL every endpoint path is joined onto
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn retry_count(&self) -> u32 {
        self.config.retry_count
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn session_url(&self, path: &str, session_id: &str) -> String {
        format!("{}{}/{}", self.base_url, path, urlencoding::encode(session_id))
    }

    async fn post<B, T>(&self, url: String, body: &B) -> Result<T>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.http_client.post(&url).json(body).send().await?;
        read_envelope(response).await
    }

    async fn get<T>(&self, url: String) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let response = self.http_client.get(&url).send().await?;
        read_envelope(response).await
    }
}

#[async_trait]
impl Backend for ApiClient {
    async fn track_activity(&self, payload: &BatchPayload) -> Result<()> {
        let _: TrackBody = self.post(self.url("/activity/track"), payload).await?;
        Ok(())
    }

    async fn award_xp(&self, request: &AwardRequest) -> Result<u32> {
        let body: AwardBody = self.post(self.url("/xp/award"), request).await?;
        Ok(body.xp_earned)
    }

    async fn sync_session(&self, request: &SessionSyncRequest) -> Result<SyncData> {
        let body: SyncBody = self.post(self.url("/session/sync"), request).await?;
        Ok(body.sync_data)
    }

    async fn fetch_profile(&self, session_id: &str) -> Result<UserStats> {
        let body: ProfileBody = self.get(self.session_url("/profile", session_id)).await?;
        Ok(body.profile.into())
    }

    async fn fetch_dashboard(&self, session_id: &str) -> Result<serde_json::Value> {
        let body: DashboardBody = self.get(self.session_url("/dashboard", session_id)).await?;
        Ok(body.dashboard)
    }

    async fn fetch_achievements(&self, session_id: &str) -> Result<Achievements> {
        let body: AchievementsBody = self
            .get(self.session_url("/achievements", session_id))
            .await?;
        Ok(body.achievements)
    }
}

/// Turn an HTTP response into the envelope body, or the matching error
async fn read_envelope<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();

    if !status.is_success() {
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown".to_string());
        return Err(Error::Rejected {
            status: status.as_u16(),
            message: error_text,
        });
    }

    let envelope: Envelope<T> = response.json().await?;
    if !envelope.success {
        return Err(Error::Rejected {
            status: status.as_u16(),
            message: envelope.reason(),
        });
    }
    Ok(envelope.body)
}

/// Delay before retry number `attempt` (1-based): 500ms doubling, capped at 30s
pub fn backoff_delay(attempt: u32) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }
    let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
    INITIAL_BACKOFF.saturating_mul(factor).min(MAX_BACKOFF)
}

/// Run `op` up to `retries + 1` times, sleeping between transient failures.
///
/// Non-transient errors are returned immediately.
pub async fn with_retry<T, F, Fut>(what: &str, retries: u32, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < retries => {
                attempt += 1;
                let delay = backoff_delay(attempt);
                tracing::warn!(
                    operation = what,
                    attempt,
                    max_attempts = retries + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient backend error, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

use async_trait::async_trait;

use crate::error::Result;

use super::events::{Achievements, AwardRequest, BatchPayload, SessionSyncRequest, SyncData, UserStats};

/// The scoring backend as seen by the tracker.
///
/// [`ApiClient`](super::ApiClient) talks HTTP; tests substitute in-process
/// fakes. Implementations make a single attempt per call; retry policy lives
/// with the caller.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Deliver one batch of activity
    async fn track_activity(&self, payload: &BatchPayload) -> Result<()>;

    /// Ask for XP; returns the amount the backend granted (possibly zero)
    async fn award_xp(&self, request: &AwardRequest) -> Result<u32>;

    /// Claim the active-session designation and learn who holds it
    async fn sync_session(&self, request: &SessionSyncRequest) -> Result<SyncData>;

    async fn fetch_profile(&self, session_id: &str) -> Result<UserStats>;

    async fn fetch_dashboard(&self, session_id: &str) -> Result<serde_json::Value>;

    async fn fetch_achievements(&self, session_id: &str) -> Result<Achievements>;
}

//! Wire format for the gamification API
//!
//! Every response is wrapped in an envelope carrying a `success` flag; the
//! payload fields sit next to it at the top level:
//!
//! ```text
//! {"success": true, "xp_earned": 15, "session_id": "...", "source": "commit"}
//! ```
//!
//! A `success: false` envelope is a rejection even when the HTTP status is 2xx.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::{ActivityBatch, ActivityKind, ActivityRecord, Metadata};

/// Payload `type` for batched delivery on `/activity/track`
pub const BATCH_PAYLOAD_TYPE: &str = "activity_batch";

/// One record as it goes over the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireRecord {
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,

    /// Content-based hash for deduplication (32-char hex)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_hash: Option<String>,

    pub metadata: Metadata,
}

impl WireRecord {
    pub fn from_record(record: &ActivityRecord) -> Self {
        Self {
            kind: record.kind,
            session_id: record.session_id.clone(),
            timestamp: record.timestamp,
            event_hash: Some(compute_event_hash(record)),
            metadata: record.metadata.clone(),
        }
    }
}

/// Body of `POST /activity/track` for a batch
#[derive(Debug, Clone, Serialize)]
pub struct BatchPayload {
    pub session_id: String,
    #[serde(rename = "type")]
    pub payload_type: &'static str,
    /// Zero on first delivery; retries let the backend spot replays
    pub attempt: u32,
    pub records: Vec<WireRecord>,
}

impl BatchPayload {
    pub fn from_batch(batch: &ActivityBatch) -> Self {
        Self {
            session_id: batch.session_id.clone(),
            payload_type: BATCH_PAYLOAD_TYPE,
            attempt: batch.attempt,
            records: batch.records.iter().map(WireRecord::from_record).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Body of `POST /xp/award`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AwardRequest {
    pub session_id: String,
    pub source: String,
    pub metadata: Metadata,
}

/// Body of `POST /session/sync`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSyncRequest {
    pub session_id: String,
    pub platform: String,
}

/// Response envelope shared by every endpoint
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(flatten)]
    pub body: T,
}

impl<T> Envelope<T> {
    /// Human-readable reason for a `success: false` envelope
    pub fn reason(&self) -> String {
        self.message
            .clone()
            .or_else(|| self.detail.clone())
            .unwrap_or_else(|| "backend reported failure".to_string())
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct TrackBody {}

#[derive(Debug, Deserialize)]
pub(crate) struct AwardBody {
    #[serde(default)]
    pub xp_earned: u32,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SyncBody {
    #[serde(default)]
    pub sync_data: SyncData,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ProfileBody {
    pub profile: ProfilePayload,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DashboardBody {
    pub dashboard: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AchievementsBody {
    pub achievements: Achievements,
}

/// Result of a session sync round
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncData {
    /// The one session currently allowed to earn XP
    #[serde(default)]
    pub active_session: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub user_profile: Option<UserProfile>,
}

/// Authoritative per-user totals
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub total_xp: u64,
    #[serde(default)]
    pub level: u32,
    #[serde(default)]
    pub current_streak: u32,
    #[serde(default)]
    pub longest_streak: u32,
    #[serde(default)]
    pub total_commits: u64,
    /// Minutes
    #[serde(default)]
    pub total_flow_time: u64,
}

/// The profile view, with or without the stats wrapper around it
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum ProfilePayload {
    Stats {
        profile: UserProfile,
        #[serde(default)]
        next_level_xp: Option<i64>,
        #[serde(default)]
        weekly_progress: serde_json::Value,
    },
    Bare(UserProfile),
}

/// `GET /profile/{session_id}`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UserStats {
    pub profile: UserProfile,
    pub next_level_xp: Option<i64>,
    pub weekly_progress: serde_json::Value,
}

impl From<ProfilePayload> for UserStats {
    fn from(payload: ProfilePayload) -> Self {
        match payload {
            ProfilePayload::Stats {
                profile,
                next_level_xp,
                weekly_progress,
            } => Self {
                profile,
                next_level_xp,
                weekly_progress,
            },
            ProfilePayload::Bare(profile) => Self {
                profile,
                ..Default::default()
            },
        }
    }
}

/// `GET /achievements/{session_id}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Achievements {
    #[serde(default)]
    pub unlocked: Vec<serde_json::Value>,
    #[serde(default)]
    pub available: Vec<serde_json::Value>,
    #[serde(default)]
    pub progress: serde_json::Value,
}

/// Hash over type, timestamp and metadata.
///
/// Session id is left out so the same activity replayed under a new session
/// still dedupes.
pub fn compute_event_hash(record: &ActivityRecord) -> String {
    let content = serde_json::to_string(&record.metadata).unwrap_or_default();
    let hash_input = format!(
        "{}:{}:{}",
        record.kind,
        record.timestamp.to_rfc3339(),
        content
    );

    let mut hasher = Sha256::new();
    hasher.update(hash_input.as_bytes());
    let result = hasher.finalize();

    // Take first 16 bytes (32 hex chars)
    hex::encode(&result[..16])
}

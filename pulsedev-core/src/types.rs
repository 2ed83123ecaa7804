//! Core domain types for pulsedev
//!
//! These types are the canonical, editor-independent data model that every
//! integration (editor plugin, browser extension, dashboard) produces and the
//! engine consumes.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Activity** | One observed developer action (edit, save, command, ...) |
//! | **Batch** | An ordered group of activity records delivered together |
//! | **Session** | One running client instance; several may exist per developer |
//! | **Active session** | The session the backend currently lets accrue XP |
//! | **Flow state** | Inferred focus mode derived from activity cadence |
//! | **Award** | An XP credit, provisional until the backend confirms it |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Opaque key-value metadata attached to records and awards
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Metadata key for the file or buffer an activity touched
pub const META_FILE: &str = "file";
/// Metadata key for the signed net line-count change of an edit
pub const META_LINE_DELTA: &str = "line_delta";
/// Metadata key preserving the editor's original event name
pub const META_RAW_KIND: &str = "raw_kind";

// ============================================
// Activity
// ============================================

/// Canonical activity taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Edit,
    Save,
    ModeChange,
    Command,
    Search,
    FileOpen,
    FocusChange,
    TestRun,
    Commit,
    /// Anything the normalizer doesn't recognise
    Other,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::Edit => "edit",
            ActivityKind::Save => "save",
            ActivityKind::ModeChange => "mode_change",
            ActivityKind::Command => "command",
            ActivityKind::Search => "search",
            ActivityKind::FileOpen => "file_open",
            ActivityKind::FocusChange => "focus_change",
            ActivityKind::TestRun => "test_run",
            ActivityKind::Commit => "commit",
            ActivityKind::Other => "other",
        }
    }
}

impl std::fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ActivityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "edit" => Ok(ActivityKind::Edit),
            "save" => Ok(ActivityKind::Save),
            "mode_change" => Ok(ActivityKind::ModeChange),
            "command" => Ok(ActivityKind::Command),
            "search" => Ok(ActivityKind::Search),
            "file_open" => Ok(ActivityKind::FileOpen),
            "focus_change" => Ok(ActivityKind::FocusChange),
            "test_run" => Ok(ActivityKind::TestRun),
            "commit" => Ok(ActivityKind::Commit),
            "other" => Ok(ActivityKind::Other),
            _ => Err(format!("unknown activity kind: {}", s)),
        }
    }
}

/// A single normalized activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl ActivityRecord {
    pub fn new(kind: ActivityKind, session_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind,
            session_id: session_id.into(),
            timestamp,
            metadata: Metadata::new(),
        }
    }

    /// Builder-style metadata insert
    pub fn with_meta(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// File or buffer this activity touched, if known
    pub fn file(&self) -> Option<&str> {
        self.metadata.get(META_FILE).and_then(|v| v.as_str())
    }

    /// Net line-count change; zero when not reported
    pub fn line_delta(&self) -> i64 {
        self.metadata
            .get(META_LINE_DELTA)
            .and_then(|v| v.as_i64())
            .unwrap_or(0)
    }
}

/// Records drained from the buffer for one delivery
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityBatch {
    pub session_id: String,
    pub records: Vec<ActivityRecord>,
    /// Failed delivery attempts so far
    pub attempt: u32,
}

impl ActivityBatch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// ============================================
// Session
// ============================================

/// Identity of one running client
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    /// Whether the backend designated this session as the active one
    pub active: bool,
}

// ============================================
// Flow
// ============================================

/// Discrete flow state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowState {
    #[default]
    Idle,
    EnteringFlow,
    InFlow,
    ExitingFlow,
    Interrupted,
    Stuck,
}

impl FlowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowState::Idle => "idle",
            FlowState::EnteringFlow => "entering_flow",
            FlowState::InFlow => "in_flow",
            FlowState::ExitingFlow => "exiting_flow",
            FlowState::Interrupted => "interrupted",
            FlowState::Stuck => "stuck",
        }
    }
}

impl std::fmt::Display for FlowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Continuous scores, each in `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct FlowScores {
    /// Edit volume relative to the keystroke threshold
    pub activity: f64,
    /// 1.0 with no context switching, falling with each switch
    pub focus: f64,
    /// Test runs, commits and saves
    pub momentum: f64,
    /// Weighted blend of the three
    pub flow: f64,
}

/// Result of one classifier evaluation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowSnapshot {
    pub session_id: String,
    pub state: FlowState,
    /// Edits per second over the window
    pub keystroke_rate: f64,
    /// Time since the last recorded activity
    #[serde(serialize_with = "serialize_secs")]
    pub idle_duration: Duration,
    /// Distinct files touched in the window
    pub context_switches: u32,
    pub scores: FlowScores,
    pub evaluated_at: DateTime<Utc>,
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

// ============================================
// Rewards
// ============================================

/// Locally generated identifier for an optimistic award
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AwardId(pub Uuid);

impl AwardId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AwardId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AwardId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An XP credit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct XpAward {
    pub id: AwardId,
    /// What earned it (`commit`, `test_pass`, `flow_state`, ...)
    pub source: String,
    /// Zero while provisional; set from the backend on confirmation
    pub amount: u32,
    pub metadata: Metadata,
    pub applied_at: DateTime<Utc>,
    pub confirmed: bool,
}

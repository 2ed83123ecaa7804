//! Optimistic XP ledger
//!
//! Awards start provisional with a visible amount of zero. Only a backend
//! confirmation with `xp_earned > 0` raises the total, so the displayed total
//! never runs ahead of what the backend granted. Rejected, zero-valued and
//! timed-out awards are discarded without touching the total.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::flow::FlowEpisode;
use crate::sync::UserProfile;
use crate::types::{ActivityKind, ActivityRecord, AwardId, Metadata, XpAward};

/// Confirmed award ids remembered for duplicate detection
const CONFIRMED_MEMORY: usize = 256;

/// What earned an award, as named on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardSource {
    Commit,
    TestPass,
    FlowState,
    StuckStateResolve,
}

impl RewardSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RewardSource::Commit => "commit",
            RewardSource::TestPass => "test_pass",
            RewardSource::FlowState => "flow_state",
            RewardSource::StuckStateResolve => "stuck_state_resolve",
        }
    }

    /// Reward earned by a single activity record, if any
    pub fn for_record(record: &ActivityRecord) -> Option<(RewardSource, Metadata)> {
        let source = match record.kind {
            ActivityKind::Commit => RewardSource::Commit,
            ActivityKind::TestRun
                if record.metadata.get("passed").and_then(|v| v.as_bool()) == Some(true) =>
            {
                RewardSource::TestPass
            }
            _ => return None,
        };

        let mut metadata = record.metadata.clone();
        metadata.insert("activity_at".to_string(), record.timestamp.to_rfc3339().into());
        Some((source, metadata))
    }

    /// Reward for a finished flow episode; episodes under a minute earn nothing
    pub fn for_episode(episode: &FlowEpisode) -> Option<(RewardSource, Metadata)> {
        let minutes = episode.duration_minutes();
        if minutes < 1 {
            return None;
        }

        let mut metadata = Metadata::new();
        metadata.insert("minutes".to_string(), minutes.into());
        metadata.insert("started_at".to_string(), episode.started_at.to_rfc3339().into());
        if let Some(score) = episode.energy_score {
            metadata.insert("energy_score".to_string(), score.into());
        }
        Some((RewardSource::FlowState, metadata))
    }
}

impl std::fmt::Display for RewardSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of [`XpLedger::confirm`]
#[derive(Debug, Clone, PartialEq)]
pub enum Confirmation {
    /// Total raised; notify the user once
    Confirmed(XpAward),
    /// Backend granted nothing; award dropped
    Discarded,
    /// Already confirmed earlier
    Duplicate,
    /// Not pending (expired or never issued)
    Unknown,
}

/// Ledger counters for status reporting
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LedgerStats {
    pub requested: u64,
    pub confirmed: u64,
    pub discarded: u64,
    pub expired: u64,
}

pub struct XpLedger {
    total_xp: u64,
    current_streak: u32,
    award_timeout: Duration,
    pending: HashMap<AwardId, XpAward>,
    confirmed_order: VecDeque<AwardId>,
    confirmed: HashSet<AwardId>,
    stats: LedgerStats,
}

impl XpLedger {
    pub fn new(award_timeout: Duration) -> Self {
        Self {
            total_xp: 0,
            current_streak: 0,
            award_timeout,
            pending: HashMap::new(),
            confirmed_order: VecDeque::new(),
            confirmed: HashSet::new(),
            stats: LedgerStats::default(),
        }
    }

    /// Record a provisional award and return it for dispatch.
    ///
    /// Returns `None` when this session isn't the active one.
    pub fn apply_optimistic(
        &mut self,
        source: RewardSource,
        metadata: Metadata,
        active: bool,
        now: DateTime<Utc>,
    ) -> Option<XpAward> {
        if !active {
            tracing::debug!(source = %source, "Not the active session, skipping award");
            return None;
        }

        let award = XpAward {
            id: AwardId::new(),
            source: source.as_str().to_string(),
            amount: 0,
            metadata,
            applied_at: now,
            confirmed: false,
        };
        self.pending.insert(award.id, award.clone());
        self.stats.requested += 1;

        tracing::debug!(award_id = %award.id, source = %source, "Provisional award recorded");
        Some(award)
    }

    /// Apply the backend's acknowledgment
    pub fn confirm(&mut self, id: AwardId, xp_earned: u32) -> Confirmation {
        if self.confirmed.contains(&id) {
            tracing::debug!(award_id = %id, "Duplicate award confirmation ignored");
            return Confirmation::Duplicate;
        }
        let Some(mut award) = self.pending.remove(&id) else {
            tracing::debug!(award_id = %id, "Confirmation for unknown award ignored");
            return Confirmation::Unknown;
        };

        if xp_earned == 0 {
            self.stats.discarded += 1;
            tracing::debug!(award_id = %id, source = %award.source, "Backend granted no XP");
            return Confirmation::Discarded;
        }

        award.amount = xp_earned;
        award.confirmed = true;
        self.total_xp += u64::from(xp_earned);
        self.stats.confirmed += 1;
        self.remember_confirmed(id);

        tracing::info!(
            award_id = %id,
            source = %award.source,
            xp = xp_earned,
            total_xp = self.total_xp,
            "Award confirmed"
        );
        Confirmation::Confirmed(award)
    }

    /// Drop a provisional award the backend refused. Returns whether it was pending.
    pub fn reject(&mut self, id: AwardId) -> bool {
        match self.pending.remove(&id) {
            Some(award) => {
                self.stats.discarded += 1;
                tracing::debug!(award_id = %id, source = %award.source, "Award rejected");
                true
            }
            None => false,
        }
    }

    /// Discard provisional awards older than the award timeout
    pub fn expire(&mut self, now: DateTime<Utc>) -> Vec<XpAward> {
        let timeout = chrono::Duration::from_std(self.award_timeout).unwrap_or_default();
        let stale: Vec<AwardId> = self
            .pending
            .values()
            .filter(|a| now - a.applied_at >= timeout)
            .map(|a| a.id)
            .collect();

        let expired: Vec<XpAward> = stale
            .into_iter()
            .filter_map(|id| self.pending.remove(&id))
            .collect();

        if !expired.is_empty() {
            self.stats.expired += expired.len() as u64;
            tracing::warn!(count = expired.len(), "Provisional awards expired unconfirmed");
        }
        expired
    }

    /// Adopt authoritative totals from the backend.
    ///
    /// The total only moves up; a lagging profile never takes back XP the user
    /// already saw confirmed.
    pub fn reconcile_profile(&mut self, profile: &UserProfile) {
        if profile.total_xp > self.total_xp {
            tracing::debug!(
                local = self.total_xp,
                backend = profile.total_xp,
                "Adopting backend XP total"
            );
            self.total_xp = profile.total_xp;
        }
        self.current_streak = profile.current_streak;
    }

    pub fn total_xp(&self) -> u64 {
        self.total_xp
    }

    pub fn level(&self) -> u32 {
        level_for(self.total_xp)
    }

    pub fn xp_to_next_level(&self) -> u64 {
        xp_for_level(self.level() + 1).saturating_sub(self.total_xp)
    }

    pub fn current_streak(&self) -> u32 {
        self.current_streak
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, id: AwardId) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn stats(&self) -> LedgerStats {
        self.stats
    }

    fn remember_confirmed(&mut self, id: AwardId) {
        self.confirmed.insert(id);
        self.confirmed_order.push_back(id);
        while self.confirmed_order.len() > CONFIRMED_MEMORY {
            if let Some(old) = self.confirmed_order.pop_front() {
                self.confirmed.remove(&old);
            }
        }
    }
}

/// XP needed to reach `level`: `level² × 100`
pub fn xp_for_level(level: u32) -> u64 {
    u64::from(level).pow(2) * 100
}

/// Level for a total; everyone starts at level 1
pub fn level_for(total_xp: u64) -> u32 {
    let mut level = 1;
    while xp_for_level(level + 1) <= total_xp {
        level += 1;
    }
    level
}

//! Flow episodes and break suggestions
//!
//! An episode starts when the classifier reaches `in_flow` and ends when it
//! leaves `in_flow`/`exiting_flow` for anything else. Completed episodes feed
//! `flow_state` XP requests; the running one drives break suggestions.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Episodes shorter than this get no energy score
const MIN_SCORED_HOURS: f64 = 0.1;

/// A finished stretch of flow
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowEpisode {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub edits: u32,
    pub test_runs: u32,
    pub commits: u32,
    pub context_switches: u32,
    /// 0-100, `None` for episodes under six minutes
    pub energy_score: Option<f64>,
}

impl FlowEpisode {
    pub fn duration_minutes(&self) -> i64 {
        (self.ended_at - self.started_at).num_minutes().max(0)
    }
}

/// Running episode accumulator
#[derive(Debug, Clone)]
pub(crate) struct EpisodeTracker {
    started_at: DateTime<Utc>,
    edits: u32,
    test_runs: u32,
    commits: u32,
    files: HashSet<String>,
}

impl EpisodeTracker {
    pub(crate) fn start(at: DateTime<Utc>) -> Self {
        Self {
            started_at: at,
            edits: 0,
            test_runs: 0,
            commits: 0,
            files: HashSet::new(),
        }
    }

    pub(crate) fn record(&mut self, edits: u32, test_runs: u32, commits: u32, files: &HashSet<String>) {
        self.edits += edits;
        self.test_runs += test_runs;
        self.commits += commits;
        self.files.extend(files.iter().cloned());
    }

    pub(crate) fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Moving between files counts as a switch; the first file doesn't
    pub(crate) fn context_switches(&self) -> u32 {
        self.files.len().saturating_sub(1) as u32
    }

    pub(crate) fn finish(self, session_id: &str, ended_at: DateTime<Utc>) -> FlowEpisode {
        let hours = hours_between(self.started_at, ended_at);
        let switches = self.context_switches();
        let energy_score = (hours > MIN_SCORED_HOURS)
            .then(|| energy_score(hours, self.edits, self.test_runs, self.commits, switches));

        FlowEpisode {
            session_id: session_id.to_string(),
            started_at: self.started_at,
            ended_at,
            edits: self.edits,
            test_runs: self.test_runs,
            commits: self.commits,
            context_switches: switches,
            energy_score,
        }
    }

    pub(crate) fn suggest_break(&self, now: DateTime<Utc>) -> Option<BreakSuggestion> {
        let hours = hours_between(self.started_at, now);
        let switch_rate = f64::from(self.context_switches()) / hours.max(0.1);

        let mut score = 0.0;
        let mut reasons = Vec::new();

        if hours > 2.0 {
            score += hours * 10.0;
            reasons.push(format!("Long session ({:.1} hours)", hours));
        }
        if switch_rate > 10.0 {
            score += switch_rate * 2.0;
            reasons.push(format!("High context switching ({:.1}/hour)", switch_rate));
        }

        (score > 50.0).then(|| BreakSuggestion {
            score,
            reasons,
            recommended_minutes: (15 + (hours * 2.0) as u32).min(30),
        })
    }
}

/// Nudge to step away, with the reasons that triggered it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakSuggestion {
    pub score: f64,
    pub reasons: Vec<String>,
    pub recommended_minutes: u32,
}

fn hours_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    ((end - start).num_milliseconds().max(0) as f64) / 3_600_000.0
}

/// Longer, steadier, more productive episodes score higher, capped at 100
fn energy_score(hours: f64, edits: u32, test_runs: u32, commits: u32, switches: u32) -> f64 {
    let duration_score = (hours * 2.0).min(10.0);
    let productivity_score = f64::from(test_runs) * 2.0
        + f64::from(commits) * 5.0
        + (10.0 - f64::from(switches)).max(0.0);
    let keystroke_score = (f64::from(edits) / 1000.0).min(5.0);

    (duration_score + productivity_score + keystroke_score).min(100.0)
}

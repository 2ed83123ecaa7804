//! Flow-state finite state machine
//!
//! Rules, first match wins:
//!
//! 1. silent for `idle_threshold` → `idle`
//! 2. stuck pattern in the window → `stuck` (overrides `in_flow` and `interrupted`)
//! 3. `idle`/`interrupted` with two consecutive high-rate evaluations → `entering_flow`
//! 4. `entering_flow` with another high-rate evaluation → `in_flow`, otherwise back to `idle`
//! 5. `in_flow` touching more files than the switch threshold → `interrupted`
//! 6. `in_flow` silent for one evaluation interval → `exiting_flow`
//! 7. `exiting_flow` resuming at high rate → `in_flow`, otherwise → `idle`
//! 8. `stuck` once the pattern clears → `idle`

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::FlowConfig;
use crate::types::{ActivityRecord, FlowScores, FlowSnapshot, FlowState};

use super::episode::{BreakSuggestion, EpisodeTracker, FlowEpisode};
use super::metrics::WindowMetrics;

/// Everything one evaluation produced
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub snapshot: FlowSnapshot,
    /// Previous state, when the state changed
    pub changed_from: Option<FlowState>,
    /// Set when this evaluation closed a flow episode
    pub completed_episode: Option<FlowEpisode>,
    /// The developer broke out of a stuck loop while still active
    pub stuck_resolved: bool,
}

impl Evaluation {
    pub fn changed(&self) -> bool {
        self.changed_from.is_some()
    }
}

pub struct FlowClassifier {
    config: FlowConfig,
    session_id: String,
    state: FlowState,
    /// Consecutive evaluations at or above the keystroke threshold
    high_streak: u32,
    last_evaluated_at: Option<DateTime<Utc>>,
    episode: Option<EpisodeTracker>,
}

impl FlowClassifier {
    pub fn new(session_id: impl Into<String>, config: FlowConfig) -> Self {
        Self {
            config,
            session_id: session_id.into(),
            state: FlowState::Idle,
            high_streak: 0,
            last_evaluated_at: None,
            episode: None,
        }
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    /// Window length the caller should hand to [`FlowClassifier::evaluate`]
    pub fn window(&self) -> Duration {
        self.config.window()
    }

    /// Run one evaluation over `records` (anything older than the window is ignored).
    ///
    /// `last_activity` is the newest activity ever seen, which may lie outside
    /// the window.
    pub fn evaluate<'a>(
        &mut self,
        records: impl IntoIterator<Item = &'a ActivityRecord>,
        last_activity: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Evaluation {
        let metrics = WindowMetrics::measure(records, now, self.config.window(), self.last_evaluated_at);
        let idle_duration = last_activity
            .map(|t| (now - t).to_std().unwrap_or_default())
            .unwrap_or(self.config.idle_threshold());

        let high = metrics.keystroke_rate >= self.config.keystroke_threshold;
        self.high_streak = if high { self.high_streak + 1 } else { 0 };

        let stuck = metrics.looks_stuck(self.config.stuck_repeat_threshold, self.config.stuck_max_files);
        let previous = self.state;
        let next = self.next_state(previous, &metrics, idle_duration, high, stuck);

        if matches!(next, FlowState::Idle | FlowState::Interrupted | FlowState::Stuck) && next != previous {
            self.high_streak = 0;
        }

        if let Some(episode) = self.episode.as_mut() {
            episode.record(
                metrics.fresh_edits,
                metrics.fresh_test_runs,
                metrics.fresh_commits,
                &metrics.fresh_files,
            );
        }

        let completed_episode = self.update_episode(previous, next, now);
        let stuck_resolved =
            previous == FlowState::Stuck && next != FlowState::Stuck && idle_duration < self.config.idle_threshold();

        if next != previous {
            tracing::debug!(
                session_id = %self.session_id,
                from = %previous,
                to = %next,
                keystroke_rate = metrics.keystroke_rate,
                idle_secs = idle_duration.as_secs(),
                context_switches = metrics.context_switches,
                "Flow state changed"
            );
        }

        self.state = next;
        self.last_evaluated_at = Some(now);

        Evaluation {
            snapshot: FlowSnapshot {
                session_id: self.session_id.clone(),
                state: next,
                keystroke_rate: metrics.keystroke_rate,
                idle_duration,
                context_switches: metrics.context_switches,
                scores: self.scores(&metrics),
                evaluated_at: now,
            },
            changed_from: (next != previous).then_some(previous),
            completed_episode,
            stuck_resolved,
        }
    }

    /// Break suggestion for the running flow episode, if one is warranted
    pub fn suggest_break(&self, now: DateTime<Utc>) -> Option<BreakSuggestion> {
        self.episode.as_ref()?.suggest_break(now)
    }

    /// Start of the running flow episode
    pub fn episode_started_at(&self) -> Option<DateTime<Utc>> {
        self.episode.as_ref().map(|e| e.started_at())
    }

    fn next_state(
        &self,
        current: FlowState,
        metrics: &WindowMetrics,
        idle: Duration,
        high: bool,
        stuck: bool,
    ) -> FlowState {
        if idle >= self.config.idle_threshold() {
            return FlowState::Idle;
        }
        if stuck {
            return FlowState::Stuck;
        }

        let silent_for_interval = idle >= self.config.evaluation_interval();

        match current {
            FlowState::Idle | FlowState::Interrupted => {
                if self.high_streak >= 2 {
                    FlowState::EnteringFlow
                } else {
                    current
                }
            }
            FlowState::EnteringFlow => {
                if high {
                    FlowState::InFlow
                } else {
                    FlowState::Idle
                }
            }
            FlowState::InFlow => {
                if metrics.context_switches > self.config.context_switch_threshold {
                    FlowState::Interrupted
                } else if silent_for_interval {
                    FlowState::ExitingFlow
                } else {
                    FlowState::InFlow
                }
            }
            FlowState::ExitingFlow => {
                if high && !silent_for_interval {
                    FlowState::InFlow
                } else {
                    FlowState::Idle
                }
            }
            FlowState::Stuck => FlowState::Idle,
        }
    }

    fn update_episode(&mut self, from: FlowState, to: FlowState, now: DateTime<Utc>) -> Option<FlowEpisode> {
        let flowing = |s: FlowState| matches!(s, FlowState::InFlow | FlowState::ExitingFlow);

        if to == FlowState::InFlow && self.episode.is_none() {
            self.episode = Some(EpisodeTracker::start(now));
            return None;
        }
        if flowing(from) && !flowing(to) {
            return self.episode.take().map(|e| e.finish(&self.session_id, now));
        }
        None
    }

    fn scores(&self, metrics: &WindowMetrics) -> FlowScores {
        let activity = (metrics.keystroke_rate / self.config.keystroke_threshold).clamp(0.0, 1.0);
        let switch_scale = f64::from(self.config.context_switch_threshold.max(1)) * 2.0;
        let focus = (1.0 - f64::from(metrics.context_switches) / switch_scale).clamp(0.0, 1.0);
        let momentum = (f64::from(metrics.momentum_events) / 3.0).clamp(0.0, 1.0);

        FlowScores {
            activity,
            focus,
            momentum,
            flow: activity * 0.4 + focus * 0.4 + momentum * 0.2,
        }
    }
}

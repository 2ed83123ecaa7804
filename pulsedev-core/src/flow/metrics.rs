//! Per-evaluation measurements over the sliding window

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::types::{ActivityKind, ActivityRecord};

/// Raw counts taken from one window of records
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowMetrics {
    /// Edits per second over the whole window length
    pub keystroke_rate: f64,
    /// Distinct files touched in the window
    pub context_switches: u32,
    /// Saves, opens and focus changes per file
    pub touches: HashMap<String, u32>,
    /// Sum of reported line deltas
    pub net_line_delta: i64,
    /// Test runs, commits and saves
    pub momentum_events: u32,
    /// Edits newer than the previous evaluation
    pub fresh_edits: u32,
    /// Test runs newer than the previous evaluation
    pub fresh_test_runs: u32,
    /// Commits newer than the previous evaluation
    pub fresh_commits: u32,
    /// Files touched since the previous evaluation
    pub fresh_files: HashSet<String>,
}

impl WindowMetrics {
    /// Measure `records` that fall inside `(now - window, now]`.
    ///
    /// `previous` marks the last evaluation; records after it count as fresh.
    pub fn measure<'a>(
        records: impl IntoIterator<Item = &'a ActivityRecord>,
        now: DateTime<Utc>,
        window: Duration,
        previous: Option<DateTime<Utc>>,
    ) -> Self {
        let window_start = now - chrono::Duration::from_std(window).unwrap_or_default();
        let mut metrics = WindowMetrics::default();
        let mut edits = 0u32;
        let mut files: HashSet<&str> = HashSet::new();

        for record in records {
            if record.timestamp <= window_start || record.timestamp > now {
                continue;
            }
            let fresh = previous.map_or(true, |p| record.timestamp > p);

            if let Some(file) = record.file() {
                files.insert(file);
                if fresh {
                    metrics.fresh_files.insert(file.to_string());
                }
            }

            match record.kind {
                ActivityKind::Edit => {
                    edits += 1;
                    metrics.net_line_delta += record.line_delta();
                    if fresh {
                        metrics.fresh_edits += 1;
                    }
                }
                ActivityKind::Save | ActivityKind::FileOpen | ActivityKind::FocusChange => {
                    if let Some(file) = record.file() {
                        *metrics.touches.entry(file.to_string()).or_default() += 1;
                    }
                    if record.kind == ActivityKind::Save {
                        metrics.momentum_events += 1;
                    }
                }
                ActivityKind::TestRun => {
                    metrics.momentum_events += 1;
                    if fresh {
                        metrics.fresh_test_runs += 1;
                    }
                }
                ActivityKind::Commit => {
                    metrics.momentum_events += 1;
                    if fresh {
                        metrics.fresh_commits += 1;
                    }
                }
                _ => {}
            }
        }

        let window_secs = window.as_secs_f64().max(1.0);
        metrics.keystroke_rate = f64::from(edits) / window_secs;
        metrics.context_switches = files.len() as u32;
        metrics
    }

    /// Same few files touched over and over with nothing to show for it
    pub fn looks_stuck(&self, repeat_threshold: u32, max_files: usize) -> bool {
        if self.touches.is_empty() || self.touches.len() > max_files {
            return false;
        }
        if self.context_switches as usize > max_files {
            return false;
        }
        let repeats: u32 = self.touches.values().sum();
        repeats > repeat_threshold && self.net_line_delta == 0
    }
}

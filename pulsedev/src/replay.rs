//! `pulsedev replay`: offline flow classification of a recorded capture
//!
//! The capture is replayed on its own clock. Evaluations run every
//! `flow.evaluation_interval_secs` of capture time from the first event until
//! the developer would have gone idle after the last one.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use pulsedev_core::flow::FlowEpisode;
use pulsedev_core::{ActivityRecord, Config, FlowClassifier, FlowState, Normalizer, RawEvent};
use serde::Serialize;

const REPLAY_SESSION: &str = "replay";

#[derive(Debug, Serialize)]
struct Transition {
    at: DateTime<Utc>,
    from: FlowState,
    to: FlowState,
    keystroke_rate: f64,
    context_switches: u32,
}

#[derive(Debug, Serialize)]
struct Summary {
    event: &'static str,
    records: usize,
    skipped_lines: usize,
    evaluations: usize,
    final_state: FlowState,
    /// Seconds spent in each state
    time_in_state: BTreeMap<String, u64>,
    episodes: Vec<FlowEpisode>,
}

pub fn run(config: &Config, path: &Path, summary_only: bool) -> Result<()> {
    config
        .flow
        .validate()
        .context("flow configuration is invalid")?;

    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let (records, skipped_lines) = read_capture(BufReader::new(file))?;
    if records.is_empty() {
        anyhow::bail!("no events found in {}", path.display());
    }

    let mut classifier = FlowClassifier::new(REPLAY_SESSION, config.flow.clone());
    let step = chrono::Duration::from_std(config.flow.evaluation_interval())
        .context("evaluation interval out of range")?;
    let idle = chrono::Duration::from_std(config.flow.idle_threshold())
        .context("idle threshold out of range")?;
    let window =
        chrono::Duration::from_std(config.flow.window()).context("flow window out of range")?;

    let first = records[0].timestamp;
    let last = records[records.len() - 1].timestamp;
    let end = last + idle + step;

    let mut summary = Summary {
        event: "summary",
        records: records.len(),
        skipped_lines,
        evaluations: 0,
        final_state: classifier.state(),
        time_in_state: BTreeMap::new(),
        episodes: Vec::new(),
    };

    let mut now = first + step;
    while now <= end {
        let (start, seen) = window_bounds(&records, now - window, now);
        let last_activity = seen.checked_sub(1).map(|i| records[i].timestamp);
        let state_before = classifier.state();

        let evaluation = classifier.evaluate(&records[start..seen], last_activity, now);
        summary.evaluations += 1;
        *summary
            .time_in_state
            .entry(state_before.to_string())
            .or_default() += step.num_seconds().max(0) as u64;

        if let Some(from) = evaluation.changed_from {
            let transition = Transition {
                at: now,
                from,
                to: evaluation.snapshot.state,
                keystroke_rate: evaluation.snapshot.keystroke_rate,
                context_switches: evaluation.snapshot.context_switches,
            };
            if !summary_only {
                println!(
                    "{}",
                    serde_json::to_string(&transition).context("failed to encode transition")?
                );
            }
        }
        if let Some(episode) = evaluation.completed_episode {
            summary.episodes.push(episode);
        }
        now += step;
    }

    summary.final_state = classifier.state();
    tracing::info!(
        records = summary.records,
        evaluations = summary.evaluations,
        episodes = summary.episodes.len(),
        "Replay finished"
    );
    println!(
        "{}",
        serde_json::to_string(&summary).context("failed to encode summary")?
    );
    Ok(())
}

/// Index range of sorted `records` inside `(window_start, now]`
fn window_bounds(
    records: &[ActivityRecord],
    window_start: DateTime<Utc>,
    now: DateTime<Utc>,
) -> (usize, usize) {
    let seen = records.partition_point(|r| r.timestamp <= now);
    let start = records[..seen].partition_point(|r| r.timestamp <= window_start);
    (start, seen)
}

/// Parse JSON-lines raw events, sorted by timestamp.
///
/// Events without a timestamp inherit the previous event's; malformed lines
/// are skipped and counted.
fn read_capture(reader: impl BufRead) -> Result<(Vec<ActivityRecord>, usize)> {
    let normalizer = Normalizer::new(REPLAY_SESSION);
    let mut records = Vec::new();
    let mut skipped = 0;
    let mut clock: Option<DateTime<Utc>> = None;

    for (index, line) in reader.lines().enumerate() {
        let line = line.context("failed to read capture")?;
        if line.trim().is_empty() {
            continue;
        }
        let raw: RawEvent = match serde_json::from_str(&line) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(line = index + 1, error = %e, "Skipping malformed event");
                skipped += 1;
                continue;
            }
        };
        let Some(fallback) = raw.timestamp.or(clock) else {
            tracing::warn!(line = index + 1, "Skipping event with no timestamp to anchor it");
            skipped += 1;
            continue;
        };
        let record = normalizer.normalize_at(raw, fallback);
        clock = Some(record.timestamp);
        records.push(record);
    }

    records.sort_by_key(|r| r.timestamp);
    Ok((records, skipped))
}

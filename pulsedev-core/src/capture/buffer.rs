//! Bounded, ordered activity queue
//!
//! The buffer is owned by the tracker loop and only mutated through the
//! methods below. It flushes when the queue reaches `max_batch_size`, when the
//! flush timer fires, or on demand. At most one batch is outstanding; until the
//! tracker reports its outcome with [`ActivityBuffer::complete`] or
//! [`ActivityBuffer::requeue_front`], no further batch is cut, so a retried
//! batch can never be overtaken by newer records. A requeued batch goes out
//! again on its own; records queued behind it start their own attempt count
//! in the next batch.
//!
//! While a batch is outstanding (or the buffer is held because this session is
//! not the active one) the queue may grow to twice the batch size; beyond
//! that the oldest records are dropped. Activity is a statistical signal, so
//! losing old records is preferred over stalling capture.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::CaptureConfig;
use crate::types::{ActivityBatch, ActivityRecord};

/// What happened to a pushed record
#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome {
    /// Queued; nothing else happened
    Queued,
    /// Queued and the queue reached batch size: deliver this batch
    Flush(ActivityBatch),
    /// Queued, but the oldest `dropped` records were evicted
    Overflow { dropped: usize },
    /// Belongs to another session; not queued
    Refused,
}

/// Buffer counters for status reporting
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BufferStats {
    pub pushed: u64,
    pub flushed: u64,
    pub dropped: u64,
    pub refused: u64,
}

pub struct ActivityBuffer {
    session_id: String,
    max_batch_size: usize,
    queue: VecDeque<ActivityRecord>,
    /// Recent records for the flow classifier; survives flushes
    history: VecDeque<ActivityRecord>,
    history_limit: usize,
    in_flight: bool,
    held: bool,
    /// Attempt count carried by requeued records at the head
    pending_attempt: u32,
    /// How many records at the head belong to the requeued batch
    retry_len: usize,
    last_timestamp: Option<DateTime<Utc>>,
    stats: BufferStats,
}

impl ActivityBuffer {
    pub fn new(session_id: impl Into<String>, config: &CaptureConfig) -> Self {
        Self {
            session_id: session_id.into(),
            max_batch_size: config.max_batch_size.max(1),
            queue: VecDeque::new(),
            history: VecDeque::new(),
            history_limit: config.history_limit.max(1),
            in_flight: false,
            held: false,
            pending_attempt: 0,
            retry_len: 0,
            last_timestamp: None,
            stats: BufferStats::default(),
        }
    }

    /// Append a record, flushing synchronously when the batch size is reached
    pub fn push(&mut self, mut record: ActivityRecord) -> PushOutcome {
        if record.session_id != self.session_id {
            self.stats.refused += 1;
            tracing::warn!(
                expected = %self.session_id,
                got = %record.session_id,
                "Refusing activity record from another session"
            );
            return PushOutcome::Refused;
        }

        let now = Utc::now();
        if record.timestamp > now {
            tracing::debug!(kind = %record.kind, "Clamping timestamp ahead of the clock");
            record.timestamp = now;
        }
        // Keep timestamps non-decreasing even if an editor reports out of order
        if let Some(last) = self.last_timestamp {
            if record.timestamp < last {
                tracing::trace!(kind = %record.kind, "Clamping out-of-order timestamp");
                record.timestamp = last;
            }
        }
        self.last_timestamp = Some(record.timestamp);

        self.history.push_back(record.clone());
        while self.history.len() > self.history_limit {
            self.history.pop_front();
        }

        self.queue.push_back(record);
        self.stats.pushed += 1;

        if self.queue.len() < self.max_batch_size {
            return PushOutcome::Queued;
        }

        if self.can_flush() {
            return PushOutcome::Flush(self.take_batch());
        }

        match self.enforce_bound() {
            0 => PushOutcome::Queued,
            dropped => PushOutcome::Overflow { dropped },
        }
    }

    /// Drain the queue into a batch.
    ///
    /// A requeued batch is cut alone with its next attempt number; otherwise
    /// the whole queue goes out as a fresh batch.
    ///
    /// Returns `None` when there is nothing queued, when a batch is already
    /// outstanding, or while the buffer is held. `None` has no side effects.
    pub fn flush(&mut self) -> Option<ActivityBatch> {
        if self.queue.is_empty() {
            return None;
        }
        if !self.can_flush() {
            tracing::debug!(
                queued = self.queue.len(),
                in_flight = self.in_flight,
                held = self.held,
                "Flush deferred"
            );
            return None;
        }
        Some(self.take_batch())
    }

    /// The outstanding batch reached a terminal outcome (delivered or given up)
    pub fn complete(&mut self) {
        self.in_flight = false;
    }

    /// Put a failed batch back at the head, ahead of anything queued since.
    ///
    /// Returns the number of records evicted to stay within bounds.
    pub fn requeue_front(&mut self, batch: ActivityBatch) -> usize {
        self.in_flight = false;
        self.pending_attempt = batch.attempt + 1;
        self.retry_len = batch.records.len();
        for record in batch.records.into_iter().rev() {
            self.queue.push_front(record);
        }
        self.enforce_bound()
    }

    /// Stop cutting batches; records keep queueing within bounds
    pub fn hold(&mut self) {
        self.held = true;
    }

    pub fn release(&mut self) {
        self.held = false;
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Whether the queue has reached batch size
    pub fn is_due(&self) -> bool {
        self.queue.len() >= self.max_batch_size
    }

    /// Throw away everything queued, returning how many records were lost
    pub fn discard(&mut self) -> usize {
        let count = self.queue.len();
        self.queue.clear();
        self.pending_attempt = 0;
        self.retry_len = 0;
        count
    }

    /// Records at or after `since`, oldest first
    pub fn recent(&self, since: DateTime<Utc>) -> impl Iterator<Item = &ActivityRecord> {
        let start = self.history.partition_point(|r| r.timestamp < since);
        self.history.range(start..)
    }

    /// Timestamp of the most recent record ever pushed
    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.last_timestamp
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity_bound(&self) -> usize {
        self.max_batch_size * 2
    }

    pub fn stats(&self) -> BufferStats {
        self.stats
    }

    fn can_flush(&self) -> bool {
        !self.in_flight && !self.held
    }

    fn take_batch(&mut self) -> ActivityBatch {
        let take = match std::mem::take(&mut self.retry_len) {
            0 => self.queue.len(),
            retry => retry.min(self.queue.len()),
        };
        let records: Vec<ActivityRecord> = self.queue.drain(..take).collect();
        self.stats.flushed += records.len() as u64;
        self.in_flight = true;

        ActivityBatch {
            session_id: self.session_id.clone(),
            records,
            attempt: std::mem::take(&mut self.pending_attempt),
        }
    }

    fn enforce_bound(&mut self) -> usize {
        let bound = self.capacity_bound();
        let excess = self.queue.len().saturating_sub(bound);
        if excess > 0 {
            self.queue.drain(..excess);
            self.stats.dropped += excess as u64;
            // Eviction eats into the requeued head first
            if self.retry_len > 0 {
                self.retry_len = self.retry_len.saturating_sub(excess);
                if self.retry_len == 0 {
                    self.pending_attempt = 0;
                }
            }
            tracing::warn!(
                session_id = %self.session_id,
                dropped = excess,
                bound,
                "Activity buffer overflow, dropped oldest records"
            );
        }
        excess
    }
}

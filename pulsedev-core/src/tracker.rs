//! The tracker: one task that owns all engine state
//!
//! Integrations talk to the tracker through a [`TrackerHandle`]. Every call on
//! the handle is a non-blocking channel send; the tracker task owns the
//! buffer, classifier, ledger and session, and mutates them one command at a
//! time. Network calls run as spawned tasks and report back through a second,
//! internal channel, so nothing on the capture path ever waits on I/O.
//!
//! ```text
//! TrackerHandle ──commands──▶ ┌──────────┐ ──spawn──▶ Backend call
//! timers ───────internal────▶ │ tracker  │ ◀─internal── result
//!                             └──────────┘
//!                               │      │
//!                     watch(status)  broadcast(events)
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::capture::{ActivityBuffer, BufferStats, Normalizer, PushOutcome, RawEvent};
use crate::config::{Config, Features};
use crate::error::{Error, Result};
use crate::flow::{BreakSuggestion, FlowClassifier};
use crate::ledger::{Confirmation, LedgerStats, RewardSource, XpLedger};
use crate::session::{Designation, Lifecycle, SessionManager};
use crate::sync::{
    backoff_delay, with_retry, AwardRequest, Backend, BatchPayload, SessionSyncRequest, SyncData,
};
use crate::types::{ActivityBatch, ActivityRecord, AwardId, FlowSnapshot, FlowState, Metadata, XpAward};

/// How often provisional awards are checked for expiry
const AWARD_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Notifications buffered per subscriber before it starts lagging
const EVENT_CAPACITY: usize = 64;

/// User-facing notifications
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TrackerEvent {
    FlowChanged {
        from: FlowState,
        to: FlowState,
        snapshot: FlowSnapshot,
    },
    XpAwarded {
        award: XpAward,
        total_xp: u64,
        level: u32,
    },
    LevelUp {
        level: u32,
    },
    BreakSuggested(BreakSuggestion),
    DesignationChanged {
        from: Designation,
        to: Designation,
    },
    /// First backend rejection since the last successful request
    BackendRejected {
        operation: &'static str,
        message: String,
    },
    /// A batch was given up after its retries
    DeliveryFailed {
        records: usize,
        attempts: u32,
        reason: String,
    },
    RecordsDropped {
        count: usize,
    },
}

/// Everything a status line needs, published after every state change
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub session_id: Option<String>,
    pub lifecycle: Lifecycle,
    pub designation: Designation,
    pub flow_state: FlowState,
    pub flow: Option<FlowSnapshot>,
    pub total_xp: u64,
    pub level: u32,
    pub xp_to_next_level: u64,
    pub current_streak: u32,
    pub pending_awards: usize,
    pub queued_records: usize,
    pub buffer: BufferStats,
    pub ledger: LedgerStats,
    pub delivered_batches: u64,
    pub failed_batches: u64,
    pub last_sync_at: Option<DateTime<Utc>>,
}

/// What `stop` left behind
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StopReport {
    pub session_id: String,
    /// Records that were never delivered, including an abandoned batch
    pub discarded_records: usize,
    /// Requests still running when the drain timeout expired
    pub abandoned_requests: usize,
    /// Provisional awards that never got an answer
    pub unconfirmed_awards: usize,
    pub total_xp: u64,
}

enum Command {
    Capture(RawEvent),
    Record(ActivityRecord),
    Flush,
    Evaluate,
    Sync,
    Stop(oneshot::Sender<StopReport>),
}

#[derive(Debug, Clone, Copy)]
enum Timer {
    Flush,
    Evaluate,
    Sync,
    SweepAwards,
}

enum Internal {
    Tick(Timer),
    BatchDone {
        batch: ActivityBatch,
        result: Result<()>,
    },
    RetryDue,
    AwardDone {
        id: AwardId,
        result: Result<u32>,
    },
    SyncDone(Result<SyncData>),
}

/// Cheap, cloneable capture endpoint for integration tasks
#[derive(Clone)]
pub struct Capturer {
    commands: mpsc::UnboundedSender<Command>,
}

impl Capturer {
    /// Hand a raw editor event to the tracker. Never blocks.
    pub fn capture(&self, raw: RawEvent) -> Result<()> {
        self.commands
            .send(Command::Capture(raw))
            .map_err(|_| Error::TrackerClosed)
    }

    /// Hand an already-normalized record to the tracker. Never blocks.
    pub fn record(&self, record: ActivityRecord) -> Result<()> {
        self.commands
            .send(Command::Record(record))
            .map_err(|_| Error::TrackerClosed)
    }
}

/// Owner's handle on a running tracker
pub struct TrackerHandle {
    capturer: Capturer,
    status: watch::Receiver<StatusSnapshot>,
    events: broadcast::Sender<TrackerEvent>,
    task: Option<JoinHandle<()>>,
    report: Option<StopReport>,
    session_id: String,
}

impl TrackerHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn capturer(&self) -> Capturer {
        self.capturer.clone()
    }

    pub fn capture(&self, raw: RawEvent) -> Result<()> {
        self.capturer.capture(raw)
    }

    pub fn record(&self, record: ActivityRecord) -> Result<()> {
        self.capturer.record(record)
    }

    /// Cut a batch now instead of waiting for the flush timer
    pub fn flush(&self) -> Result<()> {
        self.send(Command::Flush)
    }

    /// Run a classifier evaluation now
    pub fn evaluate(&self) -> Result<()> {
        self.send(Command::Evaluate)
    }

    /// Run a session sync now
    pub fn sync_now(&self) -> Result<()> {
        self.send(Command::Sync)
    }

    /// Latest status snapshot
    pub fn status(&self) -> StatusSnapshot {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<StatusSnapshot> {
        self.status.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.events.subscribe()
    }

    /// Stop the tracker and wait for it to drain.
    ///
    /// Calling `stop` again returns the first report.
    pub async fn stop(&mut self) -> Result<StopReport> {
        if let Some(report) = &self.report {
            return Ok(report.clone());
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Command::Stop(reply_tx))?;
        let report = reply_rx.await.map_err(|_| Error::TrackerClosed)?;

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Tracker task failed to join");
            }
        }
        self.report = Some(report.clone());
        Ok(report)
    }

    fn send(&self, command: Command) -> Result<()> {
        self.capturer
            .commands
            .send(command)
            .map_err(|_| Error::TrackerClosed)
    }
}

/// Start a tracker on the current tokio runtime.
///
/// `backend` is `None` for offline capture. `session_id` pins the identity,
/// otherwise a fresh one is generated.
pub fn spawn(
    config: Config,
    backend: Option<Arc<dyn Backend>>,
    session_id: Option<String>,
) -> Result<TrackerHandle> {
    let (mut features, problems) = config.features();
    for problem in &problems {
        tracing::warn!(error = %problem, "Feature disabled by configuration");
    }
    if backend.is_none() && features.sync {
        tracing::info!("No backend client supplied, running offline");
    }
    if backend.is_none() {
        features.sync = false;
        features.rewards = false;
    }

    let now = Utc::now();
    let mut session = SessionManager::new();
    let id = match session_id {
        Some(id) => session.initialize_with_id(id, now).id.clone(),
        None => session.initialize(now).id.clone(),
    };
    session.start()?;

    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (internal_tx, internal_rx) = mpsc::unbounded_channel();
    let (status_tx, status_rx) = watch::channel(StatusSnapshot::default());
    let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);

    let mut buffer = ActivityBuffer::new(id.clone(), &config.capture);
    if features.sync {
        // Nothing goes out until the first sync designates this session
        buffer.hold();
    }

    let classifier = features
        .flow
        .then(|| FlowClassifier::new(id.clone(), config.flow.clone()));

    let tracker = Tracker {
        normalizer: Normalizer::new(id.clone()),
        ledger: XpLedger::new(config.rewards.award_timeout()),
        config,
        features,
        backend,
        session,
        buffer,
        classifier,
        internal_tx,
        status_tx,
        events_tx: events_tx.clone(),
        requests: Vec::new(),
        retry_batch: None,
        sending: 0,
        sync_in_flight: false,
        rejection_surfaced: false,
        delivered_batches: 0,
        failed_batches: 0,
        flow: None,
        break_suggested_for: None,
    };

    tracing::info!(
        session_id = %id,
        sync = features.sync,
        flow = features.flow,
        rewards = features.rewards,
        "Tracker starting"
    );
    let task = tokio::spawn(tracker.run(commands_rx, internal_rx));

    Ok(TrackerHandle {
        capturer: Capturer {
            commands: commands_tx,
        },
        status: status_rx,
        events: events_tx,
        task: Some(task),
        report: None,
        session_id: id,
    })
}

struct Tracker {
    config: Config,
    features: Features,
    backend: Option<Arc<dyn Backend>>,
    session: SessionManager,
    normalizer: Normalizer,
    buffer: ActivityBuffer,
    classifier: Option<FlowClassifier>,
    ledger: XpLedger,
    internal_tx: mpsc::UnboundedSender<Internal>,
    status_tx: watch::Sender<StatusSnapshot>,
    events_tx: broadcast::Sender<TrackerEvent>,
    /// Backend calls still running
    requests: Vec<JoinHandle<()>>,
    /// Failed batch waiting out its backoff; keeps the buffer from cutting another
    retry_batch: Option<ActivityBatch>,
    /// Records in the batch currently on the wire
    sending: usize,
    sync_in_flight: bool,
    rejection_surfaced: bool,
    delivered_batches: u64,
    failed_batches: u64,
    flow: Option<FlowSnapshot>,
    /// Episode start the last break suggestion was made for
    break_suggested_for: Option<DateTime<Utc>>,
}

impl Tracker {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
    ) {
        self.start_timers();
        self.dispatch_sync();
        self.publish_status();

        let reply = loop {
            tokio::select! {
                biased;
                Some(message) = internal.recv() => self.handle_internal(message),
                command = commands.recv() => match command {
                    Some(Command::Stop(reply)) => break Some(reply),
                    Some(command) => self.handle_command(command),
                    // Every handle dropped without stopping
                    None => break None,
                },
            }
        };

        let report = self.shutdown(&mut internal).await;
        if let Some(reply) = reply {
            let _ = reply.send(report);
        }
    }

    fn start_timers(&mut self) {
        let mut timers = vec![(Timer::Flush, "flush", self.config.capture.flush_interval())];
        if self.features.flow {
            timers.push((Timer::Evaluate, "evaluate", self.config.flow.evaluation_interval()));
        }
        if self.features.sync {
            timers.push((Timer::Sync, "sync", self.config.session.sync_interval()));
        }
        if self.features.rewards {
            timers.push((Timer::SweepAwards, "award_sweep", AWARD_SWEEP_INTERVAL));
        }

        for (timer, name, period) in timers {
            let tx = self.internal_tx.clone();
            if let Err(e) = self
                .session
                .spawn_timer(name, period, move || tx.send(Internal::Tick(timer)).is_ok())
            {
                tracing::error!(timer = name, error = %e, "Failed to start timer");
            }
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Capture(raw) => {
                let record = self.normalizer.normalize(raw);
                self.ingest(record);
            }
            Command::Record(record) => self.ingest(record),
            Command::Flush => self.flush(),
            Command::Evaluate => self.evaluate(),
            Command::Sync => self.dispatch_sync(),
            // Handled by the run loop
            Command::Stop(_) => {}
        }
        self.publish_status();
    }

    fn handle_internal(&mut self, message: Internal) {
        let stopped = self.session.lifecycle() == Lifecycle::Stopped;
        match message {
            Internal::Tick(_) if stopped => {}
            Internal::Tick(Timer::Flush) => self.flush(),
            Internal::Tick(Timer::Evaluate) => self.evaluate(),
            Internal::Tick(Timer::Sync) => self.dispatch_sync(),
            Internal::Tick(Timer::SweepAwards) => {
                self.ledger.expire(Utc::now());
            }
            Internal::BatchDone { batch, result } => self.batch_done(batch, result),
            Internal::RetryDue => self.retry_due(),
            Internal::AwardDone { id, result } => self.award_done(id, result),
            Internal::SyncDone(result) => self.sync_done(result),
        }
        self.publish_status();
    }

    // ============================================
    // Capture and delivery
    // ============================================

    fn ingest(&mut self, record: ActivityRecord) {
        if self.session.lifecycle() != Lifecycle::Active {
            tracing::debug!(kind = %record.kind, "Tracker not active, dropping record");
            return;
        }

        let reward = RewardSource::for_record(&record);
        match self.buffer.push(record) {
            PushOutcome::Queued => {}
            PushOutcome::Flush(batch) => self.dispatch_batch(batch),
            PushOutcome::Overflow { dropped } => self.emit(TrackerEvent::RecordsDropped { count: dropped }),
            PushOutcome::Refused => return,
        }

        if let Some((source, metadata)) = reward {
            self.request_award(source, metadata);
        }
    }

    fn flush(&mut self) {
        if self.session.lifecycle() != Lifecycle::Active {
            return;
        }
        if let Some(batch) = self.buffer.flush() {
            self.dispatch_batch(batch);
        }
    }

    fn dispatch_batch(&mut self, batch: ActivityBatch) {
        let Some(backend) = self.backend.clone() else {
            // Offline: flow inference already saw these via the history
            tracing::debug!(records = batch.len(), "Offline, batch not delivered");
            self.buffer.complete();
            return;
        };

        tracing::debug!(records = batch.len(), attempt = batch.attempt, "Delivering batch");
        let payload = BatchPayload::from_batch(&batch);
        self.sending = batch.len();
        let tx = self.internal_tx.clone();
        self.spawn_request(async move {
            let result = backend.track_activity(&payload).await;
            let _ = tx.send(Internal::BatchDone { batch, result });
        });
    }

    fn batch_done(&mut self, batch: ActivityBatch, result: Result<()>) {
        self.sending = 0;
        match result {
            Ok(()) => {
                self.buffer.complete();
                self.delivered_batches += 1;
                self.rejection_surfaced = false;
                tracing::debug!(records = batch.len(), "Batch delivered");
                self.flush_backlog(&batch);
            }
            Err(e)
                if e.is_transient()
                    && batch.attempt < self.config.backend.retry_count
                    && self.session.lifecycle() == Lifecycle::Active =>
            {
                let delay = backoff_delay(batch.attempt + 1);
                tracing::warn!(
                    records = batch.len(),
                    attempt = batch.attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Batch delivery failed, will retry"
                );
                self.retry_batch = Some(batch);

                let tx = self.internal_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(Internal::RetryDue);
                });
            }
            Err(e) => {
                self.buffer.complete();
                self.failed_batches += 1;
                tracing::warn!(
                    records = batch.len(),
                    attempts = batch.attempt + 1,
                    error = %e,
                    "Giving up on batch"
                );
                if !e.is_transient() {
                    self.surface_rejection("track_activity", &e);
                }
                self.emit(TrackerEvent::DeliveryFailed {
                    records: batch.len(),
                    attempts: batch.attempt + 1,
                    reason: e.to_string(),
                });
                self.flush_backlog(&batch);
            }
        }
    }

    /// After a batch settles, send what queued up behind it if it is due.
    /// Records that waited out a retry are always due.
    fn flush_backlog(&mut self, settled: &ActivityBatch) {
        if self.buffer.is_due() || (settled.attempt > 0 && !self.buffer.is_empty()) {
            self.flush();
        }
    }

    fn retry_due(&mut self) {
        let Some(batch) = self.retry_batch.take() else {
            return;
        };
        if self.session.lifecycle() != Lifecycle::Active {
            self.retry_batch = Some(batch);
            return;
        }

        let dropped = self.buffer.requeue_front(batch);
        if dropped > 0 {
            self.emit(TrackerEvent::RecordsDropped { count: dropped });
        }
        self.flush();
    }

    // ============================================
    // Rewards
    // ============================================

    fn request_award(&mut self, source: RewardSource, metadata: Metadata) {
        if !self.features.rewards {
            return;
        }
        let Some(backend) = self.backend.clone() else {
            return;
        };
        let active = self.session.is_designated_active();
        let Some(award) = self.ledger.apply_optimistic(source, metadata, active, Utc::now()) else {
            return;
        };

        let request = AwardRequest {
            session_id: self.buffer.session_id().to_string(),
            source: award.source.clone(),
            metadata: award.metadata.clone(),
        };
        let retries = self.config.backend.retry_count;
        let tx = self.internal_tx.clone();
        let id = award.id;
        self.spawn_request(async move {
            let result = with_retry("award_xp", retries, || backend.award_xp(&request)).await;
            let _ = tx.send(Internal::AwardDone { id, result });
        });
    }

    fn award_done(&mut self, id: AwardId, result: Result<u32>) {
        match result {
            Ok(xp_earned) => {
                self.rejection_surfaced = false;
                let level_before = self.ledger.level();
                if let Confirmation::Confirmed(award) = self.ledger.confirm(id, xp_earned) {
                    let level = self.ledger.level();
                    self.emit(TrackerEvent::XpAwarded {
                        award,
                        total_xp: self.ledger.total_xp(),
                        level,
                    });
                    if level > level_before {
                        self.emit(TrackerEvent::LevelUp { level });
                    }
                }
            }
            Err(e) => {
                self.ledger.reject(id);
                if e.is_transient() {
                    tracing::warn!(award_id = %id, error = %e, "Award request failed");
                } else {
                    self.surface_rejection("award_xp", &e);
                }
            }
        }
    }

    // ============================================
    // Session sync
    // ============================================

    fn dispatch_sync(&mut self) {
        if !self.features.sync || self.sync_in_flight {
            return;
        }
        let Some(backend) = self.backend.clone() else {
            return;
        };

        let request = SessionSyncRequest {
            session_id: self.buffer.session_id().to_string(),
            platform: self.config.backend.platform.clone(),
        };
        let retries = self.config.backend.retry_count;
        let tx = self.internal_tx.clone();
        self.sync_in_flight = true;
        self.spawn_request(async move {
            let result = with_retry("sync_session", retries, || backend.sync_session(&request)).await;
            let _ = tx.send(Internal::SyncDone(result));
        });
    }

    fn sync_done(&mut self, result: Result<SyncData>) {
        self.sync_in_flight = false;
        let data = match result {
            Ok(data) => data,
            Err(e) => {
                if e.is_transient() {
                    tracing::warn!(error = %e, "Session sync failed, keeping last designation");
                } else {
                    self.surface_rejection("sync_session", &e);
                }
                return;
            }
        };
        self.rejection_surfaced = false;

        if let Some(from) = self.session.apply_sync(&data, Utc::now()) {
            self.emit(TrackerEvent::DesignationChanged {
                from,
                to: self.session.designation(),
            });
        }
        if let Some(profile) = &data.user_profile {
            self.ledger.reconcile_profile(profile);
        }

        if self.session.is_designated_active() {
            if self.buffer.is_held() {
                self.buffer.release();
                if self.buffer.is_due() {
                    self.flush();
                }
            }
        } else {
            self.buffer.hold();
        }
    }

    // ============================================
    // Flow
    // ============================================

    fn evaluate(&mut self) {
        let Some(classifier) = self.classifier.as_mut() else {
            return;
        };
        let now = Utc::now();
        let since = now - chrono::Duration::from_std(classifier.window()).unwrap_or_default();
        let evaluation = classifier.evaluate(self.buffer.recent(since), self.buffer.last_activity(), now);

        let suggestion = classifier.suggest_break(now);
        let episode_start = classifier.episode_started_at();

        if let Some(from) = evaluation.changed_from {
            self.emit(TrackerEvent::FlowChanged {
                from,
                to: evaluation.snapshot.state,
                snapshot: evaluation.snapshot.clone(),
            });
        }

        if let Some(episode) = &evaluation.completed_episode {
            tracing::info!(
                minutes = episode.duration_minutes(),
                energy_score = ?episode.energy_score,
                "Flow episode completed"
            );
            if let Some((source, metadata)) = RewardSource::for_episode(episode) {
                self.request_award(source, metadata);
            }
        }

        if evaluation.stuck_resolved {
            let mut metadata = Metadata::new();
            metadata.insert("resolved_at".to_string(), now.to_rfc3339().into());
            self.request_award(RewardSource::StuckStateResolve, metadata);
        }

        if let Some(suggestion) = suggestion {
            if episode_start.is_some() && self.break_suggested_for != episode_start {
                self.break_suggested_for = episode_start;
                self.emit(TrackerEvent::BreakSuggested(suggestion));
            }
        }

        self.flow = Some(evaluation.snapshot);
    }

    // ============================================
    // Plumbing
    // ============================================

    fn spawn_request<F>(&mut self, request: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.requests.retain(|handle| !handle.is_finished());
        self.requests.push(tokio::spawn(request));
    }

    fn in_flight(&mut self) -> usize {
        self.requests.retain(|handle| !handle.is_finished());
        self.requests.len()
    }

    fn surface_rejection(&mut self, operation: &'static str, error: &Error) {
        tracing::warn!(operation, error = %error, "Backend rejected request");
        if self.rejection_surfaced {
            return;
        }
        self.rejection_surfaced = true;
        self.emit(TrackerEvent::BackendRejected {
            operation,
            message: error.to_string(),
        });
    }

    fn emit(&self, event: TrackerEvent) {
        // No subscribers is fine
        let _ = self.events_tx.send(event);
    }

    fn publish_status(&self) {
        self.status_tx.send_replace(self.snapshot());
    }

    fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            session_id: self.session.id().map(str::to_string),
            lifecycle: self.session.lifecycle(),
            designation: self.session.designation(),
            flow_state: self
                .classifier
                .as_ref()
                .map(|c| c.state())
                .unwrap_or_default(),
            flow: self.flow.clone(),
            total_xp: self.ledger.total_xp(),
            level: self.ledger.level(),
            xp_to_next_level: self.ledger.xp_to_next_level(),
            current_streak: self.ledger.current_streak(),
            pending_awards: self.ledger.pending_count(),
            queued_records: self.buffer.len(),
            buffer: self.buffer.stats(),
            ledger: self.ledger.stats(),
            delivered_batches: self.delivered_batches,
            failed_batches: self.failed_batches,
            last_sync_at: self.session.last_sync_at(),
        }
    }

    /// Cancel timers, let running requests finish within the drain timeout,
    /// then discard whatever is left.
    async fn shutdown(&mut self, internal: &mut mpsc::UnboundedReceiver<Internal>) -> StopReport {
        self.session.stop();
        self.publish_status();

        let deadline = tokio::time::Instant::now() + self.config.session.drain_timeout();
        while self.in_flight() > 0 {
            match tokio::time::timeout_at(deadline, internal.recv()).await {
                Ok(Some(message)) => self.handle_internal(message),
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        in_flight = self.requests.len(),
                        "Drain timeout reached, abandoning requests"
                    );
                    break;
                }
            }
        }
        // Results that landed after the last in-flight check
        while let Ok(message) = internal.try_recv() {
            self.handle_internal(message);
        }

        let abandoned_requests = self.in_flight();
        for handle in self.requests.drain(..) {
            handle.abort();
        }
        self.session.join_timers().await;

        let retrying = self.retry_batch.take().map(|b| b.len()).unwrap_or(0);
        let abandoned_records = std::mem::take(&mut self.sending);
        let discarded_records = self.buffer.discard() + retrying + abandoned_records;
        if discarded_records > 0 {
            tracing::warn!(count = discarded_records, "Discarding undelivered records on stop");
        }

        let report = StopReport {
            session_id: self.buffer.session_id().to_string(),
            discarded_records,
            abandoned_requests,
            unconfirmed_awards: self.ledger.pending_count(),
            total_xp: self.ledger.total_xp(),
        };
        self.publish_status();
        tracing::info!(
            session_id = %report.session_id,
            discarded_records,
            abandoned_requests,
            unconfirmed_awards = report.unconfirmed_awards,
            "Tracker stopped"
        );
        report
    }
}

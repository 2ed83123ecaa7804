//! Integration tests for the HTTP client and the tracker
//!
//! HTTP behaviour runs against `wiremock` servers; tracker scenarios use an
//! in-process fake backend with paused tokio time so retries and timers are
//! deterministic.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio::sync::broadcast;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use pulsedev_core::config::BackendConfig;
use pulsedev_core::sync::{
    Achievements, ApiClient, AwardRequest, Backend, BatchPayload, SessionSyncRequest, SyncData,
    UserProfile, UserStats,
};
use pulsedev_core::tracker::{self, TrackerEvent};
use pulsedev_core::{
    ActivityBatch, ActivityBuffer, ActivityKind, ActivityRecord, Config, Designation, Error,
    FlowClassifier, FlowState, Metadata, RawEvent, Result,
};

// ============================================
// ApiClient against a mock server
// ============================================

fn client_for(server: &MockServer) -> ApiClient {
    ApiClient::new(BackendConfig {
        enabled: true,
        server_url: Some(server.uri()),
        api_key: Some("pk_test".to_string()),
        platform: "nvim".to_string(),
        ..Default::default()
    })
    .expect("valid client config")
}

fn award_request() -> AwardRequest {
    AwardRequest {
        session_id: "s1".to_string(),
        source: "commit".to_string(),
        metadata: Metadata::new(),
    }
}

#[tokio::test]
async fn test_award_request_returns_xp_earned() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/gamification/xp/award"))
        .and(header("authorization", "Bearer pk_test"))
        .and(body_partial_json(json!({"session_id": "s1", "source": "commit"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "xp_earned": 50,
            "session_id": "s1",
            "source": "commit"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let xp = client_for(&server).award_xp(&award_request()).await.unwrap();
    assert_eq!(xp, 50);
}

#[tokio::test]
async fn test_success_false_is_a_rejection() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/gamification/xp/award"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"success": false, "message": "session not active"})),
        )
        .mount(&server)
        .await;

    let err = client_for(&server).award_xp(&award_request()).await.unwrap_err();
    match &err {
        Error::Rejected { status, message } => {
            assert_eq!(*status, 200);
            assert_eq!(message, "session not active");
        }
        other => panic!("expected rejection, got {:?}", other),
    }
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_server_errors_are_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/gamification/activity/track"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let payload = BatchPayload::from_batch(&ActivityBatch {
        session_id: "s1".to_string(),
        records: vec![ActivityRecord::new(ActivityKind::Save, "s1", Utc::now())],
        attempt: 0,
    });
    let err = client_for(&server).track_activity(&payload).await.unwrap_err();
    assert!(matches!(err, Error::Rejected { status: 503, .. }));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_unparseable_body_is_a_rejection() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/gamification/session/sync"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy error</html>"))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .sync_session(&SessionSyncRequest {
            session_id: "s1".to_string(),
            platform: "nvim".to_string(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Rejected { .. }));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_batch_payload_on_the_wire() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/gamification/activity/track"))
        .and(body_partial_json(json!({
            "session_id": "s1",
            "type": "activity_batch",
            "attempt": 1,
            "records": [{"type": "edit", "session_id": "s1"}, {"type": "save"}]
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"success": true, "message": "Activity tracked successfully"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let now = Utc::now();
    let payload = BatchPayload::from_batch(&ActivityBatch {
        session_id: "s1".to_string(),
        records: vec![
            ActivityRecord::new(ActivityKind::Edit, "s1", now),
            ActivityRecord::new(ActivityKind::Save, "s1", now),
        ],
        attempt: 1,
    });
    client_for(&server).track_activity(&payload).await.unwrap();
}

#[tokio::test]
async fn test_session_sync_and_views() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/gamification/session/sync"))
        .and(body_partial_json(json!({"session_id": "s1", "platform": "nvim"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "sync_data": {
                "active_session": "s1",
                "platform": "nvim",
                "user_profile": {"total_xp": 1234, "level": 3, "current_streak": 5}
            }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/gamification/profile/s%201"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "profile": {
                "profile": {"total_xp": 1234, "level": 3},
                "next_level_xp": 366,
                "weekly_progress": {"total_xp": 200}
            }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/gamification/achievements/s1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "achievements": {
                "unlocked": [{"name": "First Commit"}],
                "available": [{"name": "First Commit"}, {"name": "Flow Master"}]
            }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/gamification/dashboard/s1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "dashboard": {"user_stats": {}, "leaderboards": {"xp": [], "streaks": []}}
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);

    let data = client
        .sync_session(&SessionSyncRequest {
            session_id: "s1".to_string(),
            platform: "nvim".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(data.active_session.as_deref(), Some("s1"));
    assert_eq!(data.user_profile.unwrap().current_streak, 5);

    let stats = client.fetch_profile("s 1").await.unwrap();
    assert_eq!(stats.profile.total_xp, 1234);
    assert_eq!(stats.next_level_xp, Some(366));

    let achievements = client.fetch_achievements("s1").await.unwrap();
    assert_eq!(achievements.unlocked.len(), 1);
    assert_eq!(achievements.available.len(), 2);

    let dashboard = client.fetch_dashboard("s1").await.unwrap();
    assert!(dashboard["leaderboards"]["xp"].is_array());
}

// ============================================
// Tracker against a fake backend
// ============================================

#[derive(Default)]
struct FakeBackend {
    /// Session the fake designates on every sync
    active_session: Mutex<Option<String>>,
    profile: Mutex<Option<UserProfile>>,
    xp_per_award: u32,
    /// Transient failures to return before accepting batches
    track_failures: AtomicU32,
    /// How long each batch delivery takes
    track_delay: Duration,
    reject_awards: bool,
    batches: Mutex<Vec<BatchPayload>>,
    award_calls: AtomicU32,
    sync_calls: AtomicU32,
}

impl FakeBackend {
    fn designating(session: &str) -> Self {
        Self {
            active_session: Mutex::new(Some(session.to_string())),
            xp_per_award: 50,
            ..Default::default()
        }
    }

    fn delivered_sequences(&self) -> Vec<Vec<i64>> {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .map(|b| {
                b.records
                    .iter()
                    .map(|r| r.metadata["seq"].as_i64().unwrap())
                    .collect()
            })
            .collect()
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn track_activity(&self, payload: &BatchPayload) -> Result<()> {
        if !self.track_delay.is_zero() {
            tokio::time::sleep(self.track_delay).await;
        }
        if self
            .track_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Error::Transport("connection reset".to_string()));
        }
        self.batches.lock().unwrap().push(payload.clone());
        Ok(())
    }

    async fn award_xp(&self, _request: &AwardRequest) -> Result<u32> {
        self.award_calls.fetch_add(1, Ordering::SeqCst);
        if self.reject_awards {
            return Err(Error::Rejected {
                status: 403,
                message: "forbidden".to_string(),
            });
        }
        Ok(self.xp_per_award)
    }

    async fn sync_session(&self, _request: &SessionSyncRequest) -> Result<SyncData> {
        self.sync_calls.fetch_add(1, Ordering::SeqCst);
        Ok(SyncData {
            active_session: self.active_session.lock().unwrap().clone(),
            platform: Some("test".to_string()),
            user_profile: self.profile.lock().unwrap().clone(),
        })
    }

    async fn fetch_profile(&self, _session_id: &str) -> Result<UserStats> {
        Ok(UserStats::default())
    }

    async fn fetch_dashboard(&self, _session_id: &str) -> Result<serde_json::Value> {
        Ok(json!({}))
    }

    async fn fetch_achievements(&self, _session_id: &str) -> Result<Achievements> {
        Ok(Achievements::default())
    }
}

fn online_config(max_batch_size: usize) -> Config {
    let mut config = Config::default();
    config.backend = BackendConfig {
        enabled: true,
        server_url: Some("http://pulse.test".to_string()),
        ..Default::default()
    };
    config.capture.max_batch_size = max_batch_size;
    config
}

fn seq_record(session: &str, seq: i64) -> ActivityRecord {
    ActivityRecord::new(ActivityKind::Edit, session, Utc::now()).with_meta("seq", seq)
}

async fn next_matching<F>(events: &mut broadcast::Receiver<TrackerEvent>, mut pred: F) -> TrackerEvent
where
    F: FnMut(&TrackerEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(60), async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) => continue,
                Err(e) => panic!("event stream failed: {}", e),
            }
        }
    })
    .await
    .expect("timed out waiting for tracker event")
}

async fn become_active(events: &mut broadcast::Receiver<TrackerEvent>) {
    next_matching(events, |e| {
        matches!(
            e,
            TrackerEvent::DesignationChanged {
                to: Designation::Active,
                ..
            }
        )
    })
    .await;
}

/// Let the tracker and its spawned requests run to quiescence
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test(start_paused = true)]
async fn test_confirmed_award_raises_total_once() {
    let backend = Arc::new(FakeBackend::designating("s1"));
    let mut handle = tracker::spawn(online_config(20), Some(backend.clone()), Some("s1".to_string())).unwrap();
    let mut events = handle.subscribe();
    become_active(&mut events).await;

    assert_eq!(handle.status().total_xp, 0);
    handle
        .capture(RawEvent::new("git_commit", json!({"message": "fix parser"})))
        .unwrap();

    let event = next_matching(&mut events, |e| matches!(e, TrackerEvent::XpAwarded { .. })).await;
    match event {
        TrackerEvent::XpAwarded { award, total_xp, .. } => {
            assert_eq!(award.amount, 50);
            assert_eq!(award.source, "commit");
            assert!(award.confirmed);
            assert_eq!(total_xp, 50);
        }
        other => panic!("unexpected event {:?}", other),
    }

    settle().await;
    while let Ok(event) = events.try_recv() {
        assert!(!matches!(event, TrackerEvent::XpAwarded { .. }), "second notification");
    }
    assert_eq!(handle.status().total_xp, 50);
    assert_eq!(backend.award_calls.load(Ordering::SeqCst), 1);

    handle.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_standby_session_buffers_without_rewards() {
    let backend = Arc::new(FakeBackend::designating("other-session"));
    let mut handle = tracker::spawn(online_config(3), Some(backend.clone()), Some("s1".to_string())).unwrap();
    let mut events = handle.subscribe();

    next_matching(&mut events, |e| {
        matches!(
            e,
            TrackerEvent::DesignationChanged {
                to: Designation::Standby,
                ..
            }
        )
    })
    .await;

    handle.record(ActivityRecord::new(ActivityKind::Commit, "s1", Utc::now())).unwrap();
    for seq in 0..4 {
        handle.record(seq_record("s1", seq)).unwrap();
    }
    handle.flush().unwrap();
    settle().await;

    let status = handle.status();
    assert_eq!(status.designation, Designation::Standby);
    assert_eq!(status.queued_records, 5);
    assert_eq!(status.total_xp, 0);
    assert_eq!(backend.award_calls.load(Ordering::SeqCst), 0);
    assert!(backend.batches.lock().unwrap().is_empty());

    // Regaining the designation releases the held records in order
    *backend.active_session.lock().unwrap() = Some("s1".to_string());
    handle.sync_now().unwrap();
    become_active(&mut events).await;
    settle().await;

    let delivered = backend.batches.lock().unwrap().clone();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].records.len(), 5);
    assert_eq!(delivered[0].records[0].kind, ActivityKind::Commit);

    let report = handle.stop().await.unwrap();
    assert_eq!(report.discarded_records, 0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_batch_is_retried_ahead_of_newer_records() {
    let backend = Arc::new(FakeBackend::designating("s1"));
    backend.track_failures.store(1, Ordering::SeqCst);
    let mut handle = tracker::spawn(online_config(3), Some(backend.clone()), Some("s1".to_string())).unwrap();
    let mut events = handle.subscribe();
    become_active(&mut events).await;

    for seq in 0..3 {
        handle.record(seq_record("s1", seq)).unwrap();
    }
    // First delivery fails; these arrive during the backoff
    settle().await;
    for seq in 3..5 {
        handle.record(seq_record("s1", seq)).unwrap();
    }

    tokio::time::sleep(Duration::from_secs(2)).await;

    // The retry goes out alone; newer records follow as a fresh batch
    let delivered = backend.batches.lock().unwrap().clone();
    assert_eq!(delivered.len(), 2);
    assert_eq!(delivered[0].attempt, 1);
    assert_eq!(delivered[1].attempt, 0);
    assert_eq!(backend.delivered_sequences(), vec![vec![0, 1, 2], vec![3, 4]]);
    assert_eq!(handle.status().delivered_batches, 2);

    handle.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_records_queued_during_backoff_outlive_a_dropped_batch() {
    let backend = Arc::new(FakeBackend::designating("s1"));
    backend.track_failures.store(2, Ordering::SeqCst);
    let mut config = online_config(3);
    config.backend.retry_count = 1;
    let mut handle = tracker::spawn(config, Some(backend.clone()), Some("s1".to_string())).unwrap();
    let mut events = handle.subscribe();
    become_active(&mut events).await;

    for seq in 0..3 {
        handle.record(seq_record("s1", seq)).unwrap();
    }
    settle().await;
    for seq in 3..5 {
        handle.record(seq_record("s1", seq)).unwrap();
    }

    let event = next_matching(&mut events, |e| matches!(e, TrackerEvent::DeliveryFailed { .. })).await;
    match event {
        TrackerEvent::DeliveryFailed { records, attempts, .. } => {
            assert_eq!(records, 3);
            assert_eq!(attempts, 2);
        }
        other => panic!("unexpected event {:?}", other),
    }
    settle().await;

    assert_eq!(backend.delivered_sequences(), vec![vec![3, 4]]);
    assert_eq!(backend.batches.lock().unwrap()[0].attempt, 0);
    let status = handle.status();
    assert_eq!(status.failed_batches, 1);
    assert_eq!(status.delivered_batches, 1);
    assert_eq!(status.queued_records, 0);

    let report = handle.stop().await.unwrap();
    assert_eq!(report.discarded_records, 0);
}

#[tokio::test(start_paused = true)]
async fn test_flush_timer_sends_partial_batches() {
    let backend = Arc::new(FakeBackend::designating("s1"));
    let mut handle = tracker::spawn(online_config(20), Some(backend.clone()), Some("s1".to_string())).unwrap();
    let mut events = handle.subscribe();
    become_active(&mut events).await;

    handle.record(seq_record("s1", 0)).unwrap();
    handle.record(seq_record("s1", 1)).unwrap();

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert!(backend.batches.lock().unwrap().is_empty());
    assert_eq!(handle.status().queued_records, 2);

    // Flush interval defaults to 30s
    tokio::time::sleep(Duration::from_secs(15)).await;
    assert_eq!(backend.delivered_sequences(), vec![vec![0, 1]]);
    assert_eq!(handle.status().queued_records, 0);

    handle.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_stop_waits_for_a_quick_delivery() {
    let backend = Arc::new(FakeBackend {
        track_delay: Duration::from_secs(2),
        ..FakeBackend::designating("s1")
    });
    let mut handle = tracker::spawn(online_config(3), Some(backend.clone()), Some("s1".to_string())).unwrap();
    let mut events = handle.subscribe();
    become_active(&mut events).await;

    for seq in 0..3 {
        handle.record(seq_record("s1", seq)).unwrap();
    }
    settle().await;
    assert!(backend.batches.lock().unwrap().is_empty());

    let report = handle.stop().await.unwrap();
    assert_eq!(report.abandoned_requests, 0);
    assert_eq!(report.discarded_records, 0);
    assert_eq!(backend.delivered_sequences(), vec![vec![0, 1, 2]]);
}

#[tokio::test(start_paused = true)]
async fn test_stop_abandons_delivery_past_drain_timeout() {
    let backend = Arc::new(FakeBackend {
        track_delay: Duration::from_secs(60),
        ..FakeBackend::designating("s1")
    });
    let mut handle = tracker::spawn(online_config(3), Some(backend.clone()), Some("s1".to_string())).unwrap();
    let mut events = handle.subscribe();
    become_active(&mut events).await;

    for seq in 0..3 {
        handle.record(seq_record("s1", seq)).unwrap();
    }
    settle().await;

    let started = tokio::time::Instant::now();
    let report = handle.stop().await.unwrap();
    // Drain timeout defaults to 5s
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(report.abandoned_requests, 1);
    assert_eq!(report.discarded_records, 3);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(backend.batches.lock().unwrap().is_empty());
}

#[test]
fn test_future_timestamps_do_not_stall_flow_inference() {
    let config = Config {
        flow: pulsedev_core::config::FlowConfig {
            keystroke_threshold: 0.1,
            ..Default::default()
        },
        ..Default::default()
    };
    let mut buffer = ActivityBuffer::new("s1", &config.capture);
    let mut classifier = FlowClassifier::new("s1", config.flow.clone());
    let window = chrono::Duration::from_std(classifier.window()).unwrap();

    let base = Utc::now();
    for _ in 0..10 {
        buffer.push(ActivityRecord::new(ActivityKind::Edit, "s1", Utc::now()));
    }
    let mut evaluate = |buffer: &ActivityBuffer, now: chrono::DateTime<Utc>| {
        classifier
            .evaluate(buffer.recent(now - window), buffer.last_activity(), now)
            .snapshot
            .state
    };
    for secs in 1..=3 {
        evaluate(&buffer, base + chrono::Duration::seconds(secs));
    }
    assert_eq!(evaluate(&buffer, base + chrono::Duration::seconds(4)), FlowState::InFlow);

    // An editor with a clock an hour ahead
    buffer.push(ActivityRecord::new(
        ActivityKind::Edit,
        "s1",
        Utc::now() + chrono::Duration::hours(1),
    ));
    assert!(buffer.last_activity().unwrap() <= Utc::now());

    // Silence still reads as silence
    assert_eq!(evaluate(&buffer, base + chrono::Duration::seconds(40)), FlowState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_batch_dropped_after_retries() {
    let backend = Arc::new(FakeBackend::designating("s1"));
    backend.track_failures.store(100, Ordering::SeqCst);
    let mut handle = tracker::spawn(online_config(2), Some(backend.clone()), Some("s1".to_string())).unwrap();
    let mut events = handle.subscribe();
    become_active(&mut events).await;

    handle.record(seq_record("s1", 0)).unwrap();
    handle.record(seq_record("s1", 1)).unwrap();

    let event = next_matching(&mut events, |e| matches!(e, TrackerEvent::DeliveryFailed { .. })).await;
    match event {
        TrackerEvent::DeliveryFailed { records, attempts, .. } => {
            assert_eq!(records, 2);
            assert_eq!(attempts, 4);
        }
        other => panic!("unexpected event {:?}", other),
    }
    settle().await;
    assert_eq!(handle.status().failed_batches, 1);
    assert_eq!(handle.status().queued_records, 0);

    handle.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_rejections_surface_once() {
    let backend = Arc::new(FakeBackend {
        reject_awards: true,
        ..FakeBackend::designating("s1")
    });
    let mut handle = tracker::spawn(online_config(20), Some(backend.clone()), Some("s1".to_string())).unwrap();
    let mut events = handle.subscribe();
    become_active(&mut events).await;

    for _ in 0..3 {
        handle.record(ActivityRecord::new(ActivityKind::Commit, "s1", Utc::now())).unwrap();
    }
    settle().await;

    let mut rejections = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, TrackerEvent::BackendRejected { .. }) {
            rejections += 1;
        }
    }
    assert_eq!(rejections, 1);
    assert_eq!(backend.award_calls.load(Ordering::SeqCst), 3);

    let status = handle.status();
    assert_eq!(status.total_xp, 0);
    assert_eq!(status.pending_awards, 0);

    handle.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_sync_reconciles_profile_total() {
    let backend = Arc::new(FakeBackend::designating("s1"));
    *backend.profile.lock().unwrap() = Some(UserProfile {
        total_xp: 950,
        current_streak: 4,
        ..Default::default()
    });
    let mut handle = tracker::spawn(online_config(20), Some(backend.clone()), Some("s1".to_string())).unwrap();
    let mut events = handle.subscribe();
    become_active(&mut events).await;
    settle().await;

    let status = handle.status();
    assert_eq!(status.total_xp, 950);
    assert_eq!(status.level, 3);
    assert_eq!(status.current_streak, 4);
    assert!(status.last_sync_at.is_some());

    handle.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_periodic_sync_follows_interval() {
    let backend = Arc::new(FakeBackend::designating("s1"));
    let mut handle = tracker::spawn(online_config(20), Some(backend.clone()), Some("s1".to_string())).unwrap();
    settle().await;
    assert_eq!(backend.sync_calls.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_secs(301)).await;
    assert_eq!(backend.sync_calls.load(Ordering::SeqCst), 2);

    handle.stop().await.unwrap();
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(backend.sync_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_offline_capture_and_stop() {
    let mut handle = tracker::spawn(Config::default(), None, None).unwrap();
    let session_id = handle.session_id().to_string();
    assert!(!session_id.is_empty());

    for seq in 0..5 {
        handle.record(seq_record(&session_id, seq)).unwrap();
    }
    // Records from another session are refused
    handle.record(seq_record("someone-else", 99)).unwrap();
    settle().await;

    let status = handle.status();
    assert_eq!(status.designation, Designation::Unknown);
    assert_eq!(status.queued_records, 5);
    assert_eq!(status.buffer.refused, 1);

    let report = handle.stop().await.unwrap();
    assert_eq!(report.session_id, session_id);
    assert_eq!(report.discarded_records, 5);

    // Stop is idempotent; the tracker no longer accepts input
    assert_eq!(handle.stop().await.unwrap(), report);
    assert!(matches!(
        handle.record(seq_record(&session_id, 6)),
        Err(Error::TrackerClosed)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_flow_changes_are_broadcast() {
    pulsedev_core::logging::init_test();

    let mut config = Config::default();
    config.flow.keystroke_threshold = 0.1;
    let mut handle = tracker::spawn(config, None, Some("s1".to_string())).unwrap();
    let mut events = handle.subscribe();
    let status = handle.watch_status();

    // Integrations capture from their own tasks
    let capturer = handle.capturer();
    tokio::spawn(async move {
        for _ in 0..10 {
            capturer
                .capture(RawEvent::new("edit", json!({"file": "src/lib.rs"})))
                .unwrap();
        }
    })
    .await
    .unwrap();

    for _ in 0..3 {
        handle.evaluate().unwrap();
    }

    let event = next_matching(&mut events, |e| {
        matches!(
            e,
            TrackerEvent::FlowChanged {
                to: FlowState::InFlow,
                ..
            }
        )
    })
    .await;
    match event {
        TrackerEvent::FlowChanged { from, snapshot, .. } => {
            assert_eq!(from, FlowState::EnteringFlow);
            assert_eq!(snapshot.session_id, "s1");
            assert_eq!(snapshot.context_switches, 1);
        }
        other => panic!("unexpected event {:?}", other),
    }

    settle().await;
    assert_eq!(status.borrow().flow_state, FlowState::InFlow);
    assert!(status.borrow().flow.is_some());

    handle.stop().await.unwrap();
}

//! Session lifecycle, active-session designation and periodic timers
//!
//! ```text
//! uninitialized ──initialize──▶ initialized ──start──▶ active ──stop──▶ stopped
//! ```
//!
//! The session id is generated once on `initialize` and never changes.
//! Designation is tracked apart from the lifecycle: until the first sync
//! answers, a session is `unknown` and behaves like `standby` for rewards.
//!
//! Timers are spawned tasks that share one cancellation token, so `stop`
//! cancels all of them at once.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::sync::SyncData;
use crate::types::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    #[default]
    Uninitialized,
    Initialized,
    Active,
    Stopped,
}

/// Whether the backend lets this session earn XP
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Designation {
    /// No sync has answered yet
    #[default]
    Unknown,
    Active,
    Standby,
}

impl Designation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Designation::Unknown => "unknown",
            Designation::Active => "active",
            Designation::Standby => "standby",
        }
    }
}

impl std::fmt::Display for Designation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

pub struct SessionManager {
    lifecycle: Lifecycle,
    session: Option<Session>,
    designation: Designation,
    last_sync_at: Option<DateTime<Utc>>,
    cancel_token: CancellationToken,
    timers: Vec<(&'static str, JoinHandle<()>)>,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            lifecycle: Lifecycle::Uninitialized,
            session: None,
            designation: Designation::Unknown,
            last_sync_at: None,
            cancel_token: CancellationToken::new(),
            timers: Vec::new(),
        }
    }

    /// Generate the session identity. Later calls return the same session.
    pub fn initialize(&mut self, now: DateTime<Utc>) -> &Session {
        self.initialize_with_id(Uuid::new_v4().to_string(), now)
    }

    /// Like [`SessionManager::initialize`] with a caller-chosen id
    pub fn initialize_with_id(&mut self, id: impl Into<String>, now: DateTime<Utc>) -> &Session {
        if self.lifecycle == Lifecycle::Uninitialized {
            self.lifecycle = Lifecycle::Initialized;
        }
        let session = self.session.get_or_insert_with(|| {
            let session = Session {
                id: id.into(),
                created_at: now,
                active: false,
            };
            tracing::info!(session_id = %session.id, "Session initialized");
            session
        });
        session
    }

    /// Move to `active`. Returns `Ok(false)` when already active.
    pub fn start(&mut self) -> Result<bool> {
        match self.lifecycle {
            Lifecycle::Initialized => {
                self.lifecycle = Lifecycle::Active;
                tracing::info!(session_id = self.id().unwrap_or_default(), "Session started");
                Ok(true)
            }
            Lifecycle::Active => Ok(false),
            Lifecycle::Uninitialized => Err(Error::Session(
                "session must be initialized before start".to_string(),
            )),
            Lifecycle::Stopped => Err(Error::Session(
                "a stopped session cannot be restarted".to_string(),
            )),
        }
    }

    /// Spawn a periodic task that runs `on_tick` every `period` until stop.
    ///
    /// The first tick fires after one full period. `on_tick` returning `false`
    /// ends the timer early (its receiver is gone).
    pub fn spawn_timer<F>(&mut self, name: &'static str, period: Duration, mut on_tick: F) -> Result<()>
    where
        F: FnMut() -> bool + Send + 'static,
    {
        if self.lifecycle != Lifecycle::Active {
            return Err(Error::Session(format!(
                "cannot schedule {} timer while {:?}",
                name, self.lifecycle
            )));
        }

        let token = self.cancel_token.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if !on_tick() {
                            break;
                        }
                    }
                }
            }
            tracing::trace!(timer = name, "Timer stopped");
        });

        self.timers.push((name, handle));
        Ok(())
    }

    /// Cancel every timer and move to `stopped`. Returns `false` if already stopped.
    pub fn stop(&mut self) -> bool {
        if self.lifecycle == Lifecycle::Stopped {
            return false;
        }
        self.cancel_token.cancel();
        self.lifecycle = Lifecycle::Stopped;
        if let Some(session) = self.session.as_mut() {
            session.active = false;
        }
        tracing::info!(
            session_id = self.id().unwrap_or_default(),
            timers = self.timers.len(),
            "Session stopped"
        );
        true
    }

    /// Wait for cancelled timers to wind down
    pub async fn join_timers(&mut self) {
        for (name, handle) in self.timers.drain(..) {
            if let Err(e) = handle.await {
                tracing::warn!(timer = name, error = %e, "Timer task failed");
            }
        }
    }

    /// Adopt the backend's designation. Returns the previous value if it changed.
    pub fn apply_sync(&mut self, data: &SyncData, now: DateTime<Utc>) -> Option<Designation> {
        let Some(session) = self.session.as_mut() else {
            return None;
        };
        self.last_sync_at = Some(now);

        let next = if data.active_session.as_deref() == Some(session.id.as_str()) {
            Designation::Active
        } else {
            Designation::Standby
        };
        // Stopped sessions never claim the designation back
        let next = if self.lifecycle == Lifecycle::Stopped {
            Designation::Standby
        } else {
            next
        };
        session.active = next == Designation::Active;

        let previous = std::mem::replace(&mut self.designation, next);
        if previous == next {
            return None;
        }
        tracing::info!(
            session_id = %session.id,
            from = %previous,
            to = %next,
            active_session = data.active_session.as_deref().unwrap_or("none"),
            "Designation changed"
        );
        Some(previous)
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn designation(&self) -> Designation {
        self.designation
    }

    /// Whether this session may earn XP and send batches right now
    pub fn is_designated_active(&self) -> bool {
        self.designation == Designation::Active && self.lifecycle == Lifecycle::Active
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.id.as_str())
    }

    pub fn last_sync_at(&self) -> Option<DateTime<Utc>> {
        self.last_sync_at
    }

    pub fn timer_count(&self) -> usize {
        self.timers.len()
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

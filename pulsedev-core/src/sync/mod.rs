//! Backend synchronization
//!
//! Delivers activity batches, XP award requests and session syncs to the
//! PulseDev gamification API, and reads the profile, dashboard and
//! achievement views.
//!
//! ## Usage
//!
//! ```ignore
//! use pulsedev_core::sync::{ApiClient, Backend};
//!
//! let client = ApiClient::new(config.backend.clone())?;
//! let stats = client.fetch_profile(&session_id).await?;
//! ```

mod backend;
mod client;
mod events;

pub use backend::Backend;
pub use client::{backoff_delay, with_retry, ApiClient};
pub use events::{
    compute_event_hash, Achievements, AwardRequest, BatchPayload, SessionSyncRequest, SyncData,
    UserProfile, UserStats, WireRecord, BATCH_PAYLOAD_TYPE,
};

//! # pulsedev-core
//!
//! Client-side engine for PulseDev, a developer-productivity gamification
//! platform.
//!
//! This library provides:
//! - Activity normalization and bounded, ordered buffering
//! - Local flow-state inference (idle, in flow, interrupted, stuck, ...)
//! - Batched, retried delivery to the scoring backend
//! - An optimistic XP ledger that only counts backend-confirmed awards
//! - Session lifecycle and active-session designation across clients
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! Everything runs on one tracker task:
//! - **Capture:** editor events are normalized and queued; never blocks
//! - **Inference:** the flow classifier reads recent history on a timer
//! - **Sync:** batches, award requests and session syncs go out as spawned
//!   tasks and their results come back to the tracker as messages
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pulsedev_core::{sync::ApiClient, tracker, Config, RawEvent};
//!
//! # async fn run() -> pulsedev_core::Result<()> {
//! let config = Config::load()?;
//! let client = ApiClient::new(config.backend.clone())?;
//! let mut handle = tracker::spawn(config, Some(Arc::new(client)), None)?;
//!
//! handle.capture(RawEvent::new("textDocument/didChange", serde_json::json!({"file": "src/main.rs"})))?;
//! let report = handle.stop().await?;
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use capture::{ActivityBuffer, Normalizer, RawEvent};
pub use config::{Config, Features};
pub use error::{Error, Result};
pub use flow::FlowClassifier;
pub use ledger::XpLedger;
pub use session::{Designation, Lifecycle, SessionManager};
pub use tracker::{StatusSnapshot, StopReport, TrackerEvent, TrackerHandle};
pub use types::*;

// Public modules
pub mod capture;
pub mod config;
pub mod error;
pub mod flow;
pub mod ledger;
pub mod logging;
pub mod session;
pub mod sync;
pub mod tracker;
pub mod types;
